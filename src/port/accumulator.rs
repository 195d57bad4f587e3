//! Output burst accumulators
//!
//! An accumulator buffers bursts for one output queue and decides when the
//! buffer must be flushed: when it holds `max_bursts` bursts, when the queued
//! payload reaches `byte_threshold` bytes, or when the oldest burst has waited
//! `latency_threshold`. The accumulator never sends anything itself; it hands a
//! [`Batch`] back to the port, and reports window deadlines so the port can
//! arrange a latency check.

use std::time::Duration;

use tokio::time::Instant;

use crate::burst::{Burst, Sample};
use crate::error::{Error, Result};

/// Name used for the default queue in log output
pub const DEFAULT_QUEUE_ID: &str = "(default)";

/// Identifies one accumulator of an output port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueKey {
    /// The default (interleaved) accumulator
    Default,
    /// A per-stream accumulator
    Stream(String),
}

impl QueueKey {
    /// Stream the queue belongs to, if any
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            QueueKey::Default => None,
            QueueKey::Stream(id) => Some(id),
        }
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKey::Default => write!(f, "{}", DEFAULT_QUEUE_ID),
            QueueKey::Stream(id) => write!(f, "{}", id),
        }
    }
}

/// Bursts taken from an accumulator in one flush
#[derive(Debug)]
pub struct Batch<T: Sample> {
    /// Queue the batch came from
    pub key: QueueKey,
    /// Bursts in arrival order
    pub bursts: Vec<Burst<T>>,
    /// When the first burst of the batch was queued
    pub window_start: Instant,
    /// Fill level of the accumulator at flush time (bursts / max_bursts)
    pub queue_depth: f32,
}

impl<T: Sample> Batch<T> {
    /// Stream used for routing decisions; `None` for the default queue
    pub fn stream_id(&self) -> Option<&str> {
        self.key.stream_id()
    }
}

/// What happened when a burst was queued
#[derive(Debug)]
pub struct Queued<T: Sample> {
    /// Latency deadline of a window opened by this burst
    pub deadline: Option<Instant>,
    /// Batch to send, if a threshold was reached
    pub batch: Option<Batch<T>>,
}

/// Burst buffer with count, byte and latency flush triggers
#[derive(Debug)]
pub struct StreamAccumulator<T: Sample> {
    key: QueueKey,
    max_bursts: usize,
    byte_threshold: usize,
    latency_threshold_ns: u64,
    pending: Vec<Burst<T>>,
    queued_bytes: usize,
    window_start: Option<Instant>,
}

impl<T: Sample> StreamAccumulator<T> {
    /// Create an empty accumulator
    pub fn new(key: QueueKey, max_bursts: usize, byte_threshold: usize, latency_us: u64) -> Self {
        Self {
            key,
            max_bursts,
            byte_threshold,
            latency_threshold_ns: latency_us.saturating_mul(1000),
            pending: Vec::new(),
            queued_bytes: 0,
            window_start: None,
        }
    }

    /// Create an empty accumulator with the thresholds of `policy`
    pub fn with_policy_of(key: QueueKey, policy: &StreamAccumulator<T>) -> Self {
        Self {
            key,
            max_bursts: policy.max_bursts,
            byte_threshold: policy.byte_threshold,
            latency_threshold_ns: policy.latency_threshold_ns,
            pending: Vec::new(),
            queued_bytes: 0,
            window_start: None,
        }
    }

    pub fn key(&self) -> &QueueKey {
        &self.key
    }

    /// Number of buffered bursts
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Payload bytes currently buffered
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// When the current window opened; `None` while empty
    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }

    pub fn max_bursts(&self) -> usize {
        self.max_bursts
    }

    /// Change the burst count threshold
    ///
    /// Returns whether the buffer now needs a flush.
    pub fn set_max_bursts(&mut self, count: usize) -> Result<bool> {
        if count == 0 {
            return Err(Error::IllegalArgument("Max bursts must be at least 1".into()));
        }
        self.max_bursts = count;
        Ok(!self.is_empty() && self.pending.len() >= self.max_bursts)
    }

    pub fn byte_threshold(&self) -> usize {
        self.byte_threshold
    }

    /// Change the byte threshold
    ///
    /// Returns whether the buffer now needs a flush.
    pub fn set_byte_threshold(&mut self, bytes: usize) -> bool {
        self.byte_threshold = bytes;
        !self.is_empty() && self.queued_bytes >= self.byte_threshold
    }

    /// Latency threshold in whole microseconds
    pub fn latency_threshold_us(&self) -> u64 {
        self.latency_threshold_ns / 1000
    }

    pub fn latency_threshold(&self) -> Duration {
        Duration::from_nanos(self.latency_threshold_ns)
    }

    /// Change the latency threshold
    ///
    /// Returns the deadline of the open window under the new threshold, so the
    /// caller can schedule a check for it.
    pub fn set_latency_threshold_us(&mut self, usec: u64) -> Option<Instant> {
        self.latency_threshold_ns = usec.saturating_mul(1000);
        self.deadline()
    }

    /// When the open window must be flushed
    pub fn deadline(&self) -> Option<Instant> {
        self.window_start
            .and_then(|start| start.checked_add(self.latency_threshold()))
    }

    /// Buffer a burst, flushing if any trigger has fired
    ///
    /// The latency clause is checked here as well as by the monitor, so a
    /// window that is already past its deadline flushes on the next push.
    pub fn queue_burst(&mut self, burst: Burst<T>, now: Instant) -> Queued<T> {
        let mut deadline = None;
        if self.window_start.is_none() {
            self.window_start = Some(now);
            deadline = self.deadline();
        }

        self.queued_bytes += burst.byte_size();
        self.pending.push(burst);

        let batch = self.check_flush(now);
        Queued { deadline, batch }
    }

    /// Whether any trigger has fired
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.is_empty() {
            return false;
        }
        if self.over_threshold() {
            return true;
        }
        self.window_start
            .map(|start| now.saturating_duration_since(start) >= self.latency_threshold())
            .unwrap_or(false)
    }

    /// Take the buffered bursts if any trigger has fired
    pub fn check_flush(&mut self, now: Instant) -> Option<Batch<T>> {
        if self.should_flush(now) {
            self.take_batch()
        } else {
            None
        }
    }

    /// Take the buffered bursts unconditionally and reset the window
    pub fn take_batch(&mut self) -> Option<Batch<T>> {
        let window_start = self.window_start.take()?;
        if self.pending.is_empty() {
            return None;
        }

        let queue_depth = self.pending.len() as f32 / self.max_bursts as f32;
        let bursts = std::mem::take(&mut self.pending);
        self.queued_bytes = 0;

        Some(Batch {
            key: self.key.clone(),
            bursts,
            window_start,
            queue_depth,
        })
    }

    fn over_threshold(&self) -> bool {
        self.pending.len() >= self.max_bursts || self.queued_bytes >= self.byte_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::BurstSri;

    fn burst(stream: &str, len: usize) -> Burst<f32> {
        Burst::now(BurstSri::new(stream), vec![0.0f32; len])
    }

    fn accumulator(max_bursts: usize, bytes: usize, latency_us: u64) -> StreamAccumulator<f32> {
        StreamAccumulator::new(QueueKey::Default, max_bursts, bytes, latency_us)
    }

    #[test]
    fn test_count_threshold_flushes() {
        let mut acc = accumulator(3, usize::MAX, 1_000_000);
        let now = Instant::now();

        assert!(acc.queue_burst(burst("s", 1), now).batch.is_none());
        assert!(acc.queue_burst(burst("s", 1), now).batch.is_none());
        let batch = acc.queue_burst(burst("s", 1), now).batch.unwrap();

        assert_eq!(batch.bursts.len(), 3);
        assert_eq!(batch.queue_depth, 1.0);
        assert_eq!(batch.window_start, now);
        assert!(acc.is_empty());
        assert_eq!(acc.window_start(), None);
    }

    #[test]
    fn test_byte_threshold_flushes() {
        // 25 f32 elements are 100 bytes
        let mut acc = accumulator(100, 200, 1_000_000);
        let now = Instant::now();

        assert!(acc.queue_burst(burst("s", 25), now).batch.is_none());
        assert_eq!(acc.queued_bytes(), 100);
        let batch = acc.queue_burst(burst("s", 25), now).batch.unwrap();

        assert_eq!(batch.bursts.len(), 2);
        assert_eq!(acc.queued_bytes(), 0);
    }

    #[test]
    fn test_deadline_only_when_window_opens() {
        let mut acc = accumulator(10, usize::MAX, 500);
        let now = Instant::now();

        let first = acc.queue_burst(burst("s", 1), now);
        assert_eq!(first.deadline, Some(now + Duration::from_micros(500)));

        let second = acc.queue_burst(burst("s", 1), now + Duration::from_micros(10));
        assert_eq!(second.deadline, None);
        assert_eq!(acc.window_start(), Some(now));
    }

    #[test]
    fn test_latency_trigger() {
        let mut acc = accumulator(10, usize::MAX, 500);
        let now = Instant::now();
        acc.queue_burst(burst("s", 1), now);

        assert!(!acc.should_flush(now + Duration::from_micros(499)));
        assert!(acc.check_flush(now + Duration::from_micros(499)).is_none());

        let batch = acc.check_flush(now + Duration::from_micros(500)).unwrap();
        assert_eq!(batch.bursts.len(), 1);
        assert!((batch.queue_depth - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_latency_flushes_on_push() {
        let mut acc = accumulator(10, usize::MAX, 0);
        let batch = acc.queue_burst(burst("s", 1), Instant::now()).batch.unwrap();
        assert_eq!(batch.bursts.len(), 1);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_expired_window_flushes_on_next_push() {
        let mut acc = accumulator(10, usize::MAX, 500);
        let now = Instant::now();
        assert!(acc.queue_burst(burst("s", 1), now).batch.is_none());

        let later = now + Duration::from_micros(600);
        let batch = acc.queue_burst(burst("s", 1), later).batch.unwrap();
        assert_eq!(batch.bursts.len(), 2);
        assert_eq!(batch.window_start, now);
    }

    #[test]
    fn test_empty_never_flushes() {
        let mut acc = accumulator(1, 0, 0);
        assert!(!acc.should_flush(Instant::now()));
        assert!(acc.take_batch().is_none());
    }

    #[test]
    fn test_lowering_thresholds_requests_flush() {
        let mut acc = accumulator(10, usize::MAX, 1_000_000);
        let now = Instant::now();
        acc.queue_burst(burst("s", 4), now);
        acc.queue_burst(burst("s", 4), now);

        assert!(!acc.set_max_bursts(3).unwrap());
        assert!(acc.set_max_bursts(2).unwrap());
        assert!(matches!(acc.set_max_bursts(0), Err(Error::IllegalArgument(_))));

        assert!(!acc.set_byte_threshold(64));
        assert!(acc.set_byte_threshold(32));
    }

    #[test]
    fn test_latency_setter_reports_new_deadline() {
        let mut acc = accumulator(10, usize::MAX, 1_000_000);
        assert_eq!(acc.set_latency_threshold_us(20), None);

        let now = Instant::now();
        acc.queue_burst(burst("s", 1), now);
        assert_eq!(
            acc.set_latency_threshold_us(20),
            Some(now + Duration::from_micros(20))
        );
        assert_eq!(acc.latency_threshold_us(), 20);
    }

    #[test]
    fn test_inherits_policy() {
        let default = accumulator(7, 1024, 250);
        let stream = StreamAccumulator::with_policy_of(QueueKey::Stream("s1".into()), &default);

        assert_eq!(stream.max_bursts(), 7);
        assert_eq!(stream.byte_threshold(), 1024);
        assert_eq!(stream.latency_threshold_us(), 250);
        assert_eq!(stream.key().stream_id(), Some("s1"));
    }

    #[test]
    fn test_huge_latency_saturates() {
        let mut acc = accumulator(10, usize::MAX, u64::MAX);
        acc.queue_burst(burst("s", 1), Instant::now());
        assert_eq!(acc.latency_threshold(), Duration::from_nanos(u64::MAX));
        assert!(!acc.should_flush(Instant::now()));
    }
}
