//! Bounded burst queue for input ports
//!
//! Producers (transport calls) wait while the queue holds `threshold` or more
//! bursts; consumers drain it with a timed wait. Stopping the queue wakes every
//! waiter, and anything pushed while stopped is dropped.
//!
//! ```text
//!   push_bursts ──► [ b0 b1 b2 ... ] ──► get_burst / get_bursts
//!        ▲               │  len >= threshold        │
//!        └── not_full ◄──┘                          │
//!                        not_empty ─────────────────┘
//! ```
//!
//! The wait/notify pairs follow the usual condition-variable shape: a waiter
//! registers with the `Notify` before inspecting the state under the lock, so a
//! notification sent between the check and the await is never lost.

use std::collections::{BTreeSet, VecDeque};
use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use tracing::Span;

use super::state::{PortUsage, PushOutcome};
use crate::burst::packet::total_elements;
use crate::burst::{Burst, Sample};
use crate::error::{Error, Result};
use crate::stats::{PortStatistics, ReceiverStatistics};

/// Upper bound for a single timed wait
const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// State protected by the queue mutex
struct QueueState<T: Sample> {
    bursts: VecDeque<Burst<T>>,
    threshold: usize,
    started: bool,
    block_occurred: bool,
    stream_ids: BTreeSet<String>,
    statistics: ReceiverStatistics,
}

impl<T: Sample> QueueState<T> {
    fn is_full(&self) -> bool {
        self.bursts.len() >= self.threshold
    }

    fn note_dequeued(&mut self, burst: &Burst<T>, span: &Span) {
        if burst.eos {
            tracing::trace!(parent: span, stream = %burst.stream_id(), "Received EOS");
            self.stream_ids.remove(burst.stream_id());
        }
    }
}

/// Bounded FIFO of bursts with blocking producers
pub struct BoundedStreamQueue<T: Sample> {
    state: Mutex<QueueState<T>>,
    not_full: Notify,
    not_empty: Notify,
    span: Span,
}

impl<T: Sample> BoundedStreamQueue<T> {
    /// Create a stopped queue
    pub fn new(name: &str, threshold: NonZeroUsize, span: Span) -> Self {
        Self {
            state: Mutex::new(QueueState {
                bursts: VecDeque::new(),
                threshold: threshold.get(),
                started: false,
                block_occurred: false,
                stream_ids: BTreeSet::new(),
                statistics: ReceiverStatistics::new(name, T::bits()),
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            span,
        }
    }

    /// Accept bursts
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        state.started = true;
        tracing::trace!(parent: &self.span, "Port started");
    }

    /// Stop accepting bursts and wake every waiting producer and consumer
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.started = false;
        tracing::trace!(parent: &self.span, "Port stopped");
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Whether the queue is accepting bursts
    pub async fn is_started(&self) -> bool {
        self.state.lock().await.started
    }

    /// Current blocking threshold
    pub async fn threshold(&self) -> usize {
        self.state.lock().await.threshold
    }

    /// Change the blocking threshold
    pub async fn set_threshold(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::IllegalArgument(
                "Queue threshold must be at least 1".into(),
            ));
        }

        let mut state = self.state.lock().await;
        if count > state.threshold {
            self.not_full.notify_waiters();
        }
        state.threshold = count;
        Ok(())
    }

    /// Queue a sequence of bursts, waiting while the queue is full
    ///
    /// All bursts of one call are appended together. If the queue is stopped,
    /// either on arrival or while waiting, the bursts are dropped.
    pub async fn push_bursts(&self, bursts: Vec<Burst<T>>) -> PushOutcome {
        let begin = std::time::Instant::now();

        // Depth is sampled on arrival, so a consumer that keeps up averages near
        // zero and a blocking one sits at or above 1.0
        let mut queue_depth: Option<f32> = None;
        let mut blocked = false;

        let mut state = loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut state = self.state.lock().await;
            if queue_depth.is_none() {
                queue_depth = Some(state.bursts.len() as f32 / state.threshold as f32);
            }
            if !(state.started && state.is_full()) {
                break state;
            }

            // Latch the block once per call
            if !blocked {
                blocked = true;
                state.block_occurred = true;
                tracing::debug!(
                    parent: &self.span,
                    queued = state.bursts.len(),
                    threshold = state.threshold,
                    "Queue full, blocking producer"
                );
            }
            drop(state);
            notified.await;
        };

        if !state.started {
            tracing::trace!(
                parent: &self.span,
                bursts = bursts.len(),
                "Port is stopped, discarding bursts"
            );
            return if blocked {
                PushOutcome::Abandoned
            } else {
                PushOutcome::Discarded
            };
        }

        let total_bursts = bursts.len();
        let elements = total_elements(&bursts);
        for burst in bursts.iter().filter(|b| !b.eos) {
            if !state.stream_ids.contains(burst.stream_id()) {
                state.stream_ids.insert(burst.stream_id().to_owned());
            }
        }

        if total_bursts > 0 {
            tracing::trace!(parent: &self.span, bursts = total_bursts, "Queueing bursts");
            state.bursts.extend(bursts);
            self.not_empty.notify_waiters();
        } else {
            tracing::debug!(parent: &self.span, "Push contained no bursts");
        }

        let elapsed = begin.elapsed().as_secs_f64();
        state
            .statistics
            .record(total_bursts, elements, queue_depth.unwrap_or(0.0), elapsed);

        PushOutcome::Queued
    }

    /// Take the oldest burst, waiting up to `timeout` seconds for one
    ///
    /// A timeout of zero or less polls. Returns `None` on timeout or if the
    /// queue is stopped.
    pub async fn get_burst(&self, timeout: f32) -> Option<Burst<T>> {
        let mut state = self.wait_burst(timeout).await?;
        let burst = state.bursts.pop_front()?;
        state.note_dequeued(&burst, &self.span);

        if !state.is_full() {
            self.not_full.notify_waiters();
        }
        Some(burst)
    }

    /// Take every queued burst, waiting up to `timeout` seconds for at least one
    ///
    /// A timeout of zero or less polls. Returns an empty vector on timeout or if
    /// the queue is stopped.
    pub async fn get_bursts(&self, timeout: f32) -> Vec<Burst<T>> {
        let mut state = match self.wait_burst(timeout).await {
            Some(state) => state,
            None => return Vec::new(),
        };

        let bursts: Vec<Burst<T>> = state.bursts.drain(..).collect();
        for burst in &bursts {
            state.note_dequeued(burst, &self.span);
        }
        tracing::trace!(parent: &self.span, bursts = bursts.len(), "Returning queued bursts");

        self.not_full.notify_waiters();
        bursts
    }

    /// Wait until the queue has data, the timeout passes, or the queue stops
    ///
    /// On success the lock is handed back to the caller so the dequeue happens
    /// under the same critical section as the check.
    async fn wait_burst(&self, timeout: f32) -> Option<MutexGuard<'_, QueueState<T>>> {
        let deadline = wait_deadline(timeout);
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.state.lock().await;
            if !state.started {
                return None;
            }
            if !state.bursts.is_empty() {
                return Some(state);
            }

            let deadline = deadline?;
            drop(state);
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Discard everything queued and wake blocked producers
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        if !state.bursts.is_empty() {
            let dropped = state.bursts.len();
            tracing::debug!(parent: &self.span, bursts = dropped, "Flushing queue");
            state.statistics.flush_occurred(dropped);
            state.bursts.clear();
            self.not_full.notify_waiters();
        }
    }

    /// Whether a producer blocked since the last call; clears the flag
    pub async fn block_occurred(&self) -> bool {
        let mut state = self.state.lock().await;
        std::mem::replace(&mut state.block_occurred, false)
    }

    /// Number of queued bursts
    pub async fn queue_depth(&self) -> usize {
        self.state.lock().await.bursts.len()
    }

    /// Usage state derived from the queue depth
    pub async fn state(&self) -> PortUsage {
        let state = self.state.lock().await;
        if state.bursts.is_empty() {
            PortUsage::Idle
        } else if state.is_full() {
            PortUsage::Busy
        } else {
            PortUsage::Active
        }
    }

    /// Receiver statistics plus the streams currently open
    pub async fn statistics(&self) -> PortStatistics {
        let state = self.state.lock().await;
        let mut stats = state.statistics.retrieve();
        stats.stream_ids = state.stream_ids.iter().cloned().collect();
        stats
    }
}

/// Deadline for a timed wait; `None` means poll
fn wait_deadline(timeout: f32) -> Option<Instant> {
    if timeout > 0.0 {
        let wait = Duration::try_from_secs_f32(timeout)
            .unwrap_or(MAX_WAIT)
            .min(MAX_WAIT);
        Some(Instant::now() + wait)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;
    use crate::burst::BurstSri;

    fn burst(stream: &str, len: usize) -> Burst<f32> {
        Burst::now(BurstSri::new(stream), vec![0.0f32; len])
    }

    fn queue(threshold: usize) -> BoundedStreamQueue<f32> {
        BoundedStreamQueue::new("in", NonZeroUsize::new(threshold).unwrap(), Span::none())
    }

    async fn started_queue(threshold: usize) -> BoundedStreamQueue<f32> {
        let queue = queue(threshold);
        queue.start().await;
        queue
    }

    #[tokio::test]
    async fn test_push_and_get() {
        let queue = started_queue(10).await;

        let outcome = queue.push_bursts(vec![burst("s1", 50), burst("s1", 20)]).await;
        assert_eq!(outcome, PushOutcome::Queued);
        assert_eq!(queue.queue_depth().await, 2);

        let first = queue.get_burst(0.0).await.unwrap();
        assert_eq!(first.len(), 50);
        assert_eq!(queue.queue_depth().await, 1);

        let rest = queue.get_bursts(0.0).await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].len(), 20);
        assert!(queue.get_burst(0.0).await.is_none());
    }

    #[tokio::test]
    async fn test_discard_when_stopped() {
        let queue = queue(10);

        let outcome = queue.push_bursts(vec![burst("s1", 1)]).await;
        assert_eq!(outcome, PushOutcome::Discarded);
        assert_eq!(queue.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn test_stopped_queue_returns_nothing() {
        let queue = started_queue(10).await;
        queue.push_bursts(vec![burst("s1", 1)]).await;
        queue.stop().await;

        assert!(queue.get_burst(0.0).await.is_none());
        assert!(queue.get_bursts(1.0).await.is_empty());
        // Data is kept until flushed or restarted
        assert_eq!(queue.queue_depth().await, 1);
        queue.start().await;
        assert!(queue.get_burst(0.0).await.is_some());
    }

    #[tokio::test]
    async fn test_full_batch_below_threshold_does_not_block() {
        let queue = started_queue(3).await;
        let mut push = task::spawn(queue.push_bursts(vec![burst("s", 1), burst("s", 1), burst("s", 1)]));
        assert_ready_eq!(push.poll(), PushOutcome::Queued);
        assert!(!queue.block_occurred().await);
    }

    #[tokio::test]
    async fn test_threshold_blocks_until_drained() {
        let queue = started_queue(2).await;
        queue.push_bursts(vec![burst("s", 1), burst("s", 1)]).await;
        assert_eq!(queue.state().await, PortUsage::Busy);

        let mut push = task::spawn(queue.push_bursts(vec![burst("s", 1)]));
        assert_pending!(push.poll());
        assert_pending!(push.poll());

        let drained = queue.get_bursts(0.0).await;
        assert_eq!(drained.len(), 2);
        assert!(push.is_woken());
        assert_ready_eq!(push.poll(), PushOutcome::Queued);
        assert_eq!(queue.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn test_block_latch_reported_once() {
        let queue = started_queue(1).await;
        queue.push_bursts(vec![burst("s", 1)]).await;
        assert!(!queue.block_occurred().await);

        let mut push = task::spawn(queue.push_bursts(vec![burst("s", 1)]));
        assert_pending!(push.poll());
        // Repeated polling while blocked is still one episode
        assert_pending!(push.poll());

        assert!(queue.block_occurred().await);
        assert!(!queue.block_occurred().await);
        assert!(!queue.block_occurred().await);

        queue.get_burst(0.0).await.unwrap();
        assert_ready_eq!(push.poll(), PushOutcome::Queued);
        assert!(!queue.block_occurred().await);
    }

    #[tokio::test]
    async fn test_raising_threshold_wakes_producer() {
        let queue = started_queue(1).await;
        queue.push_bursts(vec![burst("s", 1)]).await;

        let mut push = task::spawn(queue.push_bursts(vec![burst("s", 1)]));
        assert_pending!(push.poll());

        queue.set_threshold(5).await.unwrap();
        assert!(push.is_woken());
        assert_ready_eq!(push.poll(), PushOutcome::Queued);
        assert_eq!(queue.threshold().await, 5);
        assert!(matches!(
            queue.set_threshold(0).await,
            Err(Error::IllegalArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_wakes_all_blocked_producers() {
        let queue = Arc::new(started_queue(1).await);
        queue.push_bursts(vec![burst("s", 1)]).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue.push_bursts(vec![burst("s", 1)]).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.stop().await;

        for handle in handles {
            let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("producer did not wake on stop")
                .unwrap();
            assert_eq!(outcome, PushOutcome::Abandoned);
        }
        assert_eq!(queue.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn test_get_bursts_times_out() {
        let queue = started_queue(10).await;

        let start = std::time::Instant::now();
        let bursts = queue.get_bursts(0.05).await;
        assert!(bursts.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_negative_timeout_polls() {
        let queue = started_queue(10).await;

        let result = tokio::time::timeout(Duration::from_millis(100), queue.get_bursts(-1.0)).await;
        assert!(result.expect("negative timeout must not wait").is_empty());

        let result = tokio::time::timeout(Duration::from_millis(100), queue.get_burst(-1.0)).await;
        assert!(result.expect("negative timeout must not wait").is_none());
    }

    #[tokio::test]
    async fn test_get_burst_wakes_on_push() {
        let queue = Arc::new(started_queue(10).await);

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get_burst(2.0).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push_bursts(vec![burst("s1", 7)]).await;

        let received = consumer.await.unwrap().expect("consumer timed out");
        assert_eq!(received.len(), 7);
    }

    #[tokio::test]
    async fn test_stop_wakes_consumer() {
        let queue = Arc::new(started_queue(10).await);

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get_bursts(10.0).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(1), consumer).await;
        assert!(result.expect("consumer did not wake on stop").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_discards_and_unblocks() {
        let queue = started_queue(2).await;
        queue.push_bursts(vec![burst("s", 1), burst("s", 1)]).await;

        let mut push = task::spawn(queue.push_bursts(vec![burst("s", 1)]));
        assert_pending!(push.poll());

        queue.flush().await;
        assert!(push.is_woken());
        assert_ready_eq!(push.poll(), PushOutcome::Queued);

        let stats = queue.statistics().await;
        assert_eq!(stats.keyword("FLUSH_COUNT"), Some(1.0));
        assert_eq!(stats.keyword("DROPPED_BURSTS"), Some(2.0));
        assert_eq!(queue.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn test_open_stream_ids() {
        let queue = started_queue(10).await;
        queue.push_bursts(vec![burst("s1", 1), burst("s2", 1)]).await;

        let stats = queue.statistics().await;
        assert_eq!(stats.stream_ids, vec!["s1".to_string(), "s2".to_string()]);

        queue
            .push_bursts(vec![Burst::end_of_stream(BurstSri::new("s1"))])
            .await;
        // Still open until the EOS is consumed
        assert_eq!(queue.statistics().await.stream_ids.len(), 2);

        let drained = queue.get_bursts(0.0).await;
        assert_eq!(drained.len(), 3);
        assert_eq!(queue.statistics().await.stream_ids, vec!["s2".to_string()]);
    }

    #[tokio::test]
    async fn test_usage_state() {
        let queue = started_queue(2).await;
        assert_eq!(queue.state().await, PortUsage::Idle);

        queue.push_bursts(vec![burst("s", 1)]).await;
        assert_eq!(queue.state().await, PortUsage::Active);

        queue.push_bursts(vec![burst("s", 1)]).await;
        assert_eq!(queue.state().await, PortUsage::Busy);
    }

    #[tokio::test]
    async fn test_statistics_record_pushes() {
        let queue = started_queue(4).await;
        queue.push_bursts(vec![burst("s", 10), burst("s", 30)]).await;
        queue.push_bursts(vec![burst("s", 5)]).await;

        let stats = queue.statistics().await;
        assert_eq!(stats.port_name, "in");
        assert_eq!(stats.keyword("TOTAL_BURSTS"), Some(3.0));
        assert_eq!(stats.keyword("TOTAL_ELEMENTS"), Some(45.0));
        // Depths sampled on arrival: 0/4 then 2/4
        assert!((stats.average_queue_depth - 0.25).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_concurrent_producer_order_preserved() {
        let queue = started_queue(2).await;

        // A fills the queue to the threshold without blocking
        let a = queue
            .push_bursts(vec![burst("r1", 1), burst("r2", 1)])
            .await;
        assert_eq!(a, PushOutcome::Queued);

        // B arrives at a full queue and blocks before appending
        let mut b = task::spawn(queue.push_bursts(vec![burst("r3", 1), burst("r4", 1)]));
        assert_pending!(b.poll());

        let first = queue.get_bursts(1.0).await;
        let ids: Vec<&str> = first.iter().map(|b| b.stream_id()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);

        assert_ready_eq!(b.poll(), PushOutcome::Queued);
        let second = queue.get_bursts(1.0).await;
        let ids: Vec<&str> = second.iter().map(|b| b.stream_id()).collect();
        assert_eq!(ids, vec!["r3", "r4"]);
    }
}
