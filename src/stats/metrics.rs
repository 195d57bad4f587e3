//! Statistics and metrics for burst ports
//!
//! Both sides of a connection keep a short history of calls and report rates
//! averaged over that window. Receivers additionally count flushed bursts;
//! senders report the latency between a batch window opening and delivery.

use std::collections::VecDeque;
use std::time::Instant;

/// Number of calls kept for rate averaging
pub const HISTORY_WINDOW: usize = 10;

/// Named value reported alongside the fixed statistics fields
#[derive(Debug, Clone, PartialEq)]
pub struct StatKeyword {
    /// Keyword name
    pub id: String,
    /// Keyword value
    pub value: f64,
}

impl StatKeyword {
    fn new(id: &str, value: f64) -> Self {
        Self {
            id: id.to_owned(),
            value,
        }
    }
}

/// Snapshot of a port's (or connection's) statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortStatistics {
    /// Name of the port
    pub port_name: String,
    /// Elements per second over the history window
    pub elements_per_second: f32,
    /// Bits per second over the history window
    pub bits_per_second: f32,
    /// Calls per second over the history window
    pub calls_per_second: f32,
    /// Stream IDs currently flowing through the port
    pub stream_ids: Vec<String>,
    /// Average queue depth ratio over the history window
    pub average_queue_depth: f32,
    /// Seconds since the last recorded call (-1 if none)
    pub time_since_last_call: f32,
    /// Additional named values
    pub keywords: Vec<StatKeyword>,
}

impl PortStatistics {
    /// Look up a keyword value by name
    pub fn keyword(&self, id: &str) -> Option<f64> {
        self.keywords.iter().find(|k| k.id == id).map(|k| k.value)
    }
}

/// Statistics for one connection of an output port
#[derive(Debug, Clone, PartialEq)]
pub struct UsesPortStatistics {
    /// Connection identifier
    pub connection_id: String,
    /// Statistics for the connection
    pub statistics: PortStatistics,
}

/// One recorded call
#[derive(Debug, Clone)]
struct CallRecord {
    at: Instant,
    bursts: usize,
    elements: usize,
    queue_depth: f32,
    elapsed: f64,
}

/// Shared windowed accumulator
#[derive(Debug)]
struct CallHistory {
    name: String,
    bits_per_element: usize,
    history: VecDeque<CallRecord>,
    total_bursts: u64,
    total_elements: u64,
}

impl CallHistory {
    fn new(name: &str, bits_per_element: usize) -> Self {
        Self {
            name: name.to_owned(),
            bits_per_element,
            history: VecDeque::with_capacity(HISTORY_WINDOW),
            total_bursts: 0,
            total_elements: 0,
        }
    }

    fn record(&mut self, bursts: usize, elements: usize, queue_depth: f32, elapsed: f64) {
        if self.history.len() == HISTORY_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(CallRecord {
            at: Instant::now(),
            bursts,
            elements,
            queue_depth,
            elapsed,
        });
        self.total_bursts += bursts as u64;
        self.total_elements += elements as u64;
    }

    fn average<F: Fn(&CallRecord) -> f64>(&self, f: F) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().map(f).sum::<f64>() / self.history.len() as f64
        }
    }

    fn max<F: Fn(&CallRecord) -> f64>(&self, f: F) -> f64 {
        self.history.iter().map(f).fold(0.0, f64::max)
    }

    fn retrieve(&self) -> PortStatistics {
        let now = Instant::now();
        let mut stats = PortStatistics {
            port_name: self.name.clone(),
            time_since_last_call: -1.0,
            ..Default::default()
        };

        // Totals are reported even before the first call
        stats.keywords.push(StatKeyword::new(
            "AVERAGE_BURSTS_PER_PUSH",
            self.average(|r| r.bursts as f64),
        ));
        stats.keywords.push(StatKeyword::new("TOTAL_BURSTS", self.total_bursts as f64));
        stats.keywords.push(StatKeyword::new("TOTAL_ELEMENTS", self.total_elements as f64));

        let (first, last) = match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) => (first, last),
            _ => return stats,
        };

        stats.time_since_last_call = now.duration_since(last.at).as_secs_f32();

        let span = now.duration_since(first.at).as_secs_f64();
        if span > 0.0 {
            let elements: usize = self.history.iter().map(|r| r.elements).sum();
            let elements_per_second = elements as f64 / span;
            stats.elements_per_second = elements_per_second as f32;
            stats.bits_per_second = (elements_per_second * self.bits_per_element as f64) as f32;
            stats.calls_per_second = (self.history.len() as f64 / span) as f32;
        }
        stats.average_queue_depth = self.average(|r| r.queue_depth as f64) as f32;
        stats
    }
}

/// Statistics kept by an input port
#[derive(Debug)]
pub struct ReceiverStatistics {
    history: CallHistory,
    flush_count: u64,
    dropped_bursts: u64,
}

impl ReceiverStatistics {
    /// Create receiver statistics for a port
    pub fn new(port_name: &str, bits_per_element: usize) -> Self {
        Self {
            history: CallHistory::new(port_name, bits_per_element),
            flush_count: 0,
            dropped_bursts: 0,
        }
    }

    /// Record one incoming push
    ///
    /// `elapsed` is the time spent inside the push call, in seconds.
    pub fn record(&mut self, bursts: usize, elements: usize, queue_depth: f32, elapsed: f64) {
        self.history.record(bursts, elements, queue_depth, elapsed);
    }

    /// Record a flush that discarded `bursts` queued bursts
    pub fn flush_occurred(&mut self, bursts: usize) {
        self.flush_count += 1;
        self.dropped_bursts += bursts as u64;
    }

    /// Number of flushes so far
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// Snapshot of the current statistics
    pub fn retrieve(&self) -> PortStatistics {
        let mut stats = self.history.retrieve();
        stats.keywords.push(StatKeyword::new(
            "AVERAGE_PUSH_DURATION",
            self.history.average(|r| r.elapsed),
        ));
        stats.keywords.push(StatKeyword::new("FLUSH_COUNT", self.flush_count as f64));
        stats.keywords.push(StatKeyword::new("DROPPED_BURSTS", self.dropped_bursts as f64));
        stats
    }
}

/// Statistics kept per connection of an output port
#[derive(Debug)]
pub struct SenderStatistics {
    history: CallHistory,
}

impl SenderStatistics {
    /// Create sender statistics for a port
    pub fn new(port_name: &str, bits_per_element: usize) -> Self {
        Self {
            history: CallHistory::new(port_name, bits_per_element),
        }
    }

    /// Record one delivered batch
    ///
    /// `latency` is the time from the batch window opening to delivery, in seconds.
    pub fn record(&mut self, bursts: usize, elements: usize, queue_depth: f32, latency: f64) {
        self.history.record(bursts, elements, queue_depth, latency);
    }

    /// Total bursts delivered
    pub fn total_bursts(&self) -> u64 {
        self.history.total_bursts
    }

    /// Snapshot of the current statistics
    pub fn retrieve(&self) -> PortStatistics {
        let mut stats = self.history.retrieve();
        stats.keywords.push(StatKeyword::new(
            "AVERAGE_LATENCY",
            self.history.average(|r| r.elapsed),
        ));
        stats.keywords.push(StatKeyword::new(
            "MAX_LATENCY",
            self.history.max(|r| r.elapsed),
        ));
        stats
    }
}
