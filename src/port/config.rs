//! Port configuration

use std::num::NonZeroUsize;
use std::time::Duration;

use super::routing::RoutingMode;
use crate::error::{Error, Result};

/// Default number of queued bursts before an input port blocks producers
pub const DEFAULT_QUEUE_THRESHOLD: usize = 100;

/// Default number of bursts an output accumulator holds before flushing
pub const DEFAULT_MAX_BURSTS: usize = 100;

/// Default byte count that triggers an output flush (90% of a 2 MiB message)
pub const DEFAULT_BYTE_THRESHOLD: usize = 1_887_436;

/// Default latency threshold in microseconds (10 ms)
pub const DEFAULT_LATENCY_THRESHOLD_US: u64 = 10_000;

/// Input port configuration
#[derive(Debug, Clone)]
pub struct InPortConfig {
    /// Queued bursts at which producers block (must be at least 1)
    pub queue_threshold: usize,
}

impl Default for InPortConfig {
    fn default() -> Self {
        Self {
            queue_threshold: DEFAULT_QUEUE_THRESHOLD,
        }
    }
}

impl InPortConfig {
    /// Set the queue threshold
    pub fn queue_threshold(mut self, count: usize) -> Self {
        self.queue_threshold = count;
        self
    }

    /// Check the configuration for invalid values
    pub fn validate(&self) -> Result<()> {
        self.threshold().map(|_| ())
    }

    pub(crate) fn threshold(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.queue_threshold)
            .ok_or_else(|| Error::IllegalArgument("Queue threshold must be at least 1".into()))
    }
}

/// Output port configuration
///
/// The thresholds configure the default policy; per-stream accumulators copy the
/// default policy when they are created.
#[derive(Debug, Clone)]
pub struct OutPortConfig {
    /// Bursts held before flushing (must be at least 1)
    pub max_bursts: usize,

    /// Queued payload bytes that trigger a flush
    pub byte_threshold: usize,

    /// Maximum time a burst waits before a flush, in microseconds
    pub latency_threshold_us: u64,

    /// How streams are routed to connections
    pub routing_mode: RoutingMode,
}

impl Default for OutPortConfig {
    fn default() -> Self {
        Self {
            max_bursts: DEFAULT_MAX_BURSTS,
            byte_threshold: DEFAULT_BYTE_THRESHOLD,
            latency_threshold_us: DEFAULT_LATENCY_THRESHOLD_US,
            routing_mode: RoutingMode::default(),
        }
    }
}

impl OutPortConfig {
    /// Set the burst count threshold
    pub fn max_bursts(mut self, count: usize) -> Self {
        self.max_bursts = count;
        self
    }

    /// Set the byte threshold
    pub fn byte_threshold(mut self, bytes: usize) -> Self {
        self.byte_threshold = bytes;
        self
    }

    /// Set the latency threshold in microseconds
    pub fn latency_threshold_us(mut self, usec: u64) -> Self {
        self.latency_threshold_us = usec;
        self
    }

    /// Set the latency threshold from a duration (sub-microsecond part is dropped)
    pub fn latency_threshold(self, latency: Duration) -> Self {
        let usec = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_threshold_us(usec)
    }

    /// Set the routing mode
    pub fn routing_mode(mut self, mode: RoutingMode) -> Self {
        self.routing_mode = mode;
        self
    }

    /// Check the configuration for invalid values
    pub fn validate(&self) -> Result<()> {
        if self.max_bursts == 0 {
            return Err(Error::IllegalArgument("Max bursts must be at least 1".into()));
        }
        Ok(())
    }
}
