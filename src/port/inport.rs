//! Input port
//!
//! A named [`BoundedStreamQueue`] with its own logging span. An input port is
//! also a [`BurstEndpoint`], so an output port in the same process can connect
//! to it directly.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use tracing::Span;

use super::config::{InPortConfig, DEFAULT_QUEUE_THRESHOLD};
use super::connection::BurstEndpoint;
use super::queue::BoundedStreamQueue;
use super::state::{PortUsage, PushOutcome};
use crate::burst::{Burst, Sample};
use crate::error::{Result, TransportError};
use crate::stats::PortStatistics;

/// Input port receiving bursts of `T`
pub struct InPort<T: Sample> {
    name: String,
    span: Span,
    queue: BoundedStreamQueue<T>,
}

impl<T: Sample> InPort<T> {
    /// Create a port with the default configuration
    pub fn new(name: &str) -> Self {
        let threshold = NonZeroUsize::new(DEFAULT_QUEUE_THRESHOLD).unwrap_or(NonZeroUsize::MIN);
        Self::build(name, threshold, default_span(name))
    }

    /// Create a port with the given configuration
    pub fn with_config(name: &str, config: InPortConfig) -> Result<Self> {
        Self::with_span(name, config, default_span(name))
    }

    /// Create a port that logs under `span`
    pub fn with_span(name: &str, config: InPortConfig, span: Span) -> Result<Self> {
        let threshold = config.threshold()?;
        Ok(Self::build(name, threshold, span))
    }

    fn build(name: &str, threshold: NonZeroUsize, span: Span) -> Self {
        Self {
            name: name.to_owned(),
            queue: BoundedStreamQueue::new(name, threshold, span.clone()),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub async fn start(&self) {
        self.queue.start().await;
    }

    /// Stop the port, releasing every blocked producer and consumer
    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    pub async fn is_started(&self) -> bool {
        self.queue.is_started().await
    }

    /// Queue bursts, waiting while the queue is at its threshold
    pub async fn push_bursts(&self, bursts: Vec<Burst<T>>) -> PushOutcome {
        self.queue.push_bursts(bursts).await
    }

    /// Take the oldest burst, waiting up to `timeout` seconds
    pub async fn get_burst(&self, timeout: f32) -> Option<Burst<T>> {
        self.queue.get_burst(timeout).await
    }

    /// Take every queued burst, waiting up to `timeout` seconds for one
    pub async fn get_bursts(&self, timeout: f32) -> Vec<Burst<T>> {
        self.queue.get_bursts(timeout).await
    }

    /// Discard everything queued
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    /// Whether a producer blocked since the last call
    pub async fn block_occurred(&self) -> bool {
        self.queue.block_occurred().await
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.queue_depth().await
    }

    pub async fn max_queue_depth(&self) -> usize {
        self.queue.threshold().await
    }

    pub async fn set_max_queue_depth(&self, count: usize) -> Result<()> {
        self.queue.set_threshold(count).await
    }

    pub async fn state(&self) -> PortUsage {
        self.queue.state().await
    }

    pub async fn statistics(&self) -> PortStatistics {
        self.queue.statistics().await
    }
}

#[async_trait]
impl<T: Sample> BurstEndpoint<T> for InPort<T> {
    async fn interface_id(&self) -> std::result::Result<String, TransportError> {
        Ok(T::REPO_ID.to_owned())
    }

    async fn push_bursts(&self, bursts: &[Burst<T>]) -> std::result::Result<(), TransportError> {
        match self.queue.push_bursts(bursts.to_vec()).await {
            PushOutcome::Queued => {}
            outcome => {
                tracing::trace!(parent: &self.span, ?outcome, "Bursts not queued");
            }
        }
        Ok(())
    }
}

fn default_span(name: &str) -> Span {
    tracing::debug_span!("burst_in", port = %name)
}
