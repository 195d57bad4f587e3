//! Batching output port
//!
//! Bursts pushed into the port are buffered per stream (or all together in
//! interleaved mode) and sent to the port's connections when a count, byte or
//! latency threshold is reached. A monitor task serves the latency threshold
//! while the port is started; count and byte thresholds work in any state.
//!
//! Lock order: accumulators, then connections. The accumulator lock stays held
//! while a flushed batch is sent, so batches from one accumulator reach each
//! connection in the order they were queued.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Span;

use super::accumulator::{Batch, QueueKey, StreamAccumulator};
use super::config::OutPortConfig;
use super::connection::{
    validate_endpoint, BurstEndpoint, ConnectionInfo, ConnectionListener, ConnectionTable,
};
use super::monitor::{LatencyCheck, Monitor};
use super::routing::{ConnectionFilter, ModeCell, RouteTable, RoutingMode};
use super::state::{PortPhase, PortUsage};
use crate::burst::{Burst, BurstSri, PrecisionTime, Sample};
use crate::error::{Error, Result};
use crate::stats::UsesPortStatistics;

/// The accumulators of one port
struct Accumulators<T: Sample> {
    default: StreamAccumulator<T>,
    streams: BTreeMap<String, StreamAccumulator<T>>,
    /// Streams open in the default accumulator
    interleaved: BTreeSet<String>,
}

impl<T: Sample> Accumulators<T> {
    fn iter(&self) -> impl Iterator<Item = &StreamAccumulator<T>> {
        std::iter::once(&self.default).chain(self.streams.values())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut StreamAccumulator<T>> {
        std::iter::once(&mut self.default).chain(self.streams.values_mut())
    }

    /// Accumulator a new burst of `stream_id` goes to
    ///
    /// A stream that already has its own accumulator keeps it after a switch to
    /// interleaved mode.
    fn for_burst(
        &mut self,
        stream_id: &str,
        mode: RoutingMode,
        span: &Span,
    ) -> &mut StreamAccumulator<T> {
        if mode == RoutingMode::Interleaved && !self.streams.contains_key(stream_id) {
            self.interleaved.insert(stream_id.to_owned());
            return &mut self.default;
        }

        let default = &self.default;
        self.streams.entry(stream_id.to_owned()).or_insert_with(|| {
            tracing::debug!(parent: span, stream = %stream_id, "Creating queue for stream");
            StreamAccumulator::with_policy_of(QueueKey::Stream(stream_id.to_owned()), default)
        })
    }

    /// Accumulator the policy of `stream_id` refers to
    fn for_policy(
        &mut self,
        stream_id: Option<&str>,
        mode: RoutingMode,
    ) -> Result<&mut StreamAccumulator<T>> {
        let Some(id) = stream_id else {
            return Ok(&mut self.default);
        };
        match self.streams.get_mut(id) {
            Some(accumulator) => Ok(accumulator),
            None if mode == RoutingMode::Interleaved => Ok(&mut self.default),
            None => Err(Error::UnknownStream(id.to_owned())),
        }
    }

    fn get_mut(&mut self, key: &QueueKey) -> Option<&mut StreamAccumulator<T>> {
        match key {
            QueueKey::Default => Some(&mut self.default),
            QueueKey::Stream(id) => self.streams.get_mut(id),
        }
    }

    /// Streams currently buffered, in either kind of accumulator
    fn active_streams(&self) -> Vec<String> {
        let streams: BTreeSet<&String> = self.streams.keys().chain(self.interleaved.iter()).collect();
        streams.into_iter().cloned().collect()
    }
}

struct Lifecycle {
    phase: PortPhase,
    monitor: Option<Monitor>,
}

struct Shared<T: Sample> {
    name: String,
    span: Span,
    mode: ModeCell,
    queues: Mutex<Accumulators<T>>,
    table: Mutex<ConnectionTable<T>>,
    listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T: Sample> Shared<T> {
    async fn schedule_check(&self, deadline: Instant) {
        if let Some(monitor) = self.lifecycle.lock().await.monitor.as_ref() {
            monitor.schedule(deadline);
        }
    }

    async fn send_batch(&self, batch: Batch<T>) {
        tracing::trace!(
            parent: &self.span,
            queue = %batch.key,
            bursts = batch.bursts.len(),
            "Sending bursts"
        );
        let mode = self.mode.get();
        self.table.lock().await.send_batch(&batch, mode, &self.span).await;
    }

    async fn queue_burst(&self, burst: Burst<T>) {
        let mode = self.mode.get();
        let stream_id = burst.stream_id().to_owned();
        let eos = burst.eos;

        let mut queues = self.queues.lock().await;
        let queued = queues
            .for_burst(&stream_id, mode, &self.span)
            .queue_burst(burst, Instant::now());

        let mut batches: Vec<Batch<T>> = queued.batch.into_iter().collect();
        if eos {
            queues.interleaved.remove(&stream_id);
            if let Some(mut accumulator) = queues.streams.remove(&stream_id) {
                tracing::debug!(parent: &self.span, stream = %stream_id, "EOS received, flushing queue");
                batches.extend(accumulator.take_batch());
            }
        }

        if let Some(deadline) = queued.deadline {
            self.schedule_check(deadline).await;
        }
        for batch in batches {
            self.send_batch(batch).await;
        }
    }

    /// Run `f` on the accumulator a policy refers to
    async fn with_queue<R>(
        &self,
        stream_id: Option<&str>,
        f: impl FnOnce(&mut StreamAccumulator<T>) -> R,
    ) -> Result<R> {
        let mut queues = self.queues.lock().await;
        let accumulator = queues.for_policy(stream_id, self.mode.get())?;
        Ok(f(accumulator))
    }

    /// Flush one accumulator from a separate task
    fn defer_flush(self: &Arc<Self>, key: QueueKey) {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(shared) = weak.upgrade() {
                shared.flush_queue(&key).await;
            }
        });
    }

    async fn flush_queue(&self, key: &QueueKey) {
        let mut queues = self.queues.lock().await;
        let batch = queues
            .get_mut(key)
            .and_then(|accumulator| accumulator.check_flush(Instant::now()));
        if let Some(batch) = batch {
            tracing::debug!(parent: &self.span, queue = %key, "Threshold lowered, flushing");
            self.send_batch(batch).await;
        }
    }

    async fn flush_all(&self) {
        let mut queues = self.queues.lock().await;
        let batches: Vec<Batch<T>> = queues
            .iter_mut()
            .filter_map(StreamAccumulator::take_batch)
            .collect();
        for batch in batches {
            self.send_batch(batch).await;
        }
    }

    async fn notify_listeners(&self, notify: impl Fn(&dyn ConnectionListener)) {
        let listeners = self.listeners.lock().await.clone();
        for listener in &listeners {
            notify(listener.as_ref());
        }
    }
}

#[async_trait]
impl<T: Sample> LatencyCheck for Shared<T> {
    async fn check_latency(&self) {
        let mut queues = self.queues.lock().await;
        let now = Instant::now();
        let batches: Vec<Batch<T>> = queues
            .iter_mut()
            .filter_map(|accumulator| accumulator.check_flush(now))
            .collect();

        for batch in batches {
            tracing::debug!(
                parent: &self.span,
                queue = %batch.key,
                bursts = batch.bursts.len(),
                "Latency threshold reached, flushing"
            );
            self.send_batch(batch).await;
        }
    }
}

/// Output port sending bursts of `T`
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use burstio::port::{BurstEndpoint, InPort, OutPort};
/// use burstio::burst::{Burst, BurstSri};
///
/// # async fn example() -> burstio::error::Result<()> {
/// let output = OutPort::<f32>::new("dataFloat_out");
/// let input: Arc<InPort<f32>> = Arc::new(InPort::new("dataFloat_in"));
/// input.start().await;
///
/// output.connect("connection_1", Some(input.clone() as Arc<dyn BurstEndpoint<f32>>)).await?;
/// output.start().await;
///
/// output.push_burst(Burst::now(BurstSri::new("stream_1"), vec![0.0f32; 1024])).await;
/// output.flush().await;
/// # Ok(())
/// # }
/// ```
pub struct OutPort<T: Sample> {
    shared: Arc<Shared<T>>,
}

impl<T: Sample> OutPort<T> {
    /// Create a port with the default configuration
    pub fn new(name: &str) -> Self {
        Self::build(name, OutPortConfig::default(), default_span(name))
    }

    /// Create a port with the given configuration
    pub fn with_config(name: &str, config: OutPortConfig) -> Result<Self> {
        Self::with_span(name, config, default_span(name))
    }

    /// Create a port that logs under `span`
    pub fn with_span(name: &str, config: OutPortConfig, span: Span) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(name, config, span))
    }

    fn build(name: &str, config: OutPortConfig, span: Span) -> Self {
        let default = StreamAccumulator::new(
            QueueKey::Default,
            config.max_bursts,
            config.byte_threshold,
            config.latency_threshold_us,
        );

        Self {
            shared: Arc::new(Shared {
                name: name.to_owned(),
                span,
                mode: ModeCell::new(config.routing_mode),
                queues: Mutex::new(Accumulators {
                    default,
                    streams: BTreeMap::new(),
                    interleaved: BTreeSet::new(),
                }),
                table: Mutex::new(ConnectionTable::new(name)),
                listeners: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(Lifecycle {
                    phase: PortPhase::Created,
                    monitor: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn span(&self) -> &Span {
        &self.shared.span
    }

    /// Start the latency monitor
    ///
    /// Windows opened before the port was started get their deadline now.
    pub async fn start(&self) {
        {
            let mut lifecycle = self.shared.lifecycle.lock().await;
            if lifecycle.monitor.is_none() {
                let weak = Arc::downgrade(&self.shared);
                let target: Weak<dyn LatencyCheck> = weak;
                lifecycle.monitor = Some(Monitor::spawn(target, self.shared.span.clone()));
            }
            lifecycle.phase = PortPhase::Started;
        }
        tracing::trace!(parent: &self.shared.span, "Port started");

        let queues = self.shared.queues.lock().await;
        let deadlines: Vec<Instant> = queues
            .iter()
            .filter_map(StreamAccumulator::deadline)
            .collect();
        for deadline in deadlines {
            self.shared.schedule_check(deadline).await;
        }
    }

    /// Stop the latency monitor and flush every queue
    ///
    /// A latency flush already sending when the port stops completes first.
    pub async fn stop(&self) {
        let monitor = {
            let mut lifecycle = self.shared.lifecycle.lock().await;
            lifecycle.phase = PortPhase::Stopped;
            lifecycle.monitor.take()
        };
        if let Some(monitor) = monitor {
            monitor.shutdown().await;
        }
        tracing::trace!(parent: &self.shared.span, "Port stopped");
        self.shared.flush_all().await;
    }

    pub async fn phase(&self) -> PortPhase {
        self.shared.lifecycle.lock().await.phase
    }

    /// `Idle` without connections, `Active` otherwise
    pub async fn state(&self) -> PortUsage {
        if self.shared.table.lock().await.is_empty() {
            PortUsage::Idle
        } else {
            PortUsage::Active
        }
    }

    /// Queue a burst on its stream's accumulator
    pub async fn push_burst(&self, burst: Burst<T>) {
        self.shared.queue_burst(burst).await;
    }

    /// Queue a burst built from its parts
    ///
    /// `complex` overrides the mode of `sri`.
    pub async fn push_burst_data(
        &self,
        data: impl Into<Arc<[T]>>,
        complex: bool,
        sri: BurstSri,
        time: PrecisionTime,
        eos: bool,
    ) {
        let sri = sri.complex(complex);
        self.push_burst(Burst::new(sri, data, time, eos)).await;
    }

    /// Send bursts straight to the connections, bypassing the accumulators
    ///
    /// The batch carries no stream, so in filtered mode it reaches nobody.
    pub async fn push_bursts(&self, bursts: Vec<Burst<T>>) {
        if bursts.is_empty() {
            return;
        }
        let batch = Batch {
            key: QueueKey::Default,
            bursts,
            window_start: Instant::now(),
            queue_depth: 0.0,
        };
        self.shared.send_batch(batch).await;
    }

    /// Send everything buffered
    pub async fn flush(&self) {
        tracing::trace!(parent: &self.shared.span, "Flushing all queues");
        self.shared.flush_all().await;
    }

    /// Policy of the default accumulator
    ///
    /// New stream accumulators copy this policy when they are created.
    pub fn default_policy(&self) -> OutputPolicy<'_, T> {
        OutputPolicy {
            shared: &self.shared,
            stream_id: None,
        }
    }

    /// Policy of one stream's accumulator
    ///
    /// In interleaved mode a stream without its own accumulator shares the
    /// default one.
    pub async fn stream_policy(&self, stream_id: &str) -> Result<OutputPolicy<'_, T>> {
        let mode = self.shared.mode.get();
        let queues = self.shared.queues.lock().await;
        if mode != RoutingMode::Interleaved && !queues.streams.contains_key(stream_id) {
            return Err(Error::UnknownStream(stream_id.to_owned()));
        }
        Ok(OutputPolicy {
            shared: &self.shared,
            stream_id: Some(stream_id.to_owned()),
        })
    }

    pub async fn max_bursts(&self) -> usize {
        self.shared.queues.lock().await.default.max_bursts()
    }

    pub async fn set_max_bursts(&self, count: usize) -> Result<()> {
        self.default_policy().set_max_bursts(count).await
    }

    pub async fn byte_threshold(&self) -> usize {
        self.shared.queues.lock().await.default.byte_threshold()
    }

    pub async fn set_byte_threshold(&self, bytes: usize) -> Result<()> {
        self.default_policy().set_byte_threshold(bytes).await
    }

    /// Latency threshold in microseconds
    pub async fn latency_threshold(&self) -> u64 {
        self.shared.queues.lock().await.default.latency_threshold_us()
    }

    pub async fn set_latency_threshold(&self, usec: u64) -> Result<()> {
        self.default_policy().set_latency_threshold(usec).await
    }

    pub fn routing_mode(&self) -> RoutingMode {
        self.shared.mode.get()
    }

    /// Change the routing mode
    ///
    /// Bursts already buffered stay in the accumulator they were queued on.
    pub fn set_routing_mode(&self, mode: RoutingMode) {
        self.shared.mode.set(mode);
        tracing::debug!(parent: &self.shared.span, mode = %mode, "Routing mode changed");
    }

    /// Replace the stream routes with the entries that apply to this port
    ///
    /// A table with an incomplete entry is rejected as a whole and the current
    /// routes are kept.
    pub async fn update_connection_filter(&self, filters: &[ConnectionFilter]) -> Result<()> {
        let routes = RouteTable::from_filters(&self.shared.name, filters)?;
        tracing::debug!(
            parent: &self.shared.span,
            streams = routes.len(),
            "Connection filter updated"
        );
        self.shared.table.lock().await.set_routes(routes);
        Ok(())
    }

    pub async fn add_connection_filter(&self, stream_id: &str, connection_id: &str) {
        self.shared.table.lock().await.add_route(stream_id, connection_id);
        tracing::debug!(
            parent: &self.shared.span,
            stream = %stream_id,
            connection = %connection_id,
            "Route added"
        );
    }

    pub async fn remove_connection_filter(&self, stream_id: &str, connection_id: &str) {
        self.shared.table.lock().await.remove_route(stream_id, connection_id);
        tracing::debug!(
            parent: &self.shared.span,
            stream = %stream_id,
            connection = %connection_id,
            "Route removed"
        );
    }

    /// Add a connection
    ///
    /// The endpoint is checked before the table is touched. Connecting an ID that
    /// already exists replaces the endpoint and resets its statistics.
    pub async fn connect(
        &self,
        connection_id: &str,
        endpoint: Option<Arc<dyn BurstEndpoint<T>>>,
    ) -> Result<()> {
        let endpoint = validate_endpoint(connection_id, endpoint).await?;

        let replaced = self.shared.table.lock().await.insert(connection_id, endpoint);
        if replaced {
            tracing::warn!(
                parent: &self.shared.span,
                connection = %connection_id,
                "Replaced existing connection"
            );
        } else {
            tracing::debug!(parent: &self.shared.span, connection = %connection_id, "Connection added");
        }

        self.shared
            .notify_listeners(|listener| listener.port_connected(connection_id))
            .await;
        Ok(())
    }

    /// Remove a connection
    pub async fn disconnect(&self, connection_id: &str) -> Result<()> {
        self.shared.table.lock().await.remove(connection_id)?;
        tracing::debug!(parent: &self.shared.span, connection = %connection_id, "Connection removed");

        self.shared
            .notify_listeners(|listener| listener.port_disconnected(connection_id))
            .await;
        Ok(())
    }

    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.shared.table.lock().await.connections()
    }

    pub async fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.shared.listeners.lock().await.push(listener);
    }

    pub async fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        self.shared
            .listeners
            .lock()
            .await
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Streams with buffered state, sorted
    pub async fn active_streams(&self) -> Vec<String> {
        self.shared.queues.lock().await.active_streams()
    }

    /// Statistics of every connection
    pub async fn statistics(&self) -> Vec<UsesPortStatistics> {
        let streams = self.active_streams().await;
        self.shared
            .table
            .lock()
            .await
            .statistics(&streams, self.shared.mode.get())
    }
}

/// Handle on the thresholds of one accumulator
///
/// Lowering a count or byte threshold below what is already buffered flushes
/// that accumulator from a separate task.
pub struct OutputPolicy<'a, T: Sample> {
    shared: &'a Arc<Shared<T>>,
    stream_id: Option<String>,
}

impl<T: Sample> OutputPolicy<'_, T> {
    /// Stream this policy belongs to; `None` for the default policy
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub async fn max_bursts(&self) -> Result<usize> {
        self.shared
            .with_queue(self.stream_id(), |accumulator| accumulator.max_bursts())
            .await
    }

    pub async fn set_max_bursts(&self, count: usize) -> Result<()> {
        let (key, needs_flush) = self
            .shared
            .with_queue(self.stream_id(), |accumulator| {
                accumulator
                    .set_max_bursts(count)
                    .map(|needs_flush| (accumulator.key().clone(), needs_flush))
            })
            .await??;
        if needs_flush {
            self.shared.defer_flush(key);
        }
        Ok(())
    }

    pub async fn byte_threshold(&self) -> Result<usize> {
        self.shared
            .with_queue(self.stream_id(), |accumulator| accumulator.byte_threshold())
            .await
    }

    pub async fn set_byte_threshold(&self, bytes: usize) -> Result<()> {
        let (key, needs_flush) = self
            .shared
            .with_queue(self.stream_id(), |accumulator| {
                let needs_flush = accumulator.set_byte_threshold(bytes);
                (accumulator.key().clone(), needs_flush)
            })
            .await?;
        if needs_flush {
            self.shared.defer_flush(key);
        }
        Ok(())
    }

    /// Latency threshold in microseconds
    pub async fn latency_threshold(&self) -> Result<u64> {
        self.shared
            .with_queue(self.stream_id(), |accumulator| accumulator.latency_threshold_us())
            .await
    }

    pub async fn set_latency_threshold(&self, usec: u64) -> Result<()> {
        let deadline = self
            .shared
            .with_queue(self.stream_id(), |accumulator| {
                accumulator.set_latency_threshold_us(usec)
            })
            .await?;
        if let Some(deadline) = deadline {
            self.shared.schedule_check(deadline).await;
        }
        Ok(())
    }
}

fn default_span(name: &str) -> Span {
    tracing::debug_span!("burst_out", port = %name)
}
