//! Connection table and batch fanout
//!
//! Holds the remote endpoints of an output port together with their liveness
//! and statistics, plus the stream routes. A flushed batch is offered to every
//! connection the router selects; failures are handled per connection and never
//! reach the pushing caller.
//!
//! Oversized batches are split in two and each half retried on its own:
//!
//! ```text
//!   [b0 b1 b2 b3 b4]  -> too large
//!   [b0 b1 b2] [b3 b4]
//!   [b0 b1] [b2]  ...
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;

use super::accumulator::Batch;
use super::routing::{RouteTable, RoutingMode};
use crate::burst::packet::total_elements;
use crate::burst::{Burst, Sample};
use crate::error::{ConnectionErrorKind, Error, Result, TransportError};
use crate::stats::{SenderStatistics, UsesPortStatistics};

/// Remote side of an output port connection
#[async_trait]
pub trait BurstEndpoint<T: Sample>: Send + Sync {
    /// Interface repository ID implemented by the endpoint
    async fn interface_id(&self) -> std::result::Result<String, TransportError>;

    /// Deliver a sequence of bursts
    async fn push_bursts(&self, bursts: &[Burst<T>]) -> std::result::Result<(), TransportError>;
}

/// Observer of connection changes
///
/// Called after the connection table has been updated, with no port lock held.
pub trait ConnectionListener: Send + Sync {
    fn port_connected(&self, connection_id: &str);
    fn port_disconnected(&self, connection_id: &str);
}

/// Summary of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub alive: bool,
}

/// Check an endpoint before it is added to a port
///
/// Talks to the endpoint, so it must not be called with any port lock held.
pub async fn validate_endpoint<T: Sample>(
    connection_id: &str,
    endpoint: Option<Arc<dyn BurstEndpoint<T>>>,
) -> Result<Arc<dyn BurstEndpoint<T>>> {
    let endpoint = endpoint.ok_or_else(|| {
        Error::invalid_connection(
            ConnectionErrorKind::NullReference,
            connection_id,
            "Cannot connect to nil connection",
        )
    })?;

    match endpoint.interface_id().await {
        Ok(id) if id == T::REPO_ID => Ok(endpoint),
        Ok(id) => Err(Error::invalid_connection(
            ConnectionErrorKind::WrongType,
            connection_id,
            format!("Object does not implement {} (found {})", T::REPO_ID, id),
        )),
        Err(err) => Err(Error::invalid_connection(
            ConnectionErrorKind::Unreachable,
            connection_id,
            format!("Unable to verify connection type: {}", err),
        )),
    }
}

struct Connection<T: Sample> {
    endpoint: Arc<dyn BurstEndpoint<T>>,
    alive: bool,
    statistics: SenderStatistics,
}

impl<T: Sample> Connection<T> {
    fn mark_dead(&mut self) -> bool {
        std::mem::replace(&mut self.alive, false)
    }
}

/// Connections of one output port, keyed by connection ID
pub struct ConnectionTable<T: Sample> {
    port_name: String,
    connections: BTreeMap<String, Connection<T>>,
    routes: RouteTable,
}

impl<T: Sample> ConnectionTable<T> {
    pub fn new(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_owned(),
            connections: BTreeMap::new(),
            routes: RouteTable::new(),
        }
    }

    /// Add a validated endpoint with fresh statistics
    ///
    /// Returns `true` if an existing connection with the same ID was replaced.
    pub fn insert(&mut self, connection_id: &str, endpoint: Arc<dyn BurstEndpoint<T>>) -> bool {
        let connection = Connection {
            endpoint,
            alive: true,
            statistics: SenderStatistics::new(&self.port_name, T::bits()),
        };
        self.connections
            .insert(connection_id.to_owned(), connection)
            .is_some()
    }

    /// Remove a connection
    pub fn remove(&mut self, connection_id: &str) -> Result<()> {
        self.connections.remove(connection_id).map(|_| ()).ok_or_else(|| {
            Error::invalid_connection(
                ConnectionErrorKind::NotFound,
                connection_id,
                "No connection with this ID",
            )
        })
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether a connection is currently considered alive
    pub fn is_alive(&self, connection_id: &str) -> Option<bool> {
        self.connections.get(connection_id).map(|c| c.alive)
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|(id, connection)| ConnectionInfo {
                connection_id: id.clone(),
                alive: connection.alive,
            })
            .collect()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Replace every route at once
    pub fn set_routes(&mut self, routes: RouteTable) {
        self.routes = routes;
    }

    pub fn add_route(&mut self, stream_id: &str, connection_id: &str) {
        self.routes.add(stream_id, connection_id);
    }

    pub fn remove_route(&mut self, stream_id: &str, connection_id: &str) {
        self.routes.remove(stream_id, connection_id);
    }

    /// Deliver a batch to every connection routed for its stream
    pub async fn send_batch(&mut self, batch: &Batch<T>, mode: RoutingMode, span: &Span) {
        let stream_id = batch.stream_id();
        for (connection_id, connection) in self.connections.iter_mut() {
            if !self.routes.is_routed(mode, stream_id, connection_id) {
                continue;
            }
            deliver(connection_id, connection, batch, span).await;
        }
    }

    /// Statistics of every connection
    ///
    /// `active_streams` lists the streams the port currently buffers; each
    /// connection reports the subset routed to it.
    pub fn statistics(&self, active_streams: &[String], mode: RoutingMode) -> Vec<UsesPortStatistics> {
        self.connections
            .iter()
            .map(|(id, connection)| {
                let mut statistics = connection.statistics.retrieve();
                statistics.stream_ids = active_streams
                    .iter()
                    .filter(|stream| self.routes.is_routed(mode, Some(stream.as_str()), id))
                    .cloned()
                    .collect();
                UsesPortStatistics {
                    connection_id: id.clone(),
                    statistics,
                }
            })
            .collect()
    }
}

async fn deliver<T: Sample>(
    connection_id: &str,
    connection: &mut Connection<T>,
    batch: &Batch<T>,
    span: &Span,
) {
    // Chunks are popped from the back, so the second half is pushed first
    let mut pending: Vec<&[Burst<T>]> = vec![&batch.bursts];

    while let Some(chunk) = pending.pop() {
        match connection.endpoint.push_bursts(chunk).await {
            Ok(()) => {
                connection.alive = true;
                let latency = batch.window_start.elapsed().as_secs_f64();
                connection.statistics.record(
                    chunk.len(),
                    total_elements(chunk),
                    batch.queue_depth,
                    latency,
                );
            }
            Err(TransportError::MessageTooLarge) if chunk.len() > 1 => {
                let (first, second) = chunk.split_at(chunk.len().div_ceil(2));
                tracing::debug!(
                    parent: span,
                    connection = %connection_id,
                    bursts = chunk.len(),
                    "Batch too large, partitioning"
                );
                pending.push(second);
                pending.push(first);
            }
            Err(TransportError::MessageTooLarge) => {
                if connection.mark_dead() {
                    tracing::error!(
                        parent: span,
                        connection = %connection_id,
                        elements = total_elements(chunk),
                        "Push failed because the burst is too large"
                    );
                }
            }
            Err(err) => {
                if connection.mark_dead() {
                    tracing::error!(
                        parent: span,
                        connection = %connection_id,
                        error = %err,
                        "Push failed"
                    );
                }
                return;
            }
        }
    }
}
