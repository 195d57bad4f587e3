//! Stream-to-connection routing
//!
//! The routing mode decides both how an output port buffers streams and which
//! connections receive a flushed batch. The route table is only consulted in
//! [`RoutingMode::Filtered`].

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

/// How an output port routes streams to its connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// All connections receive all streams, buffered together in one accumulator
    #[default]
    Interleaved,
    /// All connections receive all streams, buffered per stream
    Broadcast,
    /// Each connection receives only the streams routed to it, buffered per stream
    Filtered,
}

impl RoutingMode {
    fn as_u8(self) -> u8 {
        match self {
            RoutingMode::Interleaved => 0,
            RoutingMode::Broadcast => 1,
            RoutingMode::Filtered => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RoutingMode::Broadcast,
            2 => RoutingMode::Filtered,
            _ => RoutingMode::Interleaved,
        }
    }
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingMode::Interleaved => write!(f, "interleaved"),
            RoutingMode::Broadcast => write!(f, "broadcast"),
            RoutingMode::Filtered => write!(f, "filtered"),
        }
    }
}

impl FromStr for RoutingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "interleaved" | "route_all_interleaved" => Ok(RoutingMode::Interleaved),
            "broadcast" | "route_all_streams" => Ok(RoutingMode::Broadcast),
            "filtered" | "route_connection_streams" => Ok(RoutingMode::Filtered),
            _ => Err(Error::IllegalArgument(format!("Unknown routing mode: {}", s))),
        }
    }
}

/// Routing mode readable without taking any port lock
#[derive(Debug)]
pub(crate) struct ModeCell(AtomicU8);

impl ModeCell {
    pub(crate) fn new(mode: RoutingMode) -> Self {
        Self(AtomicU8::new(mode.as_u8()))
    }

    pub(crate) fn get(&self) -> RoutingMode {
        RoutingMode::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, mode: RoutingMode) {
        self.0.store(mode.as_u8(), Ordering::Release);
    }
}

/// One entry of a connection filter table
///
/// Fields are optional because filter tables arrive from loosely typed
/// configuration; an entry missing any field is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionFilter {
    /// Port the entry applies to
    pub port_name: Option<String>,
    /// Stream to route
    pub stream_id: Option<String>,
    /// Connection that receives the stream
    pub connection_id: Option<String>,
}

impl ConnectionFilter {
    /// Create a complete filter entry
    pub fn new(
        port_name: impl Into<String>,
        stream_id: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            port_name: Some(port_name.into()),
            stream_id: Some(stream_id.into()),
            connection_id: Some(connection_id.into()),
        }
    }
}

/// Map of stream ID to the connections it is routed to
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: HashMap<String, HashSet<String>>,
}

impl RouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from filter entries that apply to `port_name`
    ///
    /// Every entry is validated before anything is built, so a malformed entry
    /// anywhere in the table rejects the whole table.
    pub fn from_filters(port_name: &str, filters: &[ConnectionFilter]) -> Result<Self> {
        let mut routes: HashMap<String, HashSet<String>> = HashMap::new();
        for filter in filters {
            let (port, stream, connection) = match (
                filter.port_name.as_deref(),
                filter.stream_id.as_deref(),
                filter.connection_id.as_deref(),
            ) {
                (Some(port), Some(stream), Some(connection)) => (port, stream, connection),
                _ => {
                    return Err(Error::IllegalArgument(
                        "Invalid struct for connection filter".into(),
                    ))
                }
            };
            if port != port_name {
                continue;
            }
            routes
                .entry(stream.to_owned())
                .or_default()
                .insert(connection.to_owned());
        }
        Ok(Self { routes })
    }

    /// Route a stream to a connection
    pub fn add(&mut self, stream_id: &str, connection_id: &str) {
        self.routes
            .entry(stream_id.to_owned())
            .or_default()
            .insert(connection_id.to_owned());
    }

    /// Stop routing a stream to a connection
    pub fn remove(&mut self, stream_id: &str, connection_id: &str) {
        if let Some(connections) = self.routes.get_mut(stream_id) {
            connections.remove(connection_id);
            if connections.is_empty() {
                self.routes.remove(stream_id);
            }
        }
    }

    /// Whether a stream is routed to a connection under the given mode
    ///
    /// Outside filtered mode everything is routed everywhere. In filtered mode a
    /// stream without an entry (or a batch without a stream) reaches nobody.
    pub fn is_routed(&self, mode: RoutingMode, stream_id: Option<&str>, connection_id: &str) -> bool {
        if mode != RoutingMode::Filtered {
            return true;
        }
        stream_id
            .and_then(|id| self.routes.get(id))
            .map(|connections| connections.contains(connection_id))
            .unwrap_or(false)
    }

    /// Number of streams with at least one route
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no routes
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
