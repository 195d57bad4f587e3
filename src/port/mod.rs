//! Burst ports
//!
//! Input ports queue incoming bursts and push back on producers when the queue
//! is full. Output ports batch outgoing bursts and fan them out to their
//! connections.
//!
//! # Architecture
//!
//! ```text
//!                       OutPort<T>
//!        ┌──────────────────────────────────────────┐
//!        │ queues: default + per-stream accumulators │
//!        │ table:  connections + stream routes       │◄── Monitor (latency)
//!        └─────────────────┬────────────────────────┘
//!                          │ Batch
//!          ┌───────────────┼───────────────┐
//!          ▼               ▼               ▼
//!   [BurstEndpoint]  [BurstEndpoint]  [InPort<T>]
//!                                          │ BoundedStreamQueue
//!                                          ▼
//!                                  get_burst / get_bursts
//! ```
//!
//! # Routing
//!
//! - `Interleaved`: every stream shares the default accumulator; batches go to
//!   every connection.
//! - `Broadcast`: one accumulator per stream; batches go to every connection.
//! - `Filtered`: one accumulator per stream; batches go only to the
//!   connections routed for that stream.

pub mod accumulator;
pub mod config;
pub mod connection;
pub mod inport;
pub mod monitor;
pub mod outport;
pub mod queue;
pub mod routing;
pub mod state;

pub use accumulator::{Batch, QueueKey, StreamAccumulator};
pub use config::{InPortConfig, OutPortConfig};
pub use connection::{BurstEndpoint, ConnectionInfo, ConnectionListener, ConnectionTable};
pub use inport::InPort;
pub use monitor::{LatencyCheck, Monitor};
pub use outport::{OutPort, OutputPolicy};
pub use queue::BoundedStreamQueue;
pub use routing::{ConnectionFilter, RouteTable, RoutingMode};
pub use state::{PortPhase, PortUsage, PushOutcome};

pub type BurstByteIn = InPort<i8>;
pub type BurstUbyteIn = InPort<u8>;
pub type BurstShortIn = InPort<i16>;
pub type BurstUshortIn = InPort<u16>;
pub type BurstLongIn = InPort<i32>;
pub type BurstUlongIn = InPort<u32>;
pub type BurstLongLongIn = InPort<i64>;
pub type BurstUlongLongIn = InPort<u64>;
pub type BurstFloatIn = InPort<f32>;
pub type BurstDoubleIn = InPort<f64>;

pub type BurstByteOut = OutPort<i8>;
pub type BurstUbyteOut = OutPort<u8>;
pub type BurstShortOut = OutPort<i16>;
pub type BurstUshortOut = OutPort<u16>;
pub type BurstLongOut = OutPort<i32>;
pub type BurstUlongOut = OutPort<u32>;
pub type BurstLongLongOut = OutPort<i64>;
pub type BurstUlongLongOut = OutPort<u64>;
pub type BurstFloatOut = OutPort<f32>;
pub type BurstDoubleOut = OutPort<f64>;
