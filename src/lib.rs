//! Burst-oriented input and output ports
//!
//! `burstio` moves discrete bursts of samples between pipeline components:
//!
//! - [`port::InPort`] queues incoming bursts up to a threshold and makes
//!   producers wait beyond it, so a slow consumer slows its senders down
//!   instead of growing without bound.
//! - [`port::OutPort`] batches outgoing bursts per stream and sends a batch when
//!   it holds enough bursts, enough bytes, or has waited long enough. Batches
//!   are fanned out to every connection routed for the stream; a connection that
//!   fails is marked dead without affecting the others, and oversized batches
//!   are split until they fit.
//!
//! All port operations are async and run on tokio. Logging goes through
//! `tracing`; each port carries its own span.

pub mod burst;
pub mod error;
pub mod port;
pub mod stats;

pub use burst::{Burst, BurstSri, PrecisionTime, Sample};
pub use error::{ConnectionErrorKind, Error, Result, TransportError};
pub use port::{InPort, OutPort, RoutingMode};
