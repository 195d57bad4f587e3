//! Burst records
//!
//! A burst is one unit of data flowing through a port: a payload of samples plus
//! the stream's description (SRI), a timestamp and an end-of-stream flag.
//!
//! Payloads are held in an `Arc<[T]>`, so a burst fanned out to several
//! connections shares one allocation; only the reference count is touched.

pub mod packet;
pub mod sample;
pub mod sri;
pub mod time;

pub use packet::Burst;
pub use sample::Sample;
pub use sri::BurstSri;
pub use time::PrecisionTime;
