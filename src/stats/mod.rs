//! Port statistics

pub mod metrics;

pub use metrics::{
    PortStatistics, ReceiverStatistics, SenderStatistics, StatKeyword, UsesPortStatistics,
};
