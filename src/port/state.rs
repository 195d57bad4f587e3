//! Port state types

/// Usage state reported by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortUsage {
    /// Nothing queued (input) or no connections (output)
    Idle,
    /// Data queued below the threshold (input) or connected (output)
    Active,
    /// Queue at or above the threshold; producers will block
    Busy,
}

impl std::fmt::Display for PortUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortUsage::Idle => write!(f, "IDLE"),
            PortUsage::Active => write!(f, "ACTIVE"),
            PortUsage::Busy => write!(f, "BUSY"),
        }
    }
}

/// Result of pushing bursts into an input queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The bursts were queued
    Queued,
    /// The port was stopped when the call arrived; the bursts were dropped
    Discarded,
    /// The call waited for room and was woken by a stop; the bursts were dropped
    Abandoned,
}

impl PushOutcome {
    /// Whether the bursts made it into the queue
    pub fn is_queued(&self) -> bool {
        *self == PushOutcome::Queued
    }
}

/// Lifecycle of an output port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPhase {
    /// Constructed, never started
    Created,
    /// Latency monitor running
    Started,
    /// Stopped; queues were flushed
    Stopped,
}
