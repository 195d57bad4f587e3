//! Precision timestamps
//!
//! Wall-clock time split into whole and fractional seconds, tagged with the
//! time reference it was taken against.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time code mode for timestamps taken from the host clock
pub const TCM_CPU: i16 = 1;

/// Status flag for a valid timestamp
pub const TCS_VALID: i16 = 1;

/// Status flag for a timestamp that was never set
pub const TCS_INVALID: i16 = 0;

/// Timestamp attached to a burst
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionTime {
    /// Time reference tag
    pub tcmode: i16,
    /// Validity of the timestamp
    pub tcstatus: i16,
    /// Fractional sample offset
    pub toff: f64,
    /// Whole seconds since the epoch
    pub twsec: f64,
    /// Fractional seconds
    pub tfsec: f64,
}

impl PrecisionTime {
    /// Timestamp for the current wall-clock time
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration(since_epoch)
    }

    /// Timestamp at a given offset from the epoch
    pub fn from_duration(since_epoch: Duration) -> Self {
        Self {
            tcmode: TCM_CPU,
            tcstatus: TCS_VALID,
            toff: 0.0,
            twsec: since_epoch.as_secs() as f64,
            tfsec: since_epoch.subsec_nanos() as f64 * 1e-9,
        }
    }

    /// Timestamp marked invalid
    pub fn not_set() -> Self {
        Self {
            tcmode: TCM_CPU,
            tcstatus: TCS_INVALID,
            toff: 0.0,
            twsec: 0.0,
            tfsec: 0.0,
        }
    }

    /// Whether the timestamp is valid
    pub fn is_valid(&self) -> bool {
        self.tcstatus == TCS_VALID
    }

    /// Seconds since the epoch as a single float
    pub fn as_secs_f64(&self) -> f64 {
        self.twsec + self.tfsec
    }
}

impl Default for PrecisionTime {
    fn default() -> Self {
        Self::now()
    }
}
