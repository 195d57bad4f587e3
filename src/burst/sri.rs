//! Stream description (SRI)
//!
//! Metadata describing the samples of one stream. The ports only look at the
//! stream ID and the complex flag; everything else is passed through untouched.

use std::collections::BTreeMap;

/// Description of a burst stream
#[derive(Debug, Clone, PartialEq)]
pub struct BurstSri {
    /// Header version
    pub hversion: i32,
    /// Start of the first dimension (e.g. time offset)
    pub xstart: f64,
    /// Sample spacing in the first dimension
    pub xdelta: f64,
    /// Units code of the first dimension
    pub xunits: i16,
    /// Frame size for two-dimensional data (0 = one-dimensional)
    pub subsize: i32,
    /// Start of the second dimension
    pub ystart: f64,
    /// Spacing of the second dimension
    pub ydelta: f64,
    /// Units code of the second dimension
    pub yunits: i16,
    /// 0 = real samples, 1 = complex samples
    pub mode: i16,
    /// Stream identifier
    pub stream_id: String,
    /// Flow identifier
    pub flow_id: String,
    /// Burst identifier
    pub id: i32,
    /// Time of arrival offset
    pub tau: f64,
    /// Angle of arrival
    pub theta: f64,
    /// Unique identifier of the emitter
    pub uuid: String,
    /// Free-form keywords
    pub keywords: BTreeMap<String, String>,
}

impl BurstSri {
    /// Create a description for a stream with default values
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            hversion: 1,
            xstart: 0.0,
            xdelta: 1.0,
            xunits: 1,
            subsize: 0,
            ystart: 0.0,
            ydelta: 0.0,
            yunits: 0,
            mode: 0,
            stream_id: stream_id.into(),
            flow_id: String::new(),
            id: 0,
            tau: 0.0,
            theta: 0.0,
            uuid: String::new(),
            keywords: BTreeMap::new(),
        }
    }

    /// Mark the stream as carrying complex samples
    pub fn complex(mut self, complex: bool) -> Self {
        self.mode = if complex { 1 } else { 0 };
        self
    }

    /// Set the sample spacing
    pub fn xdelta(mut self, xdelta: f64) -> Self {
        self.xdelta = xdelta;
        self
    }

    /// Add a keyword
    pub fn keyword(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.keywords.insert(id.into(), value.into());
        self
    }

    /// Whether the samples are complex
    pub fn is_complex(&self) -> bool {
        self.mode != 0
    }
}

impl Default for BurstSri {
    fn default() -> Self {
        Self::new("")
    }
}
