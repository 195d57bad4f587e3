//! Burst packet type
//!
//! The record that flows through input queues and output accumulators.

use std::sync::Arc;

use super::sample::Sample;
use super::sri::BurstSri;
use super::time::PrecisionTime;

/// A single burst of samples
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone, PartialEq)]
pub struct Burst<T: Sample> {
    /// Stream description
    pub sri: BurstSri,
    /// Time of the first sample
    pub time: PrecisionTime,
    /// End-of-stream marker for `sri.stream_id`
    pub eos: bool,
    /// Payload
    pub data: Arc<[T]>,
}

impl<T: Sample> Burst<T> {
    /// Create a burst
    pub fn new(sri: BurstSri, data: impl Into<Arc<[T]>>, time: PrecisionTime, eos: bool) -> Self {
        Self {
            sri,
            time,
            eos,
            data: data.into(),
        }
    }

    /// Create a burst stamped with the current time
    pub fn now(sri: BurstSri, data: impl Into<Arc<[T]>>) -> Self {
        Self::new(sri, data, PrecisionTime::now(), false)
    }

    /// Create an empty end-of-stream burst
    pub fn end_of_stream(sri: BurstSri) -> Self {
        Self::new(sri, Vec::new(), PrecisionTime::now(), true)
    }

    /// Stream identifier
    pub fn stream_id(&self) -> &str {
        &self.sri.stream_id
    }

    /// Number of elements in the payload
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload size in bytes
    pub fn byte_size(&self) -> usize {
        self.data.len() * T::BYTES
    }

    /// Whether the payload holds complex samples
    pub fn is_complex(&self) -> bool {
        self.sri.is_complex()
    }
}

/// Total number of elements across a sequence of bursts
pub fn total_elements<T: Sample>(bursts: &[Burst<T>]) -> usize {
    bursts.iter().map(Burst::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_accessors() {
        let burst = Burst::<f32>::now(BurstSri::new("s1"), vec![1.0, 2.0, 3.0]);
        assert_eq!(burst.stream_id(), "s1");
        assert_eq!(burst.len(), 3);
        assert_eq!(burst.byte_size(), 12);
        assert!(!burst.eos);
        assert!(!burst.is_empty());
    }

    #[test]
    fn test_end_of_stream() {
        let burst = Burst::<i16>::end_of_stream(BurstSri::new("s2"));
        assert!(burst.eos);
        assert!(burst.is_empty());
        assert_eq!(burst.byte_size(), 0);
    }

    #[test]
    fn test_clone_shares_payload() {
        let burst = Burst::<u8>::now(BurstSri::new("s"), vec![0u8; 1024]);
        let copy = burst.clone();
        assert!(Arc::ptr_eq(&burst.data, &copy.data));
    }

    #[test]
    fn test_total_elements() {
        let bursts = vec![
            Burst::<f64>::now(BurstSri::new("a"), vec![0.0; 10]),
            Burst::<f64>::now(BurstSri::new("b"), vec![0.0; 5]),
        ];
        assert_eq!(total_elements(&bursts), 15);
    }
}
