//! Sample element types
//!
//! Each element type maps to one burst port flavour. The element size drives the
//! byte accounting of output accumulators and the bit rates in statistics.

use std::fmt::Debug;

/// Element type carried in a burst payload
pub trait Sample: Copy + Debug + Send + Sync + 'static {
    /// Size of one element in bytes
    const BYTES: usize;

    /// Interface repository ID of ports carrying this element type
    const REPO_ID: &'static str;

    /// Size of one element in bits
    fn bits() -> usize {
        Self::BYTES * 8
    }
}

macro_rules! impl_sample {
    ($ty:ty, $repo:expr) => {
        impl Sample for $ty {
            const BYTES: usize = std::mem::size_of::<$ty>();
            const REPO_ID: &'static str = $repo;
        }
    };
}

impl_sample!(i8, "IDL:BURSTIO/burstByte:1.0");
impl_sample!(u8, "IDL:BURSTIO/burstUbyte:1.0");
impl_sample!(i16, "IDL:BURSTIO/burstShort:1.0");
impl_sample!(u16, "IDL:BURSTIO/burstUshort:1.0");
impl_sample!(i32, "IDL:BURSTIO/burstLong:1.0");
impl_sample!(u32, "IDL:BURSTIO/burstUlong:1.0");
impl_sample!(i64, "IDL:BURSTIO/burstLongLong:1.0");
impl_sample!(u64, "IDL:BURSTIO/burstUlongLong:1.0");
impl_sample!(f32, "IDL:BURSTIO/burstFloat:1.0");
impl_sample!(f64, "IDL:BURSTIO/burstDouble:1.0");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(<i8 as Sample>::BYTES, 1);
        assert_eq!(<u16 as Sample>::BYTES, 2);
        assert_eq!(<f32 as Sample>::BYTES, 4);
        assert_eq!(<f64 as Sample>::BYTES, 8);
        assert_eq!(<i64 as Sample>::bits(), 64);
    }

    #[test]
    fn test_repo_ids_differ() {
        assert_ne!(<f32 as Sample>::REPO_ID, <f64 as Sample>::REPO_ID);
        assert_ne!(<i8 as Sample>::REPO_ID, <u8 as Sample>::REPO_ID);
    }
}
