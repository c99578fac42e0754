//! # stepwise-core
//!
//! Building blocks shared by the stepwise learners:
//!
//! - [dtypes]: the two element types a learner can update, `f32` and `f64`,
//!   behind the [dtypes::Dtype] trait.
//! - [tensor]: host resident, column-major [tensor::Tensor]s with a
//!   [tensor::Device] descriptor, and the closed [tensor::NDArray] sum type
//!   that parameters, gradients and auxiliary state are stored as.
//! - [schedule]: step functions of elapsed samples or sweeps that drive the
//!   learning rate, momentum and noise level.
//! - [dictionary]: the key/value model checkpoints are written in.
//! - [error]: the one [Error] type every fallible operation returns.
//!
//! ```rust
//! # use stepwise_core::prelude::*;
//! let lr = Schedule::per_epoch(vec![0.1, 0.01], 1000, UnitType::Sample).unwrap();
//! assert_eq!(lr.value_at(999), 0.1);
//! assert_eq!(lr.value_at(1000), 0.01);
//! ```

pub mod dictionary;
pub mod dtypes;
pub mod error;
pub mod schedule;
pub mod tensor;
pub mod unique_id;

pub use error::{Error, Result};

/// Contains subset of all public exports.
pub mod prelude {
    pub use crate::dictionary::{Dictionary, DictionaryValue};
    pub use crate::dtypes::{DataType, Dtype};
    pub use crate::error::{Error, Result};
    pub use crate::schedule::{ElapsedCounters, Schedule, UnitType};
    pub use crate::tensor::{Device, DeviceKind, NDArray, Shape, Tensor};
    pub use crate::unique_id::{unique_id, HasUniqueId, UniqueId};
}

#[cfg(test)]
pub(crate) mod tests {
    pub use num_traits::{Float, FromPrimitive, Zero};

    #[cfg(not(feature = "test-f64"))]
    pub type TestDtype = f32;

    #[cfg(feature = "test-f64")]
    pub type TestDtype = f64;

    pub trait AssertClose {
        type Elem: std::fmt::Display + std::fmt::Debug + Copy;
        const DEFAULT_TOLERANCE: Self::Elem;
        fn get_far_pair(&self, rhs: &Self, tolerance: Self::Elem)
            -> Option<(Self::Elem, Self::Elem)>;
    }

    impl AssertClose for f32 {
        type Elem = f32;
        const DEFAULT_TOLERANCE: Self::Elem = 1e-6;
        fn get_far_pair(&self, rhs: &Self, tolerance: f32) -> Option<(f32, f32)> {
            if (self - rhs).abs() > tolerance {
                Some((*self, *rhs))
            } else {
                None
            }
        }
    }

    impl AssertClose for f64 {
        type Elem = f64;
        const DEFAULT_TOLERANCE: Self::Elem = 1e-6;
        fn get_far_pair(&self, rhs: &Self, tolerance: f64) -> Option<(f64, f64)> {
            if (self - rhs).abs() > tolerance {
                Some((*self, *rhs))
            } else {
                None
            }
        }
    }

    pub fn assert_close<T: AssertClose + std::fmt::Debug>(lhs: &[T], rhs: &[T]) {
        assert_eq!(lhs.len(), rhs.len(), "length mismatch");
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            if let Some((l, r)) = l.get_far_pair(r, T::DEFAULT_TOLERANCE) {
                panic!("lhs != rhs | {l} != {r}\n\n{lhs:?}\n\n{rhs:?}");
            }
        }
    }
}
