//! Host resident tensors that learners read and write.
//!
//! A [Tensor] is a shape, a flat column-major buffer and a [Device]
//! descriptor. [NDArray] is the closed sum over the two supported element
//! types; it is what parameters, gradients and auxiliary state are stored as,
//! and it is matched exactly once per parameter update to select the `f32` or
//! `f64` code path.
//!
//! Matrix view: a tensor of shape `[d0, d1, ..]` is seen as a column-major
//! matrix with `d0` rows and `d1 * d2 * ..` columns. Auxiliary state tensors
//! are laid out as `k` such matrices side by side, so block `j` is the
//! contiguous slice `j * n .. (j + 1) * n`.

mod device;
mod ndarray;
mod shape;
mod storage;

pub use device::{Device, DeviceKind};
pub use ndarray::NDArray;
pub use shape::Shape;
pub use storage::Tensor;
