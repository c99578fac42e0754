use rand::{rngs::StdRng, SeedableRng};

use super::{Device, Shape};
use crate::{
    dtypes::Dtype,
    error::{Error, Result},
};

/// A dense, column-major, host resident tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<E> {
    pub(crate) shape: Shape,
    pub(crate) data: Vec<E>,
    pub(crate) device: Device,
}

impl<E: Dtype> Tensor<E> {
    /// Allocates a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, device: Device) -> Self {
        Self::full(shape, E::zero(), device)
    }

    /// Allocates a tensor filled with `value`.
    pub fn full(shape: impl Into<Shape>, value: E, device: Device) -> Self {
        let shape = shape.into();
        let data = vec![value; shape.num_elements()];
        Self {
            shape,
            data,
            device,
        }
    }

    /// Wraps `data`, which must hold exactly as many elements as `shape`.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<E>, device: Device) -> Result<Self> {
        let shape = shape.into();
        if shape.num_elements() != data.len() {
            return Err(Error::InvalidArgument(format!(
                "shape {shape} needs {} elements, got {}",
                shape.num_elements(),
                data.len()
            )));
        }
        Ok(Self {
            shape,
            data,
            device,
        })
    }

    /// Draws independent `N(mean, std_dev)` samples on the host and moves them to `device`.
    pub fn sample_normal(
        shape: impl Into<Shape>,
        mean: f64,
        std_dev: f64,
        seed: u64,
        device: Device,
    ) -> Result<Self> {
        let mut t = Self::zeros(shape, Device::Cpu);
        let mut rng = StdRng::seed_from_u64(seed);
        E::fill_normal(&mut t.data, mean, std_dev, &mut rng)
            .map_err(|e| Error::InvalidArgument(format!("gaussian noise: {e}")))?;
        Ok(t.to_device(device))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[E] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [E] {
        &mut self.data
    }

    /// Moves the tensor to `device`, keeping its values.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn fill(&mut self, value: E) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    /// Overwrites the values of `self` with `src`, which must have the same shape.
    pub fn copy_from(&mut self, src: &Self) -> Result<()> {
        if self.shape != src.shape {
            return Err(Error::InvalidArgument(format!(
                "cannot copy a {} tensor into a {} tensor",
                src.shape, self.shape
            )));
        }
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    /// Euclidean norm of all elements, accumulated in `f64`.
    pub fn frobenius_norm(&self) -> f64 {
        self.data
            .iter()
            .map(|x| {
                let x = x.to_f64().unwrap_or(f64::NAN);
                x * x
            })
            .sum::<f64>()
            .sqrt()
    }

    /// `self *= alpha`
    pub fn scale(&mut self, alpha: E) {
        self.data.iter_mut().for_each(|x| *x *= alpha);
    }

    /// `self += alpha * x`
    pub fn scale_and_add(&mut self, alpha: E, x: &Self) -> Result<()> {
        if self.shape != x.shape {
            return Err(Error::InvalidArgument(format!(
                "cannot add a {} tensor to a {} tensor",
                x.shape, self.shape
            )));
        }
        for (y, &x) in self.data.iter_mut().zip(x.data.iter()) {
            *y += alpha * x;
        }
        Ok(())
    }

    /// Clamps every element into `[-bound, bound]`.
    pub fn truncate(&mut self, bound: E) {
        let bound = bound.abs();
        for x in self.data.iter_mut() {
            if *x > bound {
                *x = bound;
            } else if *x < -bound {
                *x = -bound;
            }
        }
    }

    /// Soft thresholding: shrinks every element towards zero by `threshold`.
    pub fn soft_threshold(&mut self, threshold: E) {
        for x in self.data.iter_mut() {
            *x = if *x > threshold {
                *x - threshold
            } else if *x < -threshold {
                *x + threshold
            } else {
                E::zero()
            };
        }
    }

    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|x| x.is_nan())
    }
}
