use super::{Device, Shape, Tensor};
use crate::{
    dtypes::{DataType, Dtype, LeBytes},
    error::{Error, Result},
};

/// A tensor of either supported element type.
#[derive(Debug, Clone, PartialEq)]
pub enum NDArray {
    F32(Tensor<f32>),
    F64(Tensor<f64>),
}

impl From<Tensor<f32>> for NDArray {
    fn from(t: Tensor<f32>) -> Self {
        Self::F32(t)
    }
}

impl From<Tensor<f64>> for NDArray {
    fn from(t: Tensor<f64>) -> Self {
        Self::F64(t)
    }
}

macro_rules! map_ndarray {
    ($self:expr, $t:ident => $body:expr) => {
        match $self {
            NDArray::F32($t) => $body,
            NDArray::F64($t) => $body,
        }
    };
}

impl NDArray {
    /// Allocates a zero filled array of element type `data_type`.
    pub fn zeros(data_type: DataType, shape: impl Into<Shape>, device: Device) -> Self {
        match data_type {
            DataType::Float => Self::F32(Tensor::zeros(shape, device)),
            DataType::Double => Self::F64(Tensor::zeros(shape, device)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::F32(_) => DataType::Float,
            Self::F64(_) => DataType::Double,
        }
    }

    pub fn shape(&self) -> &Shape {
        map_ndarray!(self, t => t.shape())
    }

    pub fn device(&self) -> Device {
        map_ndarray!(self, t => t.device())
    }

    pub fn num_elements(&self) -> usize {
        map_ndarray!(self, t => t.num_elements())
    }

    pub fn set_zero(&mut self) {
        match self {
            Self::F32(t) => t.fill(0.0),
            Self::F64(t) => t.fill(0.0),
        }
    }

    pub fn has_nan(&self) -> bool {
        map_ndarray!(self, t => t.has_nan())
    }

    pub fn frobenius_norm(&self) -> f64 {
        map_ndarray!(self, t => t.frobenius_norm())
    }

    /// Overwrites the values of `self` with `src`. Element type and shape must match.
    pub fn copy_from(&mut self, src: &Self) -> Result<()> {
        match (self, src) {
            (Self::F32(dst), Self::F32(src)) => dst.copy_from(src),
            (Self::F64(dst), Self::F64(src)) => dst.copy_from(src),
            (dst, src) => Err(Error::DataTypeMismatch {
                expected: dst.data_type(),
                got: src.data_type(),
            }),
        }
    }

    pub fn as_f32(&self) -> Option<&Tensor<f32>> {
        match self {
            Self::F32(t) => Some(t),
            Self::F64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<&Tensor<f64>> {
        match self {
            Self::F64(t) => Some(t),
            Self::F32(_) => None,
        }
    }

    /// Element values widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Self::F32(t) => t.data().iter().map(|&x| x as f64).collect(),
            Self::F64(t) => t.data().to_vec(),
        }
    }

    /// Raw little endian bytes of the elements.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        fn bytes<E: Dtype>(t: &Tensor<E>) -> Vec<u8> {
            let mut out = Vec::with_capacity(t.num_elements() * E::DATA_TYPE.size_in_bytes());
            for &x in t.data() {
                x.extend_le_bytes(&mut out);
            }
            out
        }
        map_ndarray!(self, t => bytes(t))
    }

    /// Rebuilds an array from bytes written by [NDArray::to_le_bytes].
    pub fn from_le_bytes(
        data_type: DataType,
        shape: impl Into<Shape>,
        bytes: &[u8],
        device: Device,
    ) -> Result<Self> {
        fn decode<E: Dtype>(shape: Shape, bytes: &[u8], device: Device) -> Result<Tensor<E>> {
            let width = E::DATA_TYPE.size_in_bytes();
            if bytes.len() % width != 0 {
                return Err(Error::InvalidArgument(format!(
                    "{} bytes is not a whole number of {} elements",
                    bytes.len(),
                    E::DATA_TYPE
                )));
            }
            let data = bytes
                .chunks_exact(width)
                .map(|c| {
                    <E as LeBytes>::from_le_bytes(c)
                        .ok_or_else(|| Error::Internal("bad element width".into()))
                })
                .collect::<Result<Vec<E>>>()?;
            Tensor::from_vec(shape, data, device)
        }
        let shape = shape.into();
        Ok(match data_type {
            DataType::Float => Self::F32(decode(shape, bytes, device)?),
            DataType::Double => Self::F64(decode(shape, bytes, device)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_from_checks_type() {
        let mut a = NDArray::zeros(DataType::Float, [2], Device::Cpu);
        let b = NDArray::zeros(DataType::Double, [2], Device::Cpu);
        assert!(matches!(
            a.copy_from(&b),
            Err(Error::DataTypeMismatch { .. })
        ));
        let c = NDArray::F32(Tensor::from_vec([2], vec![1.0, 2.0], Device::Cpu).unwrap());
        a.copy_from(&c).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_le_bytes_are_bit_exact() {
        let values = vec![0.1f64, -2.5e-300, f64::MAX, 7.0];
        let a = NDArray::F64(Tensor::from_vec([2, 2], values, Device::Gpu(0)).unwrap());
        let b = NDArray::from_le_bytes(
            DataType::Double,
            a.shape().clone(),
            &a.to_le_bytes(),
            Device::Gpu(0),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_zero() {
        let mut a = NDArray::F32(Tensor::full([3], 2.0, Device::Cpu));
        a.set_zero();
        assert_eq!(a.to_f64_vec(), vec![0.0; 3]);
    }
}
