//! Element types a learner can operate on: [f32] and [f64].
//!
//! Every kernel in the workspace is written once, generically over [Dtype],
//! and instantiated for both element types. The runtime tag for an element
//! type is [DataType].

mod le_bytes;

pub use le_bytes::LeBytes;

/// Runtime tag of an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    Double,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    /// Parses the tag written by [DataType::name].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            _ => None,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::Float => 4,
            Self::Double => 8,
        }
    }

    pub fn safetensors_dtype(&self) -> safetensors::tensor::Dtype {
        match self {
            Self::Float => safetensors::tensor::Dtype::F32,
            Self::Double => safetensors::tensor::Dtype::F64,
        }
    }

    /// Inverse of [DataType::safetensors_dtype], `None` for the other element types.
    pub fn from_safetensors_dtype(dtype: safetensors::tensor::Dtype) -> Option<Self> {
        match dtype {
            safetensors::tensor::Dtype::F32 => Some(Self::Float),
            safetensors::tensor::Dtype::F64 => Some(Self::Double),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Represents a floating point element type that learners can update.
pub trait Dtype:
    'static
    + Copy
    + Clone
    + Default
    + std::fmt::Debug
    + std::fmt::Display
    + PartialEq
    + PartialOrd
    + num_traits::Float
    + num_traits::FromPrimitive
    + num_traits::ToPrimitive
    + std::ops::AddAssign
    + std::ops::SubAssign
    + std::ops::MulAssign
    + std::ops::DivAssign
    + LeBytes
{
    const DATA_TYPE: DataType;

    /// Lossy conversion from a hyperparameter value.
    fn from_f64_lossy(value: f64) -> Self;

    /// Fills `buf` with independent draws from `N(mean, std_dev)`.
    fn fill_normal<R: rand::Rng>(
        buf: &mut [Self],
        mean: f64,
        std_dev: f64,
        rng: &mut R,
    ) -> Result<(), rand_distr::NormalError>;
}

macro_rules! dtype {
    ($type:ty, $tag:expr) => {
        impl Dtype for $type {
            const DATA_TYPE: DataType = $tag;
            fn from_f64_lossy(value: f64) -> Self {
                value as $type
            }
            fn fill_normal<R: rand::Rng>(
                buf: &mut [Self],
                mean: f64,
                std_dev: f64,
                rng: &mut R,
            ) -> Result<(), rand_distr::NormalError> {
                use rand_distr::Distribution;
                let distr = rand_distr::Normal::new(mean as $type, std_dev as $type)?;
                for x in buf.iter_mut() {
                    *x = distr.sample(rng);
                }
                Ok(())
            }
        }
    };
}

dtype!(f32, DataType::Float);
dtype!(f64, DataType::Double);
