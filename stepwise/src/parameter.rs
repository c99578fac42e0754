//! Trainable parameters and the gradients computed for them.

use std::{
    cell::{Ref, RefCell, RefMut},
    collections::HashMap,
    rc::Rc,
};

use stepwise_core::{
    dtypes::DataType,
    tensor::{Device, NDArray, Shape},
    unique_id::{unique_id, HasUniqueId, UniqueId},
    Error, Result,
};

/// A named tensor owned by a model and updated in place by a learner.
///
/// Cloning a [Parameter] clones the handle: both clones read and write the
/// same storage. Equality and hashing go by [UniqueId].
#[derive(Debug, Clone)]
pub struct Parameter {
    id: UniqueId,
    uid: String,
    name: String,
    value: Rc<RefCell<NDArray>>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<NDArray>) -> Self {
        let id = unique_id();
        Self {
            id,
            uid: format!("Parameter{id}"),
            name: name.into(),
            value: Rc::new(RefCell::new(value.into())),
        }
    }

    /// Like [Parameter::new] but with a caller chosen checkpoint uid.
    pub fn with_uid(uid: impl Into<String>, name: impl Into<String>, value: impl Into<NDArray>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::new(name, value)
        }
    }

    /// A zero filled tensor with the element type, shape and device of `like`.
    pub fn zeros_like(like: &Parameter, name: impl Into<String>) -> Self {
        let value = like.value();
        let zeros = NDArray::zeros(value.data_type(), value.shape().clone(), value.device());
        drop(value);
        Self::new(name, zeros)
    }

    /// Identifier used for checkpoints written by the legacy format.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.value().data_type()
    }

    pub fn shape(&self) -> Shape {
        self.value().shape().clone()
    }

    pub fn device(&self) -> Device {
        self.value().device()
    }

    pub fn num_elements(&self) -> usize {
        self.value().num_elements()
    }

    /// Borrows the current value.
    ///
    /// Panics if the value is being written at the same time.
    pub fn value(&self) -> Ref<'_, NDArray> {
        self.value.borrow()
    }

    /// Mutably borrows the value, failing if it is already borrowed.
    pub fn try_value_mut(&self) -> Result<RefMut<'_, NDArray>> {
        self.value.try_borrow_mut().map_err(|_| {
            Error::Internal(format!("parameter '{}' is already borrowed", self.name))
        })
    }

    /// Overwrites the value with `src`, which must have the same element type and shape.
    pub fn set_value(&self, src: &NDArray) -> Result<()> {
        self.try_value_mut()?.copy_from(src)
    }
}

impl HasUniqueId for Parameter {
    fn id(&self) -> &UniqueId {
        &self.id
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Parameter {}

impl std::hash::Hash for Parameter {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.value();
        write!(
            f,
            "Parameter('{}', {}, {}, {})",
            self.name,
            value.shape(),
            value.data_type(),
            value.device()
        )
    }
}

/// A generic container for keeping gradients of parameters, keyed by the
/// parameter's [UniqueId].
///
/// Learners may modify gradients in place (clipping, regularization), so
/// they take gradients by mutable reference.
#[derive(Debug, Clone, Default)]
pub struct Gradients {
    gradient_by_id: HashMap<UniqueId, NDArray>,
}

impl Gradients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the gradient of `parameter`, returning the previous one if any.
    pub fn insert(&mut self, parameter: &impl HasUniqueId, gradient: impl Into<NDArray>) -> Option<NDArray> {
        self.gradient_by_id.insert(*parameter.id(), gradient.into())
    }

    pub fn remove(&mut self, parameter: &impl HasUniqueId) -> Option<NDArray> {
        self.gradient_by_id.remove(parameter.id())
    }

    pub fn contains(&self, parameter: &impl HasUniqueId) -> bool {
        self.gradient_by_id.contains_key(parameter.id())
    }

    pub fn get_ref_checked(&self, parameter: &impl HasUniqueId) -> Option<&NDArray> {
        self.gradient_by_id.get(parameter.id())
    }

    pub fn get_mut(&mut self, parameter: &impl HasUniqueId) -> Option<&mut NDArray> {
        self.gradient_by_id.get_mut(parameter.id())
    }

    pub fn len(&self) -> usize {
        self.gradient_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gradient_by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::tensor::Tensor;

    #[test]
    fn test_clones_share_storage() {
        let p = Parameter::new("w", Tensor::<f32>::zeros([2], Device::Cpu));
        let q = p.clone();
        let ones = NDArray::F32(Tensor::full([2], 1.0, Device::Cpu));
        q.set_value(&ones).unwrap();
        assert_eq!(*p.value(), ones);
        assert_eq!(p, q);
    }

    #[test]
    fn test_ids_and_uids_are_distinct() {
        let a = Parameter::new("w", Tensor::<f32>::zeros([1], Device::Cpu));
        let b = Parameter::new("w", Tensor::<f32>::zeros([1], Device::Cpu));
        assert_ne!(a, b);
        assert_ne!(a.uid(), b.uid());
        assert!(a.uid().starts_with("Parameter"));
        let c = Parameter::with_uid("fixed", "w", Tensor::<f64>::zeros([1], Device::Cpu));
        assert_eq!(c.uid(), "fixed");
    }

    #[test]
    fn test_zeros_like() {
        let p = Parameter::new("w", Tensor::<f64>::full([2, 3], 4.0, Device::Gpu(1)));
        let z = Parameter::zeros_like(&p, "gradient");
        assert_eq!(z.shape(), Shape::from([2, 3]));
        assert_eq!(z.data_type(), DataType::Double);
        assert_eq!(z.device(), Device::Gpu(1));
        assert_eq!(z.value().to_f64_vec(), vec![0.0; 6]);
    }

    #[test]
    fn test_double_borrow_is_an_error() {
        let p = Parameter::new("w", Tensor::<f32>::zeros([1], Device::Cpu));
        let _guard = p.value();
        assert!(matches!(p.try_value_mut(), Err(Error::Internal(_))));
    }

    #[test]
    fn test_gradients_by_id() {
        let p = Parameter::new("w", Tensor::<f32>::zeros([1], Device::Cpu));
        let mut grads = Gradients::new();
        assert!(!grads.contains(&p));
        grads.insert(&p, Tensor::<f32>::full([1], 2.0, Device::Cpu));
        assert_eq!(grads.get_ref_checked(&p.clone()).unwrap().to_f64_vec(), vec![2.0]);
        assert_eq!(grads.len(), 1);
    }
}
