//! # stepwise
//!
//! stepwise is a parameter update engine for gradient based training. Given
//! the gradient of every trainable parameter it updates the parameters in
//! place, using one of several algorithms:
//!
//! - plain SGD, momentum SGD and Nesterov accelerated momentum
//! - AdaGrad, AdaDelta, FSAdaGrad, Adam/AdaMax and RMSProp
//! - a "universal" learner whose update is an arbitrary user supplied function
//!
//! Around every closed-form update the learner applies gradient clipping, L2
//! regularization, Gaussian noise injection and an L1 proximal step, as
//! configured by [options::AdditionalLearningOptions].
//!
//! Learning rate, momentum and noise level are [Schedule]s of elapsed samples
//! or sweeps. A learner's whole state (auxiliary tensors, elapsed counters,
//! learning rate schedule, noise seed) can be written to a checkpoint
//! [Dictionary] and restored, so that resumed training continues exactly
//! where it left off; [checkpoint] persists such dictionaries as
//! `.safetensors` files.
//!
//! See [learners] for the available algorithms and [config] for building
//! learners from JSON.
//!
//! [Schedule]: stepwise_core::schedule::Schedule
//! [Dictionary]: stepwise_core::dictionary::Dictionary

pub mod checkpoint;
pub mod config;
pub mod learners;
pub mod options;
pub mod parameter;
pub mod progress;

pub use stepwise_core::{dictionary, dtypes, schedule, tensor, unique_id, Error, Result};

/// Contains subset of all public exports.
pub mod prelude {
    pub use crate::checkpoint::{load_checkpoint, save_checkpoint};
    pub use crate::config::{LearnerConfig, ScheduleConfig};
    pub use crate::learners::*;
    pub use crate::options::AdditionalLearningOptions;
    pub use crate::parameter::{Gradients, Parameter};
    pub use crate::progress::{ProgressWriter, SharedProgressWriter};
    pub use stepwise_core::prelude::*;
}
