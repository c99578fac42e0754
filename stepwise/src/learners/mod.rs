//! Learners update parameters in place from their gradients.
//!
//! Every closed-form learner is a [ParameterLearner] around an [UpdateRule]:
//!
//! | rule | auxiliary state per parameter |
//! | --- | --- |
//! | [Sgd] | none |
//! | [MomentumSgd], [Nesterov] | velocity |
//! | [AdaGrad] | squared gradient sum (+ multipliers on gpu) |
//! | [AdaDelta] | E\[g²\], E\[Δ²\] |
//! | [FsAdaGrad] | variance, momentum |
//! | [Adam] | second moment, first moment |
//! | [RmsProp] | mean square, signs, step sizes (+ multipliers on gpu) |
//!
//! [UniversalLearner] instead delegates the whole update to an external
//! [UpdateFunction].
//!
//! A training loop calls [Learner::update] once per minibatch:
//!
//! ```rust
//! # use stepwise::prelude::*;
//! let w = Parameter::new("w", Tensor::<f64>::zeros([4], Device::Cpu));
//! let rule = Adam::new(AdamConfig::new(Schedule::constant(0.9))).unwrap();
//! let mut learner = ParameterLearner::new(
//!     vec![w.clone()],
//!     Schedule::constant(1e-3),
//!     rule,
//!     AdditionalLearningOptions::default(),
//! )
//! .unwrap();
//!
//! for _ in 0..3 {
//!     let mut grads = Gradients::new();
//!     grads.insert(&w, Tensor::<f64>::full([4], 0.5, Device::Cpu));
//!     learner.update(&mut grads, 16, false).unwrap();
//! }
//! assert_eq!(learner.total_samples_seen(), 48);
//! ```

mod adadelta;
mod adagrad;
mod adam;
mod base;
mod fsadagrad;
mod momentum;
mod parameter_learner;
mod rmsprop;
mod rule;
mod sgd;
mod universal;

pub use adadelta::{AdaDelta, AdaDeltaConfig};
pub use adagrad::{AdaGrad, AdaGradConfig};
pub use adam::{Adam, AdamConfig};
pub use base::*;
pub use fsadagrad::{FsAdaGrad, FsAdaGradConfig};
pub use momentum::{MomentumConfig, MomentumSgd, Nesterov};
pub use parameter_learner::ParameterLearner;
pub use rmsprop::{RmsProp, RmsPropConfig};
pub use rule::{UpdateContext, UpdateRule};
pub use sgd::Sgd;
pub use universal::{CombinedUpdate, UniversalLearner, UpdateFunction};

use stepwise_core::{
    dictionary::Dictionary,
    schedule::{ElapsedCounters, Schedule},
    tensor::NDArray,
    Result,
};

use crate::{
    parameter::{Gradients, Parameter},
    progress::SharedProgressWriter,
};

pub type SgdLearner = ParameterLearner<Sgd>;
pub type MomentumSgdLearner = ParameterLearner<MomentumSgd>;
pub type NesterovLearner = ParameterLearner<Nesterov>;
pub type AdaGradLearner = ParameterLearner<AdaGrad>;
pub type AdaDeltaLearner = ParameterLearner<AdaDelta>;
pub type FsAdaGradLearner = ParameterLearner<FsAdaGrad>;
pub type AdamLearner = ParameterLearner<Adam>;
pub type RmsPropLearner = ParameterLearner<RmsProp>;

/// The host backend that runs the update kernels.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Cpu;

/// Something that updates a fixed set of parameters once per minibatch.
pub trait Learner {
    fn base(&self) -> &LearnerBase;

    fn base_mut(&mut self) -> &mut LearnerBase;

    /// Short identifier of the algorithm.
    fn learner_type(&self) -> &'static str;

    /// Applies one minibatch of `sample_count` samples.
    ///
    /// Returns `false`, without touching parameters or counters, when the
    /// learning rate is currently zero. `gradients` must hold one gradient
    /// per parameter; they may be modified in place.
    fn update(&mut self, gradients: &mut Gradients, sample_count: u64, sweep_end: bool) -> Result<bool>;

    /// Updates a single parameter without advancing any counter.
    fn update_parameter(
        &mut self,
        parameter: &Parameter,
        gradient: &mut NDArray,
        sample_count: u64,
    ) -> Result<()>;

    fn create_checkpoint(&self) -> Dictionary;

    /// Restores state written by [Learner::create_checkpoint]. Nothing is
    /// modified if the checkpoint does not fit this learner.
    fn restore_from_checkpoint(&mut self, checkpoint: &Dictionary) -> Result<()>;

    /// Zeroes all auxiliary state.
    fn reset_smoothed_gradients(&mut self);

    fn parameters(&self) -> &[Parameter] {
        self.base().parameters()
    }

    /// Replaces the learning rate schedule, starting it at the current time.
    fn reset_learning_rate(&mut self, schedule: Schedule) {
        self.base_mut().reset_learning_rate(schedule)
    }

    /// The current per-sample learning rate.
    fn learning_rate(&self) -> f64 {
        self.base().learning_rate_per_sample(1)
    }

    fn counters(&self) -> ElapsedCounters {
        self.base().counters()
    }

    fn total_samples_seen(&self) -> u64 {
        self.counters().samples
    }

    fn add_progress_writers(&mut self, writers: Vec<SharedProgressWriter>) {
        self.base_mut().add_progress_writers(writers)
    }
}
