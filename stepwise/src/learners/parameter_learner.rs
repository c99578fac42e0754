use stepwise_core::{dictionary::Dictionary, schedule::Schedule, tensor::NDArray, Error, Result};

use super::{
    base::{LearnerBase, SMOOTHED_COUNT_KEY},
    rule::{UpdateContext, UpdateRule},
    Learner,
};
use crate::{
    options::AdditionalLearningOptions,
    parameter::{Gradients, Parameter},
};

/// A learner that updates every parameter with the closed-form rule `R`.
///
/// ```rust
/// # use stepwise::prelude::*;
/// let w = Parameter::new("w", Tensor::<f32>::full([3], 1.0, Device::Cpu));
/// let mut learner = ParameterLearner::new(
///     vec![w.clone()],
///     Schedule::constant(0.5),
///     Sgd,
///     AdditionalLearningOptions::default(),
/// )
/// .unwrap();
///
/// let mut grads = Gradients::new();
/// grads.insert(&w, Tensor::<f32>::full([3], 1.0, Device::Cpu));
/// assert!(learner.update(&mut grads, 1, false).unwrap());
/// assert_eq!(w.value().to_f64_vec(), vec![0.5; 3]);
/// ```
#[derive(Debug)]
pub struct ParameterLearner<R> {
    base: LearnerBase,
    rule: R,
}

impl<R: UpdateRule> ParameterLearner<R> {
    pub fn new(
        parameters: Vec<Parameter>,
        learning_rate: Schedule,
        rule: R,
        options: AdditionalLearningOptions,
    ) -> Result<Self> {
        let base = LearnerBase::new(R::NAME, parameters, learning_rate, options, |device| {
            rule.state_columns(device)
        })?;
        Ok(Self { base, rule })
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }
}

impl<R: UpdateRule> Learner for ParameterLearner<R> {
    fn base(&self) -> &LearnerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LearnerBase {
        &mut self.base
    }

    fn learner_type(&self) -> &'static str {
        R::NAME
    }

    fn update(&mut self, gradients: &mut Gradients, sample_count: u64, sweep_end: bool) -> Result<bool> {
        let Some(learning_rate) = self.base.begin_update(gradients, sample_count)? else {
            return Ok(false);
        };
        let ctx = UpdateContext {
            learning_rate,
            sample_count,
            counters: self.base.counters(),
        };
        self.rule.on_minibatch_start(sample_count, &ctx.counters);
        self.rule.report(&mut self.base);
        self.base.update_parameters(&self.rule, gradients, &ctx)?;
        self.base.finish_update(sample_count, sweep_end);
        Ok(true)
    }

    fn update_parameter(
        &mut self,
        parameter: &Parameter,
        gradient: &mut NDArray,
        sample_count: u64,
    ) -> Result<()> {
        let index = self.base.index_of(parameter)?;
        if sample_count == 0 {
            return Err(Error::InvalidArgument(
                "cannot perform an update with an empty minibatch".into(),
            ));
        }
        let ctx = UpdateContext {
            learning_rate: self.base.learning_rate_per_sample(sample_count),
            sample_count,
            counters: self.base.counters(),
        };
        self.base.update_parameter_at(&self.rule, index, gradient, &ctx)
    }

    fn create_checkpoint(&self) -> Dictionary {
        let mut checkpoint = self.base.create_checkpoint();
        if let Some(count) = self.rule.smoothed_count() {
            checkpoint.insert(SMOOTHED_COUNT_KEY, count);
        }
        checkpoint
    }

    fn restore_from_checkpoint(&mut self, checkpoint: &Dictionary) -> Result<()> {
        let restored = self.base.read_checkpoint(checkpoint)?;
        let smoothed_count = match self.rule.smoothed_count() {
            Some(_) => Some(checkpoint.require_double(SMOOTHED_COUNT_KEY)?),
            None => None,
        };
        self.base.apply_checkpoint(restored)?;
        if let Some(count) = smoothed_count {
            self.rule.set_smoothed_count(count);
        }
        Ok(())
    }

    fn reset_smoothed_gradients(&mut self) {
        self.base.reset_smoothed_gradients();
        if self.rule.smoothed_count().is_some() {
            self.rule.set_smoothed_count(0.0);
        }
    }
}
