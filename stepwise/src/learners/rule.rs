use stepwise_core::{
    dtypes::Dtype,
    schedule::{ElapsedCounters, Schedule},
    tensor::{Device, Tensor},
    Error, Result,
};

use super::LearnerBase;

/// Everything a rule needs to know about the minibatch being applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateContext {
    /// Effective per-sample learning rate.
    pub learning_rate: f64,
    /// Number of samples in the minibatch.
    pub sample_count: u64,
    /// Elapsed time before this minibatch.
    pub counters: ElapsedCounters,
}

/// The per-algorithm part of a closed-form learner.
///
/// [super::ParameterLearner] owns the shared work (validation, clipping,
/// regularization, noise, counters, checkpoints) and calls into the rule for
/// the actual update of each parameter.
pub trait UpdateRule {
    /// Short identifier used in logs and configuration.
    const NAME: &'static str;

    /// How many parameter-sized column blocks of auxiliary state the rule
    /// needs for a parameter living on `device`.
    fn state_columns(&self, device: Device) -> usize;

    /// Called once per minibatch, before any parameter is updated.
    fn on_minibatch_start(&mut self, _sample_count: u64, _counters: &ElapsedCounters) {}

    /// Reports rule specific hyperparameters.
    fn report(&self, _base: &mut LearnerBase) {}

    /// Updates `param` in place from the (already pre-processed) `grad`.
    ///
    /// `state` is laid out as [UpdateRule::state_columns] blocks of
    /// `param.num_elements()` elements each.
    fn update<E: Dtype>(
        &self,
        param: &mut Tensor<E>,
        grad: &mut Tensor<E>,
        state: &mut Tensor<E>,
        ctx: &UpdateContext,
    ) -> Result<()>;

    /// The scalar smoothing count, for rules that keep one.
    fn smoothed_count(&self) -> Option<f64> {
        None
    }

    fn set_smoothed_count(&mut self, _count: f64) {}
}

/// Momentum from `schedule` at `counters`, converted to a decay for a
/// minibatch of `sample_count` samples.
pub(crate) fn momentum_for_minibatch(
    schedule: &Schedule,
    counters: &ElapsedCounters,
    sample_count: u64,
) -> f64 {
    schedule.per_minibatch_decay(schedule.current(counters), sample_count)
}

/// Factor in front of the new gradient in a momentum update.
pub(crate) fn unit_gain_factor(momentum: f64, unit_gain: bool) -> f64 {
    if unit_gain {
        1.0 - momentum
    } else {
        1.0
    }
}

/// Splits `state` into `K` contiguous blocks of `n` elements.
pub(crate) fn split_blocks<E, const K: usize>(state: &mut [E], n: usize) -> Result<[&mut [E]; K]> {
    if state.len() != K * n {
        return Err(Error::Internal(format!(
            "auxiliary state holds {} elements, expected {K} blocks of {n}",
            state.len()
        )));
    }
    let mut rest = state;
    let mut blocks = Vec::with_capacity(K);
    for _ in 0..K {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
        blocks.push(head);
        rest = tail;
    }
    blocks
        .try_into()
        .map_err(|_| Error::Internal("auxiliary state split".into()))
}
