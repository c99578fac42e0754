mod cpu_kernel;

use stepwise_core::{
    dtypes::Dtype,
    schedule::Schedule,
    tensor::{Device, Tensor},
    Result,
};

use super::{
    rule::{momentum_for_minibatch, split_blocks, unit_gain_factor, UpdateContext, UpdateRule},
    Cpu, LearnerBase,
};

/// Configuration of [MomentumSgd] and [Nesterov].
///
/// Momentum values are per sample unless the schedule says otherwise (see
/// [Schedule::with_ref_mb_size]); a minibatch of `n` samples decays the
/// velocity by `momentum^n`.
///
/// Classic momentum, where the new gradient enters with weight one:
/// ```rust
/// # use stepwise::prelude::*;
/// let cfg = MomentumConfig::new(Schedule::constant(0.9)).with_unit_gain(false);
/// assert!(!cfg.unit_gain);
/// ```
///
/// Momentum given as a time constant of 1000 samples:
/// ```rust
/// # use stepwise::prelude::*;
/// let cfg = MomentumConfig::new(Schedule::momentum_as_time_constant(1000.0));
/// assert!(cfg.unit_gain);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumConfig {
    /// Momentum schedule.
    pub momentum: Schedule,

    /// Scale the new gradient by `1 - momentum`. Defaults to `true`.
    pub unit_gain: bool,
}

impl MomentumConfig {
    pub fn new(momentum: Schedule) -> Self {
        Self {
            momentum,
            unit_gain: true,
        }
    }

    pub fn with_unit_gain(mut self, unit_gain: bool) -> Self {
        self.unit_gain = unit_gain;
        self
    }

    fn step<E: Dtype>(&self, ctx: &UpdateContext, nesterov: bool) -> MomentumStep<E> {
        let momentum = momentum_for_minibatch(&self.momentum, &ctx.counters, ctx.sample_count);
        MomentumStep {
            lr: E::from_f64_lossy(ctx.learning_rate),
            momentum: E::from_f64_lossy(momentum),
            gain: E::from_f64_lossy(unit_gain_factor(momentum, self.unit_gain)),
            nesterov,
        }
    }
}

/// Momentum SGD: `v = m * v + (1 - m) * g; p -= lr * v`.
#[derive(Debug, Clone)]
pub struct MomentumSgd {
    pub cfg: MomentumConfig,
}

impl MomentumSgd {
    pub fn new(cfg: MomentumConfig) -> Self {
        Self { cfg }
    }
}

/// Nesterov accelerated momentum: `v = m * v + (1 - m) * g;
/// p -= lr * (m * v + (1 - m) * g)`.
///
/// Described in [On the importance of initialization and momentum in deep learning](https://proceedings.mlr.press/v28/sutskever13.html).
#[derive(Debug, Clone)]
pub struct Nesterov {
    pub cfg: MomentumConfig,
}

impl Nesterov {
    pub fn new(cfg: MomentumConfig) -> Self {
        Self { cfg }
    }
}

/// Scalars of one momentum update.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MomentumStep<E> {
    pub lr: E,
    pub momentum: E,
    pub gain: E,
    pub nesterov: bool,
}

pub(crate) trait MomentumKernel<E: Dtype> {
    fn update(
        &self,
        step: &MomentumStep<E>,
        param: &mut [E],
        velocity: &mut [E],
        grad: &[E],
    ) -> Result<()>;
}

fn momentum_update<E: Dtype>(
    cfg: &MomentumConfig,
    nesterov: bool,
    param: &mut Tensor<E>,
    grad: &Tensor<E>,
    state: &mut Tensor<E>,
    ctx: &UpdateContext,
) -> Result<()> {
    let n = param.num_elements();
    let [velocity] = split_blocks::<E, 1>(state.data_mut(), n)?;
    MomentumKernel::update(&Cpu, &cfg.step(ctx, nesterov), param.data_mut(), velocity, grad.data())
}

impl UpdateRule for MomentumSgd {
    const NAME: &'static str = "momentum_sgd";

    fn state_columns(&self, _device: Device) -> usize {
        1
    }

    fn report(&self, base: &mut LearnerBase) {
        base.report("Momentum", &self.cfg.momentum);
    }

    fn update<E: Dtype>(
        &self,
        param: &mut Tensor<E>,
        grad: &mut Tensor<E>,
        state: &mut Tensor<E>,
        ctx: &UpdateContext,
    ) -> Result<()> {
        momentum_update(&self.cfg, false, param, grad, state, ctx)
    }
}

impl UpdateRule for Nesterov {
    const NAME: &'static str = "nesterov";

    fn state_columns(&self, _device: Device) -> usize {
        1
    }

    fn report(&self, base: &mut LearnerBase) {
        base.report("Momentum", &self.cfg.momentum);
    }

    fn update<E: Dtype>(
        &self,
        param: &mut Tensor<E>,
        grad: &mut Tensor<E>,
        state: &mut Tensor<E>,
        ctx: &UpdateContext,
    ) -> Result<()> {
        momentum_update(&self.cfg, true, param, grad, state, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        learners::{base::*, Learner, MomentumSgdLearner, NesterovLearner},
        parameter::Parameter,
        progress::tests::recorder,
        tests::*,
    };
    use stepwise_core::{
        dictionary::{Dictionary, DictionaryValue},
        tensor::NDArray,
        Error,
    };

    const RATE: [f64; 5] = [0.02, 0.2, 0.4, 2.0, 20.0];

    fn classic(momentum: f64) -> MomentumConfig {
        MomentumConfig::new(Schedule::constant(momentum)).with_unit_gain(false)
    }

    fn momentum_learner(p: &Parameter, lr: f64, cfg: MomentumConfig) -> MomentumSgdLearner {
        MomentumSgdLearner::new(
            vec![p.clone()],
            Schedule::constant(lr),
            MomentumSgd::new(cfg),
            Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_classic_momentum() {
        let p = parameter(&[1.0; 5]);
        let mut learner = momentum_learner(&p, 1e-2, classic(0.5));
        let expected = [
            [0.9998, 0.998, 0.996, 0.98, 0.8],
            [0.99950004, 0.995, 0.99, 0.95000005, 0.5],
            [0.99915004, 0.9915, 0.983, 0.915, 0.15],
            [0.99877506, 0.98775, 0.9755, 0.8775, -0.225],
            [0.9983876, 0.983875, 0.96775, 0.83875, -0.61249995],
        ];
        for e in expected.iter() {
            let mut grads = gradients(&[(&p, &RATE)]);
            learner.update(&mut grads, 1, false).unwrap();
            assert_close(&values(&p), e);
        }
    }

    #[test]
    fn test_nesterov_momentum() {
        let p = parameter(&[1.0; 5]);
        let mut learner = NesterovLearner::new(
            vec![p.clone()],
            Schedule::constant(1e-2),
            Nesterov::new(classic(0.5)),
            Default::default(),
        )
        .unwrap();
        let expected = [
            [0.9997, 0.997, 0.994, 0.97, 0.70000005],
            [0.99935, 0.9935, 0.987, 0.935, 0.35000005],
            [0.99897504, 0.98974997, 0.9795, 0.8975, -0.024999946],
            [0.99858755, 0.98587495, 0.97175, 0.85875, -0.41249993],
            [0.9981938, 0.98193747, 0.963875, 0.819375, -0.8062499],
        ];
        for e in expected.iter() {
            let mut grads = gradients(&[(&p, &RATE)]);
            learner.update(&mut grads, 1, false).unwrap();
            assert_close(&values(&p), e);
        }
        assert_eq!(learner.learner_type(), "nesterov");
    }

    #[test]
    fn test_unit_gain() {
        let p = parameter(&[0.0]);
        let mut learner = momentum_learner(&p, 0.5, MomentumConfig::new(Schedule::constant(0.5)));
        let mut grads = gradients(&[(&p, &[2.0])]);
        learner.update(&mut grads, 1, false).unwrap();
        assert_eq!(values(&p), vec![-0.5]);
        learner.update(&mut grads, 1, false).unwrap();
        assert_eq!(values(&p), vec![-1.25]);
        assert_eq!(learner.base().smoothed_gradients()[0].to_f64_vec(), vec![1.5]);
    }

    #[test]
    fn test_momentum_scales_with_minibatch_size() {
        let p = parameter(&[0.0]);
        let mut learner = momentum_learner(&p, 0.5, classic(0.5));
        let mut grads = gradients(&[(&p, &[4.0])]);
        learner.update(&mut grads, 2, false).unwrap();
        learner.update(&mut grads, 2, false).unwrap();
        // per-minibatch momentum is 0.5^2
        assert_eq!(learner.base().smoothed_gradients()[0].to_f64_vec(), vec![5.0]);
        assert_eq!(values(&p), vec![-4.5]);
    }

    #[test]
    fn test_momentum_is_reported() {
        let p = parameter(&[0.0]);
        let mut learner = momentum_learner(&p, 0.5, classic(0.25));
        let (writer, seen) = recorder();
        learner.add_progress_writers(vec![writer]);
        let mut grads = gradients(&[(&p, &[1.0])]);
        learner.update(&mut grads, 1, false).unwrap();
        learner.update(&mut grads, 1, false).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![
                ("Learning rate [reference mbsize = 1]".to_string(), 0.5),
                ("Momentum [reference mbsize = 1]".to_string(), 0.25),
            ]
        );
    }

    #[test]
    fn test_state_layout() {
        let p = Parameter::new("w", tensor([3, 4], &[0.0; 12]));
        let learner = momentum_learner(&p, 0.1, classic(0.9));
        assert_eq!(learner.base().smoothed_gradients()[0].shape().dims(), &[3, 4]);
    }

    #[test]
    fn test_checkpoint_resumes_exactly() {
        let p = parameter(&[1.0, -1.0, 0.5]);
        let mut learner = momentum_learner(&p, 0.1, classic(0.9));
        let grads = [[0.3, -0.1, 0.7], [0.2, 0.4, -0.6], [-0.5, 0.1, 0.9]];
        for g in grads.iter() {
            let mut gs = gradients(&[(&p, g)]);
            learner.update(&mut gs, 3, false).unwrap();
        }
        let checkpoint = learner.create_checkpoint();
        let saved = p.value().clone();

        let mut gs = gradients(&[(&p, &[1.0, 1.0, 1.0])]);
        learner.update(&mut gs, 3, true).unwrap();
        let expected = values(&p);

        let q = Parameter::new("q", saved);
        let mut resumed = momentum_learner(&q, 0.5, classic(0.9));
        resumed.restore_from_checkpoint(&checkpoint).unwrap();
        assert_eq!(resumed.total_samples_seen(), 9);
        assert_eq!(resumed.counters().minibatches, 3);
        assert_eq!(resumed.learning_rate(), 0.1);
        let mut gs = gradients(&[(&q, &[1.0, 1.0, 1.0])]);
        resumed.update(&mut gs, 3, true).unwrap();
        assert_eq!(values(&q), expected);
        assert_eq!(resumed.counters(), learner.counters());
    }

    #[test]
    fn test_reset_smoothed_gradients() {
        let p = parameter(&[0.0]);
        let mut learner = momentum_learner(&p, 0.5, classic(0.5));
        let mut grads = gradients(&[(&p, &[2.0])]);
        learner.update(&mut grads, 1, false).unwrap();
        learner.reset_smoothed_gradients();
        assert_eq!(learner.base().smoothed_gradients()[0].to_f64_vec(), vec![0.0]);
        assert_eq!(learner.total_samples_seen(), 1);
    }

    #[test]
    fn test_restore_rejects_mismatch_without_changes() {
        let a = parameter(&[0.0]);
        let b = parameter(&[0.0]);
        let two = MomentumSgdLearner::new(
            vec![a.clone(), b],
            Schedule::constant(0.1),
            MomentumSgd::new(classic(0.5)),
            Default::default(),
        )
        .unwrap();
        let checkpoint = two.create_checkpoint();

        let mut one = momentum_learner(&a, 0.5, classic(0.5));
        let mut grads = gradients(&[(&a, &[1.0])]);
        one.update(&mut grads, 1, false).unwrap();
        let before = one.create_checkpoint();

        let err = one.restore_from_checkpoint(&checkpoint).unwrap_err();
        assert!(matches!(err, Error::CheckpointMismatch { .. }));
        assert_eq!(one.create_checkpoint(), before);

        let wider = parameter(&[0.0, 0.0]);
        let other = momentum_learner(&wider, 0.5, classic(0.5));
        let err = one.restore_from_checkpoint(&other.create_checkpoint()).unwrap_err();
        assert!(matches!(err, Error::CheckpointMismatch { .. }));
    }

    #[test]
    fn test_restore_rejects_newer_versions_and_other_types() {
        let p = parameter(&[0.0]);
        let mut learner = momentum_learner(&p, 0.5, classic(0.5));

        let mut newer = learner.create_checkpoint();
        newer.insert(VERSION_KEY, CHECKPOINT_VERSION + 1);
        let err = learner.restore_from_checkpoint(&newer).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { .. }));

        let mut other = learner.create_checkpoint();
        other.insert(TYPE_KEY, "Function");
        assert!(learner.restore_from_checkpoint(&other).is_err());

        let mut missing = learner.create_checkpoint();
        missing.remove(SAMPLE_COUNT_KEY);
        assert!(learner.restore_from_checkpoint(&missing).is_err());
    }

    #[test]
    fn test_restore_legacy_checkpoint() {
        let p = Parameter::with_uid("W1", "w", tensor([2], &[0.0, 0.0]));
        let mut learner = MomentumSgdLearner::new(
            vec![p.clone()],
            Schedule::constant(0.5),
            MomentumSgd::new(classic(0.5)),
            crate::options::AdditionalLearningOptions::default().with_noise_injection_seed(9),
        )
        .unwrap();

        let mut legacy = Dictionary::new();
        legacy.insert(VERSION_KEY, 1u64);
        legacy.insert(TYPE_KEY, LEARNER_TYPE_TAG);
        legacy.insert(SAMPLE_COUNT_KEY, 40u64);
        legacy.insert(MINIBATCH_COUNT_KEY, 4u64);
        legacy.insert(LEARNING_RATE_SCHEDULE_KEY, Schedule::constant(0.25).serialize());
        legacy.insert("W1", NDArray::from(tensor([2, 1], &[1.0, -1.0])));

        learner.restore_from_checkpoint(&legacy).unwrap();
        assert_eq!(learner.total_samples_seen(), 40);
        assert_eq!(learner.counters().minibatches, 4);
        assert_eq!(learner.counters().sweeps, 0);
        assert_eq!(learner.learning_rate(), 0.25);
        assert_eq!(learner.base().noise_injection_seed(), 9);
        assert_eq!(learner.base().smoothed_gradients()[0].to_f64_vec(), vec![1.0, -1.0]);

        legacy.remove("W1");
        let err = learner.restore_from_checkpoint(&legacy).unwrap_err();
        assert!(matches!(err, Error::MissingCheckpointKey { .. }));
    }

    #[test]
    fn test_restore_positional_checkpoint_without_sweeps() {
        let p = Parameter::with_uid("W1", "w", tensor([2], &[0.0, 0.0]));
        let mut learner = momentum_learner(&p, 0.5, classic(0.5));
        let mut grads = gradients(&[(&p, &[1.0, 2.0])]);
        learner.update(&mut grads, 1, true).unwrap();

        let mut v2 = learner.create_checkpoint();
        v2.insert(VERSION_KEY, 2u64);
        v2.remove(SWEEP_COUNT_KEY);

        let q = Parameter::with_uid("W1", "w", tensor([2], &[0.0, 0.0]));
        let mut resumed = momentum_learner(&q, 0.1, classic(0.5));
        resumed.restore_from_checkpoint(&v2).unwrap();
        assert_eq!(resumed.counters().minibatches, 1);
        assert_eq!(resumed.counters().sweeps, 0);
        assert_eq!(
            resumed.base().smoothed_gradients()[0].to_f64_vec(),
            learner.base().smoothed_gradients()[0].to_f64_vec()
        );

        // positions matter, uids are ignored
        let before = resumed.create_checkpoint();
        v2.insert(
            SMOOTHED_GRADIENTS_KEY,
            vec![DictionaryValue::from(NDArray::from(tensor([3, 1], &[1.0, 2.0, 3.0])))],
        );
        v2.insert("W1", NDArray::from(tensor([2, 1], &[1.0, 2.0])));
        let err = resumed.restore_from_checkpoint(&v2).unwrap_err();
        assert!(matches!(err, Error::CheckpointMismatch { .. }));
        assert_eq!(resumed.create_checkpoint(), before);
    }

    #[test]
    fn test_restore_legacy_checkpoint_rejects_wrong_shape() {
        let p = Parameter::with_uid("W1", "w", tensor([2], &[0.0, 0.0]));
        let mut learner = momentum_learner(&p, 0.5, classic(0.5));
        let before = learner.create_checkpoint();

        let mut legacy = Dictionary::new();
        legacy.insert(VERSION_KEY, 1u64);
        legacy.insert(TYPE_KEY, LEARNER_TYPE_TAG);
        legacy.insert(SAMPLE_COUNT_KEY, 40u64);
        legacy.insert(MINIBATCH_COUNT_KEY, 4u64);
        legacy.insert(LEARNING_RATE_SCHEDULE_KEY, Schedule::constant(0.25).serialize());
        legacy.insert("W1", NDArray::from(tensor([1, 2], &[1.0, -1.0])));

        let err = learner.restore_from_checkpoint(&legacy).unwrap_err();
        assert!(matches!(err, Error::CheckpointMismatch { .. }));
        assert_eq!(learner.create_checkpoint(), before);
    }
}
