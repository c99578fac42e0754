mod cpu_kernel;

use stepwise_core::{
    dtypes::Dtype,
    schedule::{ElapsedCounters, Schedule},
    tensor::{Device, Tensor},
    Result,
};

use super::{
    rule::{momentum_for_minibatch, split_blocks, unit_gain_factor, UpdateContext, UpdateRule},
    Cpu, LearnerBase,
};

/// Scale of the normalized gradient, relative to the root of the smoothed
/// sample count.
const TARGET_ADAGRAD_AV_DENOM: f64 = 1.0;

/// Upper bound of the per-element gradient weight.
pub(crate) const MAX_GRADIENT_WEIGHT: f64 = 10.0;

/// Default variance momentum of [FsAdaGradConfig] and [super::AdamConfig]:
/// a time constant of 720,000 samples.
pub(crate) fn default_variance_momentum() -> Schedule {
    Schedule::momentum_as_time_constant(2.0 * 3600.0 * 100.0)
}

/// Configuration of hyperparameters for [FsAdaGrad].
///
/// ```rust
/// # use stepwise::prelude::*;
/// let cfg = FsAdaGradConfig::new(Schedule::constant(0.9))
///     .with_variance_momentum(Schedule::momentum_as_time_constant(10_000.0));
/// assert!(cfg.unit_gain);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FsAdaGradConfig {
    /// Momentum of the normalized gradient. Zero disables momentum.
    pub momentum: Schedule,

    /// Scale the new gradient by `1 - momentum`. Defaults to `true`.
    pub unit_gain: bool,

    /// Decay of the squared gradient average and of the smoothed sample
    /// count. Defaults to a time constant of 720,000 samples.
    pub variance_momentum: Schedule,
}

impl FsAdaGradConfig {
    pub fn new(momentum: Schedule) -> Self {
        Self {
            momentum,
            unit_gain: true,
            variance_momentum: default_variance_momentum(),
        }
    }

    pub fn with_unit_gain(mut self, unit_gain: bool) -> Self {
        self.unit_gain = unit_gain;
        self
    }

    pub fn with_variance_momentum(mut self, variance_momentum: Schedule) -> Self {
        self.variance_momentum = variance_momentum;
        self
    }
}

/// Momentum SGD on AdaGrad-normalized gradients, where the squared gradient
/// sum is replaced by a running average.
///
/// Every element's gradient is weighted by `D / sqrt(E[g²])` (at most 10),
/// with `D` the root of the smoothed number of samples seen per minibatch.
#[derive(Debug, Clone)]
pub struct FsAdaGrad {
    pub cfg: FsAdaGradConfig,
    smoothed_count: f64,
    target_denom: f64,
}

impl FsAdaGrad {
    pub fn new(cfg: FsAdaGradConfig) -> Self {
        Self {
            cfg,
            smoothed_count: 0.0,
            target_denom: 0.0,
        }
    }
}

/// Scalars of one FSAdaGrad update.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FsAdaGradStep<E> {
    pub lr: E,
    pub momentum: E,
    pub gain: E,
    pub variance_momentum: E,
    pub target_denom: E,
}

pub(crate) trait FsAdaGradKernel<E: Dtype> {
    fn update(
        &self,
        step: &FsAdaGradStep<E>,
        param: &mut [E],
        variance: &mut [E],
        momentum: &mut [E],
        grad: &[E],
    ) -> Result<()>;
}

impl UpdateRule for FsAdaGrad {
    const NAME: &'static str = "fsadagrad";

    fn state_columns(&self, _device: Device) -> usize {
        2
    }

    fn on_minibatch_start(&mut self, sample_count: u64, counters: &ElapsedCounters) {
        let nu = momentum_for_minibatch(&self.cfg.variance_momentum, counters, sample_count);
        self.smoothed_count = nu * self.smoothed_count + (1.0 - nu) * sample_count as f64;
        self.target_denom = TARGET_ADAGRAD_AV_DENOM * self.smoothed_count.sqrt();
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
        let n = param.num_elements();
        let [variance, momentum] = split_blocks::<E, 2>(state.data_mut(), n)?;

        let mu = momentum_for_minibatch(&self.cfg.momentum, &ctx.counters, ctx.sample_count);
        let nu = momentum_for_minibatch(&self.cfg.variance_momentum, &ctx.counters, ctx.sample_count);
        let step = FsAdaGradStep {
            lr: E::from_f64_lossy(ctx.learning_rate),
            momentum: E::from_f64_lossy(mu),
            gain: E::from_f64_lossy(unit_gain_factor(mu, self.cfg.unit_gain)),
            variance_momentum: E::from_f64_lossy(nu),
            target_denom: E::from_f64_lossy(self.target_denom),
        };
        FsAdaGradKernel::update(&Cpu, &step, param.data_mut(), variance, momentum, grad.data())
    }

    fn smoothed_count(&self) -> Option<f64> {
        Some(self.smoothed_count)
    }

    fn set_smoothed_count(&mut self, count: f64) {
        self.smoothed_count = count;
    }
}
