mod cpu_kernel;

use stepwise_core::{
    dtypes::Dtype,
    schedule::{ElapsedCounters, Schedule},
    tensor::{Device, Tensor},
    Error, Result,
};

use super::{
    fsadagrad::default_variance_momentum,
    rule::{momentum_for_minibatch, split_blocks, unit_gain_factor, UpdateContext, UpdateRule},
    Cpu, LearnerBase,
};

/// Configuration of hyperparameters for [Adam].
///
/// Changing the first moment decay:
/// ```rust
/// # use stepwise::prelude::*;
/// let cfg = AdamConfig::new(Schedule::constant(0.8));
/// assert_eq!(cfg.epsilon, 1e-8);
/// ```
///
/// The AdaMax variant with a second moment time constant of 1000 samples:
/// ```rust
/// # use stepwise::prelude::*;
/// let cfg = AdamConfig::new(Schedule::constant(0.9))
///     .with_variance_momentum(Schedule::momentum_as_time_constant(1000.0))
///     .with_adamax(true);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AdamConfig {
    /// First moment decay.
    pub momentum: Schedule,

    /// Scale the new gradient by `1 - momentum`. Defaults to `true`.
    pub unit_gain: bool,

    /// Second moment decay. Defaults to a time constant of 720,000 samples.
    pub variance_momentum: Schedule,

    /// Added to the denominator, must be non-negative. Defaults to `1e-8`.
    pub epsilon: f64,

    /// Use the infinity norm for the second moment. Defaults to `false`.
    pub adamax: bool,
}

impl AdamConfig {
    pub fn new(momentum: Schedule) -> Self {
        Self {
            momentum,
            unit_gain: true,
            variance_momentum: default_variance_momentum(),
            epsilon: 1e-8,
            adamax: false,
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

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_adamax(mut self, adamax: bool) -> Self {
        self.adamax = adamax;
        self
    }
}

/// An implementation of the Adam optimizer from
/// [Adam: A Method for Stochastic Optimization](https://arxiv.org/abs/1412.6980),
/// including its AdaMax variant.
///
/// Bias correction uses the number of minibatches seen, kept as the learner's
/// smoothed count.
#[derive(Debug, Clone)]
pub struct Adam {
    pub cfg: AdamConfig,
    smoothed_count: f64,
}

impl Adam {
    pub fn new(cfg: AdamConfig) -> Result<Self> {
        if cfg.epsilon.is_nan() || cfg.epsilon < 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "epsilon should be non-negative, got {}",
                cfg.epsilon
            )));
        }
        Ok(Self {
            cfg,
            smoothed_count: 0.0,
        })
    }

    /// Bias correction after `t` minibatches.
    fn correction(&self, mu: f64, nu: f64) -> f64 {
        let t = self.smoothed_count;
        let first = 1.0 - mu.powf(t);
        if self.cfg.adamax {
            1.0 / first
        } else {
            (1.0 - nu.powf(t)).sqrt() / first
        }
    }
}

/// Scalars of one Adam update.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdamStep<E> {
    pub lr: E,
    pub momentum: E,
    pub gain: E,
    pub variance_momentum: E,
    pub epsilon: E,
    pub correction: E,
    pub adamax: bool,
}

pub(crate) trait AdamKernel<E: Dtype> {
    fn update(
        &self,
        step: &AdamStep<E>,
        param: &mut [E],
        variance: &mut [E],
        moment: &mut [E],
        grad: &[E],
    ) -> Result<()>;
}

impl UpdateRule for Adam {
    const NAME: &'static str = "adam";

    fn state_columns(&self, _device: Device) -> usize {
        2
    }

    fn on_minibatch_start(&mut self, _sample_count: u64, _counters: &ElapsedCounters) {
        self.smoothed_count += 1.0;
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
        let [variance, moment] = split_blocks::<E, 2>(state.data_mut(), n)?;

        let mu = momentum_for_minibatch(&self.cfg.momentum, &ctx.counters, ctx.sample_count);
        let nu = momentum_for_minibatch(&self.cfg.variance_momentum, &ctx.counters, ctx.sample_count);
        let step = AdamStep {
            lr: E::from_f64_lossy(ctx.learning_rate),
            momentum: E::from_f64_lossy(mu),
            gain: E::from_f64_lossy(unit_gain_factor(mu, self.cfg.unit_gain)),
            variance_momentum: E::from_f64_lossy(nu),
            epsilon: E::from_f64_lossy(self.cfg.epsilon),
            correction: E::from_f64_lossy(self.correction(mu, nu)),
            adamax: self.cfg.adamax,
        };
        AdamKernel::update(&Cpu, &step, param.data_mut(), variance, moment, grad.data())
    }

    fn smoothed_count(&self) -> Option<f64> {
        Some(self.smoothed_count)
    }

    fn set_smoothed_count(&mut self, count: f64) {
        self.smoothed_count = count;
    }
}
