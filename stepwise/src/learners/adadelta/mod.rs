mod cpu_kernel;

use stepwise_core::{
    dtypes::Dtype,
    tensor::{Device, Tensor},
    Error, Result,
};

use super::{
    rule::{split_blocks, UpdateContext, UpdateRule},
    Cpu,
};

/// Configuration of hyperparameters for [AdaDelta].
///
/// ```rust
/// # use stepwise::prelude::*;
/// let cfg = AdaDeltaConfig {
///     rho: 0.9,
///     ..Default::default()
/// };
/// assert_eq!(cfg.epsilon, 1e-8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaDeltaConfig {
    /// Decay of both running averages, in `[0, 1]`. Defaults to `0.95`.
    pub rho: f64,

    /// Added inside both square roots. Defaults to `1e-8`.
    pub epsilon: f64,
}

impl Default for AdaDeltaConfig {
    fn default() -> Self {
        Self {
            rho: 0.95,
            epsilon: 1e-8,
        }
    }
}

/// AdaDelta keeps running averages of squared gradients and squared updates
/// and scales every step by the ratio of their roots. The learning rate is an
/// overall factor on top of that.
///
/// Described in [ADADELTA: An Adaptive Learning Rate Method](https://arxiv.org/abs/1212.5701).
#[derive(Debug, Clone)]
pub struct AdaDelta {
    pub cfg: AdaDeltaConfig,
}

impl AdaDelta {
    pub fn new(cfg: AdaDeltaConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&cfg.rho) {
            return Err(Error::InvalidConfiguration(format!(
                "adadelta rho must be in [0, 1], got {}",
                cfg.rho
            )));
        }
        if cfg.epsilon.is_nan() || cfg.epsilon < 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "adadelta epsilon must be non-negative, got {}",
                cfg.epsilon
            )));
        }
        Ok(Self { cfg })
    }
}

pub(crate) trait AdaDeltaKernel<E: Dtype> {
    fn update(
        &self,
        cfg: &AdaDeltaConfig,
        lr: E,
        param: &mut [E],
        grad_sq: &mut [E],
        delta_sq: &mut [E],
        grad: &[E],
    ) -> Result<()>;
}

impl UpdateRule for AdaDelta {
    const NAME: &'static str = "adadelta";

    fn state_columns(&self, _device: Device) -> usize {
        2
    }

    fn update<E: Dtype>(
        &self,
        param: &mut Tensor<E>,
        grad: &mut Tensor<E>,
        state: &mut Tensor<E>,
        ctx: &UpdateContext,
    ) -> Result<()> {
        let n = param.num_elements();
        let [grad_sq, delta_sq] = split_blocks::<E, 2>(state.data_mut(), n)?;
        let lr = E::from_f64_lossy(ctx.learning_rate);
        AdaDeltaKernel::update(&Cpu, &self.cfg, lr, param.data_mut(), grad_sq, delta_sq, grad.data())
    }
}
