mod cpu_kernel;

use stepwise_core::{
    dtypes::Dtype,
    schedule::ElapsedCounters,
    tensor::{Device, DeviceKind, Tensor},
    Error, Result,
};

use super::{
    rule::{split_blocks, UpdateContext, UpdateRule},
    Cpu,
};

/// Added to the mean square before taking the square root.
pub(crate) const RMSPROP_FLOOR: f64 = 1e-6;

/// Configuration of hyperparameters for [RmsProp].
///
/// ```rust
/// # use stepwise::prelude::*;
/// let cfg = RmsPropConfig {
///     gamma: 0.95,
///     ..Default::default()
/// };
/// assert!(RmsProp::new(cfg).is_ok());
/// assert!(RmsProp::new(RmsPropConfig { inc: 0.5, ..cfg }).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsPropConfig {
    /// Decay of the mean square, in `(0, 1)`. Defaults to `0.99`.
    pub gamma: f64,

    /// Step size growth while the gradient sign is stable, `> 1`. Defaults to `1.2`.
    pub inc: f64,

    /// Step size shrink when the gradient sign flips, in `(0, 1)`. Defaults to `0.75`.
    pub dec: f64,

    /// Upper bound of the step size. Defaults to `10.0`.
    pub max: f64,

    /// Lower bound of the step size, `> 0`. Defaults to `0.1`.
    pub min: f64,

    /// Divide the learning rate by the mean step multiplier. Defaults to `true`.
    pub need_ave_multiplier: bool,
}

impl Default for RmsPropConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            inc: 1.2,
            dec: 0.75,
            max: 10.0,
            min: 0.1,
            need_ave_multiplier: true,
        }
    }
}

/// RMSProp with per-element step sizes that grow while the gradient keeps its
/// sign and shrink when it flips.
///
/// See [Lecture 6e of Neural Networks for Machine Learning](http://www.cs.toronto.edu/~tijmen/csc321/slides/lecture_slides_lec6.pdf).
///
/// The auxiliary state holds the mean squares, the last gradient signs and
/// the step sizes; on gpu devices with `need_ave_multiplier` a fourth block
/// holds the current multipliers. The smoothed count is the number of
/// minibatches seen; state is initialized from the first one.
#[derive(Debug, Clone)]
pub struct RmsProp {
    pub cfg: RmsPropConfig,
    smoothed_count: f64,
}

impl RmsProp {
    pub fn new(cfg: RmsPropConfig) -> Result<Self> {
        let invalid = |msg: &str| Err(Error::InvalidConfiguration(format!("rmsprop {msg}")));
        if !(cfg.gamma > 0.0 && cfg.gamma < 1.0) {
            return invalid("gamma must be in range (0.0, 1.0)");
        }
        if !(cfg.inc > 1.0) {
            return invalid("inc must be greater than 1");
        }
        if !(cfg.dec > 0.0 && cfg.dec < 1.0) {
            return invalid("dec must be in range (0.0, 1.0)");
        }
        if !(cfg.max > 0.0 && cfg.max > cfg.min) {
            return invalid("max must be greater than zero and greater than min");
        }
        if !(cfg.min > 0.0) {
            return invalid("min must be greater than zero");
        }
        Ok(Self {
            cfg,
            smoothed_count: 0.0,
        })
    }
}

/// Scalars of one RMSProp update.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RmsPropStep<E> {
    pub lr: E,
    pub gamma: E,
    pub inc: E,
    pub dec: E,
    pub max: E,
    pub min: E,
    pub need_ave_multiplier: bool,
    pub initialized: bool,
}

/// The blocks of one parameter's auxiliary state.
pub(crate) struct RmsPropState<'a, E> {
    pub avars: &'a mut [E],
    pub signs: &'a mut [E],
    pub steps: &'a mut [E],
    pub multipliers: Option<&'a mut [E]>,
}

pub(crate) trait RmsPropKernel<E: Dtype> {
    fn update(
        &self,
        step: &RmsPropStep<E>,
        param: &mut [E],
        state: RmsPropState<'_, E>,
        grad: &mut [E],
    ) -> Result<()>;
}

impl UpdateRule for RmsProp {
    const NAME: &'static str = "rmsprop";

    fn state_columns(&self, device: Device) -> usize {
        if self.cfg.need_ave_multiplier && device.kind() == DeviceKind::Gpu {
            4
        } else {
            3
        }
    }

    fn on_minibatch_start(&mut self, _sample_count: u64, _counters: &ElapsedCounters) {
        self.smoothed_count += 1.0;
    }

    fn update<E: Dtype>(
        &self,
        param: &mut Tensor<E>,
        grad: &mut Tensor<E>,
        state: &mut Tensor<E>,
        ctx: &UpdateContext,
    ) -> Result<()> {
        let n = param.num_elements();
        let blocks = match self.state_columns(param.device()) {
            4 => {
                let [avars, signs, steps, multipliers] = split_blocks::<E, 4>(state.data_mut(), n)?;
                RmsPropState {
                    avars,
                    signs,
                    steps,
                    multipliers: Some(multipliers),
                }
            }
            _ => {
                let [avars, signs, steps] = split_blocks::<E, 3>(state.data_mut(), n)?;
                RmsPropState {
                    avars,
                    signs,
                    steps,
                    multipliers: None,
                }
            }
        };
        let cfg = &self.cfg;
        let step = RmsPropStep {
            lr: E::from_f64_lossy(ctx.learning_rate),
            gamma: E::from_f64_lossy(cfg.gamma),
            inc: E::from_f64_lossy(cfg.inc),
            dec: E::from_f64_lossy(cfg.dec),
            max: E::from_f64_lossy(cfg.max),
            min: E::from_f64_lossy(cfg.min),
            need_ave_multiplier: cfg.need_ave_multiplier,
            initialized: self.smoothed_count > 1.0,
        };
        RmsPropKernel::update(&Cpu, &step, param.data_mut(), blocks, grad.data_mut())
    }

    fn smoothed_count(&self) -> Option<f64> {
        Some(self.smoothed_count)
    }

    fn set_smoothed_count(&mut self, count: f64) {
        self.smoothed_count = count;
    }
}
