mod cpu_kernel;

use stepwise_core::{
    dtypes::Dtype,
    tensor::{Device, DeviceKind, Tensor},
    Result,
};

use super::{
    rule::{split_blocks, UpdateContext, UpdateRule},
    Cpu,
};

/// Added to the accumulated squares before taking the square root.
pub(crate) const ADAGRAD_FLOOR: f64 = 1e-16;

/// Configuration of hyperparameters for [AdaGrad].
///
/// ```rust
/// # use stepwise::prelude::*;
/// let cfg = AdaGradConfig::default().with_need_ave_multiplier(false);
/// assert!(!cfg.need_ave_multiplier);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaGradConfig {
    /// Divide the learning rate by the mean of the per-element step
    /// multipliers, keeping the average step size equal to the learning
    /// rate. Defaults to `true`.
    pub need_ave_multiplier: bool,
}

impl Default for AdaGradConfig {
    fn default() -> Self {
        Self {
            need_ave_multiplier: true,
        }
    }
}

impl AdaGradConfig {
    pub fn with_need_ave_multiplier(mut self, need_ave_multiplier: bool) -> Self {
        self.need_ave_multiplier = need_ave_multiplier;
        self
    }
}

/// AdaGrad: every element's step is divided by the root of its accumulated
/// squared gradients.
///
/// Described in [Adaptive Subgradient Methods for Online Learning and Stochastic Optimization](https://jmlr.org/papers/v12/duchi11a.html).
///
/// The auxiliary state holds the accumulated squares; on gpu devices with
/// `need_ave_multiplier` it holds a second block with the current multipliers.
#[derive(Debug, Clone, Default)]
pub struct AdaGrad {
    pub cfg: AdaGradConfig,
}

impl AdaGrad {
    pub fn new(cfg: AdaGradConfig) -> Self {
        Self { cfg }
    }
}

pub(crate) trait AdaGradKernel<E: Dtype> {
    fn update(
        &self,
        lr: E,
        need_ave_multiplier: bool,
        param: &mut [E],
        accum: &mut [E],
        multipliers: Option<&mut [E]>,
        grad: &mut [E],
    ) -> Result<()>;
}

impl UpdateRule for AdaGrad {
    const NAME: &'static str = "adagrad";

    fn state_columns(&self, device: Device) -> usize {
        if self.cfg.need_ave_multiplier && device.kind() == DeviceKind::Gpu {
            2
        } else {
            1
        }
    }

    fn update<E: Dtype>(
        &self,
        param: &mut Tensor<E>,
        grad: &mut Tensor<E>,
        state: &mut Tensor<E>,
        ctx: &UpdateContext,
    ) -> Result<()> {
        let n = param.num_elements();
        let lr = E::from_f64_lossy(ctx.learning_rate);
        let need = self.cfg.need_ave_multiplier;
        let (accum, multipliers) = match self.state_columns(param.device()) {
            2 => {
                let [accum, multipliers] = split_blocks::<E, 2>(state.data_mut(), n)?;
                (accum, Some(multipliers))
            }
            _ => {
                let [accum] = split_blocks::<E, 1>(state.data_mut(), n)?;
                (accum, None)
            }
        };
        AdaGradKernel::update(&Cpu, lr, need, param.data_mut(), accum, multipliers, grad.data_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        learners::{AdaGradLearner, Learner},
        parameter::{Gradients, Parameter},
        tests::*,
    };
    use stepwise_core::schedule::Schedule;

    fn adagrad(p: &Parameter, lr: f64, cfg: AdaGradConfig) -> AdaGradLearner {
        AdaGradLearner::new(vec![p.clone()], Schedule::constant(lr), AdaGrad::new(cfg), Default::default())
            .unwrap()
    }

    #[test]
    fn test_adagrad_step_decreases() {
        let p = parameter(&[0.0]);
        let mut learner = adagrad(&p, 0.5, AdaGradConfig::default().with_need_ave_multiplier(false));
        let expected = [-0.5, -0.85355339, -1.14222847, -1.39222847];
        let mut last_step = f64::INFINITY;
        let mut last = 0.0;
        for e in expected {
            let mut grads = gradients(&[(&p, &[1.0])]);
            learner.update(&mut grads, 1, false).unwrap();
            let now = values(&p)[0];
            assert_close(&[now], &[e]);
            assert!(last - now < last_step);
            last_step = last - now;
            last = now;
        }
        assert_close(&learner.base().smoothed_gradients()[0].to_f64_vec(), &[4.0]);
    }

    #[test]
    fn test_adagrad_ave_multiplier() {
        let p = parameter(&[0.0, 0.0]);
        let mut learner = adagrad(&p, 0.5, AdaGradConfig::default());
        let mut grads = gradients(&[(&p, &[1.0, 2.0])]);
        learner.update(&mut grads, 1, false).unwrap();
        // normalized gradient is [1, 1], mean multiplier is (1 + 1/2) / 2
        assert_close(&values(&p), &[-0.6666667, -0.6666667]);
    }

    #[test]
    fn test_adagrad_single_element_steps_by_learning_rate_times_gradient() {
        let p = parameter(&[0.0]);
        let mut learner = adagrad(&p, 0.5, AdaGradConfig::default());
        for i in 1..=3 {
            let mut grads = gradients(&[(&p, &[3.0])]);
            learner.update(&mut grads, 1, false).unwrap();
            // the normalizer of a single element cancels its own scaling
            assert_close(&values(&p), &[-1.5 * i as f64]);
        }
    }

    #[test]
    fn test_adagrad_gpu_layout() {
        let value = tensor([2], &[0.0, 0.0]).to_device(Device::Gpu(0));
        let p = Parameter::new("p", value);
        let mut learner = adagrad(&p, 0.5, AdaGradConfig::default());
        assert_eq!(learner.base().smoothed_gradients()[0].shape().dims(), &[2, 2]);

        let mut grads = Gradients::new();
        grads.insert(&p, tensor([2], &[1.0, 2.0]).to_device(Device::Gpu(0)));
        learner.update(&mut grads, 1, false).unwrap();
        assert_close(&values(&p), &[-0.6666667, -0.6666667]);
        assert_close(
            &learner.base().smoothed_gradients()[0].to_f64_vec(),
            &[1.0, 4.0, 1.0, 0.5],
        );

        let cpu = parameter(&[0.0, 0.0]);
        let learner = adagrad(&cpu, 0.5, AdaGradConfig::default());
        assert_eq!(learner.base().smoothed_gradients()[0].shape().dims(), &[2, 1]);

        let gpu_plain = Parameter::new("g", tensor([2], &[0.0, 0.0]).to_device(Device::Gpu(1)));
        let learner = adagrad(&gpu_plain, 0.5, AdaGradConfig::default().with_need_ave_multiplier(false));
        assert_eq!(learner.base().smoothed_gradients()[0].shape().dims(), &[2, 1]);
    }
}
