use stepwise_core::{dtypes::Dtype, Result};

use super::{FsAdaGradKernel, FsAdaGradStep, MAX_GRADIENT_WEIGHT};
use crate::learners::Cpu;

impl<E: Dtype> FsAdaGradKernel<E> for Cpu {
    fn update(
        &self,
        step: &FsAdaGradStep<E>,
        param: &mut [E],
        variance: &mut [E],
        momentum: &mut [E],
        grad: &[E],
    ) -> Result<()> {
        let FsAdaGradStep {
            lr,
            momentum: mu,
            gain,
            variance_momentum: nu,
            target_denom,
        } = *step;
        let max_weight = E::from_f64_lossy(MAX_GRADIENT_WEIGHT);

        for (((p, mut g), a), m) in param
            .iter_mut()
            .zip(grad.iter().cloned())
            .zip(variance.iter_mut())
            .zip(momentum.iter_mut())
        {
            *a = nu * *a + (E::one() - nu) * g * g;
            if *a != E::zero() {
                let weight = (target_denom / a.sqrt()).min(max_weight);
                g *= weight;
            }
            if mu > E::zero() {
                g = mu * *m + gain * g;
                *m = g;
            }
            *p -= lr * g;
        }
        Ok(())
    }
}
