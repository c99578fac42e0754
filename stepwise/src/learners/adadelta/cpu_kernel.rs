use stepwise_core::{dtypes::Dtype, Result};

use super::{AdaDeltaConfig, AdaDeltaKernel};
use crate::learners::Cpu;

impl<E: Dtype> AdaDeltaKernel<E> for Cpu {
    fn update(
        &self,
        cfg: &AdaDeltaConfig,
        lr: E,
        param: &mut [E],
        grad_sq: &mut [E],
        delta_sq: &mut [E],
        grad: &[E],
    ) -> Result<()> {
        let rho = E::from_f64_lossy(cfg.rho);
        let eps = E::from_f64_lossy(cfg.epsilon);
        let one = E::one();

        for (((p, g), a), x) in param
            .iter_mut()
            .zip(grad.iter().cloned())
            .zip(grad_sq.iter_mut())
            .zip(delta_sq.iter_mut())
        {
            *a = rho * *a + (one - rho) * g * g;
            let delta = -(*x + eps).sqrt() / (*a + eps).sqrt() * g;
            *x = rho * *x + (one - rho) * delta * delta;
            *p += lr * delta;
        }
        Ok(())
    }
}
