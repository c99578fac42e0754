use stepwise_core::{dtypes::Dtype, Result};

use super::{AdamKernel, AdamStep};
use crate::learners::Cpu;

impl<E: Dtype> AdamKernel<E> for Cpu {
    fn update(
        &self,
        step: &AdamStep<E>,
        param: &mut [E],
        variance: &mut [E],
        moment: &mut [E],
        grad: &[E],
    ) -> Result<()> {
        let AdamStep {
            lr,
            momentum: mu,
            gain,
            variance_momentum: nu,
            epsilon,
            correction,
            adamax,
        } = *step;

        for (((p, g), v), m) in param
            .iter_mut()
            .zip(grad.iter().cloned())
            .zip(variance.iter_mut())
            .zip(moment.iter_mut())
        {
            let root = if adamax {
                *v = (nu * *v).max(g.abs());
                *v
            } else {
                *v = nu * *v + (E::one() - nu) * g * g;
                v.sqrt()
            };
            *m = mu * *m + gain * g;
            *p -= lr * correction * *m / (root + epsilon);
        }
        Ok(())
    }
}
