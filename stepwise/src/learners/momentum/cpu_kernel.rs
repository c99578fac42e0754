use stepwise_core::{dtypes::Dtype, Result};

use super::{MomentumKernel, MomentumStep};
use crate::learners::Cpu;

impl<E: Dtype> MomentumKernel<E> for Cpu {
    fn update(
        &self,
        step: &MomentumStep<E>,
        param: &mut [E],
        velocity: &mut [E],
        grad: &[E],
    ) -> Result<()> {
        let MomentumStep {
            lr,
            momentum,
            gain,
            nesterov,
        } = *step;

        for ((p, g), v) in param.iter_mut().zip(grad.iter().cloned()).zip(velocity.iter_mut()) {
            *v = momentum * *v + gain * g;
            if nesterov {
                *p -= lr * (momentum * *v + gain * g);
            } else {
                *p -= lr * *v;
            }
        }
        Ok(())
    }
}
