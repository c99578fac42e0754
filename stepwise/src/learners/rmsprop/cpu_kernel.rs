use stepwise_core::{dtypes::Dtype, Result};

use super::{RmsPropKernel, RmsPropState, RmsPropStep, RMSPROP_FLOOR};
use crate::learners::Cpu;

impl<E: Dtype> RmsPropKernel<E> for Cpu {
    fn update(
        &self,
        step: &RmsPropStep<E>,
        param: &mut [E],
        state: RmsPropState<'_, E>,
        grad: &mut [E],
    ) -> Result<()> {
        let RmsPropStep {
            lr,
            gamma,
            inc,
            dec,
            max,
            min,
            need_ave_multiplier,
            initialized,
        } = *step;
        let RmsPropState {
            avars,
            signs,
            steps,
            mut multipliers,
        } = state;
        let floor = E::from_f64_lossy(RMSPROP_FLOOR);

        if !initialized {
            for (a, g) in avars.iter_mut().zip(grad.iter()) {
                *a = *g * *g;
            }
            signs.fill(E::zero());
            steps.fill(E::one());
        }

        let mut multiplier_sum = E::zero();
        for (i, g) in grad.iter_mut().enumerate() {
            avars[i] = gamma * avars[i] + (E::one() - gamma) * *g * *g;
            let sign = if *g > E::zero() {
                E::one()
            } else if *g < E::zero() {
                -E::one()
            } else {
                E::zero()
            };
            steps[i] = if signs[i] * sign > E::zero() {
                (steps[i] * inc).min(max)
            } else {
                (steps[i] * dec).max(min)
            };
            let multiplier = steps[i] / (avars[i] + floor).sqrt();
            *g *= multiplier;
            signs[i] = sign;
            multiplier_sum += multiplier;
            if let Some(m) = multipliers.as_deref_mut() {
                m[i] = multiplier;
            }
        }

        let ave_multiplier = if need_ave_multiplier && !grad.is_empty() {
            multiplier_sum / E::from_usize(grad.len()).unwrap_or_else(E::one)
        } else {
            E::one()
        };
        let scale = lr / ave_multiplier;
        for (p, g) in param.iter_mut().zip(grad.iter()) {
            *p -= scale * *g;
        }
        Ok(())
    }
}
