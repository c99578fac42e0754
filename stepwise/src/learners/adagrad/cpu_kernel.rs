use stepwise_core::{dtypes::Dtype, Result};

use super::{AdaGradKernel, ADAGRAD_FLOOR};
use crate::learners::Cpu;

impl<E: Dtype> AdaGradKernel<E> for Cpu {
    fn update(
        &self,
        lr: E,
        need_ave_multiplier: bool,
        param: &mut [E],
        accum: &mut [E],
        mut multipliers: Option<&mut [E]>,
        grad: &mut [E],
    ) -> Result<()> {
        let floor = E::from_f64_lossy(ADAGRAD_FLOOR);
        let mut inv_sum = E::zero();

        for (i, (a, g)) in accum.iter_mut().zip(grad.iter_mut()).enumerate() {
            *a += *g * *g;
            let d = (*a + floor).sqrt();
            *g /= d;
            let inv = E::one() / d;
            inv_sum += inv;
            if let Some(m) = multipliers.as_deref_mut() {
                m[i] = inv;
            }
        }

        let ave_multiplier = if need_ave_multiplier && !grad.is_empty() {
            inv_sum / E::from_usize(grad.len()).unwrap_or_else(E::one)
        } else {
            E::one()
        };
        let step = lr / ave_multiplier;
        for (p, g) in param.iter_mut().zip(grad.iter()) {
            *p -= step * *g;
        }
        Ok(())
    }
}
