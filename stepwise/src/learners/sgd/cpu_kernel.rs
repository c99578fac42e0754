use stepwise_core::{dtypes::Dtype, Result};

use super::SgdKernel;
use crate::learners::Cpu;

impl<E: Dtype> SgdKernel<E> for Cpu {
    fn update(&self, lr: E, param: &mut [E], grad: &[E]) -> Result<()> {
        for (p, g) in param.iter_mut().zip(grad.iter()) {
            *p -= lr * *g;
        }
        Ok(())
    }
}
