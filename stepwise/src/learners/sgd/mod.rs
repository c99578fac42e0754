mod cpu_kernel;

use stepwise_core::{
    dtypes::Dtype,
    tensor::{Device, Tensor},
    Result,
};

use super::{
    rule::{UpdateContext, UpdateRule},
    Cpu,
};

/// Plain stochastic gradient descent: `p -= lr * g`.
///
/// Keeps no auxiliary state.
///
/// ```rust
/// # use stepwise::prelude::*;
/// let w = Parameter::new("w", Tensor::<f32>::zeros([2, 3], Device::Cpu));
/// let learner = SgdLearner::new(
///     vec![w],
///     Schedule::constant(1e-2),
///     Sgd,
///     AdditionalLearningOptions::default(),
/// )
/// .unwrap();
/// assert_eq!(learner.learner_type(), "sgd");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Sgd;

pub(crate) trait SgdKernel<E: Dtype> {
    fn update(&self, lr: E, param: &mut [E], grad: &[E]) -> Result<()>;
}

impl UpdateRule for Sgd {
    const NAME: &'static str = "sgd";

    fn state_columns(&self, _device: Device) -> usize {
        0
    }

    fn update<E: Dtype>(
        &self,
        param: &mut Tensor<E>,
        grad: &mut Tensor<E>,
        _state: &mut Tensor<E>,
        ctx: &UpdateContext,
    ) -> Result<()> {
        let lr = E::from_f64_lossy(ctx.learning_rate);
        SgdKernel::update(&Cpu, lr, param.data_mut(), grad.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ScheduleConfig,
        learners::{Learner, SgdLearner},
        options::AdditionalLearningOptions,
        parameter::{Gradients, Parameter},
        progress::tests::recorder,
        tests::*,
    };
    use stepwise_core::{schedule::Schedule, tensor::NDArray, Error};

    fn sgd(params: &[&Parameter], lr: f64, options: AdditionalLearningOptions) -> SgdLearner {
        let params = params.iter().map(|&p| p.clone()).collect();
        SgdLearner::new(params, Schedule::constant(lr), Sgd, options).unwrap()
    }

    #[test]
    fn test_sgd_exact() {
        let p = parameter(&[1.0, 2.0, 3.0, 4.0]);
        let mut learner = sgd(&[&p], 0.5, Default::default());
        let mut grads = gradients(&[(&p, &[1.0, -2.0, 0.5, 4.0])]);
        assert!(learner.update(&mut grads, 1, false).unwrap());
        assert_eq!(values(&p), vec![0.5, 3.0, 2.75, 2.0]);
        assert_eq!(learner.base().smoothed_gradients()[0].num_elements(), 0);
    }

    #[test]
    fn test_sgd_multiple_steps() {
        let p = parameter(&[1.0; 5]);
        let mut learner = sgd(&[&p], 1e-2, Default::default());
        let rate = [0.1, 1.0, 2.0, 10.0, 100.0];
        let expected = [
            [0.999, 0.99, 0.98, 0.9, 0.0],
            [0.998, 0.98, 0.96, 0.8, -1.0],
            [0.997, 0.97, 0.94, 0.7, -2.0],
        ];
        for e in expected.iter() {
            let mut grads = gradients(&[(&p, &rate)]);
            learner.update(&mut grads, 1, false).unwrap();
            assert_close(&values(&p), e);
        }
    }

    #[test]
    fn test_zero_learning_rate_is_a_noop() {
        let p = parameter(&[1.0, 2.0]);
        let mut learner = sgd(&[&p], 0.0, Default::default());
        let mut grads = gradients(&[(&p, &[5.0, 5.0])]);
        assert!(!learner.update(&mut grads, 4, true).unwrap());
        assert_eq!(values(&p), vec![1.0, 2.0]);
        assert_eq!(learner.counters(), Default::default());

        // nothing is validated when no update happens
        let mut empty = Gradients::new();
        assert!(!learner.update(&mut empty, 0, false).unwrap());
    }

    #[test]
    fn test_empty_minibatch_is_rejected() {
        let p = parameter(&[1.0]);
        let mut learner = sgd(&[&p], 0.5, Default::default());
        let mut grads = gradients(&[(&p, &[1.0])]);
        let err = learner.update(&mut grads, 0, false).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(values(&p), vec![1.0]);
    }

    #[test]
    fn test_missing_gradient_modifies_nothing() {
        let a = parameter(&[1.0]);
        let b = parameter(&[2.0]);
        let mut learner = sgd(&[&a, &b], 0.5, Default::default());
        let mut grads = gradients(&[(&a, &[1.0])]);
        let err = learner.update(&mut grads, 1, false).unwrap_err();
        assert!(matches!(err, Error::MissingGradient { .. }));
        assert_eq!(values(&a), vec![1.0]);
        assert_eq!(learner.total_samples_seen(), 0);
    }

    #[test]
    fn test_gradient_shape_mismatch() {
        let p = parameter(&[1.0, 2.0]);
        let mut learner = sgd(&[&p], 0.5, Default::default());
        let mut grads = Gradients::new();
        grads.insert(&p, tensor([3], &[1.0, 1.0, 1.0]));
        assert!(learner.update(&mut grads, 1, false).is_err());
        assert_eq!(values(&p), vec![1.0, 2.0]);
    }

    #[test]
    fn test_gradient_type_mismatch() {
        let p = Parameter::new("p", Tensor::<f32>::zeros([2], Device::Cpu));
        let mut learner = sgd(&[&p], 0.5, Default::default());
        let mut grads = Gradients::new();
        grads.insert(&p, Tensor::<f64>::zeros([2], Device::Cpu));
        let err = learner.update(&mut grads, 1, false).unwrap_err();
        assert!(matches!(err, Error::DataTypeMismatch { .. }));
    }

    #[test]
    fn test_invalid_parameter_lists() {
        let p = parameter(&[1.0]);
        let err = SgdLearner::new(vec![], Schedule::constant(0.1), Sgd, Default::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        let err = SgdLearner::new(
            vec![p.clone(), p.clone()],
            Schedule::constant(0.1),
            Sgd,
            Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_counters_advance() {
        let p = parameter(&[0.0]);
        let mut learner = sgd(&[&p], 0.5, Default::default());
        let mut grads = gradients(&[(&p, &[0.0])]);
        learner.update(&mut grads, 8, false).unwrap();
        learner.update(&mut grads, 8, true).unwrap();
        let counters = learner.counters();
        assert_eq!(counters.samples, 16);
        assert_eq!(counters.minibatches, 2);
        assert_eq!(counters.sweeps, 1);
    }

    #[test]
    fn test_gradient_truncation() {
        let p = parameter(&[0.0; 3]);
        let options = AdditionalLearningOptions::default().with_gradient_clipping_threshold_per_sample(1.0);
        let mut learner = sgd(&[&p], 0.5, options);
        let mut grads = gradients(&[(&p, &[3.0, -5.0, 1.0])]);
        learner.update(&mut grads, 2, false).unwrap();
        assert_eq!(values(&p), vec![-1.0, 1.0, -0.5]);
    }

    #[test]
    fn test_gradient_norm_clipping() {
        let p = parameter(&[0.0; 2]);
        let options = AdditionalLearningOptions::default()
            .with_gradient_clipping_threshold_per_sample(2.5)
            .with_gradient_clipping_with_truncation(false);
        let mut learner = sgd(&[&p], 0.5, options);

        let mut grads = gradients(&[(&p, &[6.0, 8.0])]);
        learner.update(&mut grads, 2, false).unwrap();
        assert_eq!(values(&p), vec![-1.5, -2.0]);

        // below the bound nothing is rescaled
        let mut grads = gradients(&[(&p, &[3.0, 0.0])]);
        learner.update(&mut grads, 2, false).unwrap();
        assert_eq!(values(&p), vec![-3.0, -2.0]);
    }

    #[test]
    fn test_negative_clipping_threshold_is_rejected() {
        for threshold in [-1.0, f64::NAN] {
            let p = parameter(&[0.0]);
            let options = AdditionalLearningOptions::default().with_gradient_clipping_threshold_per_sample(threshold);
            let err = SgdLearner::new(vec![p], Schedule::constant(0.5), Sgd, options).unwrap_err();
            assert!(matches!(err, Error::InvalidConfiguration(_)));
        }

        // an infinite threshold never clips
        let p = parameter(&[0.0, 0.0]);
        let options = AdditionalLearningOptions::default().with_gradient_clipping_threshold_per_sample(f64::INFINITY);
        let mut learner = sgd(&[&p], 0.5, options);
        let mut grads = gradients(&[(&p, &[6.0, -8.0])]);
        learner.update(&mut grads, 1, false).unwrap();
        assert_eq!(values(&p), vec![-3.0, 4.0]);
    }

    #[test]
    fn test_zero_learning_rate_checked_before_sample_count() {
        let p = parameter(&[1.0]);
        let mut learner = sgd(&[&p], 0.5, Default::default());
        let mut grads = gradients(&[(&p, &[1.0])]);
        learner.update(&mut grads, 2, false).unwrap();
        let counters = learner.counters();

        learner.reset_learning_rate(Schedule::constant(0.0));
        let mut grads = gradients(&[(&p, &[1.0])]);
        assert!(!learner.update(&mut grads, 0, true).unwrap());
        assert_eq!(learner.counters(), counters);
        assert_eq!(values(&p), vec![0.5]);

        learner.reset_learning_rate(Schedule::constant(0.5));
        let err = learner.update(&mut grads, 0, true).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(learner.counters(), counters);
        assert_eq!(values(&p), vec![0.5]);
    }

    #[test]
    fn test_l2_regularization() {
        let p = parameter(&[2.0, -4.0]);
        let options = AdditionalLearningOptions::default().with_l2_regularization_weight(0.25);
        let mut learner = sgd(&[&p], 0.5, options);
        let mut grads = gradients(&[(&p, &[0.0, 0.0])]);
        learner.update(&mut grads, 2, false).unwrap();
        assert_eq!(values(&p), vec![1.5, -3.0]);
    }

    #[test]
    fn test_l1_soft_threshold() {
        let p = parameter(&[1.0, 0.125, -1.0]);
        let options = AdditionalLearningOptions::default().with_l1_regularization_weight(0.25);
        let mut learner = sgd(&[&p], 0.5, options);
        let mut grads = gradients(&[(&p, &[0.0, 0.0, 0.0])]);
        learner.update(&mut grads, 2, false).unwrap();
        assert_eq!(values(&p), vec![0.75, 0.0, -0.75]);
    }

    #[test]
    fn test_noise_injection_is_seeded() {
        let options = AdditionalLearningOptions::default()
            .with_gaussian_noise_injection_std_dev(ScheduleConfig::constant(0.1))
            .with_noise_injection_seed(42);
        let run = |seed_options: AdditionalLearningOptions| {
            let a = parameter(&[0.0; 4]);
            let b = parameter(&[0.0; 4]);
            let mut learner = sgd(&[&a, &b], 0.5, seed_options);
            let mut grads = gradients(&[(&a, &[0.0; 4]), (&b, &[0.0; 4])]);
            learner.update(&mut grads, 1, false).unwrap();
            (values(&a), values(&b), learner.base().noise_injection_seed())
        };

        let (a1, b1, seed1) = run(options.clone());
        let (a2, b2, seed2) = run(options.clone());
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
        // one draw per parameter
        assert_eq!(seed1, 44);
        assert_eq!(seed2, 44);
        assert_ne!(a1, b1);
        assert!(a1.iter().any(|&x| x != 0.0));

        let (a3, _, _) = run(options.with_noise_injection_seed(7));
        assert_ne!(a1, a3);
    }

    #[test]
    fn test_zero_noise_keeps_seed() {
        let p = parameter(&[0.0]);
        let options = AdditionalLearningOptions::default().with_noise_injection_seed(3);
        let mut learner = sgd(&[&p], 0.5, options);
        let mut grads = gradients(&[(&p, &[1.0])]);
        learner.update(&mut grads, 1, false).unwrap();
        assert_eq!(learner.base().noise_injection_seed(), 3);
    }

    #[test]
    fn test_check_for_nans() {
        let p = parameter(&[1.0]);
        let options = AdditionalLearningOptions::default().with_check_for_nans(true);
        let mut learner = sgd(&[&p], 0.5, options);
        let mut grads = gradients(&[(&p, &[f64::NAN])]);
        let err = learner.update(&mut grads, 1, false).unwrap_err();
        assert!(matches!(err, Error::NumericalAnomaly { what: "value", .. }));
    }

    #[test]
    fn test_update_parameter_keeps_counters() {
        let a = parameter(&[1.0]);
        let b = parameter(&[1.0]);
        let mut learner = sgd(&[&a, &b], 0.5, Default::default());
        let mut g = NDArray::from(tensor([1], &[1.0]));
        learner.update_parameter(&b, &mut g, 1).unwrap();
        assert_eq!(values(&a), vec![1.0]);
        assert_eq!(values(&b), vec![0.5]);
        assert_eq!(learner.total_samples_seen(), 0);

        let stranger = parameter(&[1.0]);
        assert!(learner.update_parameter(&stranger, &mut g, 1).is_err());
        assert!(learner.update_parameter(&a, &mut g, 0).is_err());
    }

    #[test]
    fn test_learning_rate_is_reported_on_change() {
        let p = parameter(&[0.0]);
        let mut learner = SgdLearner::new(
            vec![p.clone()],
            Schedule::from_steps(vec![(2, 0.5), (1, 0.25)], 1, Default::default()).unwrap(),
            Sgd,
            Default::default(),
        )
        .unwrap();
        let (writer, seen) = recorder();
        learner.add_progress_writers(vec![writer]);
        for _ in 0..3 {
            let mut grads = gradients(&[(&p, &[1.0])]);
            learner.update(&mut grads, 1, false).unwrap();
        }
        assert_eq!(
            *seen.borrow(),
            vec![
                ("Learning rate [reference mbsize = 1]".to_string(), 0.5),
                ("Learning rate [reference mbsize = 1]".to_string(), 0.25),
            ]
        );
        assert_eq!(values(&p), vec![-1.25]);
    }

    #[test]
    fn test_reset_learning_rate_starts_now() {
        let p = parameter(&[0.0]);
        let mut learner = sgd(&[&p], 0.5, Default::default());
        let mut grads = gradients(&[(&p, &[1.0])]);
        learner.update(&mut grads, 4, false).unwrap();
        learner.reset_learning_rate(
            Schedule::from_steps(vec![(2, 0.25), (1, 0.125)], 1, Default::default()).unwrap(),
        );
        assert_eq!(learner.learning_rate(), 0.25);
        learner.update(&mut grads, 1, false).unwrap();
        learner.update(&mut grads, 1, false).unwrap();
        assert_eq!(learner.learning_rate(), 0.125);
    }
}
