use std::{
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
};

use stepwise_core::{
    dictionary::{Dictionary, DictionaryValue},
    dtypes::Dtype,
    schedule::{ElapsedCounters, Schedule},
    tensor::{Device, NDArray, Tensor},
    unique_id::HasUniqueId,
    Error, Result,
};

use super::rule::{UpdateContext, UpdateRule};
use crate::{
    options::AdditionalLearningOptions,
    parameter::{Gradients, Parameter},
    progress::{SharedProgressWriter, TrainingParameterReporter},
};

/// Newest checkpoint layout. Version 2 stores smoothed gradients by position,
/// version 3 adds the sweep counter.
pub const CHECKPOINT_VERSION: u64 = 3;
/// `type` entry of every learner checkpoint.
pub const LEARNER_TYPE_TAG: &str = "Learner";

pub const VERSION_KEY: &str = "version";
pub const TYPE_KEY: &str = "type";
pub const SAMPLE_COUNT_KEY: &str = "sampleCount";
pub const MINIBATCH_COUNT_KEY: &str = "minibatchCount";
pub const SWEEP_COUNT_KEY: &str = "sweepCount";
pub const LEARNING_RATE_SCHEDULE_KEY: &str = "learningRateSchedule";
pub const NOISE_INJECTION_SEED_KEY: &str = "noiseInjectionSeed";
pub const SMOOTHED_GRADIENTS_KEY: &str = "smoothedGradients";
pub const SMOOTHED_COUNT_KEY: &str = "smoothedCount";

/// State and behaviour shared by every learner: the parameter list with one
/// auxiliary state tensor per parameter, elapsed counters, the learning rate
/// schedule, the additional options and the noise generator seed.
#[derive(Debug)]
pub struct LearnerBase {
    parameters: Vec<Parameter>,
    smoothed_gradients: Vec<NDArray>,
    counters: ElapsedCounters,
    learning_rate: Schedule,
    options: AdditionalLearningOptions,
    noise_std_dev: Schedule,
    noise_injection_seed: u64,
    reporter: TrainingParameterReporter,
}

/// A validated checkpoint, ready to be applied.
pub(crate) struct RestoredState<'a> {
    version: u64,
    counters: ElapsedCounters,
    noise_injection_seed: Option<u64>,
    learning_rate: Schedule,
    smoothed_gradients: Vec<&'a NDArray>,
}

impl LearnerBase {
    /// Allocates zeroed auxiliary state of shape `[rows, k * cols]` for every
    /// parameter, with `k = state_columns(device)`.
    pub(crate) fn new(
        kind: &'static str,
        parameters: Vec<Parameter>,
        learning_rate: Schedule,
        options: AdditionalLearningOptions,
        state_columns: impl Fn(Device) -> usize,
    ) -> Result<Self> {
        if parameters.is_empty() {
            return Err(Error::InvalidConfiguration(
                "the parameter list of a learner must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for p in parameters.iter() {
            if !seen.insert(*p.id()) {
                return Err(Error::InvalidConfiguration(format!(
                    "the parameter list of a learner contains '{}' more than once",
                    p.name()
                )));
            }
        }

        if let Some(t) = options.gradient_clipping_threshold_per_sample {
            if t.is_nan() || t < 0.0 {
                return Err(Error::InvalidConfiguration(format!(
                    "gradient clipping threshold per sample must be non-negative, got {t}"
                )));
            }
        }

        let noise_std_dev = options
            .gaussian_noise_injection_std_dev
            .build()
            .map_err(|e| Error::InvalidConfiguration(format!("noise schedule: {e}")))?;

        let smoothed_gradients: Vec<NDArray> = parameters
            .iter()
            .map(|p| {
                let value = p.value();
                let (rows, cols) = value.shape().matrix_dims();
                let k = state_columns(value.device());
                NDArray::zeros(value.data_type(), [rows, k * cols], value.device())
            })
            .collect();

        let noise_injection_seed = options.noise_injection_seed.unwrap_or_else(random_seed);

        tracing::debug!(
            learner = kind,
            parameters = parameters.len(),
            state_elements = smoothed_gradients.iter().map(NDArray::num_elements).sum::<usize>(),
            "created learner"
        );

        Ok(Self {
            parameters,
            smoothed_gradients,
            counters: ElapsedCounters::default(),
            learning_rate,
            options,
            noise_std_dev,
            noise_injection_seed,
            reporter: TrainingParameterReporter::default(),
        })
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Auxiliary state tensors, in parameter order.
    pub fn smoothed_gradients(&self) -> &[NDArray] {
        &self.smoothed_gradients
    }

    pub fn counters(&self) -> ElapsedCounters {
        self.counters
    }

    pub fn learning_rate_schedule(&self) -> &Schedule {
        &self.learning_rate
    }

    pub fn options(&self) -> &AdditionalLearningOptions {
        &self.options
    }

    pub fn noise_injection_seed(&self) -> u64 {
        self.noise_injection_seed
    }

    /// Per-sample learning rate for a minibatch of `sample_count` samples.
    pub fn learning_rate_per_sample(&self, sample_count: u64) -> f64 {
        let value = self.learning_rate.current(&self.counters);
        self.learning_rate.per_sample(value, sample_count)
    }

    pub(crate) fn add_progress_writers(&mut self, writers: Vec<SharedProgressWriter>) {
        self.reporter.add_writers(writers);
    }

    /// Reports the current value of `schedule` under `name`.
    pub(crate) fn report(&mut self, name: &str, schedule: &Schedule) {
        let value = schedule.current(&self.counters);
        self.reporter.report(name, value, schedule.ref_mb_size());
    }

    pub(crate) fn reset_learning_rate(&mut self, schedule: Schedule) {
        self.learning_rate.replace(schedule, &self.counters);
    }

    pub(crate) fn reset_smoothed_gradients(&mut self) {
        self.smoothed_gradients.iter_mut().for_each(NDArray::set_zero);
    }

    /// Reports the learning rate and decides whether the minibatch is applied.
    ///
    /// Returns `None` when the learning rate is zero. Otherwise the minibatch
    /// is validated (non-empty, one matching gradient per parameter) before
    /// anything is modified and the per-sample learning rate is returned.
    pub(crate) fn begin_update(
        &mut self,
        gradients: &Gradients,
        sample_count: u64,
    ) -> Result<Option<f64>> {
        let value = self.learning_rate.current(&self.counters);
        self.reporter
            .report("Learning rate", value, self.learning_rate.ref_mb_size());

        let learning_rate = self.learning_rate_per_sample(sample_count);
        if learning_rate == 0.0 {
            tracing::trace!(sample_count, "learning rate is zero, skipping update");
            return Ok(None);
        }
        if sample_count == 0 {
            return Err(Error::InvalidArgument(
                "cannot perform an update with an empty minibatch".into(),
            ));
        }
        for p in self.parameters.iter() {
            let gradient = gradients
                .get_ref_checked(p)
                .ok_or_else(|| Error::MissingGradient {
                    parameter: p.name().to_string(),
                })?;
            check_gradient(p, gradient)?;
        }
        tracing::trace!(sample_count, learning_rate, "applying minibatch");
        Ok(Some(learning_rate))
    }

    /// Position of `parameter` in the parameter list.
    pub(crate) fn index_of(&self, parameter: &Parameter) -> Result<usize> {
        self.parameters
            .iter()
            .position(|p| p == parameter)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "parameter '{}' is not updated by this learner",
                    parameter.name()
                ))
            })
    }

    /// Runs clipping, L2, the rule, noise injection and L1 on every parameter.
    pub(crate) fn update_parameters<R: UpdateRule>(
        &mut self,
        rule: &R,
        gradients: &mut Gradients,
        ctx: &UpdateContext,
    ) -> Result<()> {
        for index in 0..self.parameters.len() {
            let parameter = self.parameters[index].clone();
            let gradient = gradients
                .get_mut(&parameter)
                .ok_or_else(|| Error::MissingGradient {
                    parameter: parameter.name().to_string(),
                })?;
            self.update_parameter_at(rule, index, gradient, ctx)?;
        }
        Ok(())
    }

    /// Updates the parameter at `index` with `gradient`.
    pub(crate) fn update_parameter_at<R: UpdateRule>(
        &mut self,
        rule: &R,
        index: usize,
        gradient: &mut NDArray,
        ctx: &UpdateContext,
    ) -> Result<()> {
        let noise_std_dev = self.noise_std_dev.current(&ctx.counters);
        let Self {
            parameters,
            smoothed_gradients,
            options,
            noise_injection_seed,
            ..
        } = self;
        let parameter = &parameters[index];
        let state = &mut smoothed_gradients[index];
        check_gradient(parameter, gradient)?;

        if options.check_for_nans && state.has_nan() {
            return Err(Error::NumericalAnomaly {
                what: "smoothed gradient",
                parameter: parameter.name().to_string(),
            });
        }

        let mut step = ParameterStep {
            options,
            noise_std_dev,
            noise_injection_seed,
            ctx,
        };
        {
            let mut value = parameter.try_value_mut()?;
            match (&mut *value, gradient, state) {
                (NDArray::F32(p), NDArray::F32(g), NDArray::F32(s)) => step.run(rule, p, g, s)?,
                (NDArray::F64(p), NDArray::F64(g), NDArray::F64(s)) => step.run(rule, p, g, s)?,
                (p, g, s) => {
                    return Err(Error::Internal(format!(
                        "element types of '{}' disagree: value {}, gradient {}, smoothed gradient {}",
                        parameter.name(),
                        p.data_type(),
                        g.data_type(),
                        s.data_type()
                    )))
                }
            }
        }

        if options.check_for_nans && parameter.value().has_nan() {
            return Err(Error::NumericalAnomaly {
                what: "value",
                parameter: parameter.name().to_string(),
            });
        }
        Ok(())
    }

    /// Advances the elapsed counters past a completed minibatch.
    pub(crate) fn finish_update(&mut self, sample_count: u64, sweep_end: bool) {
        self.counters.advance(sample_count, sweep_end);
    }

    pub(crate) fn create_checkpoint(&self) -> Dictionary {
        let mut checkpoint = Dictionary::new();
        checkpoint.insert(VERSION_KEY, CHECKPOINT_VERSION);
        checkpoint.insert(TYPE_KEY, LEARNER_TYPE_TAG);
        checkpoint.insert(SAMPLE_COUNT_KEY, self.counters.samples);
        checkpoint.insert(MINIBATCH_COUNT_KEY, self.counters.minibatches);
        checkpoint.insert(SWEEP_COUNT_KEY, self.counters.sweeps);
        checkpoint.insert(LEARNING_RATE_SCHEDULE_KEY, self.learning_rate.serialize());
        checkpoint.insert(NOISE_INJECTION_SEED_KEY, self.noise_injection_seed);
        let smoothed: Vec<DictionaryValue> = self
            .smoothed_gradients
            .iter()
            .cloned()
            .map(DictionaryValue::NDArray)
            .collect();
        checkpoint.insert(SMOOTHED_GRADIENTS_KEY, smoothed);
        checkpoint
    }

    /// Checks `checkpoint` against the live learner without modifying it.
    pub(crate) fn read_checkpoint<'a>(&self, checkpoint: &'a Dictionary) -> Result<RestoredState<'a>> {
        const REQUIRED: [&str; 4] = [
            TYPE_KEY,
            SAMPLE_COUNT_KEY,
            MINIBATCH_COUNT_KEY,
            LEARNING_RATE_SCHEDULE_KEY,
        ];
        let version = checkpoint.validate(
            "learner checkpoint",
            &REQUIRED,
            LEARNER_TYPE_TAG,
            CHECKPOINT_VERSION,
        )?;

        let counters = ElapsedCounters {
            samples: checkpoint.require_size_t(SAMPLE_COUNT_KEY)?,
            minibatches: checkpoint.require_size_t(MINIBATCH_COUNT_KEY)?,
            sweeps: if version >= 3 {
                checkpoint.require_size_t(SWEEP_COUNT_KEY)?
            } else {
                self.counters.sweeps
            },
        };
        // legacy checkpoints carry no seed; the constructor's one stays
        let noise_injection_seed = if checkpoint.contains(NOISE_INJECTION_SEED_KEY) {
            Some(checkpoint.require_size_t(NOISE_INJECTION_SEED_KEY)?)
        } else {
            None
        };
        let learning_rate =
            Schedule::deserialize(checkpoint.require_dictionary(LEARNING_RATE_SCHEDULE_KEY)?)?;

        let smoothed_gradients = if version >= 2 {
            let values = checkpoint.require_vector(SMOOTHED_GRADIENTS_KEY)?;
            if values.len() != self.parameters.len() {
                return Err(Error::CheckpointMismatch {
                    reason: format!(
                        "checkpoint holds {} smoothed gradients but the learner has {} parameters",
                        values.len(),
                        self.parameters.len()
                    ),
                });
            }
            values
                .iter()
                .zip(self.parameters.iter())
                .map(|(v, p)| {
                    v.as_ndarray().ok_or_else(|| Error::CheckpointMismatch {
                        reason: format!(
                            "smoothed gradient of parameter '{}' is a {}, not a tensor",
                            p.name(),
                            v.type_name()
                        ),
                    })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            self.parameters
                .iter()
                .map(|p| checkpoint.require_ndarray(p.uid()))
                .collect::<Result<Vec<_>>>()?
        };

        for ((stored, live), p) in smoothed_gradients
            .iter()
            .zip(self.smoothed_gradients.iter())
            .zip(self.parameters.iter())
        {
            if stored.data_type() != live.data_type() {
                return Err(Error::CheckpointMismatch {
                    reason: format!(
                        "smoothed gradient of parameter '{}' (uid = {}) is {}, expected {}",
                        p.name(),
                        p.uid(),
                        stored.data_type(),
                        live.data_type()
                    ),
                });
            }
            if stored.shape() != live.shape() {
                return Err(Error::CheckpointMismatch {
                    reason: format!(
                        "smoothed gradient of parameter '{}' (uid = {}) has shape {}, expected {}",
                        p.name(),
                        p.uid(),
                        stored.shape(),
                        live.shape()
                    ),
                });
            }
        }

        Ok(RestoredState {
            version,
            counters,
            noise_injection_seed,
            learning_rate,
            smoothed_gradients,
        })
    }

    /// Applies a checkpoint returned by [LearnerBase::read_checkpoint].
    pub(crate) fn apply_checkpoint(&mut self, restored: RestoredState<'_>) -> Result<()> {
        for (live, stored) in self
            .smoothed_gradients
            .iter_mut()
            .zip(restored.smoothed_gradients)
        {
            live.copy_from(stored)?;
        }
        self.counters = restored.counters;
        self.learning_rate = restored.learning_rate;
        if let Some(seed) = restored.noise_injection_seed {
            self.noise_injection_seed = seed;
        }
        tracing::debug!(
            version = restored.version,
            samples = self.counters.samples,
            minibatches = self.counters.minibatches,
            sweeps = self.counters.sweeps,
            "restored learner from checkpoint"
        );
        Ok(())
    }
}

fn check_gradient(parameter: &Parameter, gradient: &NDArray) -> Result<()> {
    let value = parameter.value();
    if gradient.data_type() != value.data_type() {
        return Err(Error::DataTypeMismatch {
            expected: value.data_type(),
            got: gradient.data_type(),
        });
    }
    if gradient.shape() != value.shape() {
        return Err(Error::InvalidArgument(format!(
            "gradient of parameter '{}' has shape {}, expected {}",
            parameter.name(),
            gradient.shape(),
            value.shape()
        )));
    }
    Ok(())
}

/// The typed part of one parameter update.
struct ParameterStep<'a> {
    options: &'a AdditionalLearningOptions,
    noise_std_dev: f64,
    noise_injection_seed: &'a mut u64,
    ctx: &'a UpdateContext,
}

impl ParameterStep<'_> {
    fn run<E: Dtype, R: UpdateRule>(
        &mut self,
        rule: &R,
        param: &mut Tensor<E>,
        grad: &mut Tensor<E>,
        state: &mut Tensor<E>,
    ) -> Result<()> {
        self.pre_process(param, grad)?;
        rule.update(param, grad, state, self.ctx)?;
        self.post_process(param)
    }

    /// Gradient clipping, then L2 regularization.
    fn pre_process<E: Dtype>(&self, param: &Tensor<E>, grad: &mut Tensor<E>) -> Result<()> {
        let sample_count = self.ctx.sample_count as f64;
        if let Some(threshold) = self.options.clipping_threshold() {
            let bound = threshold * sample_count;
            if self.options.gradient_clipping_with_truncation {
                grad.truncate(E::from_f64_lossy(bound));
            } else {
                let norm = grad.frobenius_norm();
                if norm > bound {
                    grad.scale(E::from_f64_lossy(bound / norm));
                }
            }
        }

        // scaled by the sample count since the learning rate is per sample
        let l2 = self.options.l2_regularization_weight;
        if l2 > 0.0 {
            grad.scale_and_add(E::from_f64_lossy(l2 * sample_count), param)?;
        }
        Ok(())
    }

    /// Gaussian noise injection, then the L1 proximal step.
    fn post_process<E: Dtype>(&mut self, param: &mut Tensor<E>) -> Result<()> {
        if self.noise_std_dev > 0.0 {
            let noise = Tensor::<E>::sample_normal(
                param.shape().clone(),
                0.0,
                self.noise_std_dev,
                *self.noise_injection_seed,
                param.device(),
            )?;
            *self.noise_injection_seed += 1;
            param.scale_and_add(E::one(), &noise)?;
        }

        let l1 = self.options.l1_regularization_weight;
        if l1 > 0.0 {
            let threshold = self.ctx.learning_rate * l1 * self.ctx.sample_count as f64;
            param.soft_threshold(E::from_f64_lossy(threshold));
        }
        Ok(())
    }
}

/// Seed for a learner created without an explicit noise injection seed.
/// Every call returns a new value, so learners in one process never share a
/// noise stream.
fn random_seed() -> u64 {
    static SEED: AtomicU64 = AtomicU64::new(0);
    SEED.fetch_add(1, Ordering::Relaxed)
}
