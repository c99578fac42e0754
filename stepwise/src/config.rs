//! Serializable learner configuration.
//!
//! A [LearnerConfig] names the algorithm in its `type` field and carries the
//! algorithm's hyperparameters next to the [AdditionalLearningOptions]:
//!
//! ```rust
//! # use stepwise::prelude::*;
//! let json = r#"{
//!     "type": "adam",
//!     "learningRate": { "values": [0.01, 0.001], "epochSize": 1000 },
//!     "momentum": { "values": [0.9] },
//!     "options": { "l2RegularizationWeight": 0.0001 }
//! }"#;
//! let config = LearnerConfig::from_json(json).unwrap();
//!
//! let w = Parameter::new("w", Tensor::<f32>::zeros([8, 8], Device::Cpu));
//! let learner = config.build(vec![w]).unwrap();
//! assert_eq!(learner.learner_type(), "adam");
//! assert_eq!(learner.learning_rate(), 0.01);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use stepwise_core::{
    schedule::{Schedule, UnitType},
    Error, Result,
};

use crate::{
    learners::{
        AdaDelta, AdaDeltaConfig, AdaGrad, AdaGradConfig, Adam, AdamConfig, FsAdaGrad, FsAdaGradConfig,
        Learner, MomentumConfig, MomentumSgd, Nesterov, ParameterLearner, RmsProp, RmsPropConfig, Sgd,
    },
    options::AdditionalLearningOptions,
    parameter::Parameter,
};

/// A [Schedule] as it appears in configuration files: value `i` holds from
/// `i * epochSize` units on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub values: Vec<f64>,

    /// Length of one step. Zero allows a single value only, except for sweep
    /// based schedules where it means one sweep.
    #[serde(default)]
    pub epoch_size: u64,

    #[serde(default)]
    pub unit: UnitType,

    /// Minibatch size the values are given for. `1` means per sample, `0`
    /// means per minibatch of any size.
    #[serde(default = "default_ref_mb_size")]
    pub ref_mb_size: u64,
}

pub(crate) fn default_ref_mb_size() -> u64 {
    1
}

impl ScheduleConfig {
    pub fn constant(value: f64) -> Self {
        Self {
            values: vec![value],
            epoch_size: 0,
            unit: UnitType::Sample,
            ref_mb_size: default_ref_mb_size(),
        }
    }

    pub fn build(&self) -> Result<Schedule> {
        Ok(Schedule::per_epoch(self.values.clone(), self.epoch_size, self.unit)?
            .with_ref_mb_size(self.ref_mb_size))
    }
}

impl From<f64> for ScheduleConfig {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

fn default_true() -> bool {
    true
}

fn default_rho() -> f64 {
    AdaDeltaConfig::default().rho
}

fn default_epsilon() -> f64 {
    1e-8
}

fn default_gamma() -> f64 {
    RmsPropConfig::default().gamma
}

fn default_inc() -> f64 {
    RmsPropConfig::default().inc
}

fn default_dec() -> f64 {
    RmsPropConfig::default().dec
}

fn default_max() -> f64 {
    RmsPropConfig::default().max
}

fn default_min() -> f64 {
    RmsPropConfig::default().min
}

/// Everything needed to construct one learner, minus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LearnerConfig {
    #[serde(rename = "sgd", rename_all = "camelCase")]
    Sgd {
        learning_rate: ScheduleConfig,
        #[serde(default)]
        options: AdditionalLearningOptions,
    },

    #[serde(rename = "momentum_sgd", rename_all = "camelCase")]
    MomentumSgd {
        learning_rate: ScheduleConfig,
        momentum: ScheduleConfig,
        #[serde(default = "default_true")]
        unit_gain: bool,
        #[serde(default)]
        options: AdditionalLearningOptions,
    },

    #[serde(rename = "nesterov", rename_all = "camelCase")]
    Nesterov {
        learning_rate: ScheduleConfig,
        momentum: ScheduleConfig,
        #[serde(default = "default_true")]
        unit_gain: bool,
        #[serde(default)]
        options: AdditionalLearningOptions,
    },

    #[serde(rename = "adagrad", rename_all = "camelCase")]
    AdaGrad {
        learning_rate: ScheduleConfig,
        #[serde(default = "default_true")]
        need_ave_multiplier: bool,
        #[serde(default)]
        options: AdditionalLearningOptions,
    },

    #[serde(rename = "adadelta", rename_all = "camelCase")]
    AdaDelta {
        learning_rate: ScheduleConfig,
        #[serde(default = "default_rho")]
        rho: f64,
        #[serde(default = "default_epsilon")]
        epsilon: f64,
        #[serde(default)]
        options: AdditionalLearningOptions,
    },

    #[serde(rename = "fsadagrad", rename_all = "camelCase")]
    FsAdaGrad {
        learning_rate: ScheduleConfig,
        momentum: ScheduleConfig,
        #[serde(default = "default_true")]
        unit_gain: bool,
        /// Defaults to a time constant of 720,000 samples.
        #[serde(default)]
        variance_momentum: Option<ScheduleConfig>,
        #[serde(default)]
        options: AdditionalLearningOptions,
    },

    #[serde(rename = "adam", rename_all = "camelCase")]
    Adam {
        learning_rate: ScheduleConfig,
        momentum: ScheduleConfig,
        #[serde(default = "default_true")]
        unit_gain: bool,
        /// Defaults to a time constant of 720,000 samples.
        #[serde(default)]
        variance_momentum: Option<ScheduleConfig>,
        #[serde(default = "default_epsilon")]
        epsilon: f64,
        #[serde(default)]
        adamax: bool,
        #[serde(default)]
        options: AdditionalLearningOptions,
    },

    #[serde(rename = "rmsprop", rename_all = "camelCase")]
    RmsProp {
        learning_rate: ScheduleConfig,
        #[serde(default = "default_gamma")]
        gamma: f64,
        #[serde(default = "default_inc")]
        inc: f64,
        #[serde(default = "default_dec")]
        dec: f64,
        #[serde(default = "default_max")]
        max: f64,
        #[serde(default = "default_min")]
        min: f64,
        #[serde(default = "default_true")]
        need_ave_multiplier: bool,
        #[serde(default)]
        options: AdditionalLearningOptions,
    },
}

fn boxed<R: crate::learners::UpdateRule + 'static>(
    parameters: Vec<Parameter>,
    learning_rate: &ScheduleConfig,
    rule: R,
    options: AdditionalLearningOptions,
) -> Result<Box<dyn Learner>> {
    let learning_rate = learning_rate.build()?;
    Ok(Box::new(ParameterLearner::new(parameters, learning_rate, rule, options)?))
}

fn variance_momentum(config: &Option<ScheduleConfig>) -> Result<Option<Schedule>> {
    config.as_ref().map(ScheduleConfig::build).transpose()
}

impl LearnerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Name of the algorithm, as reported by [Learner::learner_type].
    pub fn learner_type(&self) -> &'static str {
        match self {
            Self::Sgd { .. } => "sgd",
            Self::MomentumSgd { .. } => "momentum_sgd",
            Self::Nesterov { .. } => "nesterov",
            Self::AdaGrad { .. } => "adagrad",
            Self::AdaDelta { .. } => "adadelta",
            Self::FsAdaGrad { .. } => "fsadagrad",
            Self::Adam { .. } => "adam",
            Self::RmsProp { .. } => "rmsprop",
        }
    }

    /// Constructs the configured learner over `parameters`.
    pub fn build(&self, parameters: Vec<Parameter>) -> Result<Box<dyn Learner>> {
        let learner = match self {
            Self::Sgd {
                learning_rate,
                options,
            } => boxed(parameters, learning_rate, Sgd, options.clone()),
            Self::MomentumSgd {
                learning_rate,
                momentum,
                unit_gain,
                options,
            } => {
                let cfg = MomentumConfig::new(momentum.build()?).with_unit_gain(*unit_gain);
                boxed(parameters, learning_rate, MomentumSgd::new(cfg), options.clone())
            }
            Self::Nesterov {
                learning_rate,
                momentum,
                unit_gain,
                options,
            } => {
                let cfg = MomentumConfig::new(momentum.build()?).with_unit_gain(*unit_gain);
                boxed(parameters, learning_rate, Nesterov::new(cfg), options.clone())
            }
            Self::AdaGrad {
                learning_rate,
                need_ave_multiplier,
                options,
            } => {
                let cfg = AdaGradConfig::default().with_need_ave_multiplier(*need_ave_multiplier);
                boxed(parameters, learning_rate, AdaGrad::new(cfg), options.clone())
            }
            Self::AdaDelta {
                learning_rate,
                rho,
                epsilon,
                options,
            } => {
                let rule = AdaDelta::new(AdaDeltaConfig {
                    rho: *rho,
                    epsilon: *epsilon,
                })?;
                boxed(parameters, learning_rate, rule, options.clone())
            }
            Self::FsAdaGrad {
                learning_rate,
                momentum,
                unit_gain,
                variance_momentum: variance,
                options,
            } => {
                let mut cfg = FsAdaGradConfig::new(momentum.build()?).with_unit_gain(*unit_gain);
                if let Some(variance) = variance_momentum(variance)? {
                    cfg = cfg.with_variance_momentum(variance);
                }
                boxed(parameters, learning_rate, FsAdaGrad::new(cfg), options.clone())
            }
            Self::Adam {
                learning_rate,
                momentum,
                unit_gain,
                variance_momentum: variance,
                epsilon,
                adamax,
                options,
            } => {
                let mut cfg = AdamConfig::new(momentum.build()?)
                    .with_unit_gain(*unit_gain)
                    .with_epsilon(*epsilon)
                    .with_adamax(*adamax);
                if let Some(variance) = variance_momentum(variance)? {
                    cfg = cfg.with_variance_momentum(variance);
                }
                boxed(parameters, learning_rate, Adam::new(cfg)?, options.clone())
            }
            Self::RmsProp {
                learning_rate,
                gamma,
                inc,
                dec,
                max,
                min,
                need_ave_multiplier,
                options,
            } => {
                let rule = RmsProp::new(RmsPropConfig {
                    gamma: *gamma,
                    inc: *inc,
                    dec: *dec,
                    max: *max,
                    min: *min,
                    need_ave_multiplier: *need_ave_multiplier,
                })?;
                boxed(parameters, learning_rate, rule, options.clone())
            }
        }?;
        tracing::debug!(learner = self.learner_type(), "built learner from configuration");
        Ok(learner)
    }
}

impl std::str::FromStr for LearnerConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json(s)
    }
}
