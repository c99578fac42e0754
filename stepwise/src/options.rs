//! Options shared by every closed-form learner.

use serde::{Deserialize, Serialize};

use crate::config::ScheduleConfig;

/// Gradient clipping, regularization and noise settings applied around every
/// parameter update.
///
/// ```rust
/// # use stepwise::prelude::*;
/// let options = AdditionalLearningOptions::default()
///     .with_l2_regularization_weight(1e-4)
///     .with_gradient_clipping_threshold_per_sample(5.0);
/// assert!(options.gradient_clipping_with_truncation);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdditionalLearningOptions {
    /// Weight of the L1 penalty, applied as a proximal step after the update.
    pub l1_regularization_weight: f64,

    /// Weight of the L2 penalty, added to the gradient before the update.
    pub l2_regularization_weight: f64,

    /// Standard deviation of Gaussian noise added to parameters after each update.
    pub gaussian_noise_injection_std_dev: ScheduleConfig,

    /// Per-sample gradient clipping bound. `None` means unbounded.
    pub gradient_clipping_threshold_per_sample: Option<f64>,

    /// Clip element-wise when `true`, otherwise rescale by the Frobenius norm.
    pub gradient_clipping_with_truncation: bool,

    /// Seed of the first noise draw. A fresh process wide seed when `None`.
    pub noise_injection_seed: Option<u64>,

    /// Fail updates that find NaN in auxiliary state or parameters.
    pub check_for_nans: bool,
}

impl Default for AdditionalLearningOptions {
    fn default() -> Self {
        Self {
            l1_regularization_weight: 0.0,
            l2_regularization_weight: 0.0,
            gaussian_noise_injection_std_dev: ScheduleConfig::constant(0.0),
            gradient_clipping_threshold_per_sample: None,
            gradient_clipping_with_truncation: true,
            noise_injection_seed: None,
            check_for_nans: false,
        }
    }
}

impl AdditionalLearningOptions {
    pub fn with_l1_regularization_weight(mut self, weight: f64) -> Self {
        self.l1_regularization_weight = weight;
        self
    }

    pub fn with_l2_regularization_weight(mut self, weight: f64) -> Self {
        self.l2_regularization_weight = weight;
        self
    }

    pub fn with_gaussian_noise_injection_std_dev(mut self, std_dev: ScheduleConfig) -> Self {
        self.gaussian_noise_injection_std_dev = std_dev;
        self
    }

    pub fn with_gradient_clipping_threshold_per_sample(mut self, threshold: f64) -> Self {
        self.gradient_clipping_threshold_per_sample = Some(threshold);
        self
    }

    pub fn with_gradient_clipping_with_truncation(mut self, truncation: bool) -> Self {
        self.gradient_clipping_with_truncation = truncation;
        self
    }

    pub fn with_noise_injection_seed(mut self, seed: u64) -> Self {
        self.noise_injection_seed = Some(seed);
        self
    }

    pub fn with_check_for_nans(mut self, check: bool) -> Self {
        self.check_for_nans = check;
        self
    }

    /// The clipping bound, if a finite one is configured.
    pub(crate) fn clipping_threshold(&self) -> Option<f64> {
        self.gradient_clipping_threshold_per_sample
            .filter(|t| t.is_finite())
    }
}
