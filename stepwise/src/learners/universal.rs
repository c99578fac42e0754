//! A learner whose update is delegated to an external computation.

use stepwise_core::{
    dictionary::Dictionary,
    schedule::Schedule,
    tensor::NDArray,
    unique_id::{HasUniqueId, UniqueId},
    Error, Result,
};

use super::{base::LearnerBase, Learner};
use crate::{
    options::AdditionalLearningOptions,
    parameter::{Gradients, Parameter},
};

/// An externally built computation that updates parameters in place when
/// evaluated.
///
/// The computation reads each minibatch's gradients from placeholder
/// [Parameter]s that the [UniversalLearner] fills before every evaluation.
pub trait UpdateFunction {
    /// Ids of every tensor the computation reads or writes.
    fn inputs(&self) -> Vec<UniqueId>;

    /// Runs the computation once.
    fn evaluate(&mut self) -> Result<()>;
}

/// Several update functions evaluated one after another.
#[derive(Default)]
pub struct CombinedUpdate(pub Vec<Box<dyn UpdateFunction>>);

impl UpdateFunction for CombinedUpdate {
    fn inputs(&self) -> Vec<UniqueId> {
        let mut inputs: Vec<UniqueId> = self.0.iter().flat_map(|f| f.inputs()).collect();
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }

    fn evaluate(&mut self) -> Result<()> {
        self.0.iter_mut().try_for_each(|f| f.evaluate())
    }
}

impl std::fmt::Debug for CombinedUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedUpdate")
            .field("functions", &self.0.len())
            .finish()
    }
}

/// Applies a user supplied [UpdateFunction] instead of a closed-form rule.
///
/// Every parameter is paired with a gradient placeholder. [Learner::update]
/// copies the minibatch gradients into the placeholders and evaluates the
/// function once; no clipping, regularization or noise is applied. The
/// learning rate is fixed at `1`.
pub struct UniversalLearner {
    base: LearnerBase,
    gradient_placeholders: Vec<Parameter>,
    update: Box<dyn UpdateFunction>,
}

impl std::fmt::Debug for UniversalLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniversalLearner")
            .field("base", &self.base)
            .field("gradient_placeholders", &self.gradient_placeholders)
            .finish_non_exhaustive()
    }
}

impl UniversalLearner {
    pub const NAME: &'static str = "universal";

    /// Pairs `parameters[i]` with the placeholder `gradients[i]`.
    ///
    /// Every parameter must be an input of `update`. A placeholder that is
    /// not an input is only warned about.
    pub fn new(
        parameters: Vec<Parameter>,
        gradients: Vec<Parameter>,
        update: Box<dyn UpdateFunction>,
    ) -> Result<Self> {
        if parameters.is_empty() || parameters.len() != gradients.len() {
            return Err(Error::InvalidConfiguration(format!(
                "a universal learner needs one gradient per parameter, got {} parameters and {} gradients",
                parameters.len(),
                gradients.len()
            )));
        }

        let inputs = update.inputs();
        for (p, g) in parameters.iter().zip(gradients.iter()) {
            if !inputs.contains(p.id()) {
                return Err(Error::InvalidConfiguration(format!(
                    "parameter '{}' is not an input of the update function",
                    p.name()
                )));
            }
            if !inputs.contains(g.id()) {
                tracing::warn!(
                    parameter = p.name(),
                    gradient = g.name(),
                    "gradient is not an input of the update function"
                );
            }
        }

        let base = LearnerBase::new(
            Self::NAME,
            parameters,
            Schedule::constant(1.0),
            AdditionalLearningOptions::default(),
            |_| 0,
        )?;
        Ok(Self {
            base,
            gradient_placeholders: gradients,
            update,
        })
    }

    /// Builds the update from `functor`, called once per parameter with the
    /// parameter and a fresh zero filled gradient placeholder named
    /// `gradient`. The resulting functions are evaluated in parameter order.
    pub fn from_functor<F>(parameters: Vec<Parameter>, mut functor: F) -> Result<Self>
    where
        F: FnMut(&Parameter, &Parameter) -> Result<Box<dyn UpdateFunction>>,
    {
        let mut gradients = Vec::with_capacity(parameters.len());
        let mut functions = Vec::with_capacity(parameters.len());
        for p in parameters.iter() {
            let gradient = Parameter::zeros_like(p, "gradient");
            functions.push(functor(p, &gradient)?);
            gradients.push(gradient);
        }
        Self::new(parameters, gradients, Box::new(CombinedUpdate(functions)))
    }

    /// The placeholders filled with each minibatch's gradients, in parameter order.
    pub fn gradient_placeholders(&self) -> &[Parameter] {
        &self.gradient_placeholders
    }
}

impl Learner for UniversalLearner {
    fn base(&self) -> &LearnerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LearnerBase {
        &mut self.base
    }

    fn learner_type(&self) -> &'static str {
        Self::NAME
    }

    fn update(&mut self, gradients: &mut Gradients, sample_count: u64, sweep_end: bool) -> Result<bool> {
        if self.base.begin_update(gradients, sample_count)?.is_none() {
            return Ok(false);
        }
        for (p, placeholder) in self.base.parameters().iter().zip(self.gradient_placeholders.iter()) {
            let gradient = gradients
                .get_ref_checked(p)
                .ok_or_else(|| Error::MissingGradient {
                    parameter: p.name().to_string(),
                })?;
            placeholder.set_value(gradient)?;
        }
        self.update.evaluate()?;
        self.base.finish_update(sample_count, sweep_end);
        Ok(true)
    }

    fn update_parameter(
        &mut self,
        parameter: &Parameter,
        _gradient: &mut NDArray,
        _sample_count: u64,
    ) -> Result<()> {
        Err(Error::Internal(format!(
            "the universal learner updates all parameters at once, it cannot update '{}' alone",
            parameter.name()
        )))
    }

    fn create_checkpoint(&self) -> Dictionary {
        self.base.create_checkpoint()
    }

    fn restore_from_checkpoint(&mut self, checkpoint: &Dictionary) -> Result<()> {
        let restored = self.base.read_checkpoint(checkpoint)?;
        self.base.apply_checkpoint(restored)
    }

    fn reset_smoothed_gradients(&mut self) {
        self.base.reset_smoothed_gradients()
    }
}
