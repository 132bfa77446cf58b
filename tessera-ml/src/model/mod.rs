//! Model lifecycle: parameters, fitted models, capabilities, and the handle
//! that moves one model instance through `configured -> fitted -> closed`.

pub mod pipeline;
pub mod registry;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, de::DeserializeOwned};
use tessera_core::Configuration;
use uuid::Uuid;

use crate::artifact;
use crate::dataframe::{Dataframe, Record, Schema, schema_difference};
use crate::error::MlError;

pub use pipeline::{PIPELINE_KIND, Pipeline, PipelineModel};
pub use registry::{Artifact, ArtifactRole, ModelRegistry};

/// Immutable hyperparameters for one model type.
///
/// `KIND` is the storage kind the model is persisted under and the identifier
/// the [`ModelRegistry`] restores it by.
pub trait TrainingParameters:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Model: FittedModel;

    const KIND: &'static str;

    /// Concrete type stored under `KIND`. Only composites such as [`Pipeline`]
    /// override it, naming the model they wrap.
    const VARIANT: &'static str = Self::KIND;

    /// Learn a model from `data`. Never touches predicted fields.
    fn fit(&self, data: &Dataframe) -> Result<Self::Model, MlError>;
}

/// Learned state produced by [`TrainingParameters::fit`].
pub trait FittedModel: fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Feature schema the model was fitted on.
    fn input_schema(&self) -> &Schema;
}

/// Models that write `y_predicted` (and optionally a class distribution).
pub trait Predictor: FittedModel {
    fn predict_record(&self, record: &mut Record) -> Result<(), MlError>;
}

/// Models that rewrite a record's feature map.
pub trait Transform: FittedModel {
    fn transform_record(&self, record: &mut Record) -> Result<(), MlError>;
}

/// Fitted models that can report per-feature significance.
pub trait StepwiseCompatible {
    /// Two-sided p-value for every feature coefficient.
    fn feature_pvalues(&self) -> Result<BTreeMap<String, f64>, MlError>;
}

/// Public view of a handle's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Configured,
    Fitted,
    Closed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Configured => "configured",
            LifecycleState::Fitted => "fitted",
            LifecycleState::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
enum HandleState<M> {
    Configured,
    Fitted(M),
    Closed,
}

/// Owns one model instance through its lifecycle.
///
/// A handle is fitted at most once. Learned parameters are owned exclusively
/// by the handle and released on [`close`](ModelHandle::close) or drop.
#[derive(Debug)]
pub struct ModelHandle<P: TrainingParameters> {
    id: Uuid,
    parameters: P,
    state: HandleState<P::Model>,
    config: Configuration,
    storage_name: Option<String>,
}

impl<P: TrainingParameters> ModelHandle<P> {
    /// Create an unfitted handle.
    pub fn create(parameters: P, config: &Configuration) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(%id, kind = P::KIND, "Created model handle");
        Self {
            id,
            parameters,
            state: HandleState::Configured,
            config: config.clone(),
            storage_name: None,
        }
    }

    /// Restore a fitted handle from `(P::KIND, name)`.
    pub fn load(name: &str, config: &Configuration) -> Result<Self, MlError> {
        let (parameters, model): (P, P::Model) =
            artifact::fetch(config, P::KIND, P::VARIANT, name)?;
        let id = Uuid::new_v4();
        tracing::info!(%id, kind = P::KIND, name, "Loaded model");
        Ok(Self {
            id,
            parameters,
            state: HandleState::Fitted(model),
            config: config.clone(),
            storage_name: Some(name.to_string()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        P::KIND
    }

    pub fn parameters(&self) -> &P {
        &self.parameters
    }

    pub fn state(&self) -> LifecycleState {
        match self.state {
            HandleState::Configured => LifecycleState::Configured,
            HandleState::Fitted(_) => LifecycleState::Fitted,
            HandleState::Closed => LifecycleState::Closed,
        }
    }

    /// The learned model, if fitted.
    pub fn fitted(&self) -> Option<&P::Model> {
        match &self.state {
            HandleState::Fitted(model) => Some(model),
            _ => None,
        }
    }

    /// Name this handle was last saved under or loaded from.
    pub fn storage_name(&self) -> Option<&str> {
        self.storage_name.as_deref()
    }

    fn require_fitted(&self, operation: &'static str) -> Result<&P::Model, MlError> {
        match &self.state {
            HandleState::Fitted(model) => Ok(model),
            _ => Err(MlError::state(operation, self.state().as_str())),
        }
    }

    fn check_schema(&self, model: &P::Model, data: &Dataframe) -> Result<(), MlError> {
        if data.is_empty() {
            return Ok(());
        }
        match schema_difference(model.input_schema(), &data.x_schema()) {
            Some(diff) => Err(MlError::schema(format!(
                "{} fitted on a different feature space: {diff}",
                P::KIND
            ))),
            None => Ok(()),
        }
    }

    /// Fit on `data`. Allowed exactly once, from `configured`.
    pub fn fit(&mut self, data: &Dataframe) -> Result<(), MlError> {
        if !matches!(self.state, HandleState::Configured) {
            return Err(MlError::state("fit", self.state().as_str()));
        }
        let model = self.parameters.fit(data)?;
        tracing::debug!(id = %self.id, kind = P::KIND, records = data.len(), "Fitted model");
        self.state = HandleState::Fitted(model);
        Ok(())
    }

    /// Persist parameters and learned state under `(P::KIND, name)`.
    pub fn save(&mut self, name: &str) -> Result<(), MlError> {
        let model = self.require_fitted("save")?;
        artifact::store(&self.config, P::KIND, P::VARIANT, name, &self.parameters, model)?;
        tracing::info!(id = %self.id, kind = P::KIND, name, "Saved model");
        self.storage_name = Some(name.to_string());
        Ok(())
    }

    /// Release learned state. Storage is untouched. Idempotent.
    pub fn close(&mut self) {
        if !matches!(self.state, HandleState::Closed) {
            tracing::trace!(id = %self.id, kind = P::KIND, "Closing model handle");
            self.state = HandleState::Closed;
        }
    }

    /// Remove the persisted copy. The in-memory handle stays usable.
    pub fn delete(&mut self) -> Result<(), MlError> {
        let name = self
            .storage_name
            .as_deref()
            .ok_or_else(|| MlError::state("delete", "unsaved"))?;
        artifact::remove(&self.config, P::KIND, name)?;
        tracing::info!(id = %self.id, kind = P::KIND, name, "Deleted model");
        Ok(())
    }
}

impl<P> ModelHandle<P>
where
    P: TrainingParameters,
    P::Model: Predictor,
{
    /// Write `y_predicted` on every record of `data`, replacing any earlier prediction.
    pub fn predict(&self, data: &mut Dataframe) -> Result<(), MlError> {
        let model = self.require_fitted("predict")?;
        self.check_schema(model, data)?;
        for (_, record) in data.entries_mut() {
            record.clear_predictions();
            model.predict_record(record)?;
        }
        Ok(())
    }
}

impl<P> ModelHandle<P>
where
    P: TrainingParameters,
    P::Model: Transform,
{
    /// Rewrite the feature map of every record of `data`.
    pub fn transform(&self, data: &mut Dataframe) -> Result<(), MlError> {
        let model = self.require_fitted("transform")?;
        self.check_schema(model, data)?;
        for (_, record) in data.entries_mut() {
            model.transform_record(record)?;
        }
        Ok(())
    }

    pub fn fit_transform(&mut self, data: &mut Dataframe) -> Result<(), MlError> {
        self.fit(data)?;
        self.transform(data)
    }
}

impl<P> ModelHandle<P>
where
    P: TrainingParameters,
    P::Model: StepwiseCompatible,
{
    /// The fitted model's significance capability. `None` until fitted.
    pub fn as_stepwise(&self) -> Option<&dyn StepwiseCompatible> {
        self.fitted().map(|model| model as &dyn StepwiseCompatible)
    }
}
