//! Restore persisted artifacts by kind name.
//!
//! The registry maps a kind identifier (e.g. `ordinal_regression`) to a loader
//! that restores a fitted [`ModelHandle`] and exposes it through the
//! object-safe [`Artifact`] trait. Front-ends use it when the model type is
//! only known at runtime. A kind shared by several types (`pipeline`) holds
//! one loader per variant; the stored envelope says which one applies.

use std::collections::BTreeMap;

use tessera_core::{Configuration, StorageKey};

use super::{
    LifecycleState, ModelHandle, Pipeline, Predictor, StepwiseCompatible, TrainingParameters,
    Transform,
};
use crate::artifact;
use crate::dataframe::Dataframe;
use crate::error::MlError;
use crate::models::{LinearRegressionParams, OrdinalRegressionParams};
use crate::preprocessing::{MinMaxScalerParams, OneHotEncoderParams};

/// What a restored artifact does when applied to a dataframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    /// Writes predictions.
    Predictor,
    /// Rewrites features.
    Transformer,
}

impl ArtifactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::Predictor => "predictor",
            ArtifactRole::Transformer => "transformer",
        }
    }
}

/// Type-erased view of a restored handle.
pub trait Artifact: Send {
    fn kind(&self) -> &'static str;

    /// Concrete type under [`kind`](Artifact::kind); the wrapped model for pipelines.
    fn variant(&self) -> &'static str;

    fn role(&self) -> ArtifactRole;

    fn state(&self) -> LifecycleState;

    fn storage_name(&self) -> Option<&str>;

    /// Predict or transform, depending on [`role`](Artifact::role).
    fn apply(&self, data: &mut Dataframe) -> Result<(), MlError>;

    /// Significance capability, for models that support it.
    fn as_stepwise(&self) -> Option<&dyn StepwiseCompatible>;

    fn close(&mut self);

    fn delete(&mut self) -> Result<(), MlError>;
}

type ApplyFn<P> = fn(&ModelHandle<P>, &mut Dataframe) -> Result<(), MlError>;
type StepwiseFn<P> = fn(&ModelHandle<P>) -> Option<&dyn StepwiseCompatible>;

struct Restored<P: TrainingParameters> {
    handle: ModelHandle<P>,
    role: ArtifactRole,
    apply: ApplyFn<P>,
    stepwise: StepwiseFn<P>,
}

impl<P: TrainingParameters> Artifact for Restored<P> {
    fn kind(&self) -> &'static str {
        P::KIND
    }

    fn variant(&self) -> &'static str {
        P::VARIANT
    }

    fn role(&self) -> ArtifactRole {
        self.role
    }

    fn state(&self) -> LifecycleState {
        self.handle.state()
    }

    fn storage_name(&self) -> Option<&str> {
        self.handle.storage_name()
    }

    fn apply(&self, data: &mut Dataframe) -> Result<(), MlError> {
        (self.apply)(&self.handle, data)
    }

    fn as_stepwise(&self) -> Option<&dyn StepwiseCompatible> {
        (self.stepwise)(&self.handle)
    }

    fn close(&mut self) {
        self.handle.close();
    }

    fn delete(&mut self) -> Result<(), MlError> {
        self.handle.delete()
    }
}

fn predict_with<P>(handle: &ModelHandle<P>, data: &mut Dataframe) -> Result<(), MlError>
where
    P: TrainingParameters,
    P::Model: Predictor,
{
    handle.predict(data)
}

fn transform_with<P>(handle: &ModelHandle<P>, data: &mut Dataframe) -> Result<(), MlError>
where
    P: TrainingParameters,
    P::Model: Transform,
{
    handle.transform(data)
}

fn stepwise_of<P>(handle: &ModelHandle<P>) -> Option<&dyn StepwiseCompatible>
where
    P: TrainingParameters,
    P::Model: StepwiseCompatible,
{
    handle.as_stepwise()
}

fn no_stepwise<P: TrainingParameters>(_: &ModelHandle<P>) -> Option<&dyn StepwiseCompatible> {
    None
}

type Loader = Box<dyn Fn(&str, &Configuration) -> Result<Box<dyn Artifact>, MlError> + Send + Sync>;

struct Registration {
    role: ArtifactRole,
    loaders: BTreeMap<&'static str, Loader>,
}

/// Kind name to restore function.
pub struct ModelRegistry {
    entries: BTreeMap<&'static str, Registration>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// A registry holding every model and transformer shipped with this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_predictor::<OrdinalRegressionParams>();
        registry.register_stepwise_predictor::<LinearRegressionParams>();
        registry.register_transformer::<MinMaxScalerParams>();
        registry.register_transformer::<OneHotEncoderParams>();
        registry.register_predictor::<Pipeline<OrdinalRegressionParams>>();
        registry.register_stepwise_predictor::<Pipeline<LinearRegressionParams>>();
        registry
    }

    fn register<P: TrainingParameters>(
        &mut self,
        role: ArtifactRole,
        apply: ApplyFn<P>,
        stepwise: StepwiseFn<P>,
    ) {
        let loader: Loader = Box::new(
            move |name: &str, config: &Configuration| -> Result<Box<dyn Artifact>, MlError> {
                let handle = ModelHandle::<P>::load(name, config)?;
                Ok(Box::new(Restored {
                    handle,
                    role,
                    apply,
                    stepwise,
                }))
            },
        );
        let registration = self.entries.entry(P::KIND).or_insert_with(|| Registration {
            role,
            loaders: BTreeMap::new(),
        });
        if registration.role != role {
            tracing::warn!(kind = P::KIND, role = role.as_str(), "Changed registry role");
            registration.role = role;
        }
        if registration.loaders.insert(P::VARIANT, loader).is_some() {
            tracing::warn!(kind = P::KIND, variant = P::VARIANT, "Replaced existing registry entry");
        }
    }

    pub fn register_predictor<P>(&mut self)
    where
        P: TrainingParameters,
        P::Model: Predictor,
    {
        self.register::<P>(ArtifactRole::Predictor, predict_with::<P>, no_stepwise::<P>);
    }

    pub fn register_stepwise_predictor<P>(&mut self)
    where
        P: TrainingParameters,
        P::Model: Predictor + StepwiseCompatible,
    {
        self.register::<P>(ArtifactRole::Predictor, predict_with::<P>, stepwise_of::<P>);
    }

    pub fn register_transformer<P>(&mut self)
    where
        P: TrainingParameters,
        P::Model: Transform,
    {
        self.register::<P>(ArtifactRole::Transformer, transform_with::<P>, no_stepwise::<P>);
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn role(&self, kind: &str) -> Option<ArtifactRole> {
        self.entries.get(kind).map(|r| r.role)
    }

    /// Restore the artifact stored under `(kind, name)`.
    pub fn load(
        &self,
        kind: &str,
        name: &str,
        config: &Configuration,
    ) -> Result<Box<dyn Artifact>, MlError> {
        let registration = self.entries.get(kind).ok_or_else(|| {
            MlError::invalid_input(format!(
                "unknown model kind '{kind}' (known: {})",
                self.kinds().collect::<Vec<_>>().join(", ")
            ))
        })?;
        let restored = Self::restore(registration, kind, name, config);
        if let Err(MlError::NotFound { .. }) = &restored {
            // Something else may live under this name.
            let found = self.stored_kinds(name, config)?;
            if !found.is_empty() {
                return Err(MlError::TypeMismatch {
                    name: name.to_string(),
                    requested: kind.to_string(),
                    found: found.join(", "),
                });
            }
        }
        restored
    }

    fn restore(
        registration: &Registration,
        kind: &str,
        name: &str,
        config: &Configuration,
    ) -> Result<Box<dyn Artifact>, MlError> {
        let variant = artifact::stored_variant(config, kind, name)?;
        let loader = registration.loaders.get(variant.as_str()).ok_or_else(|| {
            MlError::TypeMismatch {
                name: name.to_string(),
                requested: format!(
                    "{kind} of {}",
                    registration.loaders.keys().copied().collect::<Vec<_>>().join(" or ")
                ),
                found: format!("{kind} of {variant}"),
            }
        })?;
        loader(name, config)
    }

    /// Registered kinds that have an artifact stored under `name`.
    pub fn stored_kinds(
        &self,
        name: &str,
        config: &Configuration,
    ) -> Result<Vec<&'static str>, MlError> {
        let mut found = Vec::new();
        for kind in self.kinds() {
            if config.store().exists(&StorageKey::new(kind, name)?)? {
                found.push(kind);
            }
        }
        Ok(found)
    }

    /// Restore an artifact that must play `role`; a kind with another role is a type mismatch.
    pub fn load_as(
        &self,
        role: ArtifactRole,
        kind: &str,
        name: &str,
        config: &Configuration,
    ) -> Result<Box<dyn Artifact>, MlError> {
        if let Some(found) = self.role(kind).filter(|found| *found != role) {
            return Err(MlError::TypeMismatch {
                name: name.to_string(),
                requested: role.as_str().to_string(),
                found: format!("{kind} ({})", found.as_str()),
            });
        }
        self.load(kind, name, config)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
