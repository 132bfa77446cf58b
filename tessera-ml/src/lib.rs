//! # tessera-ml — model lifecycle, cross-validation and metrics
//!
//! Every trainable component is described by a [`TrainingParameters`] value and
//! driven through a [`ModelHandle`], which owns the fitted state and its
//! persistence. [`KFoldSplitter`] partitions a [`Dataframe`] into folds and
//! [`Validator`] runs one fresh handle per fold, returning aggregated metrics.

pub mod artifact;
pub mod dataframe;
pub mod error;
pub mod io;
pub mod metrics;
pub mod model;
pub mod models;
pub mod preprocessing;
pub mod splitter;
pub mod validator;

pub use dataframe::{ColumnType, Dataframe, Record, Schema, Value};
pub use error::MlError;
pub use metrics::{ClassScores, ClassificationMetrics, RegressionMetrics, ValidationMetrics};
pub use model::{
    Artifact, ArtifactRole, FittedModel, LifecycleState, ModelHandle, ModelRegistry,
    PIPELINE_KIND, Pipeline, PipelineModel, Predictor, StepwiseCompatible, TrainingParameters,
    Transform,
};
pub use models::{
    LinearRegression, LinearRegressionParams, OrdinalRegression, OrdinalRegressionParams,
};
pub use preprocessing::{MinMaxScaler, MinMaxScalerParams, OneHotEncoder, OneHotEncoderParams};
pub use splitter::{Fold, KFoldSplits, KFoldSplitter, SplitOrder};
pub use validator::{ValidationReport, Validator};
