//! Preprocessing + model composite.
//!
//! A [`Pipeline`] fits its optional scaler and encoder on the training
//! partition only, then fits the wrapped model on the transformed copy.
//! Prediction runs the same transforms on a scratch copy of each record, so
//! the caller's feature map is left as it was.
//!
//! Every pipeline is stored under the `pipeline` kind; the envelope also
//! records the wrapped model's kind, so loading a pipeline around a different
//! model is a type mismatch.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use super::{FittedModel, Predictor, StepwiseCompatible, TrainingParameters, Transform};
use crate::dataframe::{Dataframe, Record, Schema};
use crate::error::MlError;
use crate::preprocessing::{MinMaxScaler, MinMaxScalerParams, OneHotEncoder, OneHotEncoderParams};

/// Storage kind shared by every pipeline.
pub const PIPELINE_KIND: &str = "pipeline";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline<P> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<MinMaxScalerParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder: Option<OneHotEncoderParams>,
    pub model: P,
}

impl<P> Pipeline<P> {
    pub fn new(model: P) -> Self {
        Self {
            scaler: None,
            encoder: None,
            model,
        }
    }

    pub fn with_scaler(mut self, scaler: MinMaxScalerParams) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn with_encoder(mut self, encoder: OneHotEncoderParams) -> Self {
        self.encoder = Some(encoder);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineModel<M> {
    input_schema: Schema,
    scaler: Option<MinMaxScaler>,
    encoder: Option<OneHotEncoder>,
    model: M,
}

impl<M> PipelineModel<M> {
    pub fn model(&self) -> &M {
        &self.model
    }
}

fn apply(transform: &impl Transform, data: &mut Dataframe) -> Result<(), MlError> {
    for (_, record) in data.entries_mut() {
        transform.transform_record(record)?;
    }
    Ok(())
}

impl<P> TrainingParameters for Pipeline<P>
where
    P: TrainingParameters,
    P::Model: Predictor,
{
    type Model = PipelineModel<P::Model>;

    const KIND: &'static str = PIPELINE_KIND;

    const VARIANT: &'static str = P::KIND;

    fn fit(&self, data: &Dataframe) -> Result<Self::Model, MlError> {
        let input_schema = data.x_schema();
        let mut staged = data.clone();

        let scaler = match &self.scaler {
            Some(params) => {
                let scaler = params.fit(&staged)?;
                apply(&scaler, &mut staged)?;
                Some(scaler)
            }
            None => None,
        };
        let encoder = match &self.encoder {
            Some(params) => {
                let encoder = params.fit(&staged)?;
                apply(&encoder, &mut staged)?;
                Some(encoder)
            }
            None => None,
        };
        let model = self.model.fit(&staged)?;

        Ok(PipelineModel {
            input_schema,
            scaler,
            encoder,
            model,
        })
    }
}

impl<M: FittedModel> FittedModel for PipelineModel<M> {
    fn input_schema(&self) -> &Schema {
        &self.input_schema
    }
}

impl<M: Predictor> Predictor for PipelineModel<M> {
    fn predict_record(&self, record: &mut Record) -> Result<(), MlError> {
        let mut scratch = Record::new(record.x.clone(), None);
        if let Some(scaler) = &self.scaler {
            scaler.transform_record(&mut scratch)?;
        }
        if let Some(encoder) = &self.encoder {
            encoder.transform_record(&mut scratch)?;
        }
        self.model.predict_record(&mut scratch)?;
        record.y_predicted = scratch.y_predicted;
        record.y_predicted_probabilities = scratch.y_predicted_probabilities;
        Ok(())
    }
}

/// Significance of the wrapped model's features, after preprocessing.
impl<M: StepwiseCompatible> StepwiseCompatible for PipelineModel<M> {
    fn feature_pvalues(&self) -> Result<BTreeMap<String, f64>, MlError> {
        self.model.feature_pvalues()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataframe::Value;
    use crate::model::ModelHandle;
    use crate::models::OrdinalRegressionParams;
    use tessera_core::Configuration;

    fn mixed_data(config: &Configuration) -> Dataframe {
        Dataframe::from_records(
            config,
            (0..24).map(|i| {
                let class = (i % 3) as f64;
                let colour = if i % 2 == 0 { "red" } else { "white" };
                Record::labeled(
                    [
                        ("alcohol", Value::from(10.0 + class * 2.0 + (i as f64) * 0.01)),
                        ("colour", Value::from(colour)),
                    ],
                    class,
                )
            }),
        )
    }

    #[test]
    fn test_pipeline_leaves_caller_features_untouched() {
        let config = Configuration::in_memory();
        let mut data = mixed_data(&config);
        let before: Vec<Record> = data.entries().map(|(_, r)| r.clone()).collect();

        let params = Pipeline::new(OrdinalRegressionParams::default())
            .with_scaler(MinMaxScalerParams::default())
            .with_encoder(OneHotEncoderParams::default());
        let mut handle = ModelHandle::create(params, &config);
        handle.fit(&data).unwrap();
        handle.predict(&mut data).unwrap();

        for ((_, after), before) in data.entries().zip(&before) {
            assert_eq!(after.x, before.x);
            assert!(after.y_predicted.is_some());
        }
    }

    #[test]
    fn test_pipeline_encoder_makes_categorical_data_fittable() {
        let config = Configuration::in_memory();
        let data = mixed_data(&config);

        let mut bare = ModelHandle::create(OrdinalRegressionParams::default(), &config);
        assert!(matches!(bare.fit(&data), Err(MlError::Schema(_))));

        let params = Pipeline::new(OrdinalRegressionParams::default())
            .with_encoder(OneHotEncoderParams::default());
        let mut handle = ModelHandle::create(params, &config);
        handle.fit(&data).unwrap();
        let schema = handle.fitted().unwrap().model().input_schema().clone();
        assert!(schema.contains_key("colour=red"));
        assert!(schema.contains_key("colour=white"));
    }
}
