//! Ordinary least squares with optional ridge penalty.
//!
//! Solves the normal equations `(X'X + l2 * I) b = X'y` with an unpenalized
//! intercept. Coefficient p-values come from Student's t distribution with
//! `n - p` degrees of freedom, where `p` counts the intercept.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::{design, feature_row, invert, numeric_features};
use crate::dataframe::{Dataframe, Record, Schema, Value};
use crate::error::MlError;
use crate::model::{FittedModel, Predictor, StepwiseCompatible, TrainingParameters};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressionParams {
    /// Ridge penalty on feature coefficients.
    #[serde(default)]
    pub l2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    input_schema: Schema,
    features: Vec<String>,
    intercept: f64,
    coefficients: Vec<f64>,
    /// Per-feature standard errors; absent when there are no residual degrees of freedom.
    standard_errors: Option<Vec<f64>>,
    degrees_of_freedom: usize,
}

impl LinearRegression {
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn coefficients(&self) -> BTreeMap<String, f64> {
        self.features
            .iter()
            .cloned()
            .zip(self.coefficients.iter().copied())
            .collect()
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.degrees_of_freedom
    }
}

impl TrainingParameters for LinearRegressionParams {
    type Model = LinearRegression;

    const KIND: &'static str = "linear_regression";

    fn fit(&self, data: &Dataframe) -> Result<LinearRegression, MlError> {
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(MlError::invalid_input(format!(
                "l2 must be a non-negative number, got {}",
                self.l2
            )));
        }
        if data.is_empty() {
            return Err(MlError::invalid_input(
                "cannot fit linear regression on an empty dataframe",
            ));
        }
        let input_schema = data.x_schema();
        let features = numeric_features(&input_schema, Self::KIND)?;
        let (features_matrix, labels) = design(data, &features)?;
        let y: Array1<f64> = labels
            .iter()
            .map(|label| match label {
                Value::Number(v) => Ok(*v),
                other => Err(MlError::invalid_input(format!(
                    "linear regression needs a numeric target, got '{other}'"
                ))),
            })
            .collect::<Result<_, _>>()?;

        let n = y.len();
        let p = features.len() + 1;
        let mut x = Array2::<f64>::ones((n, p));
        x.slice_mut(ndarray::s![.., 1..]).assign(&features_matrix);

        let mut gram = x.t().dot(&x);
        for j in 1..p {
            gram[[j, j]] += self.l2;
        }
        let inverse = invert(&gram).ok_or_else(|| {
            MlError::training("normal equations are singular (collinear or too few records)")
        })?;
        let beta = inverse.dot(&x.t().dot(&y));

        let residuals = &y - &x.dot(&beta);
        let rss = residuals.dot(&residuals);
        let degrees_of_freedom = n.saturating_sub(p);
        let standard_errors = (degrees_of_freedom > 0).then(|| {
            let sigma2 = rss / degrees_of_freedom as f64;
            inverse
                .diag()
                .iter()
                .skip(1)
                .map(|v| (sigma2 * v).max(0.0).sqrt())
                .collect::<Vec<f64>>()
        });

        tracing::debug!(
            features = features.len(),
            records = n,
            rss,
            "Fitted linear regression"
        );

        Ok(LinearRegression {
            input_schema,
            features,
            intercept: beta[0],
            coefficients: beta.slice(ndarray::s![1..]).to_vec(),
            standard_errors,
            degrees_of_freedom,
        })
    }
}

impl FittedModel for LinearRegression {
    fn input_schema(&self) -> &Schema {
        &self.input_schema
    }
}

impl Predictor for LinearRegression {
    fn predict_record(&self, record: &mut Record) -> Result<(), MlError> {
        let row = feature_row(record, &self.features)?;
        let prediction = self.intercept + row.dot(&Array1::from(self.coefficients.clone()));
        record.y_predicted = Some(Value::Number(prediction));
        Ok(())
    }
}

impl StepwiseCompatible for LinearRegression {
    fn feature_pvalues(&self) -> Result<BTreeMap<String, f64>, MlError> {
        let standard_errors = self.standard_errors.as_ref().ok_or_else(|| {
            MlError::invalid_input(format!(
                "p-values need more records than coefficients ({} features + intercept)",
                self.features.len()
            ))
        })?;
        let t = StudentsT::new(0.0, 1.0, self.degrees_of_freedom as f64)
            .map_err(|e| MlError::training(format!("t distribution: {e}")))?;

        Ok(self
            .features
            .iter()
            .zip(self.coefficients.iter().zip(standard_errors))
            .map(|(feature, (beta, se))| {
                let pvalue = if *se > 0.0 {
                    2.0 * (1.0 - t.cdf((beta / se).abs()))
                } else if *beta == 0.0 {
                    1.0
                } else {
                    0.0
                };
                (feature.clone(), pvalue.clamp(0.0, 1.0))
            })
            .collect())
    }
}
