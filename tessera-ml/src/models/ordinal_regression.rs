//! Proportional-odds (cumulative logit) ordinal regression.
//!
//! `P(y <= c_j | x) = sigmoid(theta_j - w . x)` for ordered classes
//! `c_0 < ... < c_{K-1}` and increasing thresholds `theta_0 < ... < theta_{K-2}`.
//! Fitted by full-batch gradient descent on the mean negative log-likelihood
//! plus `l2 / 2 * |w|^2`, with a step size that grows while the loss improves
//! and halves (discarding the step) when it does not.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{design, feature_row, numeric_features};
use crate::dataframe::{Dataframe, Record, Schema, Value};
use crate::error::MlError;
use crate::model::{FittedModel, Predictor, TrainingParameters};

const MIN_PROBABILITY: f64 = 1e-12;
const THRESHOLD_GAP: f64 = 1e-6;
const STEP_GROWTH: f64 = 1.1;
const STEP_SHRINK: f64 = 0.5;
const GRADIENT_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalRegressionParams {
    /// Gradient steps attempted.
    #[serde(default = "default_total_iterations")]
    pub total_iterations: usize,
    /// L2 penalty on feature weights (thresholds are not penalized).
    #[serde(default)]
    pub l2: f64,
    /// Initial step size.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

fn default_total_iterations() -> usize {
    100
}

fn default_learning_rate() -> f64 {
    0.1
}

impl Default for OrdinalRegressionParams {
    fn default() -> Self {
        Self {
            total_iterations: default_total_iterations(),
            l2: 0.0,
            learning_rate: default_learning_rate(),
        }
    }
}

impl OrdinalRegressionParams {
    pub fn new(total_iterations: usize, l2: f64) -> Self {
        Self {
            total_iterations,
            l2,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), MlError> {
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(MlError::invalid_input(format!(
                "l2 must be a non-negative number, got {}",
                self.l2
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(MlError::invalid_input(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinalRegression {
    input_schema: Schema,
    features: Vec<String>,
    classes: Vec<Value>,
    weights: Vec<f64>,
    thresholds: Vec<f64>,
}

impl OrdinalRegression {
    /// Ordered class labels.
    pub fn classes(&self) -> &[Value] {
        &self.classes
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.features
            .iter()
            .cloned()
            .zip(self.weights.iter().copied())
            .collect()
    }

    /// Class probabilities for one feature row, in class order.
    fn probabilities(&self, row: &Array1<f64>) -> Vec<f64> {
        let score: f64 = row.iter().zip(&self.weights).map(|(x, w)| x * w).sum();
        let mut previous = 0.0;
        let mut probabilities = Vec::with_capacity(self.classes.len());
        for j in 0..self.classes.len() {
            let cumulative = match self.thresholds.get(j) {
                Some(theta) => sigmoid(theta - score),
                None => 1.0,
            };
            probabilities.push((cumulative - previous).max(0.0));
            previous = cumulative;
        }
        probabilities
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn sigmoid_slope(z: f64) -> f64 {
    let s = sigmoid(z);
    s * (1.0 - s)
}

fn enforce_order(thresholds: &mut [f64]) {
    for j in 1..thresholds.len() {
        let floor = thresholds[j - 1] + THRESHOLD_GAP;
        if thresholds[j] < floor {
            thresholds[j] = floor;
        }
    }
}

/// Mean negative log-likelihood and its gradient over one training set.
struct Objective<'a> {
    x: &'a Array2<f64>,
    labels: &'a [usize],
    classes: usize,
    l2: f64,
}

struct Evaluation {
    loss: f64,
    weight_gradient: Array1<f64>,
    threshold_gradient: Vec<f64>,
}

impl Evaluation {
    fn gradient_norm(&self) -> f64 {
        let w: f64 = self.weight_gradient.iter().map(|g| g * g).sum();
        let t: f64 = self.threshold_gradient.iter().map(|g| g * g).sum();
        (w + t).sqrt()
    }
}

impl Objective<'_> {
    fn evaluate(&self, weights: &Array1<f64>, thresholds: &[f64]) -> Evaluation {
        let n = self.labels.len() as f64;
        let scores = self.x.dot(weights);
        let mut loss = 0.0;
        let mut coefficients = Array1::<f64>::zeros(self.labels.len());
        let mut threshold_gradient = vec![0.0; thresholds.len()];

        for (i, (&class, &score)) in self.labels.iter().zip(scores.iter()).enumerate() {
            let upper = (class + 1 < self.classes).then(|| thresholds[class] - score);
            let lower = (class > 0).then(|| thresholds[class - 1] - score);

            let p = (upper.map_or(1.0, sigmoid) - lower.map_or(0.0, sigmoid)).max(MIN_PROBABILITY);
            loss -= p.ln();

            let upper_slope = upper.map_or(0.0, sigmoid_slope);
            let lower_slope = lower.map_or(0.0, sigmoid_slope);
            coefficients[i] = (upper_slope - lower_slope) / p;
            if upper.is_some() {
                threshold_gradient[class] -= upper_slope / p;
            }
            if lower.is_some() {
                threshold_gradient[class - 1] += lower_slope / p;
            }
        }

        let mut weight_gradient = self.x.t().dot(&coefficients) / n;
        weight_gradient.scaled_add(self.l2, weights);
        for g in &mut threshold_gradient {
            *g /= n;
        }
        loss = loss / n + 0.5 * self.l2 * weights.dot(weights);

        Evaluation {
            loss,
            weight_gradient,
            threshold_gradient,
        }
    }
}

impl TrainingParameters for OrdinalRegressionParams {
    type Model = OrdinalRegression;

    const KIND: &'static str = "ordinal_regression";

    fn fit(&self, data: &Dataframe) -> Result<OrdinalRegression, MlError> {
        self.validate()?;
        if data.is_empty() {
            return Err(MlError::invalid_input(
                "cannot fit ordinal regression on an empty dataframe",
            ));
        }
        let input_schema = data.x_schema();
        let features = numeric_features(&input_schema, Self::KIND)?;
        let (x, labels) = design(data, &features)?;

        let classes: Vec<Value> = labels.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if classes.len() < 2 {
            return Err(MlError::training(format!(
                "ordinal regression needs at least two classes, found {}",
                classes.len()
            )));
        }
        let labels: Vec<usize> = labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();

        let n = labels.len() as f64;
        let mut thresholds = Vec::with_capacity(classes.len() - 1);
        let mut cumulative = 0usize;
        for j in 0..classes.len() - 1 {
            cumulative += labels.iter().filter(|&&l| l == j).count();
            let share = (cumulative as f64 / n).clamp(1e-6, 1.0 - 1e-6);
            thresholds.push((share / (1.0 - share)).ln());
        }
        enforce_order(&mut thresholds);
        let mut weights = Array1::<f64>::zeros(features.len());

        let objective = Objective {
            x: &x,
            labels: &labels,
            classes: classes.len(),
            l2: self.l2,
        };
        let mut step = self.learning_rate;
        let mut current = objective.evaluate(&weights, &thresholds);
        let mut accepted = 0usize;

        for _ in 0..self.total_iterations {
            if current.gradient_norm() < GRADIENT_TOLERANCE {
                break;
            }
            let candidate_weights = &weights - &(&current.weight_gradient * step);
            let mut candidate_thresholds: Vec<f64> = thresholds
                .iter()
                .zip(&current.threshold_gradient)
                .map(|(t, g)| t - step * g)
                .collect();
            enforce_order(&mut candidate_thresholds);

            let candidate = objective.evaluate(&candidate_weights, &candidate_thresholds);
            if candidate.loss <= current.loss {
                weights = candidate_weights;
                thresholds = candidate_thresholds;
                current = candidate;
                step *= STEP_GROWTH;
                accepted += 1;
            } else {
                step *= STEP_SHRINK;
            }
        }

        tracing::debug!(
            classes = classes.len(),
            features = features.len(),
            accepted_steps = accepted,
            loss = current.loss,
            "Fitted ordinal regression"
        );

        Ok(OrdinalRegression {
            input_schema,
            features,
            classes,
            weights: weights.to_vec(),
            thresholds,
        })
    }
}

impl FittedModel for OrdinalRegression {
    fn input_schema(&self) -> &Schema {
        &self.input_schema
    }
}

impl Predictor for OrdinalRegression {
    fn predict_record(&self, record: &mut Record) -> Result<(), MlError> {
        let row = feature_row(record, &self.features)?;
        let probabilities = self.probabilities(&row);

        let mut best = 0;
        for (j, p) in probabilities.iter().enumerate() {
            if *p > probabilities[best] {
                best = j;
            }
        }
        record.y_predicted = Some(self.classes[best].clone());
        record.y_predicted_probabilities = Some(
            self.classes
                .iter()
                .cloned()
                .zip(probabilities)
                .collect(),
        );
        Ok(())
    }
}
