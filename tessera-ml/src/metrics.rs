//! Predictive-quality metrics and their cross-fold aggregation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataframe::{Dataframe, Value};
use crate::error::MlError;

/// Metrics a [`Validator`](crate::validator::Validator) can compute per fold and aggregate.
pub trait ValidationMetrics: Clone + fmt::Debug + Send + Serialize + Sized {
    /// Compute from a dataframe whose records carry both `y` and `y_predicted`.
    fn from_predictions(data: &Dataframe) -> Result<Self, MlError>;

    /// Combine per-fold results. Scalars are unweighted means across folds.
    fn aggregate(folds: &[Self]) -> Result<Self, MlError>;

    /// Named scalar scores, for reporting.
    fn scores(&self) -> Vec<(&'static str, f64)>;
}

fn labeled_pairs(data: &Dataframe) -> Result<Vec<(&Value, &Value)>, MlError> {
    data.entries()
        .map(|(id, record)| match (&record.y, &record.y_predicted) {
            (Some(actual), Some(predicted)) => Ok((actual, predicted)),
            (None, _) => Err(MlError::invalid_input(format!("record {id} has no label"))),
            (_, None) => Err(MlError::invalid_input(format!(
                "record {id} has no prediction"
            ))),
        })
        .collect()
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn require_folds<T>(folds: &[T]) -> Result<(), MlError> {
    if folds.is_empty() {
        Err(MlError::invalid_input("cannot aggregate zero folds"))
    } else {
        Ok(())
    }
}

/// Scores for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub class: Value,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Records whose true label is this class.
    pub support: usize,
}

/// Accuracy and macro-averaged precision, recall, and F1.
///
/// Classes are the distinct values across actual and predicted labels. Zero
/// denominators contribute 0 rather than failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    accuracy: f64,
    macro_precision: f64,
    macro_recall: f64,
    macro_f1: f64,
    per_class: Vec<ClassScores>,
}

impl ClassificationMetrics {
    /// Compute from `(actual, predicted)` label pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a Value, &'a Value)>) -> Self {
        #[derive(Default)]
        struct Counts {
            true_positive: usize,
            false_positive: usize,
            false_negative: usize,
        }

        let mut counts: BTreeMap<&Value, Counts> = BTreeMap::new();
        let mut total = 0usize;
        let mut correct = 0usize;
        for (actual, predicted) in pairs {
            total += 1;
            if actual == predicted {
                correct += 1;
                counts.entry(actual).or_default().true_positive += 1;
            } else {
                counts.entry(actual).or_default().false_negative += 1;
                counts.entry(predicted).or_default().false_positive += 1;
            }
        }

        let per_class: Vec<ClassScores> = counts
            .into_iter()
            .map(|(class, c)| {
                let precision = ratio(c.true_positive, c.true_positive + c.false_positive);
                let recall = ratio(c.true_positive, c.true_positive + c.false_negative);
                ClassScores {
                    class: class.clone(),
                    precision,
                    recall,
                    f1: harmonic(precision, recall),
                    support: c.true_positive + c.false_negative,
                }
            })
            .collect();

        Self {
            accuracy: ratio(correct, total),
            macro_precision: mean(per_class.iter().map(|c| c.precision)),
            macro_recall: mean(per_class.iter().map(|c| c.recall)),
            macro_f1: mean(per_class.iter().map(|c| c.f1)),
            per_class,
        }
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn macro_precision(&self) -> f64 {
        self.macro_precision
    }

    pub fn macro_recall(&self) -> f64 {
        self.macro_recall
    }

    pub fn macro_f1(&self) -> f64 {
        self.macro_f1
    }

    /// Per-class scores in class order.
    pub fn per_class(&self) -> &[ClassScores] {
        &self.per_class
    }
}

impl ValidationMetrics for ClassificationMetrics {
    fn from_predictions(data: &Dataframe) -> Result<Self, MlError> {
        Ok(Self::from_pairs(labeled_pairs(data)?))
    }

    fn aggregate(folds: &[Self]) -> Result<Self, MlError> {
        require_folds(folds)?;

        // Per-class scores average over the folds in which the class was observed.
        let mut by_class: BTreeMap<&Value, Vec<&ClassScores>> = BTreeMap::new();
        for fold in folds {
            for scores in &fold.per_class {
                by_class.entry(&scores.class).or_default().push(scores);
            }
        }
        let per_class = by_class
            .into_iter()
            .map(|(class, scores)| ClassScores {
                class: class.clone(),
                precision: mean(scores.iter().map(|s| s.precision)),
                recall: mean(scores.iter().map(|s| s.recall)),
                f1: mean(scores.iter().map(|s| s.f1)),
                support: scores.iter().map(|s| s.support).sum(),
            })
            .collect();

        Ok(Self {
            accuracy: mean(folds.iter().map(|f| f.accuracy)),
            macro_precision: mean(folds.iter().map(|f| f.macro_precision)),
            macro_recall: mean(folds.iter().map(|f| f.macro_recall)),
            macro_f1: mean(folds.iter().map(|f| f.macro_f1)),
            per_class,
        })
    }

    fn scores(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("accuracy", self.accuracy),
            ("macro_precision", self.macro_precision),
            ("macro_recall", self.macro_recall),
            ("macro_f1", self.macro_f1),
        ]
    }
}

/// Error metrics for numeric predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    rmse: f64,
    mae: f64,
    r_squared: f64,
}

impl RegressionMetrics {
    pub fn from_values(actual: &[f64], predicted: &[f64]) -> Result<Self, MlError> {
        if actual.len() != predicted.len() {
            return Err(MlError::invalid_input(format!(
                "{} labels but {} predictions",
                actual.len(),
                predicted.len()
            )));
        }
        if actual.is_empty() {
            return Ok(Self {
                rmse: 0.0,
                mae: 0.0,
                r_squared: 0.0,
            });
        }
        let n = actual.len() as f64;
        let errors = actual.iter().zip(predicted).map(|(a, p)| a - p);
        let sse: f64 = errors.clone().map(|e| e * e).sum();
        let sae: f64 = errors.map(f64::abs).sum();
        let actual_mean = mean(actual.iter().copied());
        let sst: f64 = actual.iter().map(|a| (a - actual_mean).powi(2)).sum();

        Ok(Self {
            rmse: (sse / n).sqrt(),
            mae: sae / n,
            r_squared: if sst == 0.0 { 0.0 } else { 1.0 - sse / sst },
        })
    }

    pub fn rmse(&self) -> f64 {
        self.rmse
    }

    pub fn mae(&self) -> f64 {
        self.mae
    }

    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }
}

impl ValidationMetrics for RegressionMetrics {
    fn from_predictions(data: &Dataframe) -> Result<Self, MlError> {
        let pairs = labeled_pairs(data)?;
        let numeric = |v: &Value| match v {
            Value::Number(n) => Ok(*n),
            other => Err(MlError::invalid_input(format!("'{other}' is not numeric"))),
        };
        let mut actual = Vec::with_capacity(pairs.len());
        let mut predicted = Vec::with_capacity(pairs.len());
        for (a, p) in pairs {
            actual.push(numeric(a)?);
            predicted.push(numeric(p)?);
        }
        Self::from_values(&actual, &predicted)
    }

    fn aggregate(folds: &[Self]) -> Result<Self, MlError> {
        require_folds(folds)?;
        Ok(Self {
            rmse: mean(folds.iter().map(|f| f.rmse)),
            mae: mean(folds.iter().map(|f| f.mae)),
            r_squared: mean(folds.iter().map(|f| f.r_squared)),
        })
    }

    fn scores(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("rmse", self.rmse),
            ("mae", self.mae),
            ("r_squared", self.r_squared),
        ]
    }
}
