//! Built-in models.

pub mod linear_regression;
pub mod ordinal_regression;

pub use linear_regression::{LinearRegression, LinearRegressionParams};
pub use ordinal_regression::{OrdinalRegression, OrdinalRegressionParams};

use ndarray::{Array1, Array2};

use crate::dataframe::{ColumnType, Dataframe, Record, Schema, Value};
use crate::error::MlError;

/// Feature columns usable by numeric models, in schema order.
pub(crate) fn numeric_features(schema: &Schema, model: &str) -> Result<Vec<String>, MlError> {
    schema
        .iter()
        .map(|(column, ty)| match ty {
            ColumnType::Numeric | ColumnType::Boolean => Ok(column.clone()),
            other => Err(MlError::schema(format!(
                "{model} needs numeric features, but column '{column}' is {other}"
            ))),
        })
        .collect()
}

/// Numeric view of a record over `features`. Missing cells read as 0.
pub(crate) fn feature_row(record: &Record, features: &[String]) -> Result<Array1<f64>, MlError> {
    features
        .iter()
        .map(|column| match record.x.get(column) {
            None => Ok(0.0),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| MlError::schema(format!("column '{column}' holds text '{value}'"))),
        })
        .collect()
}

/// Design matrix over `features` plus every record's label.
pub(crate) fn design(
    data: &Dataframe,
    features: &[String],
) -> Result<(Array2<f64>, Vec<Value>), MlError> {
    let mut matrix = Array2::<f64>::zeros((data.len(), features.len()));
    let mut labels = Vec::with_capacity(data.len());
    for (row, (id, record)) in data.entries().enumerate() {
        let label = record
            .y
            .clone()
            .ok_or_else(|| MlError::invalid_input(format!("record {id} has no label")))?;
        matrix.row_mut(row).assign(&feature_row(record, features)?);
        labels.push(label);
    }
    Ok((matrix, labels))
}

/// Gauss-Jordan inverse with partial pivoting. `None` if `m` is singular.
///
/// A pivot counts as zero when it is within rounding error of the largest
/// entry of its original column, so uniformly small features are not
/// mistaken for collinear ones.
pub(crate) fn invert(m: &Array2<f64>) -> Option<Array2<f64>> {
    let n = m.nrows();
    if n != m.ncols() {
        return None;
    }
    let tolerances: Vec<f64> = m
        .columns()
        .into_iter()
        .map(|column| {
            let scale = column.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
            scale * n as f64 * f64::EPSILON
        })
        .collect();

    let mut aug = Array2::<f64>::zeros((n, 2 * n));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = m[[i, j]];
        }
        aug[[i, n + i]] = 1.0;
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|a, b| {
            aug[[*a, col]]
                .abs()
                .total_cmp(&aug[[*b, col]].abs())
        })?;
        if aug[[pivot_row, col]].abs() <= tolerances[col] {
            return None;
        }
        if pivot_row != col {
            for j in 0..2 * n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }

        let pivot = aug[[col, col]];
        for j in 0..2 * n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..2 * n {
                aug[[row, j]] -= factor * aug[[col, j]];
            }
        }
    }

    Some(aug.slice(ndarray::s![.., n..]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_invert() {
        let m = array![[4.0, 7.0], [2.0, 6.0]];
        let inv = invert(&m).unwrap();
        let identity = m.dot(&inv);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((identity[[i, j]] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_invert_singular() {
        let m = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(invert(&m).is_none());
        assert!(invert(&Array2::<f64>::zeros((2, 2))).is_none());
    }

    #[test]
    fn test_invert_small_magnitudes() {
        let m = array![[4e-14, 7e-14], [2e-14, 6e-14]];
        let inv = invert(&m).unwrap();
        let identity = m.dot(&inv);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((identity[[i, j]] - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_numeric_features_rejects_text() {
        let schema = Schema::from([
            ("a".to_string(), ColumnType::Numeric),
            ("b".to_string(), ColumnType::Categorical),
        ]);
        assert!(matches!(
            numeric_features(&schema, "model"),
            Err(MlError::Schema(_))
        ));
    }
}
