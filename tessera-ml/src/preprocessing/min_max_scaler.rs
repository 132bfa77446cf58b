//! Rescale numeric columns to `[0, 1]` using fit-time ranges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::target_columns;
use crate::dataframe::{ColumnType, Dataframe, Record, Schema, Value};
use crate::error::MlError;
use crate::model::{FittedModel, TrainingParameters, Transform};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScalerParams {
    /// Columns to scale. Defaults to every numeric column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub min: f64,
    pub max: f64,
}

impl ColumnRange {
    fn scale(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span > 0.0 { (value - self.min) / span } else { 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinMaxScaler {
    input_schema: Schema,
    ranges: BTreeMap<String, ColumnRange>,
}

impl MinMaxScaler {
    pub fn ranges(&self) -> &BTreeMap<String, ColumnRange> {
        &self.ranges
    }
}

impl TrainingParameters for MinMaxScalerParams {
    type Model = MinMaxScaler;

    const KIND: &'static str = "min_max_scaler";

    fn fit(&self, data: &Dataframe) -> Result<MinMaxScaler, MlError> {
        if data.is_empty() {
            return Err(MlError::invalid_input("cannot fit a scaler on an empty dataframe"));
        }
        let input_schema = data.x_schema();
        let columns = target_columns(&input_schema, self.columns.as_deref(), ColumnType::Numeric)?;

        let mut ranges = BTreeMap::new();
        for column in columns {
            let (min, max) = data
                .entries()
                .filter_map(|(_, r)| r.x.get(&column).and_then(Value::as_f64))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            // A column seen only in the inherited schema has no range to learn.
            if min <= max {
                ranges.insert(column, ColumnRange { min, max });
            }
        }
        tracing::debug!(columns = ranges.len(), "Fitted min-max scaler");
        Ok(MinMaxScaler {
            input_schema,
            ranges,
        })
    }
}

impl FittedModel for MinMaxScaler {
    fn input_schema(&self) -> &Schema {
        &self.input_schema
    }
}

impl Transform for MinMaxScaler {
    fn transform_record(&self, record: &mut Record) -> Result<(), MlError> {
        for (column, range) in &self.ranges {
            if let Some(Value::Number(v)) = record.x.get_mut(column) {
                *v = range.scale(*v);
            }
        }
        Ok(())
    }
}
