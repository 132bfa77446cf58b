//! Replace categorical columns with `column=value` 0/1 indicators.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::target_columns;
use crate::dataframe::{ColumnType, Dataframe, Record, Schema, Value};
use crate::error::MlError;
use crate::model::{FittedModel, TrainingParameters, Transform};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoderParams {
    /// Columns to encode. Defaults to every categorical column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneHotEncoder {
    input_schema: Schema,
    /// Fit-time categories per encoded column, sorted.
    categories: BTreeMap<String, Vec<String>>,
}

impl OneHotEncoder {
    pub fn categories(&self) -> &BTreeMap<String, Vec<String>> {
        &self.categories
    }
}

fn indicator(column: &str, category: &str) -> String {
    format!("{column}={category}")
}

impl TrainingParameters for OneHotEncoderParams {
    type Model = OneHotEncoder;

    const KIND: &'static str = "one_hot_encoder";

    fn fit(&self, data: &Dataframe) -> Result<OneHotEncoder, MlError> {
        if data.is_empty() {
            return Err(MlError::invalid_input("cannot fit an encoder on an empty dataframe"));
        }
        let input_schema = data.x_schema();
        let columns =
            target_columns(&input_schema, self.columns.as_deref(), ColumnType::Categorical)?;

        let mut categories = BTreeMap::new();
        for column in columns {
            let seen: BTreeSet<&str> = data
                .entries()
                .filter_map(|(_, r)| r.x.get(&column).and_then(Value::as_str))
                .collect();
            let seen: Vec<String> = seen.into_iter().map(str::to_string).collect();
            categories.insert(column, seen);
        }
        tracing::debug!(columns = categories.len(), "Fitted one-hot encoder");
        Ok(OneHotEncoder {
            input_schema,
            categories,
        })
    }
}

impl FittedModel for OneHotEncoder {
    fn input_schema(&self) -> &Schema {
        &self.input_schema
    }
}

impl Transform for OneHotEncoder {
    fn transform_record(&self, record: &mut Record) -> Result<(), MlError> {
        for (column, categories) in &self.categories {
            let cell = record.x.remove(column);
            let current = cell.as_ref().and_then(Value::as_str);
            for category in categories {
                let hot = current == Some(category.as_str());
                record
                    .x
                    .insert(indicator(column, category), Value::Number(if hot { 1.0 } else { 0.0 }));
            }
        }
        Ok(())
    }
}
