//! Feature transformers sharing the model lifecycle.

pub mod min_max_scaler;
pub mod one_hot_encoder;

pub use min_max_scaler::{MinMaxScaler, MinMaxScalerParams};
pub use one_hot_encoder::{OneHotEncoder, OneHotEncoderParams};

use crate::dataframe::{ColumnType, Schema};
use crate::error::MlError;

/// Resolve the columns a transformer acts on: the requested ones (which must
/// have type `expected`) or every column of that type.
pub(crate) fn target_columns(
    schema: &Schema,
    requested: Option<&[String]>,
    expected: ColumnType,
) -> Result<Vec<String>, MlError> {
    match requested {
        Some(columns) => columns
            .iter()
            .map(|column| match schema.get(column) {
                Some(ty) if *ty == expected => Ok(column.clone()),
                Some(ty) => Err(MlError::schema(format!(
                    "column '{column}' is {ty}, expected {expected}"
                ))),
                None => Err(MlError::schema(format!("column '{column}' not found"))),
            })
            .collect(),
        None => Ok(schema
            .iter()
            .filter(|(_, ty)| **ty == expected)
            .map(|(column, _)| column.clone())
            .collect()),
    }
}
