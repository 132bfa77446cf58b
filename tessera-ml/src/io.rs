//! Delimited-text import and prediction export.
//!
//! Files ending in `.tsv` are tab separated; everything else is read as CSV.
//! The first row names the columns. One column is the label, the rest become
//! features.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use tessera_core::Configuration;

use crate::dataframe::{Dataframe, Record, Value};
use crate::error::MlError;

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("tsv") => b'\t',
        _ => b',',
    }
}

/// Parse one cell. Empty cells are missing; numbers must be finite.
pub fn parse_cell(raw: &str) -> Option<Value> {
    let cell = raw.trim();
    if cell.is_empty() {
        return None;
    }
    if let Some(number) = cell.parse::<f64>().ok().filter(|n| n.is_finite()) {
        return Some(Value::Number(number));
    }
    if cell.eq_ignore_ascii_case("true") {
        return Some(Value::Bool(true));
    }
    if cell.eq_ignore_ascii_case("false") {
        return Some(Value::Bool(false));
    }
    Some(Value::Text(cell.to_string()))
}

/// Read a delimited file into a dataframe, using `target` as the label column.
pub fn read_csv(
    path: impl AsRef<Path>,
    target: &str,
    config: &Configuration,
) -> Result<Dataframe, MlError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let frame = read_delimited(BufReader::new(file), delimiter_for(path), target, config)?;
    tracing::info!(path = %path.display(), records = frame.len(), "Loaded dataframe");
    Ok(frame)
}

/// Read delimited text from any reader. Records are numbered from 0 in row order.
pub fn read_delimited<R: Read>(
    reader: R,
    delimiter: u8,
    target: &str,
    config: &Configuration,
) -> Result<Dataframe, MlError> {
    parse_rows(reader, delimiter, Some(target), config)
}

/// Read a delimited file whose columns are all features, e.g. rows to be scored.
pub fn read_features(path: impl AsRef<Path>, config: &Configuration) -> Result<Dataframe, MlError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    parse_rows(BufReader::new(file), delimiter_for(path), None, config)
}

fn parse_rows<R: Read>(
    reader: R,
    delimiter: u8,
    target: Option<&str>,
    config: &Configuration,
) -> Result<Dataframe, MlError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();
    let target_index = match target {
        Some(target) => Some(
            headers
                .iter()
                .position(|h| h == target)
                .ok_or_else(|| MlError::invalid_input(format!("no column named '{target}'")))?,
        ),
        None => None,
    };

    let mut frame = Dataframe::new(config);
    for result in rdr.records() {
        let row = result?;
        let mut x = BTreeMap::new();
        let mut y = None;
        for (i, (header, raw)) in headers.iter().zip(row.iter()).enumerate() {
            let value = parse_cell(raw);
            if Some(i) == target_index {
                y = value;
            } else if let Some(value) = value {
                x.insert(header.to_string(), value);
            }
        }
        frame.add(Record::new(x, y));
    }
    Ok(frame)
}

/// Write `id`, `y`, `y_predicted` rows for every record in identity order.
pub fn write_predictions<W: Write>(data: &Dataframe, writer: W) -> Result<(), MlError> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(["id", "y", "y_predicted"])?;
    let cell = |value: &Option<Value>| value.as_ref().map_or_else(String::new, Value::to_string);
    for (id, record) in data.entries() {
        wtr.write_record([id.to_string(), cell(&record.y), cell(&record.y_predicted)])?;
    }
    wtr.flush()?;
    Ok(())
}
