//! Identity-addressed tabular container.
//!
//! A [`Dataframe`] maps stable `u64` identities to [`Record`]s and iterates
//! them in identity order. It is persisted through the same named-storage
//! contract as models: `save(name)`, `load(name, config)`, `close()`,
//! `delete()`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use tessera_core::Configuration;

use crate::artifact;
use crate::error::MlError;

/// Storage kind under which dataframes are persisted.
pub const DATAFRAME_KIND: &str = "dataframe";

/// A single cell value.
///
/// Values are totally ordered (booleans, then numbers, then text) so they can
/// serve as class labels. Numbers compare with [`f64::total_cmp`].
///
/// Serialized as a bare JSON boolean, number, or string. JSON has no NaN or
/// infinity, so those numbers are written as `{"non_finite": "NaN"}` (or
/// `"inf"`, `"-inf"`) and restored exactly.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric view used by models: numbers as-is, booleans as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(_) => ColumnType::Numeric,
            Value::Text(_) => ColumnType::Categorical,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Number(_) => 1,
            Value::Text(_) => 2,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

const NON_FINITE: &str = "non_finite";

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(n) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(NON_FINITE, &n.to_string())?;
                map.end()
            }
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Bool(bool),
    Number(f64),
    Text(String),
    NonFinite { non_finite: String },
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match StoredValue::deserialize(deserializer)? {
            StoredValue::Bool(b) => Ok(Value::Bool(b)),
            StoredValue::Number(n) => Ok(Value::Number(n)),
            StoredValue::Text(s) => Ok(Value::Text(s)),
            StoredValue::NonFinite { non_finite } => match non_finite.parse::<f64>() {
                Ok(n) if !n.is_finite() => Ok(Value::Number(n)),
                _ => Err(de::Error::custom(format!(
                    "'{non_finite}' is not a non-finite number"
                ))),
            },
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Type of a feature column, derived from the values present in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Boolean,
    Categorical,
    /// Values of more than one type.
    Mixed,
}

impl ColumnType {
    fn merge(self, other: ColumnType) -> ColumnType {
        if self == other { self } else { ColumnType::Mixed }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Categorical => "categorical",
            ColumnType::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

/// Feature space of a dataframe: column name to column type.
pub type Schema = BTreeMap<String, ColumnType>;

/// Describe the first difference between an expected and an actual schema.
pub fn schema_difference(expected: &Schema, actual: &Schema) -> Option<String> {
    for (column, ty) in expected {
        match actual.get(column) {
            None => return Some(format!("missing column '{column}'")),
            Some(found) if found != ty => {
                return Some(format!("column '{column}' is {found}, expected {ty}"));
            }
            Some(_) => {}
        }
    }
    actual
        .keys()
        .find(|column| !expected.contains_key(*column))
        .map(|column| format!("unexpected column '{column}'"))
}

/// One labeled observation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Feature map. Absent columns are treated as missing cells.
    pub x: BTreeMap<String, Value>,
    /// True label.
    #[serde(default)]
    pub y: Option<Value>,
    /// Predicted label, written by `predict`.
    #[serde(default)]
    pub y_predicted: Option<Value>,
    /// Predicted class distribution, written by classifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_predicted_probabilities: Option<Vec<(Value, f64)>>,
}

impl Record {
    pub fn new(x: BTreeMap<String, Value>, y: Option<Value>) -> Self {
        Self {
            x,
            y,
            y_predicted: None,
            y_predicted_probabilities: None,
        }
    }

    /// Build a record from `(column, value)` pairs and a label.
    pub fn labeled<K, V>(x: impl IntoIterator<Item = (K, V)>, y: impl Into<Value>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::new(
            x.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            Some(y.into()),
        )
    }

    pub fn clear_predictions(&mut self) {
        self.y_predicted = None;
        self.y_predicted_probabilities = None;
    }
}

#[derive(Serialize, Deserialize)]
struct StoredFrame {
    next_id: u64,
    records: Vec<(u64, Record)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    columns: Option<Schema>,
}

/// Ordered mapping from identity to record.
#[derive(Debug, Clone)]
pub struct Dataframe {
    records: BTreeMap<u64, Record>,
    next_id: u64,
    /// Feature space of the frame this one was selected from. A column can be
    /// sparse enough to have no cell in a partition; it still belongs to the
    /// partition's schema. Dropped on mutable access to the records.
    columns: Option<Schema>,
    config: Configuration,
    storage_name: Option<String>,
    closed: bool,
}

impl Dataframe {
    /// Create an empty dataframe bound to `config`'s storage backend.
    pub fn new(config: &Configuration) -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: 0,
            columns: None,
            config: config.clone(),
            storage_name: None,
            closed: false,
        }
    }

    /// Create a dataframe holding `records`, numbered from 0 in order.
    pub fn from_records(config: &Configuration, records: impl IntoIterator<Item = Record>) -> Self {
        let mut frame = Self::new(config);
        for record in records {
            frame.add(record);
        }
        frame
    }

    /// Append a record under the next free identity and return that identity.
    pub fn add(&mut self, record: Record) -> u64 {
        let id = self.next_id;
        self.records.insert(id, record);
        self.next_id += 1;
        id
    }

    /// Insert a record under an explicit identity, returning any record it replaced.
    pub fn set(&mut self, id: u64, record: Record) -> Option<Record> {
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.records.insert(id, record)
    }

    pub fn get(&self, id: u64) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Mutable access to one record. The caller may rewrite features, so any
    /// inherited column schema is dropped.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut Record> {
        self.columns = None;
        self.records.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<Record> {
        self.records.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identities in iteration order.
    pub fn ids(&self) -> impl ExactSizeIterator<Item = u64> + Clone + '_ {
        self.records.keys().copied()
    }

    /// `(identity, record)` pairs in identity order. Call again to restart.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            inner: self.records.iter(),
        }
    }

    /// Mutable `(identity, record)` pairs. Drops any inherited column schema.
    pub fn entries_mut(&mut self) -> impl ExactSizeIterator<Item = (u64, &mut Record)> + '_ {
        self.columns = None;
        self.records.iter_mut().map(|(id, record)| (*id, record))
    }

    /// Feature space: every column present in a record, plus the columns
    /// inherited from the frame this one was selected from.
    pub fn x_schema(&self) -> Schema {
        let mut schema = self.columns.clone().unwrap_or_default();
        for record in self.records.values() {
            for (column, value) in &record.x {
                let ty = value.column_type();
                schema
                    .entry(column.clone())
                    .and_modify(|existing| *existing = existing.merge(ty))
                    .or_insert(ty);
            }
        }
        schema
    }

    /// Type of the label column, if any record is labeled.
    pub fn y_type(&self) -> Option<ColumnType> {
        self.records
            .values()
            .filter_map(|r| r.y.as_ref())
            .map(Value::column_type)
            .reduce(ColumnType::merge)
    }

    /// Copy the records with the given identities into a new, unsaved dataframe.
    pub fn subset(&self, ids: &[u64]) -> Result<Dataframe, MlError> {
        if let Some(missing) = ids.iter().find(|id| !self.records.contains_key(*id)) {
            return Err(MlError::invalid_input(format!(
                "record {missing} is not in the dataframe"
            )));
        }
        Ok(self.select(ids.iter().copied()))
    }

    /// Copy records whose identities are known to be present. The copy keeps
    /// this frame's full feature space.
    pub(crate) fn select(&self, ids: impl IntoIterator<Item = u64>) -> Dataframe {
        let records = ids
            .into_iter()
            .filter_map(|id| self.records.get(&id).map(|r| (id, r.clone())))
            .collect();
        Dataframe {
            records,
            next_id: self.next_id,
            columns: Some(self.x_schema()),
            config: self.config.clone(),
            storage_name: None,
            closed: false,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Name this dataframe was last saved under or loaded from.
    pub fn storage_name(&self) -> Option<&str> {
        self.storage_name.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Persist under `(dataframe, name)`, replacing any previous copy.
    pub fn save(&mut self, name: &str) -> Result<(), MlError> {
        if self.closed {
            return Err(MlError::state("save", "closed"));
        }
        let stored = StoredFrame {
            next_id: self.next_id,
            records: self
                .records
                .iter()
                .map(|(id, r)| (*id, r.clone()))
                .collect(),
            columns: self.columns.clone(),
        };
        artifact::store(&self.config, DATAFRAME_KIND, DATAFRAME_KIND, name, &(), &stored)?;
        self.storage_name = Some(name.to_string());
        tracing::info!(name, records = self.records.len(), "Saved dataframe");
        Ok(())
    }

    /// Load the dataframe stored under `name`.
    pub fn load(name: &str, config: &Configuration) -> Result<Dataframe, MlError> {
        let ((), stored): ((), StoredFrame) =
            artifact::fetch(config, DATAFRAME_KIND, DATAFRAME_KIND, name)?;
        let records: BTreeMap<u64, Record> = stored.records.into_iter().collect();
        tracing::info!(name, records = records.len(), "Loaded dataframe");
        Ok(Dataframe {
            records,
            next_id: stored.next_id,
            columns: stored.columns,
            config: config.clone(),
            storage_name: Some(name.to_string()),
            closed: false,
        })
    }

    /// Release the in-memory records. Storage is untouched. Idempotent; a
    /// closed frame can no longer be saved.
    pub fn close(&mut self) {
        if !self.closed {
            tracing::trace!(records = self.records.len(), "Releasing dataframe");
            self.closed = true;
        }
        self.records = BTreeMap::new();
        self.columns = None;
    }

    /// Remove the persisted copy. The in-memory records stay usable.
    pub fn delete(&mut self) -> Result<(), MlError> {
        let name = self
            .storage_name
            .as_deref()
            .ok_or_else(|| MlError::state("delete", "unsaved"))?;
        artifact::remove(&self.config, DATAFRAME_KIND, name)?;
        tracing::info!(name, "Deleted dataframe");
        Ok(())
    }
}

/// Iterator over `(identity, &Record)` pairs.
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    inner: btree_map::Iter<'a, u64, Record>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = (u64, &'a Record);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(id, record)| (*id, record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Entries<'_> {}
