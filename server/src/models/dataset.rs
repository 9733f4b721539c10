//! Query plan and collected dataset model
//!
//! A plan-mode expert returns a list of [`QueryDescriptor`]s; the pipeline
//! executes them and hands the analyzer one [`CollectedDataset`] keyed by
//! descriptor id. Scalars stay tagged with their source type family so
//! analyzers surface missing or mistyped fields at entry instead of deep in
//! a rule pass.

use crate::utils::ProbeError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Scalar values and rows
// ============================================================================

/// A scalar cell tagged with its source type family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "t", content = "v")]
pub enum ScalarValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Null,
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Text(s) => {
                NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f"))
                    .ok()
            },
            _ => None,
        }
    }

    /// Display form used in evidence maps and reports.
    pub fn display(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(s) => s.clone(),
            Self::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            Self::Null => "NULL".to_string(),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One result row: column name → tagged scalar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Row {
    cells: HashMap<String, ScalarValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: impl Into<String>, value: ScalarValue) {
        self.cells.insert(column.into(), value);
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.set(column, value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&ScalarValue> {
        self.cells.get(column)
    }

    pub fn str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(ScalarValue::as_str)
    }

    pub fn i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(ScalarValue::as_i64)
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(ScalarValue::as_f64)
    }

    pub fn timestamp(&self, column: &str) -> Option<NaiveDateTime> {
        self.get(column).and_then(ScalarValue::as_timestamp)
    }

    /// Null or missing columns are treated alike by analyzers.
    pub fn is_null(&self, column: &str) -> bool {
        self.get(column).map(ScalarValue::is_null).unwrap_or(true)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }
}

// ============================================================================
// Query descriptors
// ============================================================================

/// What plane a descriptor runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Parameterized SQL against the FE query port.
    Sql,
    /// `SHOW ...` / `SHOW PROC ...` admin statement (no bind parameters).
    Admin,
    /// HTTP GET against a node's web port; `statement` holds the path.
    Http,
}

/// One unit of a collection plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub id: String,
    pub kind: QueryKind,
    pub statement: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ScalarValue>,
    /// A required descriptor aborts the run when it fails with an
    /// unavailable/syntax class error.
    #[serde(default)]
    pub required: bool,
}

impl QueryDescriptor {
    pub fn sql(id: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: QueryKind::Sql,
            statement: statement.into(),
            params: Vec::new(),
            required: false,
        }
    }

    pub fn admin(id: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: QueryKind::Admin,
            statement: statement.into(),
            params: Vec::new(),
            required: false,
        }
    }

    pub fn param(mut self, value: impl Into<ScalarValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

// ============================================================================
// Collected dataset
// ============================================================================

/// Result of executing one descriptor.
#[derive(Debug, Clone)]
pub enum CollectedItem {
    Rows(Vec<Row>),
    Json(serde_json::Value),
    /// Error token: the failure is part of the dataset, not an exception.
    Error(ProbeError),
}

impl CollectedItem {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ProbeError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Keyed results of one executed plan.
///
/// Key order equals plan order regardless of completion order; a dataset is
/// never partially constructed.
#[derive(Debug, Clone, Default)]
pub struct CollectedDataset {
    order: Vec<String>,
    items: HashMap<String, CollectedItem>,
}

impl CollectedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, item: CollectedItem) {
        let id = id.into();
        if !self.items.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.items.insert(id, item);
    }

    pub fn get(&self, id: &str) -> Option<&CollectedItem> {
        self.items.get(id)
    }

    /// Rows for a descriptor, or `None` when the descriptor errored or
    /// produced JSON.
    pub fn rows(&self, id: &str) -> Option<&[Row]> {
        self.get(id).and_then(CollectedItem::rows)
    }

    pub fn json(&self, id: &str) -> Option<&serde_json::Value> {
        match self.get(id) {
            Some(CollectedItem::Json(v)) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self, id: &str) -> Option<&ProbeError> {
        self.get(id).and_then(CollectedItem::error)
    }

    /// Ids in plan order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_preserves_insertion_order() {
        let mut ds = CollectedDataset::new();
        ds.insert("b", CollectedItem::Rows(vec![]));
        ds.insert("a", CollectedItem::Rows(vec![]));
        ds.insert("c", CollectedItem::Error(ProbeError::Absent("gone".into())));
        let keys: Vec<&str> = ds.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn scalar_coercions() {
        assert_eq!(ScalarValue::Text("42".into()).as_i64(), Some(42));
        assert_eq!(ScalarValue::Integer(7).as_f64(), Some(7.0));
        assert!(ScalarValue::Null.as_i64().is_none());
        let ts = ScalarValue::Text("2026-07-01 10:30:00".into());
        assert!(ts.as_timestamp().is_some());
    }

    #[test]
    fn row_missing_column_is_null() {
        let row = Row::new().with("STATE", "RUNNING");
        assert!(row.is_null("FINISH_TIME"));
        assert_eq!(row.str("STATE"), Some("RUNNING"));
    }
}
