//! Hash-addressed cells.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::generate_random_string;

/// Value held by a cell. Model output may carry numbers as well as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(serde_json::Number),
    Text(String),
}

impl CellValue {
    /// Text form of the value, as it appears in serialized tables.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }

    /// True when the value renders as an empty or whitespace-only string.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Number(_) => false,
            CellValue::Text(s) => s.trim().is_empty(),
        }
    }

    /// Convert an arbitrary JSON value into a cell value.
    ///
    /// Commas are the serialization delimiter of the CSV block sent to the
    /// model, so they are replaced by `/` in text. Numbers pass through and
    /// anything else becomes an empty string.
    pub fn from_json_sanitized(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => CellValue::Text(s.replace(',', "/")),
            serde_json::Value::Number(n) => CellValue::Number(n.clone()),
            _ => CellValue::Text(String::new()),
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Text(String::new())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

/// A single cell. Owned by exactly one sheet; its uid is never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub uid: String,
    pub row_index: usize,
    pub col_index: usize,
    #[serde(default)]
    pub value: CellValue,
}

impl Cell {
    /// Create an empty cell with a fresh uid at the given position.
    pub fn new(row_index: usize, col_index: usize) -> Self {
        Self {
            uid: format!("cell_{}", generate_random_string(10)),
            row_index,
            col_index,
            value: CellValue::default(),
        }
    }

    /// Placeholder for a uid present in a grid but missing from the cell store.
    pub fn placeholder(uid: impl Into<String>, row_index: usize, col_index: usize) -> Self {
        Self {
            uid: uid.into(),
            row_index,
            col_index,
            value: CellValue::default(),
        }
    }

    pub fn with_value(mut self, value: impl Into<CellValue>) -> Self {
        self.value = value.into();
        self
    }

    pub fn text(&self) -> String {
        self.value.as_text()
    }
}
