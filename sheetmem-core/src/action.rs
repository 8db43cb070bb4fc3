//! Typed edit actions produced by the extractor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cell::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Insert,
    Update,
    Delete,
}

impl ActionKind {
    /// Case-insensitive parse of an action name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "insert" => Some(ActionKind::Insert),
            "update" => Some(ActionKind::Update),
            "delete" => Some(ActionKind::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Insert => "insert",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structural edit against a table.
///
/// `data` maps 0-based logical column indices to raw cell values.
/// `row_index` is present for update and delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditAction {
    #[serde(rename = "action")]
    pub kind: ActionKind,
    pub table_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<usize, serde_json::Value>,
}

impl EditAction {
    pub fn insert(table_index: usize, data: BTreeMap<usize, serde_json::Value>) -> Self {
        Self {
            kind: ActionKind::Insert,
            table_index,
            row_index: None,
            data,
        }
    }

    pub fn update(table_index: usize, row_index: usize, data: BTreeMap<usize, serde_json::Value>) -> Self {
        Self {
            kind: ActionKind::Update,
            table_index,
            row_index: Some(row_index),
            data,
        }
    }

    pub fn delete(table_index: usize, row_index: usize) -> Self {
        Self {
            kind: ActionKind::Delete,
            table_index,
            row_index: Some(row_index),
            data: BTreeMap::new(),
        }
    }

    /// Canonical serialization of `data`, used for duplicate detection.
    pub fn data_signature(&self) -> String {
        serde_json::to_string(&self.data).unwrap_or_default()
    }

    /// The row this insert would produce in a table of `width` columns.
    ///
    /// Values are sanitized the same way the row operations store them and
    /// out of range columns are ignored.
    pub fn row_for_width(&self, width: usize) -> Vec<String> {
        let mut row = vec![String::new(); width];
        for (col, value) in &self.data {
            if let Some(slot) = row.get_mut(*col) {
                *slot = CellValue::from_json_sanitized(value).as_text();
            }
        }
        row
    }
}
