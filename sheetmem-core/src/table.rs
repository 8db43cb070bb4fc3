//! Plain array tables and rebuild change markers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::sheet::Sheet;

/// Array-based table shape exchanged with the model during a full rebuild.
///
/// `content` holds data rows only; the header lives in `columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTable {
    pub table_index: usize,
    pub table_name: String,
    pub columns: Vec<String>,
    pub content: Vec<Vec<String>>,
}

impl LegacyTable {
    pub fn new(table_index: usize, table_name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table_index,
            table_name: table_name.into(),
            columns,
            content: Vec::new(),
        }
    }

    pub fn with_rows(mut self, content: Vec<Vec<String>>) -> Self {
        self.content = content;
        self
    }

    /// Snapshot of a sheet in array form.
    pub fn from_sheet(table_index: usize, sheet: &Sheet) -> Self {
        Self {
            table_index,
            table_name: sheet.name.clone(),
            columns: sheet.get_header(),
            content: sheet.get_content(false),
        }
    }
}

/// Highlight markers computed by diffing a rebuild against the prior content.
///
/// Derived for rendering only, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMarkers {
    pub inserted_rows: BTreeSet<usize>,
    /// `"row-col"` keys of cells whose value changed.
    pub updated_rows: BTreeSet<String>,
}

impl ChangeMarkers {
    pub fn is_empty(&self) -> bool {
        self.inserted_rows.is_empty() && self.updated_rows.is_empty()
    }

    pub fn is_cell_updated(&self, row: usize, col: usize) -> bool {
        self.updated_rows.contains(&format!("{}-{}", row, col))
    }
}

/// A rebuilt table together with its change markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MarkedTable {
    #[serde(flatten)]
    pub table: LegacyTable,
    #[serde(flatten)]
    pub markers: ChangeMarkers,
}
