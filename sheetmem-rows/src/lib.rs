//! sheetmem Rows - Row Operations
//!
//! Insert, update and delete rows uniformly over the two table shapes a
//! refresh can hold: grid-based [`Sheet`]s and array-based [`LegacyTable`]s.
//! Row and column indices given to this crate are always logical and
//! 0-based; the sheet path shifts them past the header row and row-index
//! column.
//!
//! These functions are the low-level entry points used when executing
//! extracted edit actions. Failures are logged and reported through the
//! return value, never raised.

use serde_json::Value;
use sheetmem_core::{CellAction, CellValue, ChatPiece, LegacyTable, Sheet, SheetContext};
use std::collections::BTreeMap;

/// Column index to raw value, as carried by an edit action.
pub type RowData = BTreeMap<usize, Value>;

/// Sanitize a raw value for storage in a cell.
///
/// Commas become `/`, numbers are kept, anything else becomes empty text.
pub fn handle_cell_value(value: &Value) -> CellValue {
    CellValue::from_json_sanitized(value)
}

// ============================================================================
// ROW TABLE TRAIT
// ============================================================================

/// Common row interface over both table shapes.
pub trait RowTable {
    /// Number of logical columns.
    fn width(&self) -> usize;

    /// Logical content rows.
    fn rows(&self) -> Vec<Vec<String>>;

    fn get_row(&self, row: usize) -> Option<Vec<String>> {
        self.rows().into_iter().nth(row)
    }

    /// Append a row filled from `data`.
    ///
    /// # Returns
    /// The logical index of the new row, or `None` when the insert was
    /// skipped or failed.
    fn insert_row(&mut self, data: &RowData) -> Option<usize>;

    /// Overwrite the columns present in `data`. Returns `false` for an invalid row.
    fn set_row(&mut self, row: usize, data: &RowData) -> bool;

    /// Remove a row. Returns `false` for an invalid row.
    fn delete_row(&mut self, row: usize) -> bool;
}

impl RowTable for Sheet {
    fn width(&self) -> usize {
        self.col_count().saturating_sub(1)
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.get_content(false)
    }

    fn insert_row(&mut self, data: &RowData) -> Option<usize> {
        if let Err(e) = self.apply_action(0, 0, CellAction::InsertDownRow) {
            tracing::error!(sheet = %self.uid, error = %e, "Failed to insert row");
            return None;
        }
        let grid_row = self.row_count() - 1;
        let cols = self.col_count();
        for (col, value) in data {
            let grid_col = col + 1;
            if grid_col < cols {
                if let Some(cell) = self.cell_mut(grid_row, grid_col) {
                    cell.value = handle_cell_value(value);
                }
            }
        }
        tracing::debug!(sheet = %self.uid, row = grid_row - 1, "Inserted row");
        Some(grid_row - 1)
    }

    fn set_row(&mut self, row: usize, data: &RowData) -> bool {
        let grid_row = row + 1;
        if grid_row >= self.row_count() {
            tracing::error!(sheet = %self.uid, row, "Invalid row index for update");
            return false;
        }
        let cols = self.col_count();
        for (col, value) in data {
            let grid_col = col + 1;
            if grid_col < cols {
                if let Some(cell) = self.cell_mut(grid_row, grid_col) {
                    cell.value = handle_cell_value(value);
                }
            }
        }
        true
    }

    fn delete_row(&mut self, row: usize) -> bool {
        let grid_row = row + 1;
        if grid_row >= self.row_count() {
            tracing::error!(sheet = %self.uid, row, "Invalid row index for delete");
            return false;
        }
        match self.apply_action(grid_row, 0, CellAction::DeleteSelfRow) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(sheet = %self.uid, row, error = %e, "Failed to delete row");
                false
            }
        }
    }
}

impl RowTable for LegacyTable {
    fn width(&self) -> usize {
        self.columns.len()
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.content.clone()
    }

    fn get_row(&self, row: usize) -> Option<Vec<String>> {
        self.content.get(row).cloned()
    }

    /// Skips the insert when an identical row already exists.
    fn insert_row(&mut self, data: &RowData) -> Option<usize> {
        let mut new_row = vec![String::new(); self.columns.len()];
        for (col, value) in data {
            if let Some(slot) = new_row.get_mut(*col) {
                *slot = handle_cell_value(value).as_text();
            }
        }
        if self.content.iter().any(|existing| *existing == new_row) {
            tracing::info!(table = self.table_index, row = ?new_row, "Skipping duplicate insert");
            return None;
        }
        self.content.push(new_row);
        Some(self.content.len() - 1)
    }

    fn set_row(&mut self, row: usize, data: &RowData) -> bool {
        let width = self.columns.len();
        let Some(target) = self.content.get_mut(row) else {
            tracing::error!(table = self.table_index, row, "Update target row does not exist");
            return false;
        };
        for (col, value) in data {
            if *col >= width {
                continue;
            }
            if target.len() <= *col {
                target.resize(col + 1, String::new());
            }
            target[*col] = handle_cell_value(value).as_text();
        }
        true
    }

    fn delete_row(&mut self, row: usize) -> bool {
        if row >= self.content.len() {
            tracing::error!(table = self.table_index, row, "Invalid row index for delete");
            return false;
        }
        self.content.remove(row);
        true
    }
}

// ============================================================================
// WAITING TABLES
// ============================================================================

/// A table held by a refresh run, in either shape.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitingTable {
    Sheet(Sheet),
    Legacy(LegacyTable),
}

impl WaitingTable {
    pub fn as_row_table(&self) -> &dyn RowTable {
        match self {
            WaitingTable::Sheet(s) => s,
            WaitingTable::Legacy(t) => t,
        }
    }

    pub fn as_row_table_mut(&mut self) -> &mut dyn RowTable {
        match self {
            WaitingTable::Sheet(s) => s,
            WaitingTable::Legacy(t) => t,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WaitingTable::Sheet(s) => &s.name,
            WaitingTable::Legacy(t) => &t.table_name,
        }
    }
}

/// Scratch state of one refresh run.
///
/// Holds the tables being edited plus the persistence targets a sheet
/// update writes through to. Created per run and consumed at its end.
#[derive(Debug, Clone, Default)]
pub struct WaitingTables {
    tables: Vec<WaitingTable>,
    context: SheetContext,
    piece: Option<ChatPiece>,
}

impl WaitingTables {
    pub fn new(tables: Vec<WaitingTable>, context: SheetContext, piece: Option<ChatPiece>) -> Self {
        Self {
            tables,
            context,
            piece,
        }
    }

    pub fn from_sheets(sheets: Vec<Sheet>, context: SheetContext, piece: Option<ChatPiece>) -> Self {
        Self::new(
            sheets.into_iter().map(WaitingTable::Sheet).collect(),
            context,
            piece,
        )
    }

    pub fn from_legacy(tables: Vec<LegacyTable>) -> Self {
        Self::new(
            tables.into_iter().map(WaitingTable::Legacy).collect(),
            SheetContext::default(),
            None,
        )
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, table_index: usize) -> Option<&WaitingTable> {
        self.tables.get(table_index)
    }

    pub fn tables(&self) -> &[WaitingTable] {
        &self.tables
    }

    pub fn width(&self, table_index: usize) -> Option<usize> {
        self.get(table_index).map(|t| t.as_row_table().width())
    }

    pub fn content(&self, table_index: usize) -> Option<Vec<Vec<String>>> {
        self.get(table_index).map(|t| t.as_row_table().rows())
    }

    pub fn piece(&self) -> Option<&ChatPiece> {
        self.piece.as_ref()
    }

    /// Persist every sheet into the context and the piece.
    pub fn save_all(&mut self) {
        for table in &self.tables {
            if let WaitingTable::Sheet(sheet) = table {
                sheet.save(&mut self.context, self.piece.as_mut());
            }
        }
    }

    pub fn into_parts(self) -> (Vec<WaitingTable>, SheetContext, Option<ChatPiece>) {
        (self.tables, self.context, self.piece)
    }

    fn table_mut(&mut self, table_index: usize, op: &str) -> Option<&mut WaitingTable> {
        let len = self.tables.len();
        let table = self.tables.get_mut(table_index);
        if table.is_none() {
            tracing::error!(table_index, tables = len, op, "Table index out of range");
        }
        table
    }
}

// ============================================================================
// ROW OPERATIONS
// ============================================================================

/// Append a row to table `table_index`.
///
/// # Returns
/// The new row's logical index, or `None` if the insert was skipped (duplicate
/// legacy row) or the table does not exist.
pub fn insert_row(waiting: &mut WaitingTables, table_index: usize, data: &RowData) -> Option<usize> {
    let table = waiting.table_mut(table_index, "insert")?;
    let inserted = table.as_row_table_mut().insert_row(data);
    if let Some(row) = inserted {
        tracing::info!(table_index, row, "Inserted row");
    }
    inserted
}

/// Delete logical row `row_index` of table `table_index`.
pub fn delete_row(waiting: &mut WaitingTables, table_index: usize, row_index: usize) -> bool {
    let Some(table) = waiting.table_mut(table_index, "delete") else {
        return false;
    };
    let deleted = table.as_row_table_mut().delete_row(row_index);
    if deleted {
        tracing::info!(table_index, row = row_index, "Deleted row");
    }
    deleted
}

/// Update logical row `row_index` of table `table_index`.
///
/// A sheet is saved right after the update; a legacy table is only mutated
/// in place and saving is left to the caller.
pub fn update_row(waiting: &mut WaitingTables, table_index: usize, row_index: usize, data: &RowData) -> bool {
    let WaitingTables {
        tables,
        context,
        piece,
    } = waiting;
    let len = tables.len();
    let Some(table) = tables.get_mut(table_index) else {
        tracing::error!(table_index, tables = len, op = "update", "Table index out of range");
        return false;
    };
    let updated = table.as_row_table_mut().set_row(row_index, data);
    if updated {
        if let WaitingTable::Sheet(sheet) = table {
            sheet.save(context, piece.as_mut());
        }
        tracing::info!(table_index, row = row_index, "Updated row");
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn legacy() -> LegacyTable {
        LegacyTable::new(0, "Spacetime", vec![s("Date"), s("Time")])
            .with_rows(vec![vec![s("2021-09-01"), s("12:00")]])
    }

    fn sheet() -> Sheet {
        Sheet::from_content(
            "Spacetime",
            &[s("Date"), s("Time")],
            &[vec![s("2021-09-01"), s("12:00")]],
        )
    }

    fn data(pairs: &[(usize, Value)]) -> RowData {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_handle_cell_value() {
        assert_eq!(handle_cell_value(&json!("a,b")).as_text(), "a/b");
        assert_eq!(handle_cell_value(&json!(7)).as_text(), "7");
        assert_eq!(handle_cell_value(&json!({"x": 1})).as_text(), "");
    }

    #[test]
    fn test_legacy_insert_skips_duplicate() {
        let mut waiting = WaitingTables::from_legacy(vec![legacy()]);
        let dup = data(&[(0, json!("2021-09-01")), (1, json!("12:00"))]);
        assert_eq!(insert_row(&mut waiting, 0, &dup), None);
        assert_eq!(waiting.content(0).unwrap().len(), 1);

        let fresh = data(&[(0, json!("2021-09-02"))]);
        assert_eq!(insert_row(&mut waiting, 0, &fresh), Some(1));
        assert_eq!(waiting.content(0).unwrap()[1], vec![s("2021-09-02"), s("")]);
    }

    #[test]
    fn test_sheet_insert_appends_with_shifted_columns() {
        let mut waiting = WaitingTables::from_sheets(vec![sheet()], SheetContext::new(), None);
        let row = data(&[(0, json!("2021-09-03")), (1, json!("8:00,9:00")), (5, json!("x"))]);
        assert_eq!(insert_row(&mut waiting, 0, &row), Some(1));
        assert_eq!(
            waiting.content(0).unwrap()[1],
            vec![s("2021-09-03"), s("8:00/9:00")]
        );
    }

    #[test]
    fn test_insert_into_missing_table() {
        let mut waiting = WaitingTables::from_legacy(vec![]);
        assert_eq!(insert_row(&mut waiting, 3, &RowData::new()), None);
    }

    #[test]
    fn test_delete_bounds() {
        let mut waiting = WaitingTables::new(
            vec![WaitingTable::Sheet(sheet()), WaitingTable::Legacy(legacy())],
            SheetContext::new(),
            None,
        );
        assert!(!delete_row(&mut waiting, 0, 1));
        assert!(!delete_row(&mut waiting, 1, 1));
        assert!(delete_row(&mut waiting, 0, 0));
        assert!(delete_row(&mut waiting, 1, 0));
        assert!(waiting.content(0).unwrap().is_empty());
        assert!(waiting.content(1).unwrap().is_empty());
        assert!(!delete_row(&mut waiting, 2, 0));
    }

    #[test]
    fn test_update_saves_sheet() {
        let sheet = sheet();
        let uid = sheet.uid.clone();
        let mut waiting = WaitingTables::from_sheets(
            vec![sheet],
            SheetContext::new(),
            Some(ChatPiece::new("bot", false, "")),
        );
        assert!(update_row(&mut waiting, 0, 0, &data(&[(1, json!("13:00"))])));
        assert_eq!(waiting.content(0).unwrap()[0], vec![s("2021-09-01"), s("13:00")]);

        let (_, context, piece) = waiting.into_parts();
        assert!(context.find(&uid).is_some());
        assert!(piece.unwrap().hash_sheets.unwrap().contains_key(&uid));
    }

    #[test]
    fn test_update_legacy_in_place() {
        let mut waiting = WaitingTables::from_legacy(vec![legacy()]);
        assert!(update_row(&mut waiting, 0, 0, &data(&[(0, json!("a,b")), (4, json!("x"))])));
        assert_eq!(waiting.content(0).unwrap()[0], vec![s("a/b"), s("12:00")]);
        assert!(!update_row(&mut waiting, 0, 3, &data(&[(0, json!("z"))])));
    }

    #[test]
    fn test_shapes_behave_identically() {
        let ops = |mut waiting: WaitingTables| {
            insert_row(&mut waiting, 0, &data(&[(0, json!("d")), (1, json!("t"))]));
            update_row(&mut waiting, 0, 0, &data(&[(0, json!("x"))]));
            delete_row(&mut waiting, 0, 1);
            waiting.content(0).unwrap()
        };
        let from_sheet = ops(WaitingTables::from_sheets(vec![sheet()], SheetContext::new(), None));
        let from_legacy = ops(WaitingTables::from_legacy(vec![legacy()]));
        assert_eq!(from_sheet, from_legacy);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_rows(width: usize) -> impl Strategy<Value = Vec<Vec<String>>> {
        prop::collection::vec(prop::collection::vec("[a-z0-9]{0,6}", width), 0..5)
    }

    fn arb_data(width: usize) -> impl Strategy<Value = RowData> {
        prop::collection::btree_map(0..width + 2, "[a-z0-9,]{0,6}".prop_map(Value::String), 0..4)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_insert_then_delete_restores_content(
            rows in arb_rows(3),
            data in arb_data(3),
        ) {
            let header = vec!["a".to_string(), "b".to_string(), "c".to_string()];
            let sheet = Sheet::from_content("T", &header, &rows);
            let legacy = LegacyTable::new(0, "T", header).with_rows(rows.clone());
            let mut waiting = WaitingTables::new(
                vec![WaitingTable::Sheet(sheet), WaitingTable::Legacy(legacy)],
                SheetContext::new(),
                None,
            );

            for table_index in 0..2 {
                if let Some(row) = insert_row(&mut waiting, table_index, &data) {
                    prop_assert_eq!(row, rows.len());
                    let inserted = &waiting.content(table_index).unwrap()[row];
                    prop_assert!(inserted.iter().all(|cell| !cell.contains(',')));
                    prop_assert!(delete_row(&mut waiting, table_index, row));
                }
                prop_assert_eq!(waiting.content(table_index).unwrap(), rows.clone());
            }
        }

        #[test]
        fn prop_update_keeps_row_count(rows in arb_rows(2), data in arb_data(2), target in 0usize..6) {
            let mut waiting = WaitingTables::from_legacy(vec![
                LegacyTable::new(0, "T", vec!["a".to_string(), "b".to_string()]).with_rows(rows.clone()),
            ]);
            let updated = update_row(&mut waiting, 0, target, &data);
            prop_assert_eq!(updated, target < rows.len());
            prop_assert_eq!(waiting.content(0).unwrap().len(), rows.len());
        }
    }
}
