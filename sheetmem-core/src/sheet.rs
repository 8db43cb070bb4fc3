//! Sheets: an ordered grid of cell uids with a header row convention.
//!
//! `grid[0]` is the header row and column 0 is the row-index column, so the
//! cell at (0, 0) is the sheet's source cell. Every uid in the grid resolves
//! to an entry of the cell store; a dangling uid is repaired with an empty
//! placeholder instead of failing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::cell::{Cell, CellValue};
use crate::error::{SheetError, SheetMemResult};
use crate::generate_random_string;
use crate::piece::{ChatPiece, HashGrid, SheetContext};

static TABLE_EDIT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tableEdit>.*?</tableEdit>").expect("Invalid tableEdit regex"));

// ============================================================================
// SHEET METADATA
// ============================================================================

/// Where a sheet lives: a reusable template or a conversation's own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SheetDomain {
    Global,
    #[default]
    Chat,
}

/// Free-form per-sheet prompt configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SheetConfig {
    /// Description shown to the model.
    pub note: String,
    /// Rule for filling a required sheet that is still empty.
    pub init_node: String,
    pub insert_node: String,
    pub update_node: String,
    pub delete_node: String,
}

/// Selectable parts of [`Sheet::table_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextPart {
    Title,
    Note,
    Headers,
    Rows,
    EditRules,
}

impl TextPart {
    pub const ALL: [TextPart; 5] = [
        TextPart::Title,
        TextPart::Note,
        TextPart::Headers,
        TextPart::Rows,
        TextPart::EditRules,
    ];
}

/// Structural edits issued from a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellAction {
    InsertUpRow,
    /// From the source cell this appends after the last row.
    InsertDownRow,
    DeleteSelfRow,
    InsertLeftColumn,
    /// From the source cell this appends after the last column.
    InsertRightColumn,
    DeleteSelfColumn,
}

// ============================================================================
// SHEET
// ============================================================================

fn default_true() -> bool {
    true
}

/// A structured table with hash-addressed cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub domain: SheetDomain,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub trigger_send: bool,
    #[serde(default)]
    pub trigger_send_deep: usize,
    #[serde(default)]
    pub config: SheetConfig,
    #[serde(default, rename = "template", skip_serializing_if = "Option::is_none")]
    pub template_uid: Option<String>,
    #[serde(rename = "hashSheet")]
    grid: HashGrid,
    /// Every cell ever created for this sheet, keyed by uid. Older pieces may
    /// still reference cells that are no longer in the current grid.
    #[serde(rename = "cellHistory", default)]
    cells: BTreeMap<String, Cell>,
}

impl Sheet {
    /// Create a sheet with a fresh uid and a `rows` x `columns` grid.
    ///
    /// Both dimensions include the header row and row-index column and are
    /// clamped to at least one.
    pub fn new_sheet(columns: usize, rows: usize) -> Self {
        let uid = format!("sheet_{}", generate_random_string(8));
        let suffix: String = uid.chars().skip(uid.chars().count() - 4).collect();
        let mut sheet = Self {
            name: format!("New table_{}", suffix),
            uid,
            domain: SheetDomain::Chat,
            enable: true,
            required: false,
            trigger_send: false,
            trigger_send_deep: 0,
            config: SheetConfig::default(),
            template_uid: None,
            grid: Vec::new(),
            cells: BTreeMap::new(),
        };
        let columns = columns.max(1);
        for r in 0..rows.max(1) {
            let row = sheet.fresh_row(r, columns);
            sheet.grid.push(row);
        }
        sheet
    }

    /// Build a sheet holding `columns` as header and `content` as data rows.
    pub fn from_content(name: impl Into<String>, columns: &[String], content: &[Vec<String>]) -> Self {
        let mut sheet = Self::new_sheet(columns.len() + 1, 1);
        sheet.name = name.into();
        sheet.replace_content(columns, content);
        sheet
    }

    /// Instantiate a sheet from a template.
    ///
    /// Global templates become chat sheets with a new uid; chat sheets are
    /// copied as they are.
    pub fn from_template(template: &Sheet) -> Self {
        let mut sheet = template.clone();
        if template.domain == SheetDomain::Global {
            sheet.domain = SheetDomain::Chat;
            sheet.uid = format!("sheet_{}", generate_random_string(8));
            sheet.name = template
                .name
                .replace("template", "table")
                .replace("Template", "Table");
            sheet.template_uid = Some(template.uid.clone());
        }
        sheet
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: SheetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_trigger_send(mut self, deep: usize) -> Self {
        self.trigger_send = true;
        self.trigger_send_deep = deep;
        self
    }

    /// Copy of this sheet laid out by `grid`, as loaded from a snapshot.
    pub fn with_grid(&self, grid: HashGrid) -> Self {
        let mut sheet = self.clone();
        sheet.grid = grid;
        sheet.repair_dangling();
        sheet.reindex();
        sheet
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn grid(&self) -> &HashGrid {
        &self.grid
    }

    /// Cells reachable from the current grid, in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.grid
            .iter()
            .flatten()
            .filter_map(move |uid| self.cells.get(uid))
    }

    /// Rows including the header.
    pub fn row_count(&self) -> usize {
        self.grid.len()
    }

    /// Columns including the row-index column.
    pub fn col_count(&self) -> usize {
        self.grid.first().map_or(0, Vec::len)
    }

    pub fn data_row_count(&self) -> usize {
        self.grid.len().saturating_sub(1)
    }

    /// True when the sheet has no data rows.
    pub fn is_empty(&self) -> bool {
        self.grid.len() <= 1
    }

    /// Direct grid lookup. Out of range positions yield `None`.
    pub fn find_cell_by_position(&self, row: usize, col: usize) -> Option<&Cell> {
        let uid = self.grid.get(row)?.get(col)?;
        self.cells.get(uid)
    }

    /// Mutable grid lookup, materializing a placeholder for a dangling uid.
    pub fn cell_mut(&mut self, row: usize, col: usize) -> Option<&mut Cell> {
        let uid = self.grid.get(row)?.get(col)?.clone();
        Some(
            self.cells
                .entry(uid.clone())
                .or_insert_with(|| Cell::placeholder(uid, row, col)),
        )
    }

    pub fn set_value(&mut self, row: usize, col: usize, value: impl Into<CellValue>) -> SheetMemResult<()> {
        let cols = self.col_count();
        let rows = self.data_row_count();
        match self.cell_mut(row, col) {
            Some(cell) => {
                cell.value = value.into();
                Ok(())
            }
            None if col >= cols => Err(SheetError::ColumnIndexOutOfRange { col, cols }.into()),
            None => Err(SheetError::RowIndexOutOfRange {
                table_index: 0,
                row,
                rows,
            }
            .into()),
        }
    }

    /// Resolve an `A1` style address. `B2` is grid position (1, 1).
    pub fn get_cell_from_address(&self, address: &str) -> Option<&Cell> {
        let (row, col) = parse_cell_address(address)?;
        self.find_cell_by_position(row, col)
    }

    pub fn get_header(&self) -> Vec<String> {
        self.row_values(0).into_iter().skip(1).collect()
    }

    /// Value matrix of the sheet.
    ///
    /// With the header, the full grid is returned including the row-index
    /// column. Without it, row 0 and column 0 are dropped.
    pub fn get_content(&self, with_header: bool) -> Vec<Vec<String>> {
        if with_header {
            return (0..self.grid.len()).map(|r| self.row_values(r)).collect();
        }
        (1..self.grid.len())
            .map(|r| self.row_values(r).into_iter().skip(1).collect())
            .collect()
    }

    pub fn get_body(&self) -> Vec<Vec<String>> {
        self.get_content(false)
    }

    fn row_values(&self, row: usize) -> Vec<String> {
        self.grid.get(row).map_or_else(Vec::new, |uids| {
            uids.iter()
                .map(|uid| self.cells.get(uid).map(Cell::text).unwrap_or_default())
                .collect()
        })
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Visit every grid position in row-major order.
    ///
    /// Unknown uids are materialized as empty cells first.
    pub fn render<F>(&mut self, mut visit: F)
    where
        F: FnMut(&Cell),
    {
        self.repair_dangling();
        for row in &self.grid {
            for uid in row {
                if let Some(cell) = self.cells.get(uid) {
                    visit(cell);
                }
            }
        }
    }

    /// Store this sheet's record in `context` and its grid in `piece`.
    ///
    /// Returns `false` when there is no piece to carry the grid yet; the
    /// context is still updated in that case.
    pub fn save(&self, context: &mut SheetContext, piece: Option<&mut ChatPiece>) -> bool {
        context.upsert(self);
        let Some(piece) = piece else {
            tracing::debug!(sheet = %self.uid, "No chat piece can carry hash_sheets, skipping snapshot write");
            return false;
        };
        piece
            .hash_sheets
            .get_or_insert_with(BTreeMap::new)
            .insert(self.uid.clone(), self.grid.clone());
        true
    }

    /// Truncate to the header row, keeping the column schema.
    pub fn init_hash_sheet(&mut self) {
        self.grid.truncate(1);
    }

    /// Replace header values and data rows, resizing columns to fit.
    pub fn replace_content(&mut self, columns: &[String], content: &[Vec<String>]) {
        self.init_hash_sheet();
        let target = columns.len() + 1;
        while self.col_count() < target {
            self.push_column();
        }
        while self.col_count() > target.max(1) {
            let last = self.col_count() - 1;
            self.remove_column(last);
        }
        for (c, name) in columns.iter().enumerate() {
            if let Some(cell) = self.cell_mut(0, c + 1) {
                cell.value = CellValue::Text(name.clone());
            }
        }
        for values in content {
            let r = self.grid.len();
            let row = self.fresh_row(r, target);
            self.grid.push(row);
            for (c, value) in values.iter().take(columns.len()).enumerate() {
                if let Some(cell) = self.cell_mut(r, c + 1) {
                    cell.value = CellValue::Text(value.clone());
                }
            }
        }
        self.reindex();
    }

    // ------------------------------------------------------------------------
    // Structural edits
    // ------------------------------------------------------------------------

    /// Apply a structural action issued from the cell at (`row`, `col`).
    pub fn apply_action(&mut self, row: usize, col: usize, action: CellAction) -> SheetMemResult<()> {
        let rows = self.row_count();
        let cols = self.col_count();
        if row >= rows {
            return Err(SheetError::RowIndexOutOfRange {
                table_index: 0,
                row,
                rows: self.data_row_count(),
            }
            .into());
        }
        if col >= cols {
            return Err(SheetError::ColumnIndexOutOfRange { col, cols }.into());
        }
        let is_source = row == 0 && col == 0;
        match action {
            CellAction::InsertUpRow => {
                if row == 0 {
                    return Err(SheetError::HeaderProtected.into());
                }
                let fresh = self.fresh_row(row, cols);
                self.grid.insert(row, fresh);
            }
            CellAction::InsertDownRow => {
                let at = if is_source { rows } else { row + 1 };
                let fresh = self.fresh_row(at, cols);
                self.grid.insert(at, fresh);
            }
            CellAction::DeleteSelfRow => {
                if row == 0 {
                    return Err(SheetError::HeaderProtected.into());
                }
                self.grid.remove(row);
            }
            CellAction::InsertLeftColumn => {
                if col == 0 {
                    return Err(SheetError::HeaderProtected.into());
                }
                self.insert_column(col);
            }
            CellAction::InsertRightColumn => {
                let at = if is_source { cols } else { col + 1 };
                self.insert_column(at);
            }
            CellAction::DeleteSelfColumn => {
                if col == 0 {
                    return Err(SheetError::HeaderProtected.into());
                }
                self.remove_column(col);
            }
        }
        self.reindex();
        Ok(())
    }

    fn fresh_row(&mut self, row_index: usize, width: usize) -> Vec<String> {
        (0..width)
            .map(|c| {
                let cell = Cell::new(row_index, c);
                let uid = cell.uid.clone();
                self.cells.insert(uid.clone(), cell);
                uid
            })
            .collect()
    }

    fn insert_column(&mut self, at: usize) {
        for r in 0..self.grid.len() {
            let cell = Cell::new(r, at);
            let uid = cell.uid.clone();
            self.cells.insert(uid.clone(), cell);
            let row = &mut self.grid[r];
            let at = at.min(row.len());
            row.insert(at, uid);
        }
    }

    fn push_column(&mut self) {
        let at = self.col_count();
        self.insert_column(at);
    }

    fn remove_column(&mut self, col: usize) {
        for row in &mut self.grid {
            if col < row.len() {
                row.remove(col);
            }
        }
    }

    fn repair_dangling(&mut self) {
        for (r, row) in self.grid.iter().enumerate() {
            for (c, uid) in row.iter().enumerate() {
                if !self.cells.contains_key(uid) {
                    tracing::warn!(sheet = %self.uid, cell = %uid, "Cell not found, materializing placeholder");
                    self.cells
                        .insert(uid.clone(), Cell::placeholder(uid.clone(), r, c));
                }
            }
        }
    }

    fn reindex(&mut self) {
        for (r, row) in self.grid.iter().enumerate() {
            for (c, uid) in row.iter().enumerate() {
                if let Some(cell) = self.cells.get_mut(uid) {
                    cell.row_index = r;
                    cell.col_index = c;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Prompt text
    // ------------------------------------------------------------------------

    /// Data rows as `rowIndex,value,...` lines.
    pub fn to_csv(&self) -> String {
        self.get_body()
            .iter()
            .enumerate()
            .map(|(i, row)| format!("{},{}\n", i, row.join(",")))
            .collect()
    }

    fn edit_rules_text(&self) -> String {
        let mut rules = String::from("【Insert/Delete/Update Trigger Conditions】\n");
        if self.required && self.is_empty() {
            rules.push_str(&format!("Insert: {}\n", self.config.init_node));
            return rules;
        }
        if !self.config.insert_node.is_empty() {
            rules.push_str(&format!("Insert: {}\n", self.config.insert_node));
        }
        if !self.config.update_node.is_empty() {
            rules.push_str(&format!("Update: {}\n", self.config.update_node));
        }
        if !self.config.delete_node.is_empty() {
            rules.push_str(&format!("Delete: {}\n", self.config.delete_node));
        }
        rules
    }

    /// Readable text block describing this sheet for a prompt.
    ///
    /// # Arguments
    /// * `index` - Position of the sheet among the enabled sheets
    /// * `parts` - Which sections to include
    /// * `chat` - Conversation used by the trigger-send relevance filter
    ///
    /// # Returns
    /// An empty string when trigger-send is on with a depth below one. With
    /// trigger-send on, only rows whose first value occurs in the latest
    /// `trigger_send_deep` messages are kept.
    pub fn table_text(&self, index: usize, parts: &[TextPart], chat: &[ChatPiece]) -> String {
        if self.trigger_send && self.trigger_send_deep < 1 {
            return String::new();
        }

        let mut rows = self.to_csv();
        if !rows.is_empty() && self.trigger_send {
            let recent = latest_chat_text(chat, self.trigger_send_deep);
            rows = rows
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter(|line| recent.contains(line.split(',').nth(1).unwrap_or("")))
                .collect::<Vec<_>>()
                .join("\n");
        }

        let mut text = String::new();
        for part in TextPart::ALL.iter().filter(|p| parts.contains(p)) {
            match part {
                TextPart::Title => text.push_str(&format!("* {}:{}\n", index, self.name)),
                TextPart::Note => {
                    if !self.config.note.is_empty() {
                        text.push_str(&format!("【Description】{}\n", self.config.note));
                    }
                }
                TextPart::Headers => {
                    let header = self
                        .get_header()
                        .iter()
                        .enumerate()
                        .map(|(i, h)| format!("{}:{}", i, h))
                        .collect::<Vec<_>>()
                        .join(",");
                    text.push_str(&format!("【Table Content】\nrowIndex,{}\n", header));
                }
                TextPart::Rows => text.push_str(&rows),
                TextPart::EditRules => {
                    text.push_str(&self.edit_rules_text());
                    text.push('\n');
                }
            }
        }
        text
    }

    /// Portable JSON form with the full content matrix.
    pub fn get_json(&self) -> serde_json::Value {
        json!({
            "uid": self.uid,
            "name": self.name,
            "domain": self.domain,
            "enable": self.enable,
            "required": self.required,
            "triggerSend": self.trigger_send,
            "triggerSendDeep": self.trigger_send_deep,
            "config": self.config,
            "template": self.template_uid,
            "content": self.get_content(true),
        })
    }
}

impl Default for Sheet {
    fn default() -> Self {
        Self::new_sheet(2, 2)
    }
}

/// Parse an `A1` style address into a 0-based (row, col) grid position.
///
/// Columns are base-26 letters (A=1 .. Z=26, AA=27) and rows are 1-based.
pub fn parse_cell_address(address: &str) -> Option<(usize, usize)> {
    let split = address.find(|c: char| !c.is_ascii_uppercase())?;
    let (letters, digits) = address.split_at(split);
    if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let row: usize = digits.parse().ok()?;
    let col = letters.bytes().try_fold(0usize, |acc, b| {
        acc.checked_mul(26)?.checked_add((b - b'A' + 1) as usize)
    })?;
    Some((row.checked_sub(1)?, col.checked_sub(1)?))
}

/// Concatenated text of the latest `depth` messages, newest first, with
/// `<tableEdit>` blocks removed.
pub fn latest_chat_text(chat: &[ChatPiece], depth: usize) -> String {
    chat.iter()
        .rev()
        .take(depth)
        .map(|piece| strip_table_edit(&piece.mes))
        .collect()
}

/// `text` with every `<tableEdit>…</tableEdit>` block removed.
pub fn strip_table_edit(text: &str) -> String {
    TABLE_EDIT_BLOCK.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn people() -> Sheet {
        Sheet::from_content(
            "People",
            &[s("Name"), s("Place")],
            &[vec![s("Ann"), s("Paris")], vec![s("Bob"), s("Rome")]],
        )
    }

    #[test]
    fn test_new_sheet_shape_and_names() {
        let sheet = Sheet::new_sheet(3, 2);
        assert!(sheet.uid.starts_with("sheet_"));
        assert_eq!(sheet.uid.len(), "sheet_".len() + 8);
        assert!(sheet.name.ends_with(&sheet.uid[sheet.uid.len() - 4..]));
        assert_eq!(sheet.row_count(), 2);
        assert_eq!(sheet.col_count(), 3);
        assert_eq!(sheet.cells().count(), 6);
    }

    #[test]
    fn test_get_content_strips_header_and_index_column() {
        let sheet = people();
        assert_eq!(
            sheet.get_content(false),
            vec![vec![s("Ann"), s("Paris")], vec![s("Bob"), s("Rome")]]
        );
        let full = sheet.get_content(true);
        assert_eq!(full.len(), 3);
        assert_eq!(full[0], vec![s(""), s("Name"), s("Place")]);
    }

    #[test]
    fn test_find_cell_out_of_range_is_none() {
        let sheet = people();
        assert!(sheet.find_cell_by_position(9, 0).is_none());
        assert!(sheet.find_cell_by_position(0, 9).is_none());
    }

    #[test]
    fn test_address_resolution() {
        let sheet = people();
        assert_eq!(parse_cell_address("B2"), Some((1, 1)));
        assert_eq!(parse_cell_address("AA1"), Some((0, 26)));
        assert_eq!(parse_cell_address("A0"), None);
        assert_eq!(parse_cell_address("b2"), None);
        assert_eq!(parse_cell_address("B"), None);
        assert_eq!(parse_cell_address("2B"), None);
        assert_eq!(sheet.get_cell_from_address("B2").map(Cell::text), Some(s("Ann")));
        assert!(sheet.get_cell_from_address("Z99").is_none());
    }

    #[test]
    fn test_render_materializes_dangling_cells() {
        let sheet = people();
        let mut grid = sheet.grid().clone();
        grid[1][1] = s("cell_missing");
        let mut loaded = sheet.with_grid(grid);
        let mut visited = Vec::new();
        loaded.render(|cell| visited.push(cell.uid.clone()));
        assert_eq!(visited.len(), 9);
        assert!(visited.contains(&s("cell_missing")));
        assert_eq!(loaded.get_content(false)[0][0], "");
    }

    #[test]
    fn test_save_without_piece_only_updates_context() {
        let sheet = people();
        let mut ctx = SheetContext::new();
        assert!(!sheet.save(&mut ctx, None));
        assert!(ctx.find(&sheet.uid).is_some());

        let mut piece = ChatPiece::new("bot", false, "");
        assert!(sheet.save(&mut ctx, Some(&mut piece)));
        assert_eq!(piece.hash_sheets.unwrap()[&sheet.uid], *sheet.grid());
    }

    #[test]
    fn test_init_hash_sheet_keeps_header() {
        let mut sheet = people();
        sheet.init_hash_sheet();
        assert!(sheet.is_empty());
        assert_eq!(sheet.get_header(), vec![s("Name"), s("Place")]);
        assert!(sheet.get_content(false).is_empty());
    }

    #[test]
    fn test_structural_actions() {
        let mut sheet = people();
        sheet.apply_action(0, 0, CellAction::InsertDownRow).unwrap();
        assert_eq!(sheet.data_row_count(), 3);
        assert_eq!(sheet.get_content(false)[2], vec![s(""), s("")]);

        sheet.apply_action(1, 0, CellAction::DeleteSelfRow).unwrap();
        assert_eq!(sheet.get_content(false)[0], vec![s("Bob"), s("Rome")]);

        sheet.apply_action(0, 2, CellAction::InsertRightColumn).unwrap();
        assert_eq!(sheet.col_count(), 4);
        sheet.apply_action(0, 3, CellAction::DeleteSelfColumn).unwrap();
        assert_eq!(sheet.col_count(), 3);

        assert!(sheet.apply_action(0, 1, CellAction::DeleteSelfRow).is_err());
        assert!(sheet.apply_action(1, 0, CellAction::DeleteSelfColumn).is_err());
        assert!(sheet.apply_action(7, 0, CellAction::DeleteSelfRow).is_err());
    }

    #[test]
    fn test_positions_reindexed_after_insert() {
        let mut sheet = people();
        sheet.apply_action(1, 1, CellAction::InsertUpRow).unwrap();
        let ann = sheet.find_cell_by_position(2, 1).unwrap();
        assert_eq!(ann.text(), "Ann");
        assert_eq!((ann.row_index, ann.col_index), (2, 1));
    }

    #[test]
    fn test_from_template_converts_global() {
        let mut template = people().with_name("Character template");
        template.domain = SheetDomain::Global;
        let sheet = Sheet::from_template(&template);
        assert_eq!(sheet.domain, SheetDomain::Chat);
        assert_ne!(sheet.uid, template.uid);
        assert_eq!(sheet.name, "Character table");
        assert_eq!(sheet.template_uid.as_deref(), Some(template.uid.as_str()));
    }

    #[test]
    fn test_table_text_full() {
        let sheet = people().with_config(SheetConfig {
            note: s("who is where"),
            insert_node: s("new person"),
            ..SheetConfig::default()
        });
        let text = sheet.table_text(0, &TextPart::ALL, &[]);
        assert!(text.starts_with("* 0:People\n【Description】who is where\n"));
        assert!(text.contains("rowIndex,0:Name,1:Place\n"));
        assert!(text.contains("0,Ann,Paris\n1,Bob,Rome\n"));
        assert!(text.contains("Insert: new person\n"));
        assert!(!text.contains("Update:"));
    }

    #[test]
    fn test_table_text_required_empty_uses_init_rule() {
        let mut sheet = people().with_required(true).with_config(SheetConfig {
            init_node: s("fill me"),
            insert_node: s("ignored"),
            ..SheetConfig::default()
        });
        sheet.init_hash_sheet();
        let text = sheet.table_text(1, &[TextPart::EditRules], &[]);
        assert_eq!(text, "【Insert/Delete/Update Trigger Conditions】\nInsert: fill me\n\n");
    }

    #[test]
    fn test_table_text_trigger_send_filters_rows() {
        let sheet = people().with_trigger_send(1);
        let chat = vec![
            ChatPiece::new("u", true, "Bob went out"),
            ChatPiece::new("b", false, "Ann waved <tableEdit>Bob</tableEdit>"),
        ];
        let rows = sheet.table_text(0, &[TextPart::Rows], &chat);
        assert_eq!(rows, "0,Ann,Paris");

        let silent = people().with_trigger_send(0);
        assert_eq!(silent.table_text(0, &TextPart::ALL, &chat), "");
    }

    #[test]
    fn test_get_json_contains_content() {
        let json = people().get_json();
        assert_eq!(json["name"], "People");
        assert_eq!(json["content"][1][1], "Ann");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn column_letters(mut col: usize) -> String {
        let mut letters = Vec::new();
        col += 1;
        while col > 0 {
            let rem = (col - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            col = (col - 1) / 26;
        }
        letters.iter().rev().collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_address_round_trip(row in 0usize..5000, col in 0usize..2000) {
            let address = format!("{}{}", column_letters(col), row + 1);
            prop_assert_eq!(parse_cell_address(&address), Some((row, col)));
        }

        #[test]
        fn prop_content_dimensions(cols in 1usize..8, rows in 1usize..8) {
            let sheet = Sheet::new_sheet(cols, rows);
            let content = sheet.get_content(false);
            prop_assert_eq!(content.len(), rows - 1);
            for row in content {
                prop_assert_eq!(row.len(), cols - 1);
            }
        }
    }
}
