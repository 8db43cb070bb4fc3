//! Execution of an ordered edit batch against the waiting tables.
//!
//! Every action is executed on its own: a failed guard or a reference to a
//! missing table or row skips that action and the batch continues.

use sheetmem_core::{ActionKind, EditAction, ValidationError};
use sheetmem_rows::{delete_row, insert_row, update_row, WaitingTables};

/// Checks applied before each action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionGuards {
    /// Only table 0 accepts deletes.
    pub ignore_delete: bool,
    /// Skip updates of rows whose first column is blank.
    pub skip_blank_updates: bool,
    /// Reject inserts that do not fill every column.
    pub require_complete_inserts: bool,
}

impl ExecutionGuards {
    /// Guards of the JSON action array refresh.
    pub fn strict(ignore_delete: bool) -> Self {
        Self {
            ignore_delete,
            skip_blank_updates: true,
            require_complete_inserts: true,
        }
    }

    /// Guards of the `<tableEdit>` step-by-step update.
    pub fn lenient(ignore_delete: bool) -> Self {
        Self {
            ignore_delete,
            ..Self::default()
        }
    }
}

/// What happened to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionReport {
    pub applied: usize,
    pub skipped: usize,
    /// Deletes suppressed by the ignore-delete policy.
    pub ignored_deletes: usize,
}

/// Execute `actions` in order.
pub fn execute_actions(
    waiting: &mut WaitingTables,
    actions: &[EditAction],
    guards: ExecutionGuards,
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    for action in actions {
        match execute_one(waiting, action, guards) {
            Outcome::Applied => report.applied += 1,
            Outcome::Skipped => report.skipped += 1,
            Outcome::Ignored => report.ignored_deletes += 1,
        }
    }
    tracing::info!(
        applied = report.applied,
        skipped = report.skipped,
        ignored_deletes = report.ignored_deletes,
        "Executed edit batch"
    );
    report
}

enum Outcome {
    Applied,
    Skipped,
    Ignored,
}

fn execute_one(waiting: &mut WaitingTables, action: &EditAction, guards: ExecutionGuards) -> Outcome {
    let table_index = action.table_index;
    let applied = match action.kind {
        ActionKind::Update => {
            let Some(row_index) = action.row_index else {
                tracing::warn!(table_index, "Update without rowIndex skipped");
                return Outcome::Skipped;
            };
            if guards.skip_blank_updates && first_cell_blank(waiting, table_index, row_index) {
                tracing::warn!(table_index, row_index, "Update skipped, first column of target row is empty");
                return Outcome::Skipped;
            }
            update_row(waiting, table_index, row_index, &action.data)
        }
        ActionKind::Insert => {
            if guards.require_complete_inserts {
                if let Some(width) = waiting.width(table_index) {
                    let missing: Vec<usize> =
                        (0..width).filter(|c| !action.data.contains_key(c)).collect();
                    if !missing.is_empty() {
                        let reason = ValidationError::IncompleteInsert {
                            table_index,
                            missing,
                        };
                        tracing::warn!(table_index, reason = %reason, "Insert skipped");
                        return Outcome::Skipped;
                    }
                }
            }
            insert_row(waiting, table_index, &action.data).is_some()
        }
        ActionKind::Delete => {
            let Some(row_index) = action.row_index else {
                tracing::warn!(table_index, "Delete without rowIndex skipped");
                return Outcome::Skipped;
            };
            if guards.ignore_delete && table_index != 0 {
                tracing::info!(table_index, row_index, "Delete ignored by policy");
                return Outcome::Ignored;
            }
            delete_row(waiting, table_index, row_index)
        }
    };
    if applied {
        Outcome::Applied
    } else {
        tracing::warn!(
            table_index,
            row_index = ?action.row_index,
            action = action.kind.as_str(),
            "Action skipped, target not found or unchanged"
        );
        Outcome::Skipped
    }
}

/// True when the row is missing or its first cell is blank.
fn first_cell_blank(waiting: &WaitingTables, table_index: usize, row_index: usize) -> bool {
    waiting
        .content(table_index)
        .and_then(|rows| rows.get(row_index).cloned())
        .and_then(|row| row.first().cloned())
        .map_or(true, |cell| cell.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sheetmem_core::LegacyTable;
    use std::collections::BTreeMap;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn tables() -> WaitingTables {
        WaitingTables::from_legacy(vec![
            LegacyTable::new(0, "Time", vec![s("Date"), s("Time")])
                .with_rows(vec![vec![s("2021-09-01"), s("12:00")]]),
            LegacyTable::new(1, "People", vec![s("Name"), s("Place")]).with_rows(vec![
                vec![s("Ann"), s("Paris")],
                vec![s(" "), s("Nowhere")],
            ]),
        ])
    }

    fn row(pairs: &[(usize, &str)]) -> BTreeMap<usize, serde_json::Value> {
        pairs.iter().map(|(k, v)| (*k, json!(v))).collect()
    }

    #[test]
    fn test_ignore_delete_spares_only_table_zero() {
        let mut waiting = tables();
        let actions = vec![EditAction::delete(1, 0), EditAction::delete(0, 0)];
        let report = execute_actions(&mut waiting, &actions, ExecutionGuards::strict(true));
        assert_eq!(report.applied, 1);
        assert_eq!(report.ignored_deletes, 1);
        assert!(waiting.content(0).unwrap().is_empty());
        assert_eq!(waiting.content(1).unwrap().len(), 2);
    }

    #[test]
    fn test_blank_first_column_blocks_update() {
        let mut waiting = tables();
        let actions = vec![EditAction::update(1, 1, row(&[(1, "Rome")]))];
        let report = execute_actions(&mut waiting, &actions, ExecutionGuards::strict(false));
        assert_eq!(report.skipped, 1);
        assert_eq!(waiting.content(1).unwrap()[1][1], "Nowhere");

        let report = execute_actions(&mut waiting, &actions, ExecutionGuards::lenient(false));
        assert_eq!(report.applied, 1);
        assert_eq!(waiting.content(1).unwrap()[1][1], "Rome");
    }

    #[test]
    fn test_incomplete_insert_rejected_when_strict() {
        let mut waiting = tables();
        let actions = vec![EditAction::insert(1, row(&[(0, "Bob")]))];
        let report = execute_actions(&mut waiting, &actions, ExecutionGuards::strict(false));
        assert_eq!(report.skipped, 1);
        assert_eq!(waiting.content(1).unwrap().len(), 2);

        let report = execute_actions(&mut waiting, &actions, ExecutionGuards::lenient(false));
        assert_eq!(report.applied, 1);
        assert_eq!(waiting.content(1).unwrap()[2], vec![s("Bob"), s("")]);
    }

    #[test]
    fn test_missing_targets_are_skipped_and_batch_continues() {
        let mut waiting = tables();
        let actions = vec![
            EditAction::update(5, 0, row(&[(0, "x")])),
            EditAction::delete(0, 9),
            EditAction::insert(0, row(&[(0, "2021-09-02"), (1, "08:00")])),
        ];
        let report = execute_actions(&mut waiting, &actions, ExecutionGuards::strict(false));
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(waiting.content(0).unwrap().len(), 2);
    }
}
