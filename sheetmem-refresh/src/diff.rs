//! Change markers between the tables before and after a rebuild.
//!
//! Markers only drive highlighting; they never change table content.

use sheetmem_core::{ChangeMarkers, LegacyTable, MarkedTable};

/// Mark rebuilt tables against the tables they replace, matched by position.
///
/// Rows past the old row count are marked inserted. For rows present in
/// both, every old cell whose value differs (or is gone) is marked updated
/// as `"row-col"`. A table with no old counterpart is all inserted rows.
pub fn compare_and_mark_changes(old: &[LegacyTable], new: &[LegacyTable]) -> Vec<MarkedTable> {
    new.iter()
        .enumerate()
        .map(|(index, table)| MarkedTable {
            table: table.clone(),
            markers: mark_table(old.get(index), table),
        })
        .collect()
}

fn mark_table(old: Option<&LegacyTable>, new: &LegacyTable) -> ChangeMarkers {
    let old_rows: &[Vec<String>] = old.map_or(&[], |t| &t.content);
    let mut markers = ChangeMarkers::default();

    markers
        .inserted_rows
        .extend(old_rows.len()..new.content.len());

    for (row, (old_row, new_row)) in old_rows.iter().zip(&new.content).enumerate() {
        for (col, old_cell) in old_row.iter().enumerate() {
            if new_row.get(col) != Some(old_cell) {
                markers.updated_rows.insert(format!("{}-{}", row, col));
            }
        }
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> LegacyTable {
        LegacyTable::new(0, "T", vec!["a".to_string(), "b".to_string()]).with_rows(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_marks_inserted_and_updated() {
        let old = table(&[&["1", "x"], &["2", "y"]]);
        let new = table(&[&["1", "x"], &["2", "z"], &["3", "w"]]);
        let marked = compare_and_mark_changes(&[old], &[new.clone()]);
        assert_eq!(marked[0].table, new);
        assert_eq!(marked[0].markers.inserted_rows.iter().copied().collect::<Vec<_>>(), vec![2]);
        assert!(marked[0].markers.is_cell_updated(1, 1));
        assert_eq!(marked[0].markers.updated_rows.len(), 1);
    }

    #[test]
    fn test_shorter_row_marks_missing_cells() {
        let old = table(&[&["1", "x"]]);
        let new = table(&[&["1"]]);
        let marked = compare_and_mark_changes(&[old], &[new]);
        assert!(marked[0].markers.is_cell_updated(0, 1));
        assert!(marked[0].markers.inserted_rows.is_empty());
    }

    #[test]
    fn test_table_without_old_counterpart() {
        let new = table(&[&["1", "x"], &["2", "y"]]);
        let marked = compare_and_mark_changes(&[], &[new]);
        assert_eq!(marked[0].markers.inserted_rows.len(), 2);
        assert!(marked[0].markers.updated_rows.is_empty());
    }

    #[test]
    fn test_identical_tables_have_no_markers() {
        let old = table(&[&["1", "x"]]);
        let marked = compare_and_mark_changes(&[old.clone()], &[old]);
        assert!(marked[0].markers.is_empty());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use sheetmem_test_utils::generators::arb_legacy_table;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_markers_never_change_content(
            old in arb_legacy_table(),
            new in arb_legacy_table(),
        ) {
            let marked = compare_and_mark_changes(&[old.clone()], &[new.clone()]);
            prop_assert_eq!(&marked[0].table, &new);
            let expected_inserted = new.content.len().saturating_sub(old.content.len());
            prop_assert_eq!(marked[0].markers.inserted_rows.len(), expected_inserted);
        }
    }
}
