//! Read-only table queries for other extensions.
//!
//! Both queries read the latest persisted snapshot through the store and
//! only return enabled sheets. With no snapshot they return nothing.

use serde::Serialize;
use sheetmem_core::{Sheet, SheetMemError, SheetMemResult, StorageError};
use sheetmem_storage::ConversationStore;
use std::collections::BTreeMap;

/// A sheet as its name and full value matrix, header row first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedTable {
    pub name: String,
    pub data: Vec<Vec<String>>,
}

/// One entry of the uid-keyed export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedTable {
    pub uid: String,
    pub name: String,
    /// Full grid values, row-index column included.
    pub content: Vec<Vec<String>>,
}

/// Every enabled sheet as a name and its header plus body rows.
pub async fn get_all_tables(store: &dyn ConversationStore) -> SheetMemResult<Vec<NamedTable>> {
    Ok(enabled_sheets(store)
        .await?
        .into_iter()
        .map(|sheet| {
            let mut data = Vec::with_capacity(sheet.row_count());
            data.push(sheet.get_header());
            data.extend(sheet.get_body());
            NamedTable {
                name: sheet.name,
                data,
            }
        })
        .collect())
}

/// Every enabled sheet keyed by uid, all cells as strings.
pub async fn export_all_tables_as_json(
    store: &dyn ConversationStore,
) -> SheetMemResult<BTreeMap<String, ExportedTable>> {
    Ok(enabled_sheets(store)
        .await?
        .into_iter()
        .map(|sheet| {
            let entry = ExportedTable {
                uid: sheet.uid.clone(),
                name: sheet.name.clone(),
                content: sheet.get_content(true),
            };
            (sheet.uid, entry)
        })
        .collect())
}

async fn enabled_sheets(store: &dyn ConversationStore) -> SheetMemResult<Vec<Sheet>> {
    match store.latest_sheets().await {
        Ok(sheets) => Ok(sheets.into_iter().filter(|s| s.enable).collect()),
        Err(SheetMemError::Storage(StorageError::SnapshotAbsent)) => {
            tracing::warn!("No table snapshot to export");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmem_storage::InMemoryConversationStore;
    use sheetmem_test_utils::fixtures::sample_store;

    #[tokio::test]
    async fn test_get_all_tables_has_header_first() {
        let store = sample_store();
        let tables = get_all_tables(&store).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].name, "People");
        assert_eq!(tables[1].data[0], vec!["Name", "Place"]);
        assert_eq!(tables[1].data[2], vec!["Bob", "Rome"]);
    }

    #[tokio::test]
    async fn test_export_is_keyed_by_uid() {
        let store = sample_store();
        let exported = export_all_tables_as_json(&store).await.unwrap();
        assert_eq!(exported.len(), 2);
        for (uid, table) in &exported {
            assert_eq!(uid, &table.uid);
        }
        let json = serde_json::to_value(&exported).unwrap();
        assert!(json.as_object().unwrap().values().all(|t| t["content"].is_array()));
    }

    #[tokio::test]
    async fn test_disabled_sheets_are_left_out() {
        let store = sample_store();
        let (index, mut piece) = store.last_sheets_piece().await.unwrap().unwrap();
        let mut context = store.sheet_context().await.unwrap();
        let mut sheets = context.hash_sheets_to_sheets(&piece);
        sheets[0].enable = false;
        for sheet in &sheets {
            sheet.save(&mut context, Some(&mut piece));
        }
        store.save_sheet_context(context).await.unwrap();
        store.save_piece(index, piece).await.unwrap();

        let tables = get_all_tables(&store).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "People");
    }

    #[tokio::test]
    async fn test_no_snapshot_exports_nothing() {
        let store = InMemoryConversationStore::new();
        assert!(get_all_tables(&store).await.unwrap().is_empty());
        assert!(export_all_tables_as_json(&store).await.unwrap().is_empty());
    }
}
