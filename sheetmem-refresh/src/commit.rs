//! Writing edited sheets back into the conversation snapshot.

use sheetmem_core::{ChatPiece, LegacyTable, Sheet, SheetContext, SheetMemResult, StorageError};
use sheetmem_storage::ConversationStore;

/// The piece a run writes its snapshot into, with the context it updates.
#[derive(Debug, Clone)]
pub struct CommitTarget {
    pub index: usize,
    pub piece: ChatPiece,
    pub context: SheetContext,
}

impl CommitTarget {
    /// Target the newest piece not sent by the user.
    ///
    /// # Errors
    /// `StorageError::NoCurrentPiece` when every piece is a user message.
    pub async fn current(store: &dyn ConversationStore) -> SheetMemResult<Self> {
        let (index, piece) = store
            .current_piece()
            .await?
            .ok_or(StorageError::NoCurrentPiece)?;
        Self::load(store, index, piece).await
    }

    /// Target the piece at `index`.
    ///
    /// # Errors
    /// `StorageError::PieceIndexOutOfRange` when there is no such piece.
    pub async fn at(store: &dyn ConversationStore, index: usize) -> SheetMemResult<Self> {
        let chat = store.chat().await?;
        let len = chat.len();
        let piece = chat
            .into_iter()
            .nth(index)
            .ok_or(StorageError::PieceIndexOutOfRange { index, len })?;
        Self::load(store, index, piece).await
    }

    async fn load(store: &dyn ConversationStore, index: usize, piece: ChatPiece) -> SheetMemResult<Self> {
        Ok(Self {
            index,
            piece,
            context: store.sheet_context().await?,
        })
    }

    /// Save `sheets` into the context and the target piece, then persist both.
    pub async fn commit(mut self, store: &dyn ConversationStore, sheets: &[Sheet]) -> SheetMemResult<()> {
        for sheet in sheets {
            sheet.save(&mut self.context, Some(&mut self.piece));
        }
        let index = self.index;
        self.persist(store).await?;
        tracing::info!(piece = index, sheets = sheets.len(), "Committed sheet snapshot");
        Ok(())
    }

    /// Persist the context and the piece as they are.
    pub async fn persist(self, store: &dyn ConversationStore) -> SheetMemResult<()> {
        store.save_sheet_context(self.context).await?;
        store.save_piece(self.index, self.piece).await
    }
}

/// Replace the content of the sheets at `positions` with rebuilt tables.
///
/// Table `i` goes into the sheet at `positions[i]`. Sheet names are kept,
/// so a table renamed by the model keeps its old name. Tables without a
/// matching sheet are dropped.
///
/// # Returns
/// Number of sheets whose content was replaced.
pub fn apply_rebuilt_tables(sheets: &mut [Sheet], positions: &[usize], tables: &[LegacyTable]) -> usize {
    if tables.len() > positions.len() {
        tracing::warn!(
            tables = tables.len(),
            sheets = positions.len(),
            "Rebuild returned more tables than sheets, extra tables dropped"
        );
    }
    let mut replaced = 0;
    for (table, position) in tables.iter().zip(positions) {
        let Some(sheet) = sheets.get_mut(*position) else {
            continue;
        };
        sheet.replace_content(&table.columns, &table.content);
        replaced += 1;
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmem_core::SheetMemError;
    use sheetmem_storage::InMemoryConversationStore;
    use sheetmem_test_utils::fixtures::{sample_sheet, sample_store, timeline_sheet};

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_apply_keeps_names_and_skips_disabled_positions() {
        let mut sheets = vec![timeline_sheet(), sample_sheet()];
        let renamed = LegacyTable::new(0, "Renamed", vec![s("Name"), s("Place")])
            .with_rows(vec![vec![s("Cid"), s("Oslo")]]);
        let replaced = apply_rebuilt_tables(&mut sheets, &[1], &[renamed.clone(), renamed]);
        assert_eq!(replaced, 1);
        assert_eq!(sheets[1].name, "People");
        assert_eq!(sheets[1].get_body(), vec![vec![s("Cid"), s("Oslo")]]);
        assert!(sheets[0].is_empty());
    }

    #[tokio::test]
    async fn test_commit_writes_current_piece() {
        let store = sample_store();
        let mut sheets = store.latest_sheets().await.unwrap();
        sheets[0]
            .replace_content(&[s("Date"), s("Time"), s("Event")], &[vec![s("d"), s("t"), s("e")]]);
        let target = CommitTarget::current(&store).await.unwrap();
        assert_eq!(target.index, 3);
        target.commit(&store, &sheets).await.unwrap();

        let (index, _) = store.last_sheets_piece().await.unwrap().unwrap();
        assert_eq!(index, 3);
        let latest = store.latest_sheets().await.unwrap();
        assert_eq!(latest[0].get_body(), vec![vec![s("d"), s("t"), s("e")]]);
    }

    #[tokio::test]
    async fn test_no_current_piece() {
        let store = InMemoryConversationStore::new();
        store.push_piece(ChatPiece::new("User", true, "hi")).unwrap();
        let err = CommitTarget::current(&store).await.unwrap_err();
        assert_eq!(err, SheetMemError::Storage(StorageError::NoCurrentPiece));
        assert!(CommitTarget::at(&store, 4).await.is_err());
    }
}
