//! sheetmem Storage - Conversation Snapshot Store
//!
//! The conversation (a list of chat pieces) and its chat-level sheet context
//! live with the host. This crate defines the async boundary the
//! orchestrator reads and writes them through, plus an in-memory store.
//!
//! A run assumes it is the only writer for its conversation between reading
//! the snapshot and committing. Nothing here enforces that.

use async_trait::async_trait;
use sheetmem_core::{ChatPiece, Sheet, SheetContext, SheetMemResult, StorageError};
use std::sync::{Arc, RwLock};

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Async access to one conversation's pieces and sheet context.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Every piece of the conversation, oldest first.
    async fn chat(&self) -> SheetMemResult<Vec<ChatPiece>>;

    /// Replace the piece at `index`.
    ///
    /// # Errors
    /// `StorageError::PieceIndexOutOfRange` when there is no such piece.
    async fn save_piece(&self, index: usize, piece: ChatPiece) -> SheetMemResult<()>;

    async fn sheet_context(&self) -> SheetMemResult<SheetContext>;

    async fn save_sheet_context(&self, context: SheetContext) -> SheetMemResult<()>;

    /// Newest piece carrying a sheet snapshot, with its index.
    async fn last_sheets_piece(&self) -> SheetMemResult<Option<(usize, ChatPiece)>> {
        let chat = self.chat().await?;
        Ok(chat
            .into_iter()
            .enumerate()
            .rev()
            .find(|(_, piece)| piece.has_sheets()))
    }

    /// Newest piece not sent by the user, with its index.
    async fn current_piece(&self) -> SheetMemResult<Option<(usize, ChatPiece)>> {
        let chat = self.chat().await?;
        Ok(chat
            .into_iter()
            .enumerate()
            .rev()
            .find(|(_, piece)| !piece.is_user))
    }

    /// Sheets of the latest persisted snapshot, in context order.
    ///
    /// # Errors
    /// `StorageError::SnapshotAbsent` when no piece carries sheets.
    async fn latest_sheets(&self) -> SheetMemResult<Vec<Sheet>> {
        let Some((_, piece)) = self.last_sheets_piece().await? else {
            return Err(StorageError::SnapshotAbsent.into());
        };
        let context = self.sheet_context().await?;
        Ok(context.hash_sheets_to_sheets(&piece))
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct ConversationState {
    chat: Vec<ChatPiece>,
    context: SheetContext,
}

/// In-memory conversation store.
///
/// Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConversationStore {
    state: Arc<RwLock<ConversationState>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat(chat: Vec<ChatPiece>, context: SheetContext) -> Self {
        Self {
            state: Arc::new(RwLock::new(ConversationState { chat, context })),
        }
    }

    /// Append a piece and return its index.
    pub fn push_piece(&self, piece: ChatPiece) -> SheetMemResult<usize> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.chat.push(piece);
        Ok(state.chat.len() - 1)
    }

    pub fn piece_count(&self) -> usize {
        self.state.read().map(|s| s.chat.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn chat(&self) -> SheetMemResult<Vec<ChatPiece>> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.chat.clone())
    }

    async fn save_piece(&self, index: usize, piece: ChatPiece) -> SheetMemResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let len = state.chat.len();
        let slot = state
            .chat
            .get_mut(index)
            .ok_or(StorageError::PieceIndexOutOfRange { index, len })?;
        *slot = piece;
        tracing::debug!(index, "saved chat piece");
        Ok(())
    }

    async fn sheet_context(&self) -> SheetMemResult<SheetContext> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.context.clone())
    }

    async fn save_sheet_context(&self, context: SheetContext) -> SheetMemResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.context = context;
        Ok(())
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_last_sheets_piece_is_newest_with_sheets(flags in prop::collection::vec(any::<bool>(), 0..10)) {
            let mut context = SheetContext::new();
            let sheet = Sheet::new_sheet(2, 2);
            let chat: Vec<ChatPiece> = flags
                .iter()
                .map(|has| {
                    let mut piece = ChatPiece::new("bot", false, "m");
                    if *has {
                        sheet.save(&mut context, Some(&mut piece));
                    }
                    piece
                })
                .collect();
            let store = InMemoryConversationStore::with_chat(chat, context);
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let found = runtime.block_on(store.last_sheets_piece()).unwrap().map(|(i, _)| i);
            prop_assert_eq!(found, flags.iter().rposition(|has| *has));
        }
    }
}
