//! sheetmem Test Utilities
//!
//! Shared test infrastructure for the sheetmem workspace:
//! - Proptest generators for cells, sheets, tables and edit actions
//! - The scripted mock model and the in-memory store
//! - Fixtures for common conversations
//! - Assertions on sheetmem error variants

// Re-export test doubles from their source crates
pub use sheetmem_llm::{MockChatModel, ModelReply};
pub use sheetmem_storage::InMemoryConversationStore;

// Re-export core types for convenience
pub use sheetmem_core::{
    ActionKind, ChatPiece, EditAction, LegacyTable, ParseError, Sheet, SheetContext, SheetError,
    SheetMemError, SheetMemResult, StorageError, TableSettings, ValidationError,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating sheetmem values.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;
    use std::collections::BTreeMap;

    /// Cell text that survives every serialization used in prompts.
    ///
    /// No commas, quotes, colons or brackets, and no surrounding whitespace.
    pub fn arb_cell_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9가-힣 ]{0,12}".prop_map(|s| s.trim().to_string())
    }

    /// Non-empty column header.
    pub fn arb_header() -> impl Strategy<Value = String> {
        "[A-Z][a-z0-9]{0,7}"
    }

    /// A table of 1..5 columns and 0..6 rows, every row as wide as the header.
    pub fn arb_legacy_table() -> impl Strategy<Value = LegacyTable> {
        (1usize..5, 0usize..6)
            .prop_flat_map(|(cols, rows)| {
                (
                    "[A-Z][a-z]{2,8}",
                    prop::collection::vec(arb_header(), cols),
                    prop::collection::vec(prop::collection::vec(arb_cell_text(), cols), rows),
                )
            })
            .prop_map(|(name, columns, content)| {
                LegacyTable::new(0, name, columns).with_rows(content)
            })
    }

    /// A chat sheet built from a generated table.
    pub fn arb_sheet() -> impl Strategy<Value = Sheet> {
        arb_legacy_table().prop_map(|table| {
            Sheet::from_content(table.table_name, &table.columns, &table.content)
        })
    }

    pub fn arb_action_kind() -> impl Strategy<Value = ActionKind> {
        prop_oneof![
            Just(ActionKind::Insert),
            Just(ActionKind::Update),
            Just(ActionKind::Delete),
        ]
    }

    fn arb_action_data(max_col: usize) -> impl Strategy<Value = BTreeMap<usize, Value>> {
        prop::collection::btree_map(0..max_col.max(1), arb_cell_text().prop_map(Value::String), 0..4)
    }

    /// A well-formed action addressing tables below `tables` and rows below `rows`.
    pub fn arb_edit_action(tables: usize, rows: usize) -> impl Strategy<Value = EditAction> {
        (
            arb_action_kind(),
            0..tables.max(1),
            0..rows.max(1),
            arb_action_data(4),
        )
            .prop_map(|(kind, table, row, data)| match kind {
                ActionKind::Insert => EditAction::insert(table, data),
                ActionKind::Update => EditAction::update(table, row, data),
                ActionKind::Delete => EditAction::delete(table, row),
            })
    }

    pub fn arb_chat_piece() -> impl Strategy<Value = ChatPiece> {
        ("[A-Za-z]{1,8}", any::<bool>(), "[a-zA-Z0-9 .]{0,60}")
            .prop_map(|(name, is_user, mes)| ChatPiece::new(name, is_user, mes))
    }

    pub fn arb_chat(max_len: usize) -> impl Strategy<Value = Vec<ChatPiece>> {
        prop::collection::vec(arb_chat_piece(), 0..max_len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    fn s(v: &str) -> String {
        v.to_string()
    }

    /// Two-row "People" sheet with Name and Place columns.
    pub fn sample_sheet() -> Sheet {
        Sheet::from_content(
            "People",
            &[s("Name"), s("Place")],
            &[vec![s("Ann"), s("Paris")], vec![s("Bob"), s("Rome")]],
        )
    }

    /// Empty "Timeline" sheet with Date, Time and Event columns.
    pub fn timeline_sheet() -> Sheet {
        Sheet::from_content("Timeline", &[s("Date"), s("Time"), s("Event")], &[])
    }

    /// Sheet context holding the timeline and people sheets, and the piece
    /// carrying their snapshot.
    pub fn sample_context() -> (SheetContext, ChatPiece) {
        let mut context = SheetContext::new();
        let mut piece = ChatPiece::new("Narrator", false, "Ann arrived in Paris at dawn.");
        timeline_sheet().save(&mut context, Some(&mut piece));
        sample_sheet().save(&mut context, Some(&mut piece));
        (context, piece)
    }

    /// Short conversation whose second message carries the sample snapshot.
    pub fn sample_chat() -> (Vec<ChatPiece>, SheetContext) {
        let (context, piece) = sample_context();
        let chat = vec![
            ChatPiece::new("User", true, "Where did Ann go?"),
            piece,
            ChatPiece::new("User", true, "And then?"),
            ChatPiece::new("Narrator", false, "Bob met her in Rome the next day."),
        ];
        (chat, context)
    }

    /// In-memory store seeded with [`sample_chat`].
    pub fn sample_store() -> InMemoryConversationStore {
        let (chat, context) = sample_chat();
        InMemoryConversationStore::with_chat(chat, context)
    }

    /// Settings that never prompt and never throttle.
    pub fn silent_settings() -> TableSettings {
        TableSettings {
            bool_silent_refresh: true,
            lazy_cooldown_ms: 0,
            ..TableSettings::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion functions for sheetmem-specific validation.

    use super::*;

    /// Assert that a SheetMemResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &SheetMemResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a SheetMemResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &SheetMemResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_parse_error<T: std::fmt::Debug>(result: &SheetMemResult<T>) {
        match result {
            Err(SheetMemError::Parse(_)) => {}
            other => panic!("Expected Parse error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &SheetMemResult<T>) {
        match result {
            Err(SheetMemError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_sheet_error<T: std::fmt::Debug>(result: &SheetMemResult<T>) {
        match result {
            Err(SheetMemError::Sheet(_)) => {}
            other => panic!("Expected Sheet error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_llm_error<T: std::fmt::Debug>(result: &SheetMemResult<T>) {
        match result {
            Err(SheetMemError::Llm(_)) => {}
            other => panic!("Expected Llm error, got: {:?}", other),
        }
    }

    /// Assert that a SheetMemResult is the missing snapshot storage error.
    #[track_caller]
    pub fn assert_snapshot_absent<T: std::fmt::Debug>(result: &SheetMemResult<T>) {
        match result {
            Err(SheetMemError::Storage(StorageError::SnapshotAbsent)) => {}
            other => panic!("Expected SnapshotAbsent error, got: {:?}", other),
        }
    }

    /// Assert that two sheets hold the same data rows.
    #[track_caller]
    pub fn assert_same_body(left: &Sheet, right: &Sheet) {
        assert_eq!(
            left.get_content(false),
            right.get_content(false),
            "Sheet bodies differ ({} vs {})",
            left.name,
            right.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::assertions::*;
    use super::fixtures::*;
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sample_context_round_trips_sheets() {
        let (context, piece) = sample_context();
        let sheets = context.hash_sheets_to_sheets(&piece);
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].name, "Timeline");
        assert_same_body(&sheets[1], &sample_sheet());
    }

    #[test]
    fn test_assertions() {
        let ok: SheetMemResult<()> = Ok(());
        assert_ok(&ok);
        let err: SheetMemResult<()> = Err(StorageError::SnapshotAbsent.into());
        assert_err(&err);
        assert_snapshot_absent(&err);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_cell_text_is_prompt_safe(text in arb_cell_text()) {
            prop_assert_eq!(text.trim(), text.as_str());
            prop_assert!(!text.contains(|c| matches!(c, ',' | '"' | '\'' | ':' | '[' | ']')));
        }

        #[test]
        fn prop_arb_sheet_keeps_generated_shape(table in arb_legacy_table()) {
            let sheet = Sheet::from_content(table.table_name.clone(), &table.columns, &table.content);
            prop_assert_eq!(sheet.get_header(), table.columns);
            prop_assert_eq!(sheet.get_content(false), table.content);
        }
    }
}
