//! sheetmem Parse - Model Output Parsing
//!
//! Turns raw model text into structure. Two response formats are handled:
//!
//! ```text
//! Full rebuild:   raw text → cleaner → staged repair → Vec<LegacyTable>
//! Incremental:    raw text → cleaner → pre-clean → JSON5 → validate → dedup/order
//!                 raw text → <tableEdit> blocks → insertRow/updateRow/deleteRow calls → validate
//! ```

pub mod actions;
pub mod cleaner;
pub mod edit_tag;
pub mod json5;
pub mod table_format;

pub use actions::{
    dedup_and_order, incremental_preclean, parse_action_array, validate_action, validate_actions,
};
pub use cleaner::{clean_api_response, CleanOptions};
pub use edit_tag::{extract_table_edit, parse_edit_calls, parse_table_edit, strip_message_tags};
pub use table_format::{
    parse_rebuild_tables, parse_table_array, table_data_to_tables, RepairStage, FATAL_PREVIEW_CHARS,
};
