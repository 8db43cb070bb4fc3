//! sheetmem Core - Sheet and Snapshot Types
//!
//! Cells, sheets, chat pieces, edit actions, settings and the shared error
//! taxonomy used by every other sheetmem crate.

pub mod action;
pub mod cell;
pub mod config;
pub mod error;
pub mod message;
pub mod piece;
pub mod sheet;
pub mod table;

pub use action::{ActionKind, EditAction};
pub use cell::{Cell, CellValue};
pub use config::{ParseType, RebuildTemplate, SettingsResolver, TableSettings, REBUILD_BASE};
pub use error::{
    preview, ConfigError, LlmError, ParseError, SheetError, SheetMemError, SheetMemResult,
    StorageError, ValidationError,
};
pub use message::ChatMessage;
pub use piece::{ChatPiece, HashGrid, SheetContext};
pub use sheet::{
    latest_chat_text, parse_cell_address, strip_table_edit, CellAction, Sheet, SheetConfig,
    SheetDomain, TextPart,
};
pub use table::{ChangeMarkers, LegacyTable, MarkedTable};

/// Random alphanumeric string of `len` characters.
pub fn generate_random_string(len: usize) -> String {
    use rand::Rng;

    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
