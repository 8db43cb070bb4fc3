//! Error types for sheetmem operations

use thiserror::Error;

/// Errors raised by sheet structure and addressing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SheetError {
    #[error("Table index {index} out of range ({len} tables)")]
    TableIndexOutOfRange { index: usize, len: usize },

    #[error("Row index {row} out of range for table {table_index} ({rows} data rows)")]
    RowIndexOutOfRange {
        table_index: usize,
        row: usize,
        rows: usize,
    },

    #[error("Column index {col} out of range ({cols} columns)")]
    ColumnIndexOutOfRange { col: usize, cols: usize },

    #[error("Invalid cell address: {address}")]
    InvalidAddress { address: String },

    #[error("Sheet not found: {uid}")]
    UnknownSheet { uid: String },

    #[error("The header row and row-index column cannot be removed")]
    HeaderProtected,
}

/// Errors raised while turning model text into structure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("No JSON array found in response: {preview}")]
    NoJsonArray { preview: String },

    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Unable to parse table data from response: {preview}")]
    Unrecoverable { preview: String },

    #[error("Unexpected shape: {reason}")]
    UnexpectedShape { reason: String },

    #[error("Invalid prompt template: {reason}")]
    InvalidTemplate { reason: String },
}

/// Reasons an individual edit action is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Action is not an object")]
    NotAnObject,

    #[error("Unknown action kind: {action}")]
    UnknownAction { action: String },

    #[error("tableIndex is not an integer: {value}")]
    InvalidTableIndex { value: String },

    #[error("rowIndex is required for {action}")]
    MissingRowIndex { action: String },

    #[error("rowIndex is not an integer: {value}")]
    InvalidRowIndex { value: String },

    #[error("data key is not a column index: {key}")]
    NonDigitDataKey { key: String },

    #[error("data is not an object")]
    DataNotAnObject,

    #[error("Insert into table {table_index} is missing columns {missing:?}")]
    IncompleteInsert {
        table_index: usize,
        missing: Vec<usize>,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {reason}")]
    Load { reason: String },
}

/// Model invocation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No model configured for the {route} route")]
    ProviderNotConfigured { route: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("All {attempts} attempts failed, last error: {last_error}")]
    AllKeysFailed { attempts: usize, last_error: String },
}

/// Conversation snapshot store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("No persisted sheet snapshot found")]
    SnapshotAbsent,

    #[error("No chat piece can carry the sheet snapshot")]
    NoCurrentPiece,

    #[error("Chat piece {index} out of range ({len} pieces)")]
    PieceIndexOutOfRange { index: usize, len: usize },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Master error type for all sheetmem errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SheetMemError {
    #[error("Sheet error: {0}")]
    Sheet(#[from] SheetError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for sheetmem operations.
pub type SheetMemResult<T> = Result<T, SheetMemError>;

/// Bounded preview of offending text for user-visible messages.
///
/// Cuts on a character boundary so multi-byte text never panics.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_error_wraps_variants() {
        let err: SheetMemError = ParseError::Unrecoverable {
            preview: "oops".to_string(),
        }
        .into();
        assert!(matches!(err, SheetMemError::Parse(_)));
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let text = "시공간시공간";
        assert_eq!(preview(text, 3), "시공간...");
        assert_eq!(preview(text, 10), text);
    }

    #[test]
    fn test_all_keys_failed_message() {
        let err = LlmError::AllKeysFailed {
            attempts: 3,
            last_error: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "All 3 attempts failed, last error: timeout");
    }
}
