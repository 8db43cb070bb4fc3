//! Full-rebuild response parsing.
//!
//! The model answers a rebuild with an array of `{tableName, tableIndex,
//! columns, content}` objects. Parsing runs through escalating repair stages
//! and only gives up, fatally, when none of them yields an array.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sheetmem_core::{preview, LegacyTable, ParseError};

use crate::cleaner::{clean_api_response, strip_code_fences, CleanOptions};
use crate::json5;

/// Characters of raw response quoted in fatal errors.
pub const FATAL_PREVIEW_CHARS: usize = 300;

// Repair pass
static SPACE_BEFORE_QUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([a-zA-Z0-9_])\s*""#).expect("Invalid space-before-quote regex"));
static UNQUOTED_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#":\s*([^"{\[]+)(\s*[,}])"#).expect("Invalid unquoted value regex"));
static QUOTED_TABLE_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""tableIndex":\s*"(\d+)""#).expect("Invalid tableIndex regex"));
static CONCATENATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""\s*\+\s*""#).expect("Invalid concatenation regex"));
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\{|,)\s*([a-zA-Z_]+)\s*:").expect("Invalid bare key regex"));
static QUOTED_NUMERIC_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(\d+)":"#).expect("Invalid numeric key regex"));

// Deep clean pass
static ANY_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(['"])?([a-zA-Z0-9_]+)(['"])?:"#).expect("Invalid key regex")
});
static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"//.*?\n").expect("Invalid line comment regex"));
static MISSING_QUOTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([:,])\s*([^"{\[\s-]+)(\s*[}\]])"#).expect("Invalid missing quotes regex")
});
static TRAILING_COMMA_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\]").expect("Invalid trailing comma regex"));
static ADJACENT_OBJECTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\}\s*\{").expect("Invalid adjacent objects regex"));

// ============================================================================
// STAGED PARSE
// ============================================================================

/// Stage that produced the parsed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    /// Cleaned text parsed as is.
    Primary,
    /// Parsed after the regex repair pass.
    Repaired,
    /// Parsed after the repair and deep clean passes.
    DeepCleaned,
    /// Parsed from the first string-aware balanced `[`...`]` span.
    BalancedSpan,
}

/// Parse a rebuild response into normalized tables.
///
/// # Errors
/// [`ParseError::Unrecoverable`] carrying a bounded preview of `raw` when no
/// stage yields a JSON array. Callers abort the rebuild on this error.
pub fn parse_rebuild_tables(raw: &str) -> Result<Vec<LegacyTable>, ParseError> {
    let (values, stage) = parse_table_array(raw)?;
    tracing::debug!(stage = ?stage, tables = values.len(), "parsed rebuild response");
    Ok(table_data_to_tables(&values))
}

/// Run the repair stages and return the raw array with the stage that won.
pub fn parse_table_array(raw: &str) -> Result<(Vec<Value>, RepairStage), ParseError> {
    if let Some(cleaned) = clean_api_response(raw, &CleanOptions::default()) {
        if let Some(values) = parse_array(&cleaned) {
            return Ok((values, RepairStage::Primary));
        }

        let repaired = repair_table_text(&cleaned);
        if let Some(values) = parse_array(&repaired) {
            return Ok((values, RepairStage::Repaired));
        }
        if let Some(values) = parse_array(&deep_clean(&repaired)) {
            return Ok((values, RepairStage::DeepCleaned));
        }
    }

    let unfenced = strip_code_fences(raw);
    if let Some(values) = extract_balanced_array(&unfenced).and_then(parse_array) {
        return Ok((values, RepairStage::BalancedSpan));
    }

    let shown = preview(raw, FATAL_PREVIEW_CHARS);
    tracing::error!(preview = %shown, "rebuild response could not be parsed into tables");
    Err(ParseError::Unrecoverable { preview: shown })
}

fn parse_array(text: &str) -> Option<Vec<Value>> {
    match json5::parse(text) {
        Ok(Value::Array(items)) => Some(items),
        Ok(other) => {
            tracing::debug!(kind = %value_kind(&other), "rebuild candidate is not an array");
            None
        }
        Err(e) => {
            tracing::debug!(error = %e, "rebuild candidate failed to parse");
            None
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// REPAIR PASSES
// ============================================================================

/// Heuristic repair of common table formatting mistakes.
///
/// In order: whitespace before a closing quote, unquoted scalar values,
/// quoted `tableIndex`, `"a" + "b"` concatenation, literal `\n` escapes,
/// bare keys, quoted numeric keys.
pub fn repair_table_text(text: &str) -> String {
    let text = SPACE_BEFORE_QUOTE.replace_all(text, r#"${1}""#);
    let text = UNQUOTED_VALUE.replace_all(&text, r#": "${1}"${2}"#);
    let text = QUOTED_TABLE_INDEX.replace_all(&text, r#""tableIndex": ${1}"#);
    let text = CONCATENATION.replace_all(&text, "");
    let text = text.replace("\\n", "");
    let text = BARE_KEY.replace_all(&text, r#"${1}"${2}":"#);
    QUOTED_NUMERIC_KEY.replace_all(&text, "${1}:").into_owned()
}

/// Last regex pass before giving up on the cleaned text.
pub fn deep_clean(text: &str) -> String {
    let text = ANY_KEY.replace_all(text, r#""${2}":"#);
    let text = LINE_COMMENT.replace_all(&text, "");
    let text = MISSING_QUOTES.replace_all(&text, r#"${1} "${2}"${3}"#);
    let text = text.replace('\'', "\"");
    let text = SPACE_BEFORE_QUOTE.replace_all(&text, r#"${1}""#);
    let text = TRAILING_COMMA_ARRAY.replace_all(&text, "]");
    ADJACENT_OBJECTS.replace_all(&text, "},{").into_owned()
}

/// First `[`...`]` span whose brackets balance, skipping string contents.
///
/// Returns `None` if there is no `[`, the span never closes, or the span is
/// not valid lenient JSON.
pub fn extract_balanced_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let span = &text[start..start + offset + 1];
                    return match json5::parse(span) {
                        Ok(_) => Some(span),
                        Err(e) => {
                            tracing::warn!(error = %e, "balanced span is not valid JSON");
                            None
                        }
                    };
                }
            }
            _ => {}
        }
    }
    None
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize parsed table values.
///
/// Columns become strings, or `"Column N"` inferred from the first row when
/// missing. Rows are aligned to the column count with trimmed text and `""`
/// for gaps. A non-object entry becomes an empty placeholder table.
pub fn table_data_to_tables(values: &[Value]) -> Vec<LegacyTable> {
    values
        .iter()
        .enumerate()
        .map(|(position, value)| normalize_table(position, value))
        .collect()
}

fn normalize_table(position: usize, value: &Value) -> LegacyTable {
    let Some(object) = value.as_object() else {
        tracing::error!(position, "table entry is not an object");
        return LegacyTable::new(position, format!("Invalid table (index {})", position), Vec::new());
    };

    let table_name = object
        .get("tableName")
        .map(value_to_text)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Unnamed table".to_string());
    let table_index = object.get("tableIndex").map(parse_index).unwrap_or(0);

    let content = object.get("content").and_then(Value::as_array);
    if content.is_none() {
        tracing::error!(table = %table_name, "table content is not an array");
    }

    let columns: Vec<String> = match object.get("columns") {
        Some(Value::Array(columns)) => columns.iter().map(value_to_text).collect(),
        other => {
            tracing::error!(table = %table_name, found = ?other, "table columns is not an array");
            infer_columns(content.map(Vec::as_slice).unwrap_or_default())
        }
    };

    let width = columns.len();
    let rows = content
        .map(|rows| rows.iter().map(|row| align_row(row, width)).collect())
        .unwrap_or_default();

    LegacyTable::new(table_index, table_name, columns).with_rows(rows)
}

fn infer_columns(content: &[Value]) -> Vec<String> {
    match content.first() {
        Some(Value::Array(first)) => (1..=first.len()).map(|n| format!("Column {}", n)).collect(),
        _ => Vec::new(),
    }
}

fn align_row(row: &Value, width: usize) -> Vec<String> {
    let cells: Vec<Value> = match row {
        Value::Null => Vec::new(),
        Value::Array(cells) => cells.clone(),
        scalar => vec![scalar.clone()],
    };
    (0..width)
        .map(|i| cells.get(i).map(|cell| value_to_text(cell).trim().to_string()).unwrap_or_default())
        .collect()
}

/// Integer prefix of a number or numeric string; anything else is 0.
fn parse_index(value: &Value) -> usize {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize)
            .unwrap_or(0),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        }
        _ => 0,
    }
}

pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
