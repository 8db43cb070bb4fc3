//! Response cleaner.
//!
//! Turns raw model text into a best-effort JSON array string through an
//! ordered list of string passes. Each pass is a pure function so it can be
//! tested on its own; [`clean_api_response`] runs the enabled ones in order.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```json|```").expect("Invalid code fence regex"));

static OBJECT_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([{,]\s*)(?:"?([a-zA-Z_][a-zA-Z0-9_]*)"?\s*:)"#).expect("Invalid object key regex")
});

static TABLE_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"["“”]tableName["“”]\s*:\s*["“”](.+?)["“”]\s*,\s*["“”]tableIndex["“”]\s*:\s*(\d+)\s*,\s*["“”]columns["“”]?"#,
    )
    .expect("Invalid table head regex")
});

static COLUMNS_CONTENT_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"["“”]columns["“”]\s*:\s*(\[.*?\])\s*,\s*["“”]content["“”]\s*:\s*(\[(?:\[.*?\](?:,\s*\[.*?\])*)?\])"#,
    )
    .expect("Invalid columns/content regex")
});

static BLOCK_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\*.*?\*/").expect("Invalid block comment regex"));

// ============================================================================
// OPTIONS
// ============================================================================

/// Toggles for the individual cleaning passes. All passes are on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanOptions {
    pub remove_code_block: bool,
    pub extract_json: bool,
    pub normalize_keys: bool,
    pub convert_single_quotes: bool,
    pub normalize_table_structure: bool,
    pub normalize_columns_content_pairs: bool,
    pub remove_block_comments: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            remove_code_block: true,
            extract_json: true,
            normalize_keys: true,
            convert_single_quotes: true,
            normalize_table_structure: true,
            normalize_columns_content_pairs: true,
            remove_block_comments: true,
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Clean raw model output into a JSON array string.
///
/// Returns `None` when extraction is enabled and the text holds no `[`...`]`
/// span. Never panics.
pub fn clean_api_response(raw: &str, options: &CleanOptions) -> Option<String> {
    let mut content = raw.to_string();

    if options.remove_code_block {
        content = strip_code_fences(&content);
    }
    if options.extract_json {
        content = match extract_json_array(&content) {
            Some(span) => span,
            None => {
                tracing::warn!("no JSON array found in model response");
                return None;
            }
        };
    }
    if options.normalize_keys {
        content = normalize_keys(&content);
    }
    if options.convert_single_quotes {
        content = convert_single_quotes(&content);
    }
    if options.normalize_table_structure {
        content = normalize_table_structure(&content);
    }
    if options.normalize_columns_content_pairs {
        content = normalize_columns_content_pairs(&content);
    }
    if options.remove_block_comments {
        content = remove_block_comments(&content);
    }

    let cleaned = truncate_at_balance(&content).trim().to_string();
    tracing::debug!(raw_len = raw.len(), cleaned_len = cleaned.len(), "cleaned model response");
    Some(cleaned)
}

/// Pass 1: drop ```` ```json ```` and ```` ``` ```` markers.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").into_owned()
}

/// Pass 2: slice from the first `[` through the last `]`.
pub fn extract_json_array(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

/// Pass 3: double-quote bare or quoted identifier keys.
pub fn normalize_keys(text: &str) -> String {
    OBJECT_KEY.replace_all(text, r#"${1}"${2}":"#).into_owned()
}

/// Pass 4: every `'` becomes `"`. Apostrophes inside values are not spared.
pub fn convert_single_quotes(text: &str) -> String {
    text.replace('\'', "\"")
}

/// Pass 5: canonical ASCII quoting for the `tableName`/`tableIndex`/`columns` head.
pub fn normalize_table_structure(text: &str) -> String {
    TABLE_HEAD
        .replace_all(text, r#""tableName":"${1}","tableIndex":${2},"columns""#)
        .into_owned()
}

/// Pass 6: repair `columns`/`content` pairs.
///
/// Curly quotes next to `[`, `]` or `,` become ASCII quotes, then both arrays
/// are re-serialized. A pair whose columns are not all strings, or whose rows
/// are not string arrays of the column width, is left as it was.
pub fn normalize_columns_content_pairs(text: &str) -> String {
    COLUMNS_CONTENT_PAIR
        .replace_all(text, |caps: &Captures| {
            let original = caps[0].to_string();
            let columns_src = replace_quotes_in_context(&caps[1]);
            let content_src = replace_quotes_in_context(&caps[2]);

            let Some(columns) = parse_string_array(&columns_src) else {
                tracing::warn!(fragment = %&caps[1], "columns is not a string array, pair left untouched");
                return original;
            };
            let Ok(Value::Array(rows)) = serde_json::from_str::<Value>(&content_src) else {
                tracing::warn!(fragment = %&caps[2], "content is not an array, pair left untouched");
                return original;
            };

            let mut validated: Vec<Vec<String>> = Vec::with_capacity(rows.len());
            for row in &rows {
                match row.as_array().and_then(|cells| string_cells(cells)) {
                    Some(cells) if cells.len() == columns.len() => validated.push(cells),
                    _ => {
                        tracing::warn!(
                            columns = columns.len(),
                            row = %row,
                            "content row does not match column width, pair left untouched"
                        );
                        return original;
                    }
                }
            }

            match (serde_json::to_string(&columns), serde_json::to_string(&validated)) {
                (Ok(columns_json), Ok(content_json)) => {
                    format!(r#""columns":{},"content":{}"#, columns_json, content_json)
                }
                _ => original,
            }
        })
        .into_owned()
}

/// Pass 7: drop single-line `/* ... */` comments.
pub fn remove_block_comments(text: &str) -> String {
    BLOCK_COMMENT.replace_all(text, "").into_owned()
}

/// Pass 8: cut the text where nesting of its first character returns to zero.
///
/// Only the bracket kind of the first character is counted and string
/// literals are not skipped.
pub fn truncate_at_balance(text: &str) -> &str {
    let Some(open) = text.chars().next() else {
        return text;
    };
    let close = if open == '[' { ']' } else { '}' };
    let mut balance: i64 = 0;
    for (i, c) in text.char_indices() {
        if c == open {
            balance += 1;
        } else if c == close {
            balance -= 1;
        }
        if balance == 0 {
            return &text[..i + c.len_utf8()];
        }
    }
    text
}

fn replace_quotes_in_context(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let is_context = |c: Option<char>| matches!(c, Some('[' | ']' | ','));
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let curly = c == '“' || c == '”';
            let before = i.checked_sub(1).and_then(|j| chars.get(j)).copied();
            let after = chars.get(i + 1).copied();
            if curly && (is_context(before) || is_context(after)) {
                '"'
            } else {
                c
            }
        })
        .collect()
}

fn parse_string_array(text: &str) -> Option<Vec<String>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => string_cells(&items),
        _ => None,
    }
}

fn string_cells(items: &[Value]) -> Option<Vec<String>> {
    items.iter().map(|v| v.as_str().map(str::to_string)).collect()
}
