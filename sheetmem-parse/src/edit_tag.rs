//! `<tableEdit>` wire format.
//!
//! ```text
//! <tableEdit>
//! <!--
//! insertRow(0, {"0": "2021-09-01", "1": "12:00"})
//! updateRow(1, 2, {3: "done"})
//! deleteRow(2, 0)
//! -->
//! </tableEdit>
//! ```
//!
//! Calls are read with the lenient JSON parser, so unquoted numeric keys and
//! single-quoted strings are accepted. Each call is validated the same way as
//! an entry of the JSON action array.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use sheetmem_core::EditAction;

use crate::actions::validate_action;
use crate::json5;

static TABLE_EDIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<tableEdit>(.*?)</tableEdit>").expect("Invalid tableEdit regex")
});

static MESSAGE_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<tableEdit>.*?</tableEdit>|<think>.*?</think>|<thinking>.*?</thinking>")
        .expect("Invalid message tag regex")
});

const CALLS: [(&str, &str); 3] = [
    ("insertRow", "insert"),
    ("updateRow", "update"),
    ("deleteRow", "delete"),
];

/// Bodies of every `<tableEdit>` block, without the `<!-- -->` wrapper.
pub fn extract_table_edit(text: &str) -> Vec<String> {
    TABLE_EDIT
        .captures_iter(text)
        .map(|caps| strip_comment_wrapper(&caps[1]).trim().to_string())
        .filter(|body| !body.is_empty())
        .collect()
}

fn strip_comment_wrapper(body: &str) -> &str {
    let Some(start) = body.find("<!--") else {
        return body;
    };
    let inner = &body[start + 4..];
    match inner.find("-->") {
        Some(end) => &inner[..end],
        None => inner,
    }
}

/// Parse the function calls of one block into validated actions.
///
/// Lines starting with `//` are ignored. Malformed or invalid calls are
/// logged and skipped.
pub fn parse_edit_calls(body: &str) -> Vec<EditAction> {
    let source: String = body
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut actions = Vec::new();
    let mut rest = source.as_str();
    while let Some((offset, name, kind)) = next_call(rest) {
        let after_name = &rest[offset + name.len()..];
        let Some(open) = after_name.find('(').filter(|p| after_name[..*p].trim().is_empty()) else {
            rest = after_name;
            continue;
        };
        let args_start = &after_name[open + 1..];
        let Some(close) = find_closing_paren(args_start) else {
            tracing::warn!(call = name, "unterminated edit call");
            break;
        };
        let args = &args_start[..close];
        match call_to_action(kind, args) {
            Some(action) => actions.push(action),
            None => tracing::warn!(call = name, args = %args, "skipped invalid edit call"),
        }
        rest = &args_start[close + 1..];
    }
    actions
}

/// Every action of every `<tableEdit>` block in `text`, in order.
pub fn parse_table_edit(text: &str) -> Vec<EditAction> {
    extract_table_edit(text)
        .iter()
        .flat_map(|body| parse_edit_calls(body))
        .collect()
}

/// Remove `<tableEdit>`, `<think>` and `<thinking>` blocks from a message.
pub fn strip_message_tags(text: &str) -> String {
    MESSAGE_TAGS.replace_all(text, "").into_owned()
}

fn next_call(text: &str) -> Option<(usize, &'static str, &'static str)> {
    CALLS
        .iter()
        .filter_map(|(name, kind)| text.find(name).map(|offset| (offset, *name, *kind)))
        .min_by_key(|(offset, _, _)| *offset)
}

/// Byte offset of the `)` closing an argument list, skipping strings.
fn find_closing_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' if depth == 0 => return Some(i),
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

fn call_to_action(kind: &str, args: &str) -> Option<EditAction> {
    let parsed = match json5::parse(&format!("[{}]", args)) {
        Ok(Value::Array(items)) => items,
        _ => return None,
    };
    let value = match (kind, parsed.as_slice()) {
        ("insert", [table, data]) => json!({"action": kind, "tableIndex": table, "data": data}),
        ("update", [table, row, data]) => {
            json!({"action": kind, "tableIndex": table, "rowIndex": row, "data": data})
        }
        ("delete", [table, row]) => json!({"action": kind, "tableIndex": table, "rowIndex": row}),
        _ => return None,
    };
    match validate_action(&value) {
        Ok(action) => Some(action),
        Err(e) => {
            tracing::warn!(reason = %e, "edit call failed validation");
            None
        }
    }
}
