//! Incremental edit actions: validation, parsing and execution order.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sheetmem_core::{preview, ActionKind, EditAction, LegacyTable, ParseError, ValidationError};
use std::collections::{BTreeMap, HashSet};

use crate::cleaner::{clean_api_response, CleanOptions};
use crate::json5;

static QUOTED_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([a-zA-Z_][a-zA-Z0-9_]*)"\s*:"#).expect("Invalid quoted key regex")
});
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("Invalid trailing comma regex"));
static NUMERIC_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)(\d+)(\s*:)").expect("Invalid numeric key regex"));
static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"//.*").expect("Invalid line comment regex"));

// ============================================================================
// VALIDATION
// ============================================================================

/// Validate one raw action object.
///
/// # Errors
/// The first shape rule the value breaks.
pub fn validate_action(value: &Value) -> Result<EditAction, ValidationError> {
    let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let kind = match object.get("action") {
        Some(Value::String(name)) => {
            ActionKind::parse(name).ok_or_else(|| ValidationError::UnknownAction { action: name.clone() })?
        }
        other => {
            return Err(ValidationError::UnknownAction {
                action: other.map(Value::to_string).unwrap_or_default(),
            })
        }
    };

    let table_index = object
        .get("tableIndex")
        .and_then(as_index)
        .ok_or_else(|| ValidationError::InvalidTableIndex {
            value: object.get("tableIndex").map(Value::to_string).unwrap_or_default(),
        })?;

    let row_index = match (kind, object.get("rowIndex")) {
        (ActionKind::Insert, _) => None,
        (_, None) | (_, Some(Value::Null)) => {
            return Err(ValidationError::MissingRowIndex {
                action: kind.to_string(),
            })
        }
        (_, Some(raw)) => Some(as_index(raw).ok_or_else(|| ValidationError::InvalidRowIndex {
            value: raw.to_string(),
        })?),
    };

    let data = match object.get("data") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => parse_data(map)?,
        Some(_) => return Err(ValidationError::DataNotAnObject),
    };

    Ok(EditAction {
        kind,
        table_index,
        row_index,
        data,
    })
}

/// Keep the valid actions, logging and dropping the rest.
pub fn validate_actions(values: &[Value]) -> Vec<EditAction> {
    values
        .iter()
        .enumerate()
        .filter_map(|(position, value)| match validate_action(value) {
            Ok(action) => Some(action),
            Err(e) => {
                tracing::warn!(position, reason = %e, action = %value, "rejected edit action");
                None
            }
        })
        .collect()
}

fn as_index(value: &Value) -> Option<usize> {
    value.as_u64().and_then(|n| usize::try_from(n).ok())
}

fn parse_data(map: &Map<String, Value>) -> Result<BTreeMap<usize, Value>, ValidationError> {
    map.iter()
        .map(|(key, value)| {
            if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ValidationError::NonDigitDataKey { key: key.clone() });
            }
            key.parse::<usize>()
                .map(|col| (col, value.clone()))
                .map_err(|_| ValidationError::NonDigitDataKey { key: key.clone() })
        })
        .collect()
}

// ============================================================================
// JSON ACTION ARRAY
// ============================================================================

/// Extra cleanup applied to an action array after the response cleaner.
///
/// Quotes bare `H:MM` times, normalizes quoted keys, drops trailing commas,
/// quotes numeric keys, unescapes `\/` and strips `//` comments.
pub fn incremental_preclean(text: &str) -> String {
    let text = quote_bare_times(text);
    let text = QUOTED_KEY.replace_all(&text, r#""${1}":"#);
    let text = TRAILING_COMMA.replace_all(&text, "${1}");
    let text = NUMERIC_KEY.replace_all(&text, r#"${1}"${2}"${3}"#);
    let text = text.replace("\\/", "/");
    LINE_COMMENT.replace_all(&text, "").into_owned()
}

/// Wrap `H:MM` / `HH:MM` in quotes unless a quote touches either end.
fn quote_bare_times(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 8);
    let mut i = 0;
    while i < bytes.len() {
        let quoted_before = i > 0 && bytes[i - 1] == b'"';
        if !quoted_before {
            if let Some(len) = time_at(bytes, i) {
                out.push(b'"');
                out.extend_from_slice(&bytes[i..i + len]);
                out.push(b'"');
                i += len;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| text.to_string())
}

/// Length of a time match starting at `start`, preferring two hour digits.
fn time_at(bytes: &[u8], start: usize) -> Option<usize> {
    let digit = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_digit);
    [2usize, 1].into_iter().find_map(|hours| {
        let colon = start + hours;
        let all_hours = (start..colon).all(digit);
        let matched = all_hours
            && bytes.get(colon) == Some(&b':')
            && digit(colon + 1)
            && digit(colon + 2)
            && bytes.get(colon + 3) != Some(&b'"');
        matched.then_some(hours + 3)
    })
}

/// Parse a model response holding a JSON array of edit actions.
///
/// Invalid entries are dropped individually.
///
/// # Errors
/// [`ParseError::NoJsonArray`] when the response has no array,
/// [`ParseError::Syntax`] when the cleaned array does not parse.
pub fn parse_action_array(raw: &str) -> Result<Vec<EditAction>, ParseError> {
    let cleaned = clean_api_response(raw, &CleanOptions::default()).ok_or_else(|| ParseError::NoJsonArray {
        preview: preview(raw, 300),
    })?;
    let prepared = incremental_preclean(&cleaned);
    match json5::parse(&prepared)? {
        Value::Array(values) => Ok(validate_actions(&values)),
        _ => Err(ParseError::UnexpectedShape {
            reason: "edit actions must be an array".to_string(),
        }),
    }
}

// ============================================================================
// DEDUP AND ORDER
// ============================================================================

/// Deduplicate a batch and put it in execution order.
///
/// Inserts already present in the target table, or earlier in the batch, are
/// dropped along with inserts into unknown tables. Repeated updates are
/// dropped. Deletes are deduplicated per `(table, row)` and run last in
/// descending row order so earlier deletes never shift later targets.
/// `tables` is indexed by `tableIndex`.
pub fn dedup_and_order(actions: Vec<EditAction>, tables: &[LegacyTable]) -> Vec<EditAction> {
    let (deletes, others): (Vec<_>, Vec<_>) =
        actions.into_iter().partition(|a| a.kind == ActionKind::Delete);

    let mut ordered = Vec::with_capacity(others.len() + deletes.len());
    let mut inserted: HashSet<(usize, Vec<String>)> = HashSet::new();
    let mut seen: HashSet<(ActionKind, usize, Option<usize>, String)> = HashSet::new();

    for action in others {
        if action.kind == ActionKind::Insert {
            let Some(table) = tables.get(action.table_index) else {
                tracing::warn!(table_index = action.table_index, "insert targets unknown table, skipped");
                continue;
            };
            let row = action.row_for_width(table.columns.len());
            if table.content.contains(&row) {
                tracing::debug!(table_index = action.table_index, "insert duplicates an existing row");
                continue;
            }
            if !inserted.insert((action.table_index, row)) {
                tracing::debug!(table_index = action.table_index, "insert duplicates an earlier insert");
                continue;
            }
        } else {
            let key = (action.kind, action.table_index, action.row_index, action.data_signature());
            if !seen.insert(key) {
                continue;
            }
        }
        ordered.push(action);
    }

    let mut delete_targets: HashSet<(usize, Option<usize>)> = HashSet::new();
    let mut unique_deletes: Vec<EditAction> = deletes
        .into_iter()
        .filter(|a| delete_targets.insert((a.table_index, a.row_index)))
        .collect();
    unique_deletes.sort_by(|a, b| b.row_index.cmp(&a.row_index));

    ordered.extend(unique_deletes);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(columns: &[&str], rows: &[&[&str]]) -> LegacyTable {
        LegacyTable::new(0, "t", columns.iter().map(|c| c.to_string()).collect()).with_rows(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_validate_accepts_wire_shapes() {
        let insert = validate_action(&json!({"action": "insert", "tableIndex": 0, "data": {"0": "a", "1": 2}})).unwrap();
        assert_eq!(insert.kind, ActionKind::Insert);
        assert_eq!(insert.row_index, None);
        assert_eq!(insert.data.get(&1), Some(&json!(2)));

        let update = validate_action(&json!({"action": "Update", "tableIndex": 1, "rowIndex": 4, "data": {"2": "x"}})).unwrap();
        assert_eq!(update.kind, ActionKind::Update);
        assert_eq!(update.row_index, Some(4));

        let delete = validate_action(&json!({"action": "delete", "tableIndex": 0, "rowIndex": 0})).unwrap();
        assert!(delete.data.is_empty());
    }

    #[test]
    fn test_validate_rejections() {
        assert_eq!(validate_action(&json!("insert")), Err(ValidationError::NotAnObject));
        assert!(matches!(
            validate_action(&json!({"action": "upsert", "tableIndex": 0})),
            Err(ValidationError::UnknownAction { .. })
        ));
        assert!(matches!(
            validate_action(&json!({"action": "insert", "tableIndex": "0"})),
            Err(ValidationError::InvalidTableIndex { .. })
        ));
        assert!(matches!(
            validate_action(&json!({"action": "update", "tableIndex": 0, "data": {}})),
            Err(ValidationError::MissingRowIndex { .. })
        ));
        assert!(matches!(
            validate_action(&json!({"action": "delete", "tableIndex": 0, "rowIndex": -1})),
            Err(ValidationError::InvalidRowIndex { .. })
        ));
        assert_eq!(
            validate_action(&json!({"action": "insert", "tableIndex": 0, "data": {"x": "v"}})),
            Err(ValidationError::NonDigitDataKey { key: "x".to_string() })
        );
        assert_eq!(
            validate_action(&json!({"action": "insert", "tableIndex": 0, "data": "v"})),
            Err(ValidationError::DataNotAnObject)
        );
    }

    #[test]
    fn test_validate_actions_drops_individually() {
        let values = vec![
            json!({"action": "insert", "tableIndex": 0, "data": {"x": "v"}}),
            json!({"action": "delete", "tableIndex": 0, "rowIndex": 1}),
        ];
        let valid = validate_actions(&values);
        assert_eq!(valid, vec![EditAction::delete(0, 1)]);
    }

    #[test]
    fn test_quote_bare_times() {
        assert_eq!(quote_bare_times("{0: 9:30}"), r#"{0: "9:30"}"#);
        assert_eq!(quote_bare_times(r#"{"1": "12:00"}"#), r#"{"1": "12:00"}"#);
        assert_eq!(quote_bare_times("[12:45, 7:05]"), r#"["12:45", "7:05"]"#);
        assert_eq!(quote_bare_times("시간 3:15"), "시간 \"3:15\"");
    }

    #[test]
    fn test_incremental_preclean() {
        assert_eq!(
            incremental_preclean(r#"[{"action" : "insert", "tableIndex": 0, "data": {0: "a\/b", 1: "x",},},]"#),
            r#"[{"action": "insert", "tableIndex": 0, "data": {"0": "a/b", "1": "x"}}]"#
        );
        assert_eq!(incremental_preclean("[1] // trailing note"), "[1] ");
    }

    #[test]
    fn test_parse_action_array() {
        let raw = r#"```json
[
  {"action": "update", "tableIndex": 0, "rowIndex": 0, "data": {"1": "Lamp"}},
  {"action": "insert", "tableIndex": 1, "data": {0: "Ann", 1: 9:30}},
  {"action": "insert", "tableIndex": 1, "data": {"x": "bad"}},
]
```"#;
        let actions = parse_action_array(raw).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, ActionKind::Update);
        assert_eq!(actions[1].data.get(&1), Some(&json!("9:30")));
    }

    #[test]
    fn test_parse_action_array_without_array() {
        assert!(matches!(
            parse_action_array("nothing to do"),
            Err(ParseError::NoJsonArray { .. })
        ));
    }

    #[test]
    fn test_deletes_run_last_in_descending_order() {
        let tables = vec![table(&["a"], &[&["1"], &["2"], &["3"], &["4"]])];
        let actions = vec![
            EditAction::delete(0, 1),
            EditAction::update(0, 0, BTreeMap::from([(0, json!("z"))])),
            EditAction::delete(0, 3),
            EditAction::delete(0, 2),
            EditAction::delete(0, 3),
        ];
        let ordered = dedup_and_order(actions, &tables);
        let kinds: Vec<_> = ordered.iter().map(|a| (a.kind, a.row_index)).collect();
        assert_eq!(
            kinds,
            vec![
                (ActionKind::Update, Some(0)),
                (ActionKind::Delete, Some(3)),
                (ActionKind::Delete, Some(2)),
                (ActionKind::Delete, Some(1)),
            ]
        );
    }

    #[test]
    fn test_insert_dedup_against_table_and_batch() {
        let tables = vec![table(&["date", "time"], &[&["2021-09-01", "12:00"]])];
        let existing = EditAction::insert(0, BTreeMap::from([(0, json!("2021-09-01")), (1, json!("12:00"))]));
        let fresh = EditAction::insert(0, BTreeMap::from([(0, json!("2021-09-02")), (1, json!("08:00"))]));
        let unknown = EditAction::insert(5, BTreeMap::from([(0, json!("x"))]));

        let ordered = dedup_and_order(vec![existing, fresh.clone(), fresh.clone(), unknown], &tables);
        assert_eq!(ordered, vec![fresh]);
    }

    #[test]
    fn test_update_dedup_keeps_first() {
        let a = EditAction::update(0, 1, BTreeMap::from([(0, json!("x"))]));
        let b = EditAction::update(0, 1, BTreeMap::from([(0, json!("y"))]));
        let ordered = dedup_and_order(vec![a.clone(), b.clone(), a.clone()], &[]);
        assert_eq!(ordered, vec![a, b]);
    }
}
