//! sheetmem Context - Prompt Assembly
//!
//! Everything that turns conversation state into model input: token
//! estimation, token-budgeted chat history, prompt templates with the
//! positional `$0`..`$4` placeholders, and the table serializations embedded
//! in those prompts.

use serde::Serialize;
use serde_json::Value;
use sheetmem_core::{
    strip_table_edit, ChatMessage, ChatPiece, LegacyTable, ParseError, Sheet, TableSettings,
    TextPart,
};
use sheetmem_parse::json5;

/// Prefix of the readable table block sent with incremental prompts.
pub const TABLE_CONTENT_HEADER: &str = "<table content>\n";

/// Number of positional placeholders (`$0` through `$4`).
pub const PLACEHOLDER_COUNT: usize = 5;

// ============================================================================
// TOKEN UTILITIES
// ============================================================================

/// Estimate token count for text.
///
/// Every CJK ideograph counts as one token and every ASCII word counts as
/// 1.2 tokens, rounded down over the whole text.
///
/// # Arguments
/// * `text` - The text to estimate tokens for
///
/// # Returns
/// Estimated token count
pub fn estimate_token_count(text: &str) -> usize {
    let mut ideographs = 0usize;
    let mut words = 0usize;
    let mut in_word = false;
    for c in text.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&c) {
            ideographs += 1;
        }
        let is_word_char = c.is_ascii_alphanumeric() || c == '_';
        if is_word_char && !in_word {
            words += 1;
        }
        in_word = is_word_char;
    }
    ideographs + words * 6 / 5
}

// ============================================================================
// CHAT HISTORY
// ============================================================================

/// How much recent conversation goes into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    /// Message cap, used only when there is no token limit.
    pub stairs: usize,
    pub ignore_user_sent: bool,
    /// Token budget. `None` (or zero) caps by message count instead.
    pub token_limit: Option<usize>,
}

impl HistoryWindow {
    pub fn new(stairs: usize) -> Self {
        Self {
            stairs,
            ignore_user_sent: false,
            token_limit: None,
        }
    }

    /// Window used by full rebuilds.
    pub fn from_settings(settings: &TableSettings) -> Self {
        Self {
            stairs: settings.clear_up_stairs,
            ignore_user_sent: settings.ignore_user_sent,
            token_limit: settings.history_token_limit(),
        }
    }

    pub fn with_ignore_user_sent(mut self, ignore: bool) -> Self {
        self.ignore_user_sent = ignore;
        self
    }

    pub fn with_token_limit(mut self, limit: Option<usize>) -> Self {
        self.token_limit = limit;
        self
    }

    /// Recent chat as `"<name>: <message>"` lines in chronological order.
    ///
    /// Messages are walked newest first. With a token limit the walk stops
    /// before the running total would exceed it; a newest message that is
    /// over the limit on its own is still sent, alone. Without a limit the
    /// walk stops after `stairs` messages.
    pub fn select(&self, chat: &[ChatPiece]) -> String {
        let limit = self.token_limit.filter(|l| *l > 0);
        let messages: Vec<&ChatPiece> = chat
            .iter()
            .filter(|piece| !(self.ignore_user_sent && piece.is_user))
            .collect();

        if limit.is_none() && messages.len() < self.stairs {
            tracing::debug!(
                available = messages.len(),
                stairs = self.stairs,
                "fewer messages than the history window"
            );
        }

        let mut collected: Vec<String> = Vec::new();
        let mut total = 0usize;
        for (position, piece) in messages.iter().rev().enumerate() {
            let line = strip_table_edit(&format!("{}: {}", piece.name, piece.mes));
            let tokens = estimate_token_count(&line);

            if let Some(limit) = limit {
                if position == 0 && tokens > limit {
                    tracing::info!(tokens, limit, "newest message exceeds the token limit, sending it alone");
                    collected.push(line);
                    break;
                }
                if total + tokens > limit {
                    break;
                }
            }

            total += tokens;
            collected.push(line);

            if limit.is_none() && collected.len() >= self.stairs {
                break;
            }
        }

        tracing::debug!(messages = collected.len(), tokens = total, "selected chat history");
        collected.reverse();
        collected.join("\n")
    }
}

// ============================================================================
// PLACEHOLDERS
// ============================================================================

/// How `$N` markers are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Substitution {
    /// Every `$N` with a value is replaced.
    #[default]
    Global,
    /// A `$N` directly preceded by a backslash is left as written.
    SkipEscaped,
}

/// Values for the positional `$0`..`$4` placeholders.
///
/// Substitution is a single left-to-right pass, so a value that itself
/// contains `$N` is inserted verbatim. Unset slots are left in the text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: [Option<String>; PLACEHOLDER_COUNT],
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set slot `index`. Indices past `$4` are ignored.
    pub fn with(mut self, index: usize, value: impl Into<String>) -> Self {
        match self.values.get_mut(index) {
            Some(slot) => *slot = Some(value.into()),
            None => tracing::warn!(index, "placeholder index out of range"),
        }
        self
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    pub fn apply(&self, text: &str, mode: Substitution) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        let mut prev: Option<char> = None;
        while let Some(c) = chars.next() {
            if c == '$' && !(mode == Substitution::SkipEscaped && prev == Some('\\')) {
                let next = chars.peek().copied();
                let value = next
                    .and_then(|d| d.to_digit(10))
                    .and_then(|n| self.get(n as usize));
                if let (Some(digit), Some(value)) = (next, value) {
                    out.push_str(value);
                    chars.next();
                    prev = Some(digit);
                    continue;
                }
            }
            out.push(c);
            prev = Some(c);
        }
        out
    }
}

// ============================================================================
// PROMPT TEMPLATES
// ============================================================================

/// A configured prompt: plain text or a pre-structured message array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptTemplate {
    Text(String),
    Messages(Vec<ChatMessage>),
}

impl PromptTemplate {
    /// Read a template that may be a JSON5 message array.
    ///
    /// Anything that does not parse as an array is used as plain text.
    pub fn parse(source: &str) -> Self {
        match json5::parse(source) {
            Ok(Value::Array(items)) => Self::Messages(messages_from_values(&items)),
            Ok(Value::String(text)) => Self::Text(text),
            _ => Self::Text(source.to_string()),
        }
    }

    /// Read a template that must be a non-empty JSON5 message array.
    ///
    /// # Errors
    /// `ParseError::InvalidTemplate` when the source does not parse or is
    /// not a non-empty array.
    pub fn parse_message_array(source: &str) -> Result<Self, ParseError> {
        let value = json5::parse(source).map_err(|e| ParseError::InvalidTemplate {
            reason: e.to_string(),
        })?;
        match value {
            Value::Array(items) if !items.is_empty() => {
                Ok(Self::Messages(messages_from_values(&items)))
            }
            _ => Err(ParseError::InvalidTemplate {
                reason: "expected a non-empty message array".to_string(),
            }),
        }
    }

    /// Substitute placeholders into the text or into every message's content.
    pub fn render(&self, placeholders: &Placeholders, mode: Substitution) -> Self {
        match self {
            Self::Text(text) => Self::Text(placeholders.apply(text, mode)),
            Self::Messages(messages) => Self::Messages(
                messages
                    .iter()
                    .map(|m| ChatMessage::new(m.role.clone(), placeholders.apply(&m.content, mode)))
                    .collect(),
            ),
        }
    }

    /// Final message list sent to the model.
    ///
    /// A text template becomes the system message followed by `user_prompt`.
    /// A message array is sent as it is and `user_prompt` is not used.
    pub fn into_messages(self, user_prompt: Option<String>) -> Vec<ChatMessage> {
        match self {
            Self::Messages(messages) => messages,
            Self::Text(system) => {
                let mut messages = Vec::with_capacity(2);
                if !system.is_empty() {
                    messages.push(ChatMessage::system(system));
                }
                if let Some(user) = user_prompt.filter(|u| !u.is_empty()) {
                    messages.push(ChatMessage::user(user));
                }
                messages
            }
        }
    }
}

fn messages_from_values(items: &[Value]) -> Vec<ChatMessage> {
    items
        .iter()
        .filter_map(|item| {
            let Some(obj) = item.as_object() else {
                tracing::warn!(item = %item, "skipping prompt entry that is not an object");
                return None;
            };
            let role = obj.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = obj.get("content").and_then(Value::as_str).unwrap_or("");
            Some(ChatMessage::new(role, content))
        })
        .collect()
}

// ============================================================================
// TABLE SERIALIZATION
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableHeaders<'a> {
    table_name: &'a str,
    headers: &'a [String],
}

/// Array-form snapshots of `sheets`, indexed by position.
pub fn sheets_to_tables(sheets: &[Sheet]) -> Vec<LegacyTable> {
    sheets
        .iter()
        .enumerate()
        .map(|(index, sheet)| LegacyTable::from_sheet(index, sheet))
        .collect()
}

/// Compact JSON of the tables, the `$0` value of a full rebuild.
pub fn tables_to_string(tables: &[LegacyTable]) -> String {
    serde_json::to_string(tables).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize tables");
        "[]".to_string()
    })
}

/// Header-only schema: a JSON array of `{tableName, headers}`.
///
/// Unnamed tables are called `Table <n>` counting from one.
pub fn headers_json(tables: &[LegacyTable]) -> String {
    let fallback: Vec<String> = (1..=tables.len()).map(|n| format!("Table {}", n)).collect();
    let headers: Vec<TableHeaders<'_>> = tables
        .iter()
        .zip(&fallback)
        .map(|(table, fallback)| TableHeaders {
            table_name: if table.table_name.is_empty() {
                fallback
            } else {
                &table.table_name
            },
            headers: &table.columns,
        })
        .collect();
    serde_json::to_string(&headers).unwrap_or_else(|_| "[]".to_string())
}

/// Readable table block for the incremental refresh prompt.
pub fn refresh_table_text(sheets: &[Sheet], chat: &[ChatPiece]) -> String {
    table_block(
        sheets,
        chat,
        &[TextPart::Title, TextPart::Note, TextPart::Headers, TextPart::Rows],
    )
}

/// Readable table block for step-by-step prompts, edit trigger rules included.
pub fn step_table_text(sheets: &[Sheet], chat: &[ChatPiece]) -> String {
    table_block(sheets, chat, &TextPart::ALL)
}

fn table_block(sheets: &[Sheet], chat: &[ChatPiece], parts: &[TextPart]) -> String {
    let body = sheets
        .iter()
        .enumerate()
        .map(|(index, sheet)| sheet.table_text(index, parts, chat))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}{}", TABLE_CONTENT_HEADER, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmem_test_utils::fixtures::sample_sheet;

    fn msg(name: &str, is_user: bool, mes: &str) -> ChatPiece {
        ChatPiece::new(name, is_user, mes)
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_estimate_token_count() {
        assert_eq!(estimate_token_count(""), 0);
        assert_eq!(estimate_token_count("hello world"), 2);
        assert_eq!(estimate_token_count("one two three four five"), 6);
        assert_eq!(estimate_token_count("你好 world"), 3);
        assert_eq!(estimate_token_count("snake_case x1"), 2);
        // Hangul is neither an ideograph nor an ASCII word.
        assert_eq!(estimate_token_count("안녕하세요"), 0);
    }

    #[test]
    fn test_history_caps_by_stairs() {
        let chat = vec![msg("u", true, "a"), msg("b", false, "b"), msg("u", true, "c")];
        assert_eq!(HistoryWindow::new(2).select(&chat), "b: b\nu: c");
        assert_eq!(HistoryWindow::new(10).select(&chat), "u: a\nb: b\nu: c");
    }

    #[test]
    fn test_history_ignores_user_messages() {
        let chat = vec![msg("u", true, "a"), msg("b", false, "b"), msg("u", true, "c")];
        let window = HistoryWindow::new(5).with_ignore_user_sent(true);
        assert_eq!(window.select(&chat), "b: b");
    }

    #[test]
    fn test_history_strips_table_edit() {
        let chat = vec![msg("b", false, "Hi<tableEdit>\ndeleteRow(0, 0)\n</tableEdit> there")];
        assert_eq!(HistoryWindow::new(1).select(&chat), "b: Hi there");
    }

    #[test]
    fn test_history_token_limit() {
        // Each line "x: w w" is 3 words, 3 tokens.
        let chat = vec![msg("x", false, "w w"), msg("x", false, "w w"), msg("x", false, "w w")];
        let window = HistoryWindow::new(1).with_token_limit(Some(7));
        assert_eq!(window.select(&chat), "x: w w\nx: w w");
    }

    #[test]
    fn test_history_oversized_newest_message_sent_alone() {
        let chat = vec![msg("x", false, "short"), msg("x", false, "a b c d e f g h i j")];
        let window = HistoryWindow::new(5).with_token_limit(Some(3));
        assert_eq!(window.select(&chat), "x: a b c d e f g h i j");
    }

    #[test]
    fn test_zero_token_limit_means_no_limit() {
        let chat = vec![msg("x", false, "a"), msg("x", false, "b")];
        let window = HistoryWindow::new(1).with_token_limit(Some(0));
        assert_eq!(window.select(&chat), "x: b");
    }

    #[test]
    fn test_placeholders_single_pass() {
        let p = Placeholders::new().with(0, "$1").with(1, "chat");
        assert_eq!(p.apply("[$0] [$1] [$2] $", Substitution::Global), "[$1] [chat] [$2] $");
    }

    #[test]
    fn test_placeholders_skip_escaped() {
        let p = Placeholders::new().with(0, "T").with(4, "lore");
        assert_eq!(p.apply(r"\$0 $0 $4", Substitution::SkipEscaped), r"\$0 T lore");
        assert_eq!(p.apply(r"\$0", Substitution::Global), r"\T");
    }

    #[test]
    fn test_placeholder_out_of_range_ignored() {
        let p = Placeholders::new().with(7, "x");
        assert_eq!(p, Placeholders::new());
    }

    #[test]
    fn test_template_parse_variants() {
        let messages = PromptTemplate::parse("[{role: 'system', content: 'sys $0'}, {content: 'u'}, 3]");
        assert_eq!(
            messages,
            PromptTemplate::Messages(vec![ChatMessage::system("sys $0"), ChatMessage::user("u")])
        );
        assert_eq!(
            PromptTemplate::parse("You maintain tables."),
            PromptTemplate::Text(s("You maintain tables."))
        );
        assert_eq!(PromptTemplate::parse("'quoted'"), PromptTemplate::Text(s("quoted")));
        assert_eq!(PromptTemplate::parse("{a: 1}"), PromptTemplate::Text(s("{a: 1}")));
    }

    #[test]
    fn test_template_parse_message_array_rejects() {
        assert!(PromptTemplate::parse_message_array("[]").is_err());
        assert!(PromptTemplate::parse_message_array("plain").is_err());
        assert!(PromptTemplate::parse_message_array("{role: 'user'}").is_err());
        assert!(PromptTemplate::parse_message_array("[{role: 'user', content: 'x'}]").is_ok());
    }

    #[test]
    fn test_template_render_and_messages() {
        let p = Placeholders::new().with(0, "TABLES").with(1, "CHAT");
        let text = PromptTemplate::Text(s("sys $0")).render(&p, Substitution::Global);
        assert_eq!(
            text.into_messages(Some(s("user $1"))),
            vec![ChatMessage::system("sys TABLES"), ChatMessage::user("user $1")]
        );

        let array = PromptTemplate::Messages(vec![ChatMessage::user("$1 and $0")])
            .render(&p, Substitution::Global);
        assert_eq!(
            array.into_messages(Some(s("ignored"))),
            vec![ChatMessage::user("CHAT and TABLES")]
        );
        assert!(PromptTemplate::Text(String::new()).into_messages(None).is_empty());
    }

    #[test]
    fn test_headers_json_and_tables_to_string() {
        let tables = vec![
            LegacyTable::new(0, "People", vec![s("Name")]).with_rows(vec![vec![s("Ann")]]),
            LegacyTable::new(1, "", vec![s("A"), s("B")]),
        ];
        assert_eq!(
            headers_json(&tables),
            r#"[{"tableName":"People","headers":["Name"]},{"tableName":"Table 2","headers":["A","B"]}]"#
        );
        assert_eq!(
            tables_to_string(&tables[..1]),
            r#"[{"tableIndex":0,"tableName":"People","columns":["Name"],"content":[["Ann"]]}]"#
        );
    }

    #[test]
    fn test_refresh_table_text() {
        let sheet = sample_sheet();
        let text = refresh_table_text(&[sheet.clone()], &[]);
        assert_eq!(
            text,
            "<table content>\n* 0:People\n【Table Content】\nrowIndex,0:Name,1:Place\n0,Ann,Paris\n1,Bob,Rome\n"
        );
        let tables = sheets_to_tables(&[sheet]);
        assert_eq!(tables[0].content[1], vec![s("Bob"), s("Rome")]);
    }
}
