//! Lenient JSON5-style parser.
//!
//! Accepts everything JSON does plus comments, trailing commas, unquoted
//! and numeric object keys, single-quoted strings, hexadecimal numbers,
//! leading `+` signs and leading or trailing decimal points. Produces a
//! [`serde_json::Value`] so the rest of the pipeline works with one value type.

use serde_json::{Map, Number, Value};
use sheetmem_core::ParseError;
use std::iter::Peekable;
use std::str::CharIndices;

const MAX_DEPTH: usize = 128;

/// Parse `source` into a JSON value.
pub fn parse(source: &str) -> Result<Value, ParseError> {
    let mut parser = Parser::new(source);
    parser.skip_whitespace_and_comments()?;
    let value = parser.parse_value(0)?;
    parser.skip_whitespace_and_comments()?;
    if parser.peek_char().is_some() {
        return Err(parser.error("unexpected trailing content"));
    }
    Ok(value)
}

// ============================================================================
// PARSER
// ============================================================================

struct Parser<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value, ParseError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        match self.peek_char() {
            None => Err(self.error("unexpected end of input")),
            Some('{') => self.parse_object(depth),
            Some('[') => self.parse_array(depth),
            Some(q @ ('"' | '\'')) => {
                self.advance();
                self.parse_string(q).map(Value::String)
            }
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if is_identifier_start(c) => {
                let word = self.parse_identifier();
                match word.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    "Infinity" | "NaN" => Ok(Value::Null),
                    other => Err(self.error(format!("unexpected identifier '{}'", other))),
                }
            }
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    fn parse_object(&mut self, depth: usize) -> Result<Value, ParseError> {
        self.advance(); // {
        let mut map = Map::new();
        loop {
            self.skip_whitespace_and_comments()?;
            match self.peek_char() {
                Some('}') => {
                    self.advance();
                    return Ok(Value::Object(map));
                }
                None => return Err(self.error("unterminated object")),
                _ => {}
            }

            let key = self.parse_key()?;
            self.skip_whitespace_and_comments()?;
            if self.peek_char() != Some(':') {
                return Err(self.error(format!("expected ':' after key '{}'", key)));
            }
            self.advance();
            self.skip_whitespace_and_comments()?;
            let value = self.parse_value(depth + 1)?;
            map.insert(key, value);

            self.skip_whitespace_and_comments()?;
            match self.peek_char() {
                Some(',') => {
                    self.advance();
                }
                Some('}') => {
                    self.advance();
                    return Ok(Value::Object(map));
                }
                Some(c) => return Err(self.error(format!("expected ',' or '}}', found '{}'", c))),
                None => return Err(self.error("unterminated object")),
            }
        }
    }

    fn parse_key(&mut self) -> Result<String, ParseError> {
        match self.peek_char() {
            Some(q @ ('"' | '\'')) => {
                self.advance();
                self.parse_string(q)
            }
            Some(c) if is_identifier_start(c) || c.is_ascii_digit() => Ok(self.parse_identifier()),
            Some(c) => Err(self.error(format!("invalid object key starting with '{}'", c))),
            None => Err(self.error("unterminated object")),
        }
    }

    fn parse_array(&mut self, depth: usize) -> Result<Value, ParseError> {
        self.advance(); // [
        let mut items = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            match self.peek_char() {
                Some(']') => {
                    self.advance();
                    return Ok(Value::Array(items));
                }
                None => return Err(self.error("unterminated array")),
                _ => {}
            }

            items.push(self.parse_value(depth + 1)?);

            self.skip_whitespace_and_comments()?;
            match self.peek_char() {
                Some(',') => {
                    self.advance();
                }
                Some(']') => {
                    self.advance();
                    return Ok(Value::Array(items));
                }
                Some(c) => return Err(self.error(format!("expected ',' or ']', found '{}'", c))),
                None => return Err(self.error("unterminated array")),
            }
        }
    }

    /// Parse string contents after the opening quote.
    fn parse_string(&mut self, quote: char) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\n') | Some('\r') => {
                    return Err(self.error("unescaped line break in string"));
                }
                Some('\\') => self.parse_escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        match self.advance() {
            None => Err(self.error("unterminated escape")),
            Some('n') => {
                out.push('\n');
                Ok(())
            }
            Some('t') => {
                out.push('\t');
                Ok(())
            }
            Some('r') => {
                out.push('\r');
                Ok(())
            }
            Some('b') => {
                out.push('\u{8}');
                Ok(())
            }
            Some('f') => {
                out.push('\u{c}');
                Ok(())
            }
            Some('v') => {
                out.push('\u{b}');
                Ok(())
            }
            Some('0') => {
                out.push('\0');
                Ok(())
            }
            Some('x') => {
                let code = self.read_hex(2)?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                Ok(())
            }
            Some('u') => {
                let high = self.read_hex(4)?;
                if (0xD800..0xDC00).contains(&high) && self.source[self.pos..].starts_with("\\u") {
                    self.advance();
                    self.advance();
                    let low = self.read_hex(4)?;
                    let combined = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
                    out.push(char::from_u32(combined).unwrap_or('\u{fffd}'));
                } else {
                    out.push(char::from_u32(high).unwrap_or('\u{fffd}'));
                }
                Ok(())
            }
            // Line continuation
            Some('\n') => {
                self.line += 1;
                self.column = 1;
                Ok(())
            }
            Some('\r') => {
                if self.peek_char() == Some('\n') {
                    self.advance();
                }
                self.line += 1;
                self.column = 1;
                Ok(())
            }
            Some(c) => {
                out.push(c);
                Ok(())
            }
        }
    }

    fn read_hex(&mut self, digits: usize) -> Result<u32, ParseError> {
        let mut code = 0u32;
        for _ in 0..digits {
            let digit = self
                .advance()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid hex escape"))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn parse_number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let mut negative = false;
        if let Some(sign @ ('-' | '+')) = self.peek_char() {
            negative = sign == '-';
            self.advance();
        }

        if let Some(c) = self.peek_char() {
            if is_identifier_start(c) {
                let word = self.parse_identifier();
                return match word.as_str() {
                    "Infinity" | "NaN" => Ok(Value::Null),
                    _ => Err(self.error(format!("invalid number '{}'", word))),
                };
            }
        }

        if self.source[self.pos..].starts_with("0x") || self.source[self.pos..].starts_with("0X") {
            self.advance();
            self.advance();
            let digits_start = self.pos;
            while self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let digits = &self.source[digits_start..self.pos];
            let magnitude = i64::from_str_radix(digits, 16)
                .map_err(|_| self.error(format!("invalid hex number '0x{}'", digits)))?;
            return Ok(Value::Number(Number::from(if negative { -magnitude } else { magnitude })));
        }

        let body_start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek_char() {
            match c {
                '0'..='9' => {}
                '.' | 'e' | 'E' => is_float = true,
                '+' | '-' if matches!(self.source[..self.pos].chars().last(), Some('e' | 'E')) => {}
                _ => break,
            }
            self.advance();
        }
        let body = &self.source[body_start..self.pos];
        if body.is_empty() || body == "." {
            return Err(self.error(format!("invalid number '{}'", &self.source[start..self.pos])));
        }

        if !is_float {
            let text = if negative { format!("-{}", body) } else { body.to_string() };
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Value::Number(Number::from(n)));
            }
            if let Ok(n) = text.parse::<u64>() {
                return Ok(Value::Number(Number::from(n)));
            }
        }

        let mut normalized = String::new();
        if negative {
            normalized.push('-');
        }
        if body.starts_with('.') {
            normalized.push('0');
        }
        normalized.push_str(body);
        if normalized.ends_with('.') {
            normalized.push('0');
        }
        let float: f64 = normalized
            .parse()
            .map_err(|_| self.error(format!("invalid number '{}'", &self.source[start..self.pos])))?;
        Number::from_f64(float)
            .map(Value::Number)
            .ok_or_else(|| self.error("number out of range"))
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek_char().is_some_and(is_identifier_part) {
            self.advance();
        }
        self.source[start..self.pos].to_string()
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek_char() {
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                Some(c) if c.is_whitespace() || c == '\u{feff}' => {
                    self.advance();
                }
                Some('/') => match self.peek_next_char() {
                    Some('/') => {
                        while let Some(c) = self.peek_char() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    }
                    Some('*') => {
                        self.advance();
                        self.advance();
                        loop {
                            match self.advance() {
                                None => return Err(self.error("unterminated block comment")),
                                Some('*') if self.peek_char() == Some('/') => {
                                    self.advance();
                                    break;
                                }
                                Some('\n') => {
                                    self.line += 1;
                                    self.column = 1;
                                }
                                Some(_) => {}
                            }
                        }
                    }
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.source[self.pos..].chars();
        iter.next();
        iter.next()
    }

    fn advance(&mut self) -> Option<char> {
        if let Some((i, c)) = self.chars.next() {
            self.pos = i + c.len_utf8();
            self.column += 1;
            Some(c)
        } else {
            None
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_identifier_part(c: char) -> bool {
    is_identifier_start(c) || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        let v = parse(r#"{"a": [1, 2.5, "x", true, null]}"#).unwrap();
        assert_eq!(v, json!({"a": [1, 2.5, "x", true, null]}));
    }

    #[test]
    fn test_json5_extensions() {
        let v = parse(
            "// header\n{ tableName: '시공간', 0: 'a', \"1\": +2, hex: 0x1F, half: .5, /* c */ list: [1, 2,], }",
        )
        .unwrap();
        assert_eq!(v["tableName"], "시공간");
        assert_eq!(v["0"], "a");
        assert_eq!(v["1"], 2);
        assert_eq!(v["hex"], 31);
        assert_eq!(v["half"], 0.5);
        assert_eq!(v["list"], json!([1, 2]));
    }

    #[test]
    fn test_string_escapes() {
        let v = parse(r#"['it\'s', "a\nb", "é", 'line\
continued']"#)
        .unwrap();
        assert_eq!(v, json!(["it's", "a\nb", "é", "linecontinued"]));
    }

    #[test]
    fn test_surrogate_pair() {
        let v = parse(r#""\ud83d\ude00""#).unwrap();
        assert_eq!(v, json!("😀"));
    }

    #[test]
    fn test_errors_report_position() {
        let err = parse("[1,\n  2 3]").unwrap_err();
        match err {
            ParseError::Syntax { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(parse("[1, 2").is_err());
        assert!(parse("{a 1}").is_err());
        assert!(parse("[1] trailing").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = "[".repeat(500) + &"]".repeat(500);
        assert!(parse(&deep).is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_never_panics(input in ".{0,200}") {
            let _ = parse(&input);
        }

        #[test]
        fn prop_accepts_serde_json_output(
            rows in proptest::collection::vec(proptest::collection::vec("[^\\p{C}]{0,12}", 0..4), 0..4)
        ) {
            let text = serde_json::to_string(&rows).unwrap();
            let parsed = parse(&text).unwrap();
            prop_assert_eq!(parsed, serde_json::to_value(&rows).unwrap());
        }
    }
}
