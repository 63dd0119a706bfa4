//! Render-preset shim: reads a saver node copied out of the host as text.
//!
//! Copied nodes are Lua table literals. Only the subset the host emits is
//! understood: nested tables, `Key =` and `["Key"] =` fields, positional
//! items, `FuID {..}` / `Number {..}` / `Input {..}` constructors, strings,
//! numbers (negative and scientific), booleans, `nil` and `--` comments.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use shotline_resolver::formats;

use crate::error::HostError;
use crate::host::AnchorConfig;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LuaValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Table(LuaTable),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LuaTable {
    pub fields: BTreeMap<String, LuaValue>,
    pub items: Vec<LuaValue>,
}

impl LuaTable {
    pub fn get(&self, key: &str) -> Option<&LuaValue> {
        self.fields.get(key)
    }
}

impl LuaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&LuaTable> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Field lookup on a table value; `None` for anything else.
    pub fn get(&self, key: &str) -> Option<&LuaValue> {
        self.as_table().and_then(|t| t.get(key))
    }

    /// `Input { Value = x }` -> `x`; anything else unchanged.
    fn input_value(&self) -> &LuaValue {
        self.get("Value").unwrap_or(self)
    }

    /// A table with only positional items becomes an array, anything else an
    /// object with items under their 1-based index.
    pub fn to_json(&self) -> Value {
        match self {
            LuaValue::Nil => Value::Null,
            LuaValue::Bool(b) => Value::Bool(*b),
            LuaValue::Int(i) => Value::from(*i),
            LuaValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            LuaValue::Str(s) => Value::String(s.clone()),
            LuaValue::Table(table) if table.fields.is_empty() => {
                Value::Array(table.items.iter().map(LuaValue::to_json).collect())
            }
            LuaValue::Table(table) => {
                let mut map = Map::new();
                for (idx, item) in table.items.iter().enumerate() {
                    map.insert((idx + 1).to_string(), item.to_json());
                }
                for (key, value) in &table.fields {
                    map.insert(key.clone(), value.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Open,
    Close,
    Assign,
    Sep,
    Ident(String),
    /// `["Key"]` or `[1]`
    Key(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: usize,
}

fn preset_err(pos: usize, message: impl Into<String>) -> HostError {
    HostError::Preset {
        position: pos,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, HostError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_comment(src, i + 2);
            }
            b'{' => {
                tokens.push(Token { tok: Tok::Open, pos: start });
                i += 1;
            }
            b'}' => {
                tokens.push(Token { tok: Tok::Close, pos: start });
                i += 1;
            }
            b'=' => {
                tokens.push(Token { tok: Tok::Assign, pos: start });
                i += 1;
            }
            b',' | b';' => {
                tokens.push(Token { tok: Tok::Sep, pos: start });
                i += 1;
            }
            b'[' => {
                let close = src[i..]
                    .find(']')
                    .map(|off| i + off)
                    .ok_or_else(|| preset_err(start, "unterminated '[' key"))?;
                let inner = src[i + 1..close].trim();
                let key = if inner.starts_with('"') || inner.starts_with('\'') {
                    let (text, _) = read_string(inner, 0)
                        .map_err(|(off, msg)| preset_err(start + 1 + off, msg))?;
                    text
                } else {
                    inner.to_string()
                };
                tokens.push(Token { tok: Tok::Key(key), pos: start });
                i = close + 1;
            }
            b'"' | b'\'' => {
                let (text, end) =
                    read_string(src, i).map_err(|(off, msg)| preset_err(off, msg))?;
                tokens.push(Token { tok: Tok::Str(text), pos: start });
                i = end;
            }
            b'-' | b'.' | b'0'..=b'9' => {
                let (tok, end) = read_number(src, i)?;
                tokens.push(Token { tok, pos: start });
                i = end;
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let end = src[i..]
                    .find(|ch: char| !(ch == '_' || ch == '.' || ch.is_ascii_alphanumeric()))
                    .map_or(src.len(), |off| i + off);
                let word = &src[i..end];
                let tok = match word {
                    "true" => Tok::Bool(true),
                    "false" => Tok::Bool(false),
                    "nil" => Tok::Nil,
                    _ => Tok::Ident(word.to_string()),
                };
                tokens.push(Token { tok, pos: start });
                i = end;
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(preset_err(start, format!("unexpected character '{ch}'")));
            }
        }
    }
    Ok(tokens)
}

/// `i` points just past `--`. Returns the index after the comment.
fn skip_comment(src: &str, i: usize) -> usize {
    if src[i..].starts_with("[[") {
        return src[i..].find("]]").map_or(src.len(), |off| i + off + 2);
    }
    src[i..].find('\n').map_or(src.len(), |off| i + off + 1)
}

/// Reads a quoted string starting at `start`. Returns the text and the index
/// after the closing quote.
fn read_string(src: &str, start: usize) -> Result<(String, usize), (usize, String)> {
    let mut chars = src[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err((start, "expected string".to_string()));
    };
    let mut out = String::new();
    while let Some((off, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c if c == quote => return Ok((out, start + off + ch.len_utf8())),
            c => out.push(c),
        }
    }
    Err((start, "unterminated string".to_string()))
}

fn read_number(src: &str, start: usize) -> Result<(Tok, usize), HostError> {
    let bytes = src.as_bytes();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    let mut float = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => i += 1,
            b'.' => {
                float = true;
                i += 1;
            }
            b'e' | b'E' => {
                float = true;
                i += 1;
                if matches!(bytes.get(i), Some(b'-') | Some(b'+')) {
                    i += 1;
                }
            }
            _ => break,
        }
    }
    let text = &src[start..i];
    let bad = || preset_err(start, format!("malformed number '{text}'"));
    if !float {
        if let Ok(int) = text.parse::<i64>() {
            return Ok((Tok::Int(int), i));
        }
    }
    text.parse::<f64>()
        .map(|f| (Tok::Float(f), i))
        .map_err(|_| bad())
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.idx).map(|t| &t.tok)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Tok> {
        self.tokens.get(self.idx + ahead).map(|t| &t.tok)
    }

    fn pos(&self) -> usize {
        self.tokens.get(self.idx).map_or(self.end, |t| t.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.idx).map(|t| t.tok.clone());
        self.idx += 1;
        tok
    }

    fn value(&mut self) -> Result<LuaValue, HostError> {
        let pos = self.pos();
        match self.bump() {
            Some(Tok::Open) => Ok(LuaValue::Table(self.table_body()?)),
            Some(Tok::Ident(name)) => {
                if self.peek() == Some(&Tok::Open) {
                    self.bump();
                    let table = self.table_body()?;
                    Ok(unwrap_constructor(&name, table))
                } else {
                    Ok(LuaValue::Str(name))
                }
            }
            Some(Tok::Str(s)) => Ok(LuaValue::Str(s)),
            Some(Tok::Int(i)) => Ok(LuaValue::Int(i)),
            Some(Tok::Float(f)) => Ok(LuaValue::Float(f)),
            Some(Tok::Bool(b)) => Ok(LuaValue::Bool(b)),
            Some(Tok::Nil) => Ok(LuaValue::Nil),
            Some(other) => Err(preset_err(pos, format!("unexpected token {other:?}"))),
            None => Err(preset_err(pos, "unexpected end of input")),
        }
    }

    /// Parses table entries up to and including the closing brace.
    fn table_body(&mut self) -> Result<LuaTable, HostError> {
        let mut table = LuaTable::default();
        loop {
            match self.peek() {
                None => return Err(preset_err(self.end, "unterminated table")),
                Some(Tok::Close) => {
                    self.bump();
                    return Ok(table);
                }
                Some(Tok::Sep) => {
                    self.bump();
                    continue;
                }
                _ => {}
            }

            let key = match (self.peek(), self.peek_at(1)) {
                (Some(Tok::Ident(name)), Some(Tok::Assign))
                | (Some(Tok::Key(name)), Some(Tok::Assign)) => Some(name.clone()),
                _ => None,
            };
            match key {
                Some(key) => {
                    self.idx += 2;
                    let value = self.value()?;
                    table.fields.insert(key, value);
                }
                None => {
                    let value = self.value()?;
                    table.items.push(value);
                }
            }
        }
    }
}

fn unwrap_constructor(name: &str, table: LuaTable) -> LuaValue {
    match name {
        "FuID" if table.fields.is_empty() && !table.items.is_empty() => {
            table.items.into_iter().next().unwrap_or(LuaValue::Nil)
        }
        "Number" if table.fields.contains_key("Value") => {
            let mut fields = table.fields;
            fields.remove("Value").unwrap_or(LuaValue::Nil)
        }
        _ => LuaValue::Table(table),
    }
}

/// Parse a single Lua value, usually a `{ ... }` table literal.
pub fn parse_lua(src: &str) -> Result<LuaValue, HostError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        idx: 0,
        end: src.len(),
    };
    let value = parser.value()?;
    if parser.peek().is_some() {
        return Err(preset_err(parser.pos(), "trailing input after value"));
    }
    Ok(value)
}

/// The balanced `{ ... }` block starting at the first `{` at or after `start`.
///
/// Braces inside string literals are ignored.
pub fn extract_block(text: &str, start: usize) -> Option<&str> {
    let open = start + text.get(start..)?.find('{')?;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (offset, &b) in text.as_bytes()[open..].iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open..=open + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Saver nodes
// ---------------------------------------------------------------------------

/// Output settings lifted from a copied saver node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPreset {
    pub format: String,
    /// Format-scoped inputs, keyed as the host names them (`OpenEXRFormat.Compression`).
    pub properties: BTreeMap<String, Value>,
}

impl RenderPreset {
    pub fn extension(&self) -> Option<&'static str> {
        formats::extension_for(&self.format)
    }

    pub fn is_sequence(&self) -> bool {
        formats::is_sequence(&self.format)
    }

    /// The `<format>.Compression` input, when it is a codec name.
    pub fn codec(&self) -> Option<&str> {
        self.properties
            .get(&format!("{}.Compression", self.format))
            .and_then(Value::as_str)
    }

    /// Anchor configuration writing this preset's format to `path`.
    pub fn to_anchor_config(&self, path: impl Into<PathBuf>) -> AnchorConfig {
        AnchorConfig {
            path: path.into(),
            format: self.format.clone(),
            codec: self.codec().map(str::to_string),
            properties: self.properties.clone(),
        }
    }
}

fn find_inputs(text: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(off) = text[from..].find("Inputs") {
        let after = from + off + "Inputs".len();
        let rest = text[after..].trim_start();
        if let Some(rest) = rest.strip_prefix('=') {
            if rest.trim_start().starts_with('{') {
                return Some(after);
            }
        }
        from = after;
    }
    None
}

/// Parse a copied saver node. `Ok(None)` when the text is not a saver or
/// carries no output format; `Err` when its inputs block is malformed.
pub fn parse_saver_node(text: &str) -> Result<Option<RenderPreset>, HostError> {
    if !text.contains("Saver") {
        return Ok(None);
    }
    let Some(inputs_at) = find_inputs(text) else {
        return Ok(None);
    };
    let Some(block) = extract_block(text, inputs_at) else {
        return Ok(None);
    };
    let block_start = inputs_at + text[inputs_at..].find('{').unwrap_or(0);
    let inputs = parse_lua(block).map_err(|err| match err {
        HostError::Preset { position, message } => HostError::Preset {
            position: block_start + position,
            message,
        },
        other => other,
    })?;
    let Some(inputs) = inputs.as_table() else {
        return Ok(None);
    };

    let format = match inputs.get("OutputFormat").map(LuaValue::input_value) {
        Some(LuaValue::Str(format)) if !format.is_empty() => format.clone(),
        _ => return Ok(None),
    };

    let properties = inputs
        .fields
        .iter()
        .filter(|(key, _)| key.starts_with(format.as_str()))
        .map(|(key, value)| (key.clone(), value.input_value().to_json()))
        .collect();

    tracing::debug!(format = %format, "parsed saver preset");
    Ok(Some(RenderPreset { format, properties }))
}
