//! Anonymization engine: maps a (field spec, input token, context) triple to
//! an anonymized value record.
//!
//! The rewriter (`src/dump/rewriter.rs`) is the only caller. It owns the
//! `AnonContext` for the tuple currently being processed and decides how to
//! wrap the returned `AnonResult` when writing it back out.

use std::cell::Cell;

use crate::config::{AnonType, FieldRule};
use crate::hash::readable_hash;
#[cfg(feature = "scripting")]
use crate::script::ScriptEngine;

/// How the rewriter should wrap a value when emitting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// Keep whatever quoting the input token had.
    AsInput,
    /// Always wrap in single quotes and SQL-escape the contents.
    ForceTrue,
    /// Never wrap in quotes; emit the bytes bare.
    ForceFalse,
}

/// The outcome of anonymizing one token.
#[derive(Debug, Clone)]
pub struct AnonResult {
    pub data: Vec<u8>,
    pub quoting: Quoting,
}

impl AnonResult {
    fn new(data: impl Into<Vec<u8>>, quoting: Quoting) -> Self {
        AnonResult {
            data: data.into(),
            quoting,
        }
    }
}

/// Per-row mutable state threaded from the rewriter into the engine.
///
/// `table_key` resets to empty at the start of every value tuple; `row_index`
/// resets to 0 at the start of every `INSERT INTO` statement but persists
/// across tuples within one statement.
#[derive(Debug, Default)]
pub struct AnonContext {
    pub table_name: String,
    pub table_key: Vec<u8>,
    pub row_index: u64,
    pub first_insert: bool,
}

impl AnonContext {
    pub fn for_table(table_name: String) -> Self {
        AnonContext {
            table_name,
            table_key: Vec::new(),
            row_index: 0,
            first_insert: true,
        }
    }

    pub fn begin_tuple(&mut self) {
        self.table_key.clear();
    }
}

/// Strip exactly one leading and one trailing single quote, if `quoted`.
fn unquote(token: &[u8], quoted: bool) -> &[u8] {
    if quoted && token.len() >= 2 && token.first() == Some(&b'\'') && token.last() == Some(&b'\'')
    {
        &token[1..token.len() - 1]
    } else {
        token
    }
}

/// Anonymize one value token according to `spec`, recording the hit on
/// success. `hits` is the counter belonging to the rule (or JSON path spec)
/// that owns `spec`; passed separately since `AnonType` itself carries no
/// counter (the counter lives on `FieldRule`/`JsonPathSpec`).
pub fn anonymize(
    quoted: bool,
    spec: &AnonType,
    token: &[u8],
    ctx: &mut AnonContext,
    secret: &[u8],
    hits: &Cell<u64>,
    #[cfg(feature = "scripting")] scripts: Option<&ScriptEngine>,
) -> AnonResult {
    let inner = unquote(token, quoted);

    let result = match spec {
        AnonType::FixedNull => AnonResult::new(*b"NULL", Quoting::ForceFalse),
        AnonType::Fixed { value } => AnonResult::new(value.as_bytes(), Quoting::AsInput),
        AnonType::FixedQuoted { value } => AnonResult::new(value.as_bytes(), Quoting::ForceTrue),
        AnonType::FixedUnquoted { value } => {
            AnonResult::new(value.as_bytes(), Quoting::ForceFalse)
        }
        AnonType::TextHash { length } => {
            let len = (*length as usize).min(32);
            let data = readable_hash(secret, inner, b'a', b'z', len);
            AnonResult::new(data, Quoting::AsInput)
        }
        AnonType::EmailHash { length, domain } => {
            let len = (*length as usize).min(32);
            let mut data = readable_hash(secret, inner, b'a', b'z', len);
            data.push(b'@');
            data.extend_from_slice(domain.as_bytes());
            AnonResult::new(data, Quoting::AsInput)
        }
        AnonType::IntHash { length } => {
            let len = (*length as usize).min(32);
            let data = readable_hash(secret, inner, b'1', b'9', len);
            AnonResult::new(data, Quoting::AsInput)
        }
        AnonType::Key => {
            ctx.table_key = inner.to_vec();
            AnonResult::new(inner.to_vec(), Quoting::AsInput)
        }
        AnonType::AppendKey { value } => {
            warn_if_key_unseen(ctx);
            let mut data = value.as_bytes().to_vec();
            data.extend_from_slice(&ctx.table_key);
            AnonResult::new(data, Quoting::ForceTrue)
        }
        AnonType::PrependKey { value } => {
            warn_if_key_unseen(ctx);
            let mut data = ctx.table_key.clone();
            data.extend_from_slice(value.as_bytes());
            AnonResult::new(data, Quoting::ForceTrue)
        }
        AnonType::AppendIndex { value } => {
            let mut data = value.as_bytes().to_vec();
            data.extend_from_slice(ctx.row_index.to_string().as_bytes());
            AnonResult::new(data, Quoting::ForceTrue)
        }
        AnonType::PrependIndex { value } => {
            let mut data = ctx.row_index.to_string().into_bytes();
            data.extend_from_slice(value.as_bytes());
            AnonResult::new(data, Quoting::ForceTrue)
        }
        AnonType::Substring { length } => {
            let data = substring_escaped(inner, *length as usize);
            AnonResult::new(data, Quoting::AsInput)
        }
        AnonType::Json { json_paths } => {
            let unescaped = crate::sql_escape::unescape_literal(inner);
            let rewritten = crate::json_rewrite::rewrite(
                &unescaped,
                json_paths,
                ctx,
                secret,
                #[cfg(feature = "scripting")]
                scripts,
            );
            let escaped = crate::sql_escape::escape_literal(&rewritten);
            AnonResult::new(escaped, Quoting::AsInput)
        }
        #[cfg(feature = "scripting")]
        AnonType::Script { function } => {
            let data = scripts.map(|s| s.call(function, inner)).unwrap_or_default();
            AnonResult::new(data, Quoting::AsInput)
        }
    };

    hits.set(hits.get() + 1);
    result
}

/// Convenience wrapper used by the rewriter for top-level `FieldRule`s (as
/// opposed to nested `JsonPathSpec`s, which go through `anonymize` directly
/// with their own counter).
pub fn anonymize_field(
    quoted: bool,
    field: &FieldRule,
    token: &[u8],
    ctx: &mut AnonContext,
    secret: &[u8],
    #[cfg(feature = "scripting")] scripts: Option<&ScriptEngine>,
) -> AnonResult {
    anonymize(
        quoted,
        &field.spec,
        token,
        ctx,
        secret,
        &field.hits,
        #[cfg(feature = "scripting")]
        scripts,
    )
}

fn warn_if_key_unseen(ctx: &AnonContext) {
    if ctx.table_key.is_empty() && ctx.first_insert {
        eprintln!(
            "{}",
            crate::diagnostics::warning(&format!(
                "table {}: append_key/prepend_key field processed before its key field was seen; \
                 result will have an empty key portion",
                ctx.table_name
            ))
        );
    }
}

/// Copy at most `length` user-perceived characters from `token`, UTF-8
/// aware, treating a backslash escape sequence (`\X`, two bytes) as a single
/// logical character. Stops early on invalid UTF-8 rather than panicking or
/// producing a truncated multi-byte sequence.
fn substring_escaped(token: &[u8], length: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut taken = 0;
    let mut i = 0;
    while i < token.len() && taken < length {
        if token[i] == b'\\' && i + 1 < token.len() {
            out.push(token[i]);
            out.push(token[i + 1]);
            i += 2;
            taken += 1;
            continue;
        }
        let rest = &token[i..];
        let ch_len = match std::str::from_utf8(rest) {
            Ok(_) => utf8_char_len(rest[0]),
            Err(e) if e.valid_up_to() > 0 => utf8_char_len(rest[0]),
            Err(_) => break,
        };
        if ch_len == 0 || i + ch_len > token.len() {
            break;
        }
        if std::str::from_utf8(&token[i..i + ch_len]).is_err() {
            break;
        }
        out.extend_from_slice(&token[i..i + ch_len]);
        i += ch_len;
        taken += 1;
    }
    out
}

fn utf8_char_len(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else if lead & 0xF8 == 0xF0 {
        4
    } else {
        0
    }
}
