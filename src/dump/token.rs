//! SQL dump tokenizer.
//!
//! Produces a finite, non-restartable lazy sequence of tokens from a byte
//! stream: a plain `Iterator`, not a cursor a caller can rewind. Recognizes
//! just enough of the MySQL/MariaDB dump dialect for the rewriter in
//! `super::rewriter` to recognize `CREATE TABLE`/`INSERT INTO` statements;
//! everything else is emitted as opaque, verbatim tokens.

use std::io::{self, Read};

/// The recognized dump-statement keywords. Matched case-insensitively;
/// everything else that looks like an identifier is `Ident`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Create,
    Table,
    Insert,
    Into,
    Values,
    Null,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Keyword> {
        match_ignore_case(word, "CREATE", Keyword::Create)
            .or_else(|| match_ignore_case(word, "TABLE", Keyword::Table))
            .or_else(|| match_ignore_case(word, "INSERT", Keyword::Insert))
            .or_else(|| match_ignore_case(word, "INTO", Keyword::Into))
            .or_else(|| match_ignore_case(word, "VALUES", Keyword::Values))
            .or_else(|| match_ignore_case(word, "NULL", Keyword::Null))
    }
}

fn match_ignore_case(word: &str, target: &str, kw: Keyword) -> Option<Keyword> {
    if word.eq_ignore_ascii_case(target) {
        Some(kw)
    } else {
        None
    }
}

/// Column-definition type words the rewriter uses to decide whether a
/// `CREATE TABLE` column should be quoted when substituted back in. Text,
/// blob, date/time, and enum/set types are quoted; everything numeric or
/// bit-like is not.
pub fn type_word_is_quoted(word: &str) -> bool {
    const UNQUOTED_PREFIXES: &[&str] = &[
        "INT", "TINYINT", "SMALLINT", "MEDIUMINT", "BIGINT", "DECIMAL", "NUMERIC", "FLOAT",
        "DOUBLE", "BIT", "BOOL", "BOOLEAN", "YEAR",
    ];
    let upper = word.to_ascii_uppercase();
    !UNQUOTED_PREFIXES
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Keyword(Keyword),
    /// An identifier. `true` if it was backtick-quoted in the source.
    Ident(String, bool),
    /// A single-quoted string literal; `text` holds the raw escaped content
    /// exactly as it appeared between the quotes.
    StringLiteral,
    Number,
    Punct(u8),
    Whitespace,
    Comment,
    /// Any other byte the grammar in §6 doesn't assign meaning to; emitted
    /// verbatim so the rewriter can still pass it through.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw bytes exactly as read from input, including delimiters (quotes,
    /// backticks, comment markers) — what the rewriter re-emits verbatim.
    pub text: Vec<u8>,
    pub line: u32,
}

impl Token {
    /// The identifier text with surrounding backticks stripped, if any.
    pub fn ident_name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name, _) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(&self.kind, TokenKind::Keyword(k) if *k == kw)
    }

    pub fn is_punct(&self, byte: u8) -> bool {
        matches!(&self.kind, TokenKind::Punct(b) if *b == byte)
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }
}

/// A dump-parse error: line number and the offending raw bytes, matching
/// the original tool's `dump_error` diagnostic shape.
#[derive(Debug)]
pub struct TokenizeError {
    pub line: u32,
    pub message: String,
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for TokenizeError {}

pub struct Tokenizer<R> {
    reader: R,
    peeked: Option<u8>,
    line: u32,
    eof: bool,
}

impl<R: Read> Tokenizer<R> {
    pub fn new(reader: R) -> Self {
        Tokenizer {
            reader,
            peeked: None,
            line: 1,
            eof: false,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    fn read_raw(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.reader.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        if self.peeked.is_none() && !self.eof {
            self.peeked = self.read_raw()?;
            if self.peeked.is_none() {
                self.eof = true;
            }
        }
        Ok(self.peeked)
    }

    fn bump(&mut self) -> io::Result<Option<u8>> {
        let b = self.peek()?;
        self.peeked = None;
        if b == Some(b'\n') {
            self.line += 1;
        }
        Ok(b)
    }

    fn take_while(&mut self, buf: &mut Vec<u8>, pred: impl Fn(u8) -> bool) -> io::Result<()> {
        while let Some(b) = self.peek()? {
            if !pred(b) {
                break;
            }
            buf.push(self.bump()?.unwrap());
        }
        Ok(())
    }

    fn next_token(&mut self) -> io::Result<Option<Result<Token, TokenizeError>>> {
        let start_line = self.line;
        let first = match self.bump()? {
            Some(b) => b,
            None => return Ok(None),
        };

        let mut text = vec![first];

        let token = if first.is_ascii_whitespace() {
            self.take_while(&mut text, |b| b.is_ascii_whitespace())?;
            Token {
                kind: TokenKind::Whitespace,
                text,
                line: start_line,
            }
        } else if first == b'-' && self.peek()? == Some(b'-') {
            text.push(self.bump()?.unwrap());
            self.take_while(&mut text, |b| b != b'\n')?;
            Token {
                kind: TokenKind::Comment,
                text,
                line: start_line,
            }
        } else if first == b'/' && self.peek()? == Some(b'*') {
            text.push(self.bump()?.unwrap());
            loop {
                match self.bump()? {
                    None => {
                        return Ok(Some(Err(TokenizeError {
                            line: start_line,
                            message: "unterminated block comment".to_string(),
                        })))
                    }
                    Some(b) => {
                        text.push(b);
                        if b == b'*' && self.peek()? == Some(b'/') {
                            text.push(self.bump()?.unwrap());
                            break;
                        }
                    }
                }
            }
            Token {
                kind: TokenKind::Comment,
                text,
                line: start_line,
            }
        } else if first == b'`' {
            loop {
                match self.bump()? {
                    None => {
                        return Ok(Some(Err(TokenizeError {
                            line: start_line,
                            message: "unterminated backtick identifier".to_string(),
                        })))
                    }
                    Some(b'`') => {
                        text.push(b'`');
                        if self.peek()? == Some(b'`') {
                            text.push(self.bump()?.unwrap());
                            continue;
                        }
                        break;
                    }
                    Some(b) => text.push(b),
                }
            }
            let name = backtick_name(&text);
            Token {
                kind: TokenKind::Ident(name, true),
                text,
                line: start_line,
            }
        } else if first == b'\'' {
            loop {
                match self.bump()? {
                    None => {
                        return Ok(Some(Err(TokenizeError {
                            line: start_line,
                            message: "unterminated string literal".to_string(),
                        })))
                    }
                    Some(b'\\') => {
                        text.push(b'\\');
                        if let Some(escaped) = self.bump()? {
                            text.push(escaped);
                        }
                    }
                    Some(b'\'') => {
                        text.push(b'\'');
                        if self.peek()? == Some(b'\'') {
                            text.push(self.bump()?.unwrap());
                            continue;
                        }
                        break;
                    }
                    Some(b) => text.push(b),
                }
            }
            Token {
                kind: TokenKind::StringLiteral,
                text,
                line: start_line,
            }
        } else if first.is_ascii_digit() || (first == b'-' && matches!(self.peek()?, Some(b) if b.is_ascii_digit()))
        {
            self.take_while(&mut text, |b| b.is_ascii_digit() || b == b'.')?;
            Token {
                kind: TokenKind::Number,
                text,
                line: start_line,
            }
        } else if is_ident_start(first) {
            self.take_while(&mut text, is_ident_continue)?;
            let word = String::from_utf8_lossy(&text).into_owned();
            let kind = match Keyword::from_word(&word) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Ident(word, false),
            };
            Token {
                kind,
                text,
                line: start_line,
            }
        } else if matches!(first, b'(' | b')' | b',' | b';' | b'=') {
            Token {
                kind: TokenKind::Punct(first),
                text,
                line: start_line,
            }
        } else {
            Token {
                kind: TokenKind::Other,
                text,
                line: start_line,
            }
        };

        Ok(Some(Ok(token)))
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Strip surrounding backticks and collapse doubled-backtick escapes.
fn backtick_name(raw: &[u8]) -> String {
    let inner = &raw[1..raw.len().saturating_sub(1)];
    let text = String::from_utf8_lossy(inner);
    text.replace("``", "`")
}

impl<R: Read> Iterator for Tokenizer<R> {
    type Item = io::Result<Result<Token, TokenizeError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(Some(t)) => Some(Ok(t)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &[u8]) -> Vec<Token> {
        Tokenizer::new(input)
            .map(|r| r.unwrap().unwrap())
            .collect()
    }

    #[test]
    fn recognizes_keywords_case_insensitively() {
        let toks = tokenize(b"create TABLE");
        assert!(toks[0].is_keyword(Keyword::Create));
        assert!(toks[2].is_keyword(Keyword::Table));
    }

    #[test]
    fn backtick_identifier_strips_quotes() {
        let toks = tokenize(b"`my col`");
        assert_eq!(toks[0].ident_name(), Some("my col"));
    }

    #[test]
    fn backtick_identifier_handles_doubled_backtick_escape() {
        let toks = tokenize(b"`a``b`");
        assert_eq!(toks[0].ident_name(), Some("a`b"));
    }

    #[test]
    fn string_literal_preserves_backslash_escapes() {
        let toks = tokenize(br"'it\'s'");
        assert_eq!(toks[0].kind, TokenKind::StringLiteral);
        assert_eq!(toks[0].text, br"'it\'s'");
    }

    #[test]
    fn string_literal_preserves_doubled_quote_escape() {
        let toks = tokenize(b"'it''s'");
        assert_eq!(toks[0].kind, TokenKind::StringLiteral);
        assert_eq!(toks[0].text, b"'it''s'");
    }

    #[test]
    fn line_comment_runs_to_newline() {
        let toks = tokenize(b"-- hello\nSELECT");
        assert_eq!(toks[0].kind, TokenKind::Comment);
        assert_eq!(toks[0].text, b"-- hello");
    }

    #[test]
    fn block_comment_is_captured_whole() {
        let toks = tokenize(b"/* a\nb */x");
        assert_eq!(toks[0].kind, TokenKind::Comment);
        assert_eq!(toks[0].text, b"/* a\nb */");
    }

    #[test]
    fn line_counter_advances_through_comments_and_strings() {
        let mut t = Tokenizer::new(&b"a\n'b\nc'\nd"[..]);
        let first = t.next().unwrap().unwrap().unwrap();
        assert_eq!(first.line, 1);
        let _nl = t.next().unwrap().unwrap().unwrap();
        let string_tok = t.next().unwrap().unwrap().unwrap();
        assert_eq!(string_tok.line, 2);
        assert_eq!(t.line(), 4);
    }

    #[test]
    fn punctuation_tokens() {
        let toks = tokenize(b"(),;=");
        let kinds: Vec<_> = toks.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Punct(b'('),
                TokenKind::Punct(b')'),
                TokenKind::Punct(b','),
                TokenKind::Punct(b';'),
                TokenKind::Punct(b'='),
            ]
        );
    }

    #[test]
    fn type_word_classification() {
        assert!(!type_word_is_quoted("INT"));
        assert!(!type_word_is_quoted("bigint"));
        assert!(type_word_is_quoted("VARCHAR"));
        assert!(type_word_is_quoted("TEXT"));
        assert!(type_word_is_quoted("DATETIME"));
    }

    #[test]
    fn unterminated_string_is_a_tokenize_error() {
        let mut t = Tokenizer::new(&b"'abc"[..]);
        let err = t.next().unwrap().unwrap().unwrap_err();
        assert_eq!(err.line, 1);
    }
}
