//! Lexer: turns GLYPH source text into a token stream.

use std::fmt;
use std::str::CharIndices;

/// A single lexical token, with the byte offset it started at (used for
/// error paths and for the tolerant parser's recovery diagnostics).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    /// A bare identifier: a type name, tag, field key, or bare string,
    /// disambiguated by the parser from what follows it.
    Ident(String),
    /// `^prefix:value` or `^value` reference.
    Ref { prefix: String, value: String },
    /// ISO-8601 time literal.
    Time(String),
    Bool(bool),
    Null,
    /// Base64 byte literal: `b64"..."`.
    Bytes(Vec<u8>),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Eq,
    Colon,
    Comma,
    Pipe,
    Hash(u32),
    At(String),
    Newline,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub offset: usize,
}

/// Tokenizes a complete GLYPH source string. The incremental parser (C7)
/// re-lexes from a resumable byte cursor rather than reusing this type
/// directly, since it must tolerate a token straddling a `feed()` boundary.
pub struct Lexer<'a> {
    src: &'a str,
    chars: CharIndices<'a>,
    peeked: Option<(usize, char)>,
}

const NULL_GLYPHS: &[&str] = &["null", "none", "nil"];

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        let mut chars = src.char_indices();
        let peeked = chars.next();
        Self { src, chars, peeked }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let cur = self.peeked;
        self.peeked = self.chars.next();
        cur
    }

    fn peek(&self) -> Option<char> {
        self.peeked.map(|(_, c)| c)
    }

    fn peek_offset(&self) -> usize {
        self.peeked.map(|(o, _)| o).unwrap_or(self.src.len())
    }

    /// The unconsumed tail of the source, starting at the next character
    /// the lexer would read. Lets callers switch to raw line-oriented
    /// reading (e.g. tabular block bodies) right after a token boundary.
    pub fn rest(&self) -> &'a str {
        &self.src[self.peek_offset()..]
    }

    /// Tokenize the whole input, returning all tokens through `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            out.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(out)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments();
        let offset = self.peek_offset();
        let c = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    offset,
                })
            }
        };

        let kind = match c {
            '{' => {
                self.bump();
                TokenKind::LBrace
            }
            '}' => {
                self.bump();
                TokenKind::RBrace
            }
            '[' => {
                self.bump();
                TokenKind::LBracket
            }
            ']' => {
                self.bump();
                TokenKind::RBracket
            }
            '(' => {
                self.bump();
                TokenKind::LParen
            }
            ')' => {
                self.bump();
                TokenKind::RParen
            }
            '=' => {
                self.bump();
                TokenKind::Eq
            }
            ':' => {
                self.bump();
                TokenKind::Colon
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            '|' => {
                self.bump();
                TokenKind::Pipe
            }
            '\n' => {
                self.bump();
                TokenKind::Newline
            }
            '∅' => {
                self.bump();
                TokenKind::Null
            }
            '"' => self.lex_string(offset)?,
            '^' => self.lex_ref(offset)?,
            '#' => self.lex_hash(offset)?,
            '@' => self.lex_at(offset)?,
            '-' => self.lex_number(offset)?,
            c if c.is_ascii_digit() => self.lex_number(offset)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.lex_ident_or_keyword(offset)?,
            other => {
                return Err(LexError {
                    message: format!("unexpected character {:?}", other),
                    offset,
                })
            }
        };

        Ok(Token { kind, offset })
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('/') => {
                    // Not part of the closed punctuation set in the spec,
                    // but tolerated as a line comment for hand-authored
                    // GLYPH the way editors add them; never emitted.
                    let save = self.peeked;
                    self.bump();
                    if self.peek() == Some('/') {
                        self.bump();
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    } else {
                        self.peeked = save;
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_string(&mut self, start: usize) -> Result<TokenKind, LexError> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(LexError {
                        message: "unterminated string".into(),
                        offset: start,
                    })
                }
                Some((_, '"')) => break,
                Some((off, '\\')) => {
                    let esc = self.bump().ok_or(LexError {
                        message: "unterminated escape".into(),
                        offset: off,
                    })?;
                    match esc.1 {
                        '\\' => s.push('\\'),
                        '"' => s.push('"'),
                        'n' => s.push('\n'),
                        'r' => s.push('\r'),
                        't' => s.push('\t'),
                        'u' => {
                            let mut hex = String::new();
                            for _ in 0..4 {
                                let (_, h) = self.bump().ok_or(LexError {
                                    message: "truncated \\u escape".into(),
                                    offset: off,
                                })?;
                                hex.push(h);
                            }
                            let code = u32::from_str_radix(&hex, 16).map_err(|_| LexError {
                                message: format!("bad \\u escape: {hex}"),
                                offset: off,
                            })?;
                            s.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                        }
                        other => {
                            return Err(LexError {
                                message: format!("bad escape: \\{other}"),
                                offset: off,
                            })
                        }
                    }
                }
                Some((_, c)) => s.push(c),
            }
        }
        Ok(TokenKind::Str(s))
    }

    fn lex_ref(&mut self, start: usize) -> Result<TokenKind, LexError> {
        self.bump(); // '^'
        if self.peek() == Some('"') {
            let TokenKind::Str(value) = self.lex_string(start)? else {
                unreachable!()
            };
            return Ok(TokenKind::Ref {
                prefix: String::new(),
                value,
            });
        }
        let mut first = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/') {
                first.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some(':') {
            self.bump();
            if self.peek() == Some('"') {
                let TokenKind::Str(value) = self.lex_string(start)? else {
                    unreachable!()
                };
                return Ok(TokenKind::Ref { prefix: first, value });
            }
            let mut value = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/') {
                    value.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            Ok(TokenKind::Ref { prefix: first, value })
        } else {
            Ok(TokenKind::Ref {
                prefix: String::new(),
                value: first,
            })
        }
    }

    fn lex_hash(&mut self, start: usize) -> Result<TokenKind, LexError> {
        self.bump(); // '#'
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return Err(LexError {
                message: "expected digits after '#'".into(),
                offset: start,
            });
        }
        digits.parse::<u32>().map(TokenKind::Hash).map_err(|_| LexError {
            message: format!("bad compact key index: {digits}"),
            offset: start,
        })
    }

    fn lex_at(&mut self, start: usize) -> Result<TokenKind, LexError> {
        self.bump(); // '@'
        // A bare '@' directly before '(' or '{' is the packed-struct
        // operator (`T@(...)` / `T@{bm=...}(...)`), not a directive.
        if matches!(self.peek(), Some('(') | Some('{')) {
            return Ok(TokenKind::At(String::new()));
        }
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '#') {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(LexError {
                message: "expected directive name after '@'".into(),
                offset: start,
            });
        }
        Ok(TokenKind::At(name))
    }

    fn lex_number(&mut self, start: usize) -> Result<TokenKind, LexError> {
        let mut s = String::new();
        if self.peek() == Some('-') {
            s.push('-');
            self.bump();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if self.peek() == Some('.') {
            // Lookahead: only consume as decimal point if followed by a digit.
            let save = self.peeked;
            self.bump();
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                s.push('.');
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        s.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            } else {
                self.peeked = save;
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let save_pos = s.len();
            let mut exp = String::new();
            exp.push(self.peek().unwrap());
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                exp.push(self.peek().unwrap());
                self.bump();
            }
            let mut has_digits = false;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    exp.push(c);
                    self.bump();
                    has_digits = true;
                } else {
                    break;
                }
            }
            if has_digits {
                is_float = true;
                s.push_str(&exp);
            } else {
                let _ = save_pos;
            }
        }

        // Try parsing as a time literal if this looks like the date
        // portion of ISO-8601 (next char is 'T' and we consumed exactly
        // digits, no '.'/'e').
        if !is_float && self.peek() == Some('T') && looks_like_date(&s) {
            return self.lex_time_from_date(start, s);
        }

        if is_float {
            s.parse::<f64>().map(TokenKind::Float).map_err(|_| LexError {
                message: format!("bad float literal: {s}"),
                offset: start,
            })
        } else {
            s.parse::<i64>().map(TokenKind::Int).map_err(|_| LexError {
                message: format!("bad integer literal: {s}"),
                offset: start,
            })
        }
    }

    fn lex_time_from_date(&mut self, start: usize, date: String) -> Result<TokenKind, LexError> {
        let mut s = date;
        s.push('T');
        self.bump(); // 'T'
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, ':' | '.' | '+' | '-' | 'Z') {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(TokenKind::Time(s))
    }

    fn lex_ident_or_keyword(&mut self, start: usize) -> Result<TokenKind, LexError> {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '/' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = match s.as_str() {
            "t" | "true" => TokenKind::Bool(true),
            "f" | "false" => TokenKind::Bool(false),
            "_" => TokenKind::Null,
            other if NULL_GLYPHS.contains(&other) => TokenKind::Null,
            _ => TokenKind::Ident(s),
        };
        let _ = start;
        Ok(kind)
    }
}

fn looks_like_date(s: &str) -> bool {
    // YYYY-MM-DD: 10 chars, dashes at 4 and 7.
    s.len() == 10 && s.as_bytes().get(4) == Some(&b'-') && s.as_bytes().get(7) == Some(&b'-')
}

/// Lex a `b64"..."` byte literal, which needs two leading identifier
/// characters (`b64`) consumed by the caller before the quote; kept
/// separate since it's only valid directly after recognizing the `b64`
/// prefix in the parser (the lexer emits `Ident("b64")` then a `Str`
/// token, and the parser combines them — see `parser::parse_value`).
pub fn decode_b64(s: &str) -> Result<Vec<u8>, LexError> {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    BASE64.decode(s).map_err(|e| LexError {
        message: format!("bad base64: {e}"),
        offset: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_scalars() {
        assert_eq!(kinds("42"), vec![TokenKind::Int(42), TokenKind::Eof]);
        assert_eq!(kinds("-7"), vec![TokenKind::Int(-7), TokenKind::Eof]);
        assert_eq!(kinds("3.14"), vec![TokenKind::Float(3.14), TokenKind::Eof]);
        assert_eq!(kinds("t"), vec![TokenKind::Bool(true), TokenKind::Eof]);
        assert_eq!(kinds("f"), vec![TokenKind::Bool(false), TokenKind::Eof]);
    }

    #[test]
    fn lexes_all_null_aliases() {
        for alias in ["_", "null", "none", "nil"] {
            assert_eq!(kinds(alias), vec![TokenKind::Null, TokenKind::Eof]);
        }
        assert_eq!(kinds("∅"), vec![TokenKind::Null, TokenKind::Eof]);
    }

    #[test]
    fn lexes_ref() {
        assert_eq!(
            kinds("^user:123"),
            vec![
                TokenKind::Ref {
                    prefix: "user".into(),
                    value: "123".into()
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_string_escapes() {
        assert_eq!(
            kinds(r#""line1\nline2""#),
            vec![TokenKind::Str("line1\nline2".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn lexes_time() {
        assert_eq!(
            kinds("2024-01-15T10:30:00Z"),
            vec![TokenKind::Time("2024-01-15T10:30:00Z".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn lexes_compact_key() {
        assert_eq!(kinds("#3"), vec![TokenKind::Hash(3), TokenKind::Eof]);
    }

    #[test]
    fn lexes_directive() {
        assert_eq!(
            kinds("@schema#abcd"),
            vec![TokenKind::At("schema#abcd".into()), TokenKind::Eof]
        );
    }
}
