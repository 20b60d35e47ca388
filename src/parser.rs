//! Recursive-descent parser: GLYPH text → [`GValue`].
//!
//! Tolerant mode (the default) records each recoverable problem as a
//! [`Warning`] and keeps going; strict mode fails on the first structural
//! error. Schema-aware parsing resolves wire-keys to canonical field names
//! as it walks a struct's fields.

use crate::canon::KeyDictionary;
use crate::error::{GlyphError, Result, Warning};
use crate::lexer::{decode_b64, Lexer, TokenKind};
use crate::schema::Schema;
use crate::types::*;
use chrono::{DateTime, Utc};

/// Parser mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Record recoverable problems as warnings and keep going.
    Tolerant,
    /// Fail on the first structural error.
    Strict,
}

/// Options controlling a parse.
pub struct ParseOptions<'a> {
    pub mode: ParseMode,
    pub schema: Option<&'a Schema>,
    pub key_dict: Option<&'a dyn KeyDictionary>,
}

impl<'a> Default for ParseOptions<'a> {
    fn default() -> Self {
        Self {
            mode: ParseMode::Tolerant,
            schema: None,
            key_dict: None,
        }
    }
}

/// Parse in the default tolerant mode, discarding warnings. Prefer
/// [`parse_tolerant`] if warnings matter, or [`parse_strict`] for a parse
/// that fails on the first problem.
pub fn parse(src: &str) -> Result<GValue> {
    let (v, _) = parse_tolerant(src)?;
    Ok(v)
}

/// Parse in tolerant mode, returning both the best-effort value and the
/// warnings recorded along the way.
pub fn parse_tolerant(src: &str) -> Result<(GValue, Vec<Warning>)> {
    let opts = ParseOptions {
        mode: ParseMode::Tolerant,
        schema: None,
        key_dict: None,
    };
    let mut p = Parser::new(src, opts);
    let v = p.parse_value()?;
    Ok((v, p.warnings))
}

/// Parse in strict mode: the first structural error aborts the parse.
pub fn parse_strict(src: &str) -> Result<GValue> {
    let opts = ParseOptions {
        mode: ParseMode::Strict,
        schema: None,
        key_dict: None,
    };
    let mut p = Parser::new(src, opts);
    p.parse_value()
}

/// Parse with a bound schema: struct field keys are resolved from
/// wire-key to canonical name as they're read.
pub fn parse_with_schema(src: &str, schema: &Schema) -> Result<(GValue, Vec<Warning>)> {
    let opts = ParseOptions {
        mode: ParseMode::Tolerant,
        schema: Some(schema),
        key_dict: None,
    };
    let mut p = Parser::new(src, opts);
    let v = p.parse_value()?;
    Ok((v, p.warnings))
}

/// A parsed schema header: `@schema#<hash>` optionally followed by
/// `@keys=[...]`, or `@schema.clear`.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaHeader {
    Bind { hash: String, keys: Option<Vec<String>> },
    Clear,
}

/// Parse a leading `@schema#<hash> [@keys=[...]]` or `@schema.clear`
/// header, returning it and the byte offset where the header ends (the
/// rest of `src` is the value).
pub fn parse_schema_header(src: &str) -> Result<Option<(SchemaHeader, usize)>> {
    let trimmed = src.trim_start();
    if !trimmed.starts_with('@') {
        return Ok(None);
    }
    let mut lexer = Lexer::new(src);
    let first = lexer.next_token().map_err(lex_err)?;
    let TokenKind::At(name) = &first.kind else {
        return Ok(None);
    };
    if name == "schema.clear" {
        let end_offset = src.len() - lexer.rest().len();
        return Ok(Some((SchemaHeader::Clear, end_offset)));
    }
    if let Some(hash) = name.strip_prefix("schema#") {
        let hash = hash.to_string();
        let mut end_offset = src.len() - lexer.rest().len();
        let mut keys = None;
        let mut sub = Lexer::new(&src[end_offset..]);
        if let Ok(tok) = sub.next_token() {
            if let TokenKind::At(kname) = &tok.kind {
                if kname == "keys" {
                    let eq = sub.next_token().map_err(lex_err)?;
                    if eq.kind != TokenKind::Eq {
                        return Err(GlyphError::Parse("expected '=' after @keys".into()));
                    }
                    let lb = sub.next_token().map_err(lex_err)?;
                    if lb.kind != TokenKind::LBracket {
                        return Err(GlyphError::Parse("expected '[' after @keys=".into()));
                    }
                    let mut names = Vec::new();
                    loop {
                        let t = sub.next_token().map_err(lex_err)?;
                        match t.kind {
                            TokenKind::RBracket => break,
                            TokenKind::Ident(s) => names.push(s),
                            TokenKind::Str(s) => names.push(s),
                            TokenKind::Eof => {
                                return Err(GlyphError::Parse("unterminated @keys=[...]".into()))
                            }
                            _ => {}
                        }
                    }
                    keys = Some(names);
                    end_offset = src.len() - sub.rest().len();
                }
            }
        }
        return Ok(Some((SchemaHeader::Bind { hash, keys }, end_offset)));
    }
    Ok(None)
}

fn lex_err(e: crate::lexer::LexError) -> GlyphError {
    GlyphError::BadToken {
        path: String::new(),
        message: e.message,
    }
}

/// The recursive-descent parser itself.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    src: &'a str,
    lookahead: Option<crate::lexer::Token>,
    opts: ParseOptions<'a>,
    warnings: Vec<Warning>,
    path: Vec<String>,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, opts: ParseOptions<'a>) -> Self {
        Self {
            lexer: Lexer::new(src),
            src,
            lookahead: None,
            opts,
            warnings: Vec::new(),
            path: Vec::new(),
        }
    }

    fn cur_path(&self) -> String {
        self.path.join(".")
    }

    fn warn(&mut self, code: &str, message: impl Into<String>) {
        self.warnings.push(Warning::new(code, self.cur_path(), message));
    }

    fn peek(&mut self) -> Result<crate::lexer::Token> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token().map_err(|e| GlyphError::BadToken {
                path: self.cur_path(),
                message: e.message,
            })?);
        }
        Ok(self.lookahead.clone().unwrap())
    }

    fn bump(&mut self) -> Result<crate::lexer::Token> {
        let t = self.peek()?;
        self.lookahead = None;
        Ok(t)
    }

    fn is_strict(&self) -> bool {
        self.opts.mode == ParseMode::Strict
    }

    pub fn parse_value(&mut self) -> Result<GValue> {
        // Skip over a schema header if present at the very start.
        if self.path.is_empty() {
            if let Some((_hdr, end)) = parse_schema_header(self.src)? {
                let rest = &self.src[end..];
                self.lexer = Lexer::new(rest);
                self.lookahead = None;
            }
        }
        self.skip_newlines()?;
        self.parse_value_inner()
    }

    fn skip_newlines(&mut self) -> Result<()> {
        while self.peek()?.kind == TokenKind::Newline {
            self.bump()?;
        }
        Ok(())
    }

    fn parse_value_inner(&mut self) -> Result<GValue> {
        let tok = self.peek()?;
        match tok.kind {
            TokenKind::Null => {
                self.bump()?;
                Ok(GValue::Null)
            }
            TokenKind::Bool(b) => {
                self.bump()?;
                Ok(GValue::Bool(b))
            }
            TokenKind::Int(n) => {
                self.bump()?;
                Ok(GValue::Int(n))
            }
            TokenKind::Float(f) => {
                self.bump()?;
                Ok(GValue::Float(f))
            }
            TokenKind::Str(s) => {
                self.bump()?;
                Ok(GValue::Str(s))
            }
            TokenKind::Time(ref t) => {
                let t = t.clone();
                self.bump()?;
                parse_time(&t)
            }
            TokenKind::Ref { prefix, value } => {
                self.bump()?;
                Ok(GValue::Id(RefId::new(prefix, value)))
            }
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LBrace => self.parse_map(),
            TokenKind::At(ref name) if name == "tab" => self.parse_tabular(),
            TokenKind::Ident(ref name) if name == "b64" => {
                self.bump()?;
                let next = self.peek()?;
                if let TokenKind::Str(b64) = next.kind {
                    self.bump()?;
                    let bytes = decode_b64(&b64).map_err(|e| GlyphError::BadToken {
                        path: self.cur_path(),
                        message: e.message,
                    })?;
                    Ok(GValue::Bytes(bytes))
                } else {
                    Ok(GValue::Str("b64".to_string()))
                }
            }
            TokenKind::Ident(name) => self.parse_ident_value(name),
            TokenKind::Eof => {
                if self.is_strict() {
                    Err(GlyphError::UnexpectedEof { path: self.cur_path() })
                } else {
                    self.warn("PARSE_EMPTY", "expected a value, found end of input");
                    Ok(GValue::Null)
                }
            }
            other => {
                if self.is_strict() {
                    Err(GlyphError::BadToken {
                        path: self.cur_path(),
                        message: format!("unexpected token: {other:?}"),
                    })
                } else {
                    self.bump()?;
                    self.warn("PARSE_SKIPPED_TOKEN", format!("skipped unexpected token {other:?}"));
                    Ok(GValue::Null)
                }
            }
        }
    }

    /// An identifier at value position: `Name{` opens a struct, `Name(`
    /// opens a sum, otherwise it's a bare string.
    fn parse_ident_value(&mut self, name: String) -> Result<GValue> {
        self.bump()?;
        match self.peek()?.kind {
            TokenKind::LBrace => {
                self.path.push(name.clone());
                let fields = self.parse_field_list()?;
                self.path.pop();
                Ok(GValue::Struct(StructValue::new(name, fields)))
            }
            TokenKind::LParen => {
                self.bump()?;
                self.path.push(name.clone());
                let inner = if self.peek()?.kind == TokenKind::RParen {
                    GValue::Null
                } else {
                    self.parse_value_inner()?
                };
                self.path.pop();
                self.expect(TokenKind::RParen, "sum value")?;
                Ok(GValue::Sum(SumValue::new(name, inner)))
            }
            _ => Ok(GValue::Str(name)),
        }
    }

    fn expect(&mut self, kind: TokenKind, ctx: &str) -> Result<()> {
        let tok = self.peek()?;
        if tok.kind == kind {
            self.bump()?;
            Ok(())
        } else if self.is_strict() {
            Err(GlyphError::MismatchedBracket {
                path: self.cur_path(),
                expected: format!("{:?}", kind),
                found: format!("{:?}", tok.kind),
            })
        } else {
            self.warn(
                "PARSE_MISSING_TOKEN",
                format!("expected {:?} in {ctx}, found {:?}", kind, tok.kind),
            );
            Ok(())
        }
    }

    fn parse_list(&mut self) -> Result<GValue> {
        self.bump()?; // '['
        let mut items = Vec::new();
        let mut idx = 0usize;
        loop {
            self.skip_newlines()?;
            let tok = self.peek()?;
            if tok.kind == TokenKind::RBracket {
                self.bump()?;
                break;
            }
            if tok.kind == TokenKind::Eof {
                if self.is_strict() {
                    return Err(GlyphError::UnterminatedContainer { path: self.cur_path() });
                }
                self.warn("PARSE_UNTERMINATED_LIST", "auto-closed list at EOF");
                break;
            }
            self.path.push(format!("[{idx}]"));
            items.push(self.parse_value_inner()?);
            self.path.pop();
            idx += 1;
            if self.peek()?.kind == TokenKind::Comma {
                self.bump()?;
            }
        }
        Ok(GValue::List(items))
    }

    /// Shared by bare `{...}` maps and `Name{...}` struct/sum field lists.
    fn parse_field_list(&mut self) -> Result<Vec<MapEntry>> {
        self.expect(TokenKind::LBrace, "container open")?;
        let mut entries = Vec::new();
        loop {
            self.skip_newlines()?;
            let tok = self.peek()?;
            if tok.kind == TokenKind::RBrace {
                self.bump()?;
                break;
            }
            if tok.kind == TokenKind::Eof {
                if self.is_strict() {
                    return Err(GlyphError::UnterminatedContainer { path: self.cur_path() });
                }
                self.warn("PARSE_UNTERMINATED_CONTAINER", "auto-closed container at EOF");
                break;
            }
            let key = self.parse_key()?;
            let resolved_key = self.resolve_key(&key);
            // Tolerate a missing '='/':' between key and value.
            match self.peek()?.kind {
                TokenKind::Eq | TokenKind::Colon => {
                    self.bump()?;
                }
                _ => {
                    self.warn(
                        "PARSE_MISSING_SEPARATOR",
                        format!("missing '=' after key {resolved_key:?}, assuming value follows"),
                    );
                }
            }
            self.path.push(resolved_key.clone());
            let value = self.parse_value_inner()?;
            self.path.pop();
            entries.push(MapEntry::new(resolved_key, value));
            if self.peek()?.kind == TokenKind::Comma {
                self.bump()?;
            }
        }
        Ok(entries)
    }

    fn parse_map(&mut self) -> Result<GValue> {
        let entries = self.parse_field_list()?;
        Ok(dedup_last_write_wins(entries))
    }

    fn parse_key(&mut self) -> Result<String> {
        let tok = self.bump()?;
        match tok.kind {
            TokenKind::Ident(s) => Ok(s),
            TokenKind::Str(s) => Ok(s),
            TokenKind::Hash(idx) => Ok(format!("#{idx}")),
            TokenKind::Bool(b) => Ok(if b { "t".to_string() } else { "f".to_string() }),
            TokenKind::Null => Ok("_".to_string()),
            other => {
                if self.is_strict() {
                    Err(GlyphError::BadToken {
                        path: self.cur_path(),
                        message: format!("expected a key, found {other:?}"),
                    })
                } else {
                    self.warn("PARSE_BAD_KEY", format!("expected a key, found {other:?}"));
                    Ok(String::new())
                }
            }
        }
    }

    /// Resolve a `#N` compact key against the active dictionary, or a
    /// wire-key against the bound schema; falls through to the literal
    /// key if neither applies (round-trips `#N` as a literal field name).
    fn resolve_key(&self, key: &str) -> String {
        if let Some(rest) = key.strip_prefix('#') {
            if let Ok(idx) = rest.parse::<u16>() {
                if let Some(dict) = self.opts.key_dict {
                    if let Some(name) = dict.resolve_index(idx) {
                        return name;
                    }
                }
            }
            return key.to_string();
        }
        if let Some(schema) = self.opts.schema {
            if let Some(type_name) = self.path.iter().rev().find(|p| !p.starts_with('[')) {
                if let Some(name) = schema.resolve_wire_key(type_name, key) {
                    return name;
                }
            }
        }
        key.to_string()
    }

    fn parse_tabular(&mut self) -> Result<GValue> {
        self.bump()?; // @tab
        let type_tok = self.peek()?;
        match type_tok.kind {
            TokenKind::Null | TokenKind::Ident(_) => {
                self.bump()?;
            }
            _ => {}
        }
        let mut rows_n: Option<usize> = None;
        let mut cols_n: Option<usize> = None;
        loop {
            match self.peek()?.kind {
                TokenKind::Ident(ref name) if name == "rows" => {
                    self.bump()?;
                    self.expect(TokenKind::Eq, "tabular header")?;
                    if let TokenKind::Int(n) = self.bump()?.kind {
                        rows_n = Some(n as usize);
                    }
                }
                TokenKind::Ident(ref name) if name == "cols" => {
                    self.bump()?;
                    self.expect(TokenKind::Eq, "tabular header")?;
                    if let TokenKind::Int(n) = self.bump()?.kind {
                        cols_n = Some(n as usize);
                    }
                }
                TokenKind::LBracket => break,
                _ => break,
            }
        }
        self.expect(TokenKind::LBracket, "tabular column list")?;
        let mut cols = Vec::new();
        loop {
            match self.bump()?.kind {
                TokenKind::RBracket => break,
                TokenKind::Ident(s) | TokenKind::Str(s) => cols.push(s),
                TokenKind::Hash(idx) => cols.push(format!("#{idx}")),
                TokenKind::Eof => {
                    return Err(GlyphError::UnterminatedContainer { path: self.cur_path() })
                }
                _ => {}
            }
        }

        // The body is line-oriented; hand off to raw text right after the
        // column list (before any further token lookahead), since `|`
        // cell boundaries need escape-aware splitting the tokenizer
        // doesn't perform. `lookahead` is guaranteed `None` here: the
        // last `bump()` above consumed the closing `]` without priming
        // the next token.
        debug_assert!(self.lookahead.is_none());
        let body = self.lexer.rest().trim_start_matches(['\n', '\r']);
        let end_marker = body.find("@end").ok_or_else(|| GlyphError::UnterminatedContainer {
            path: self.cur_path(),
        })?;
        let rows_text = &body[..end_marker];
        let mut rows = Vec::new();
        for line in rows_text.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let cells = crate::tabular::split_row(line);
            let mut entries = Vec::with_capacity(cols.len());
            for (col, cell) in cols.iter().zip(cells.iter()) {
                let unescaped = cell.replace("\\|", "|");
                let cv = if unescaped == "_" || unescaped == "∅" {
                    GValue::Null
                } else {
                    parse(&unescaped)?
                };
                entries.push(MapEntry::new(col.clone(), cv));
            }
            rows.push(GValue::Map(entries));
        }
        if let Some(n) = rows_n {
            if n != rows.len() {
                self.warn(
                    "PARSE_TABULAR_ROW_COUNT",
                    format!("header declared rows={n}, found {}", rows.len()),
                );
            }
        }
        if let Some(n) = cols_n {
            if n != cols.len() {
                self.warn(
                    "PARSE_TABULAR_COL_COUNT",
                    format!("header declared cols={n}, found {}", cols.len()),
                );
            }
        }

        let after_end = &body[end_marker + "@end".len()..];
        self.lexer = Lexer::new(after_end);
        self.lookahead = None;
        Ok(GValue::List(rows))
    }
}

/// Collapse duplicate keys, last occurrence wins (spec §3.1, §8.1 #4),
/// preserving the position of first occurrence for stable non-canonical
/// round-tripping.
fn dedup_last_write_wins(entries: Vec<MapEntry>) -> GValue {
    let mut order: Vec<String> = Vec::new();
    let mut last: std::collections::HashMap<String, GValue> = std::collections::HashMap::new();
    for e in entries {
        if !last.contains_key(&e.key) {
            order.push(e.key.clone());
        }
        last.insert(e.key, e.value);
    }
    let out = order
        .into_iter()
        .map(|k| {
            let v = last.remove(&k).unwrap();
            MapEntry::new(k, v)
        })
        .collect();
    GValue::Map(out)
}

fn parse_time(s: &str) -> Result<GValue> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(GValue::Time(t.with_timezone(&Utc)));
    }
    // Accept a bare `YYYY-MM-DDThh:mm:ssZ`/no-offset form too.
    let candidate = if s.ends_with('Z') {
        s.to_string()
    } else {
        format!("{s}Z")
    };
    DateTime::parse_from_rfc3339(&candidate)
        .map(|t| GValue::Time(t.with_timezone(&Utc)))
        .map_err(|e| GlyphError::BadToken {
            path: String::new(),
            message: format!("bad time literal {s:?}: {e}"),
        })
}
