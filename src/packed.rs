//! Schema-packed codec (C4): dense/bitmap positional encoding for
//! structs whose schema marks them `packed`.

use crate::canon::{canonicalize_loose_with_opts, LooseCanonOpts};
use crate::error::{GlyphError, Result};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::parser::parse;
use crate::schema::{Schema, StructDef};
use crate::types::{field, GValue, StructValue};

/// How field identifiers render in packed headers and patch paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Wire,
    Name,
    Fid,
}

/// Emit a struct value in packed form against its type definition.
/// Chooses dense mode if every optional field is present, else bitmap.
pub fn emit_packed(v: &StructValue, schema: &Schema) -> Result<String> {
    let def = schema
        .struct_def(&v.type_name)
        .ok_or_else(|| GlyphError::UnknownType(v.type_name.clone()))?;
    if !def.packed {
        return canonicalize_loose_with_opts(&GValue::Struct(v.clone()), &LooseCanonOpts::default());
    }

    let required = def.required_fields_in_fid_order();
    let optionals = def.optional_fields_in_fid_order();

    let present: Vec<bool> = optionals
        .iter()
        .map(|f| v.get(&f.name).map_or(false, |val| f.keep_null || !val.is_null()))
        .collect();
    let all_present = present.iter().all(|&p| p);

    let mut out = String::new();
    out.push_str(&v.type_name);
    out.push('@');

    if all_present {
        out.push('(');
        let mut first = true;
        for f in required.iter().chain(optionals.iter()) {
            if !first {
                out.push(' ');
            }
            first = false;
            let value = v
                .get(&f.name)
                .ok_or_else(|| GlyphError::RequiredFieldMissing { path: f.name.clone() })?;
            write_packed_value(&mut out, value, schema, def)?;
        }
        out.push(')');
    } else {
        let mut mask: u64 = 0;
        for (i, &p) in present.iter().enumerate() {
            if p {
                mask |= 1 << i;
            }
        }
        out.push_str(&format!("{{bm={}}}", format_bitmap(mask, optionals.len())));
        out.push('(');
        let mut first = true;
        for f in &required {
            if !first {
                out.push(' ');
            }
            first = false;
            let value = v
                .get(&f.name)
                .ok_or_else(|| GlyphError::RequiredFieldMissing { path: f.name.clone() })?;
            write_packed_value(&mut out, value, schema, def)?;
        }
        for (f, &p) in optionals.iter().zip(present.iter()) {
            if !p {
                continue;
            }
            if !first {
                out.push(' ');
            }
            first = false;
            let value = v.get(&f.name).unwrap();
            write_packed_value(&mut out, value, schema, def)?;
        }
        out.push(')');
    }

    Ok(out)
}

/// `0b` + minimal-width binary, no leading zeros; `0b0` is the unique
/// all-absent encoding (spec §8.1 invariant 8).
fn format_bitmap(mask: u64, width: usize) -> String {
    if mask == 0 {
        return "0b0".to_string();
    }
    let bits: String = (0..width)
        .rev()
        .map(|i| if mask & (1 << i) != 0 { '1' } else { '0' })
        .collect();
    let trimmed = bits.trim_start_matches('0');
    format!("0b{}", if trimmed.is_empty() { "0" } else { trimmed })
}

fn write_packed_value(
    out: &mut String,
    v: &GValue,
    schema: &Schema,
    parent_def: &StructDef,
) -> Result<()> {
    let _ = parent_def;
    match v {
        GValue::Struct(s) => {
            if schema.struct_def(&s.type_name).map(|d| d.packed).unwrap_or(false) {
                out.push_str(&emit_packed(s, schema)?);
            } else {
                out.push_str(&canonicalize_loose_with_opts(v, &LooseCanonOpts::default())?);
            }
        }
        GValue::List(items) if is_tabular_hinted_list(items, schema) => {
            let elem_type = items
                .first()
                .and_then(|i| i.as_struct())
                .map(|s| s.type_name.clone())
                .unwrap();
            out.push_str(&crate::tabular::emit_tabular(items, schema, &elem_type)?);
        }
        _ => out.push_str(&canonicalize_loose_with_opts(v, &LooseCanonOpts::default())?),
    }
    Ok(())
}

fn is_tabular_hinted_list(items: &[GValue], schema: &Schema) -> bool {
    let Some(first) = items.first().and_then(|i| i.as_struct()) else {
        return false;
    };
    if !items.iter().all(|i| matches!(i, GValue::Struct(s) if s.type_name == first.type_name)) {
        return false;
    }
    schema
        .struct_def(&first.type_name)
        .map(|d| d.tabular_hint)
        .unwrap_or(false)
}

/// Parse a packed-struct literal (`T@(...)` or `T@{bm=...}(...)`) against
/// its schema. Requires the schema to map field count and FID order back.
pub fn parse_packed(src: &str, schema: &Schema) -> Result<StructValue> {
    let mut lexer = Lexer::new(src);
    let tok = next(&mut lexer)?;
    let type_name = match tok.kind {
        TokenKind::Ident(name) => name,
        other => return Err(bad_token(format!("expected type name, found {other:?}"))),
    };
    let def = schema
        .struct_def(&type_name)
        .ok_or_else(|| GlyphError::UnknownType(type_name.clone()))?;

    let at_tok = next(&mut lexer)?;
    if !matches!(at_tok.kind, TokenKind::At(ref s) if s.is_empty()) {
        return Err(bad_token(format!("expected '@', found {:?}", at_tok.kind)));
    }

    let required = def.required_fields_in_fid_order();
    let optionals = def.optional_fields_in_fid_order();

    // Default: dense, all optionals present.
    let mut present_mask: u64 = (1u64 << optionals.len()) - 1;

    let next_tok = peek(&mut lexer)?;
    if matches!(next_tok.kind, TokenKind::LBrace) {
        next(&mut lexer)?; // consume '{'
        expect_ident(&mut lexer, "bm")?;
        expect_kind(&mut lexer, TokenKind::Eq)?;
        let bm_tok = next(&mut lexer)?;
        let bitmap_str = match bm_tok.kind {
            TokenKind::Ident(s) => s,
            other => return Err(bad_token(format!("expected bitmap literal, found {other:?}"))),
        };
        present_mask = parse_bitmap(&bitmap_str)?;
        let width = 64 - present_mask.leading_zeros() as usize;
        if width > optionals.len() {
            return Err(GlyphError::BitmapWidthExceeded {
                type_name: type_name.clone(),
                width,
                max: optionals.len(),
            });
        }
        expect_kind(&mut lexer, TokenKind::RBrace)?;
    }

    expect_kind(&mut lexer, TokenKind::LParen)?;

    let present_count = (0..optionals.len()).filter(|i| present_mask & (1 << i) != 0).count();
    let expected_count = required.len() + present_count;

    let mut fields = Vec::with_capacity(expected_count);
    let rest_after_paren = lexer.rest();
    let (values_text, after) = split_values_text(rest_after_paren)?;
    let cells = split_values(values_text);
    if cells.len() != expected_count {
        return Err(GlyphError::WrongPositionalCount {
            type_name: type_name.clone(),
            expected: expected_count,
            got: cells.len(),
        });
    }

    let mut idx = 0;
    for f in &required {
        let v = parse_packed_field_value(&cells[idx], schema, f.name.as_str())?;
        fields.push(field(f.name.clone(), v));
        idx += 1;
    }
    for (i, f) in optionals.iter().enumerate() {
        if present_mask & (1 << i) != 0 {
            let v = parse_packed_field_value(&cells[idx], schema, f.name.as_str())?;
            fields.push(field(f.name.clone(), v));
            idx += 1;
        }
    }

    let _ = after;
    Ok(StructValue::new(type_name, fields))
}

fn parse_packed_field_value(cell: &str, schema: &Schema, field_name: &str) -> Result<GValue> {
    let _ = (schema, field_name);
    parse(cell.trim())
}

/// Split `v1 v2 v3)` (everything up through the matching close-paren) into
/// the raw text between the parens and the remainder after it. Values are
/// themselves whitespace-separated GLYPH literals, so depth tracking only
/// needs to watch for nested `(`/`)`/`[`/`]`/`{`/`}`.
fn split_values_text(s: &str) -> Result<(&str, &str)> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' if depth == 0 => return Ok((&s[..i], &s[i + 1..])),
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    Err(bad_token("unterminated packed value list".to_string()))
}

fn split_values(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut cur = String::new();
    let mut chars = s.trim().chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                cur.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                cur.push(c);
            }
            '"' => {
                cur.push(c);
                for d in chars.by_ref() {
                    cur.push(d);
                    if d == '"' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() && depth == 0 => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn parse_bitmap(s: &str) -> Result<u64> {
    let digits = s.strip_prefix("0b").ok_or_else(|| bad_token(format!("expected 0b-prefixed bitmap, found {s:?}")))?;
    u64::from_str_radix(digits, 2).map_err(|_| bad_token(format!("bad bitmap literal: {s}")))
}

fn next(lexer: &mut Lexer) -> Result<Token> {
    lexer.next_token().map_err(|e| GlyphError::BadToken {
        path: String::new(),
        message: e.message,
    })
}

fn peek(lexer: &mut Lexer) -> Result<Token> {
    // `Lexer` has no peek of its own at this layer; packed parsing is
    // single-pass and only ever needs to look one token ahead for the
    // optional `{bm=...}` header, so a throwaway sub-lexer over the
    // unconsumed tail is cheapest.
    let rest = lexer.rest();
    let mut probe = Lexer::new(rest);
    next(&mut probe)
}

fn expect_kind(lexer: &mut Lexer, kind: TokenKind) -> Result<()> {
    let tok = next(lexer)?;
    if tok.kind == kind {
        Ok(())
    } else {
        Err(bad_token(format!("expected {kind:?}, found {:?}", tok.kind)))
    }
}

fn expect_ident(lexer: &mut Lexer, name: &str) -> Result<()> {
    let tok = next(lexer)?;
    match tok.kind {
        TokenKind::Ident(s) if s == name => Ok(()),
        other => Err(bad_token(format!("expected identifier {name:?}, found {other:?}"))),
    }
}

fn bad_token(message: String) -> GlyphError {
    GlyphError::BadToken {
        path: String::new(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, StructDef, TypeDef, TypeSpec};
    use crate::types::GValue;
    use std::collections::HashMap;

    pub(super) fn match_schema() -> Schema {
        let mut types = HashMap::new();
        let def = StructDef::new("1")
            .packed()
            .field(FieldDef::new("p1", TypeSpec::Int, 1))
            .field(FieldDef::new("p2", TypeSpec::Int, 2))
            .field(FieldDef::new("p3", TypeSpec::Int, 3))
            .field(FieldDef::new("p4", TypeSpec::Int, 4))
            .field(FieldDef::new("o5", TypeSpec::Int, 5).optional())
            .field(FieldDef::new("o6", TypeSpec::Int, 6).optional())
            .field(FieldDef::new("o7", TypeSpec::Int, 7).optional())
            .field(FieldDef::new("o8", TypeSpec::Int, 8).optional());
        types.insert("Match".to_string(), TypeDef::Struct(def));
        Schema::new(types)
    }

    #[test]
    fn dense_emission_when_all_optionals_present() {
        let schema = match_schema();
        let v = StructValue::new(
            "Match",
            vec![
                field("p1", GValue::int(1)),
                field("p2", GValue::int(2)),
                field("p3", GValue::int(3)),
                field("p4", GValue::int(4)),
                field("o5", GValue::int(5)),
                field("o6", GValue::int(6)),
                field("o7", GValue::int(7)),
                field("o8", GValue::int(8)),
            ],
        );
        assert_eq!(emit_packed(&v, &schema).unwrap(), "Match@(1 2 3 4 5 6 7 8)");
    }

    #[test]
    fn bitmap_emission_matches_spec_scenario_s3() {
        let schema = match_schema();
        let v = StructValue::new(
            "Match",
            vec![
                field("p1", GValue::int(1)),
                field("p2", GValue::int(2)),
                field("p3", GValue::int(3)),
                field("p4", GValue::int(4)),
                field("o7", GValue::int(7)),
                field("o8", GValue::int(8)),
            ],
        );
        assert_eq!(
            emit_packed(&v, &schema).unwrap(),
            "Match@{bm=0b1100}(1 2 3 4 7 8)"
        );
    }

    #[test]
    fn packed_roundtrip_dense() {
        let schema = match_schema();
        let v = StructValue::new(
            "Match",
            vec![
                field("p1", GValue::int(1)),
                field("p2", GValue::int(2)),
                field("p3", GValue::int(3)),
                field("p4", GValue::int(4)),
                field("o5", GValue::int(5)),
                field("o6", GValue::int(6)),
                field("o7", GValue::int(7)),
                field("o8", GValue::int(8)),
            ],
        );
        let emitted = emit_packed(&v, &schema).unwrap();
        let parsed = parse_packed(&emitted, &schema).unwrap();
        assert_eq!(parsed, v);
    }

    #[test]
    fn packed_roundtrip_bitmap() {
        let schema = match_schema();
        let v = StructValue::new(
            "Match",
            vec![
                field("p1", GValue::int(1)),
                field("p2", GValue::int(2)),
                field("p3", GValue::int(3)),
                field("p4", GValue::int(4)),
                field("o7", GValue::int(7)),
                field("o8", GValue::int(8)),
            ],
        );
        let emitted = emit_packed(&v, &schema).unwrap();
        let parsed = parse_packed(&emitted, &schema).unwrap();
        assert_eq!(parsed, v);
    }

    #[test]
    fn all_absent_optionals_use_0b0() {
        let schema = match_schema();
        let v = StructValue::new(
            "Match",
            vec![
                field("p1", GValue::int(1)),
                field("p2", GValue::int(2)),
                field("p3", GValue::int(3)),
                field("p4", GValue::int(4)),
            ],
        );
        assert_eq!(emit_packed(&v, &schema).unwrap(), "Match@{bm=0b0}(1 2 3 4)");
    }

    fn keep_null_schema() -> Schema {
        let mut types = HashMap::new();
        let def = StructDef::new("1")
            .packed()
            .field(FieldDef::new("p1", TypeSpec::Int, 1))
            .field(FieldDef::new("o2", TypeSpec::Int, 2).optional())
            .field(FieldDef::new("o3", TypeSpec::Int, 3).optional().keep_null());
        types.insert("Keepy".to_string(), TypeDef::Struct(def));
        Schema::new(types)
    }

    #[test]
    fn absent_optional_without_keep_null_is_elided_from_bitmap() {
        let schema = keep_null_schema();
        let v = StructValue::new("Keepy", vec![field("p1", GValue::int(1))]);
        assert_eq!(emit_packed(&v, &schema).unwrap(), "Keepy@{bm=0b0}(1)");
    }

    #[test]
    fn explicit_null_without_keep_null_is_also_elided() {
        let schema = keep_null_schema();
        let v = StructValue::new(
            "Keepy",
            vec![field("p1", GValue::int(1)), field("o2", GValue::Null)],
        );
        assert_eq!(emit_packed(&v, &schema).unwrap(), "Keepy@{bm=0b0}(1)");
    }

    #[test]
    fn explicit_null_with_keep_null_is_kept_present_in_bitmap() {
        let schema = keep_null_schema();
        let v = StructValue::new(
            "Keepy",
            vec![field("p1", GValue::int(1)), field("o3", GValue::Null)],
        );
        // o3 is the second optional (bit index 1), o2 absent: mask = 0b10.
        assert_eq!(emit_packed(&v, &schema).unwrap(), "Keepy@{bm=0b10}(1 _)");
    }

    #[test]
    fn wrong_positional_count_is_rejected() {
        let schema = match_schema();
        let err = parse_packed("Match@(1 2 3)", &schema).unwrap_err();
        assert!(matches!(err, GlyphError::WrongPositionalCount { .. }));
    }
}

#[cfg(test)]
mod proptests {
    use super::tests::match_schema;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn packed_roundtrip_holds_for_any_optional_presence(
            p1 in any::<i64>(),
            p2 in any::<i64>(),
            p3 in any::<i64>(),
            p4 in any::<i64>(),
            optionals in prop::collection::vec(any::<i64>(), 4..=4),
            present in prop::collection::vec(any::<bool>(), 4..=4),
        ) {
            let schema = match_schema();
            let mut fields = vec![
                field("p1", GValue::int(p1)),
                field("p2", GValue::int(p2)),
                field("p3", GValue::int(p3)),
                field("p4", GValue::int(p4)),
            ];
            for (i, keep) in present.iter().enumerate() {
                if *keep {
                    fields.push(field(format!("o{}", 5 + i), GValue::int(optionals[i])));
                }
            }
            let v = StructValue::new("Match", fields);
            let emitted = emit_packed(&v, &schema).unwrap();
            let parsed = parse_packed(&emitted, &schema).unwrap();
            prop_assert_eq!(parsed, v);
        }
    }
}
