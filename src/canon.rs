//! Canonical emitter (loose mode, schema-optional).
//!
//! Deterministic, idempotent textual serialization of a [`GValue`]. The
//! only inputs that affect output are the value itself and a
//! [`LooseCanonOpts`] — no hidden global state.

use crate::error::{GlyphError, Result};
use crate::types::*;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Null style for canonicalization. Both glyphs are always accepted on
/// input; this only controls what the emitter writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullStyle {
    /// Use underscore: `_` (LLM mode, default).
    #[default]
    Underscore,
    /// Use unicode symbol: `∅` (pretty mode).
    Symbol,
}

/// Something that can resolve a field-name key to/from a compact `#N`
/// index (spec §4.3.4). [`crate::dict::StreamDict`] implements this; a
/// bare `@keys=[...]` header can be represented with
/// [`InlineKeyDict`].
pub trait KeyDictionary {
    fn lookup_index(&self, key: &str) -> Option<u16>;
    fn resolve_index(&self, idx: u16) -> Option<String>;
}

/// A fixed, ordered key dictionary built from an explicit `@keys=[...]`
/// header, with no persistence or learning phase.
#[derive(Debug, Clone)]
pub struct InlineKeyDict {
    keys: Vec<String>,
}

impl InlineKeyDict {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl KeyDictionary for InlineKeyDict {
    fn lookup_index(&self, key: &str) -> Option<u16> {
        self.keys.iter().position(|k| k == key).map(|i| i as u16)
    }

    fn resolve_index(&self, idx: u16) -> Option<String> {
        self.keys.get(idx as usize).cloned()
    }
}

/// Options for loose canonicalization.
#[derive(Debug, Clone)]
pub struct LooseCanonOpts {
    /// Enable auto-tabular mode for homogeneous arrays.
    pub auto_tabular: bool,
    /// Minimum rows for tabular mode.
    pub min_rows: usize,
    /// Maximum columns for tabular mode.
    pub max_cols: usize,
    /// Allow missing keys in tabular (fill with null) instead of requiring
    /// strictly identical key sets.
    pub allow_missing: bool,
    /// Null value style.
    pub null_style: NullStyle,
}

impl Default for LooseCanonOpts {
    fn default() -> Self {
        Self {
            auto_tabular: true,
            min_rows: 3,
            max_cols: 64,
            allow_missing: true,
            null_style: NullStyle::Underscore,
        }
    }
}

impl LooseCanonOpts {
    /// Options optimized for LLM output (same as default).
    pub fn llm() -> Self {
        Self::default()
    }

    /// Options with pretty unicode null symbol.
    pub fn pretty() -> Self {
        Self {
            null_style: NullStyle::Symbol,
            ..Self::default()
        }
    }

    /// Options with tabular disabled.
    pub fn no_tabular() -> Self {
        Self {
            auto_tabular: false,
            ..Self::default()
        }
    }
}

/// Canonicalize a GValue to GLYPH string with default options.
///
/// Fails only for values containing a NaN or infinite float (spec §4.3.1,
/// §7): every other `GValue` canonicalizes infallibly.
pub fn canonicalize_loose(v: &GValue) -> Result<String> {
    canonicalize_loose_with_opts(v, &LooseCanonOpts::default())
}

/// Canonicalize without tabular mode.
pub fn canonicalize_loose_no_tabular(v: &GValue) -> Result<String> {
    canonicalize_loose_with_opts(v, &LooseCanonOpts::no_tabular())
}

/// Canonicalize with custom options.
pub fn canonicalize_loose_with_opts(v: &GValue, opts: &LooseCanonOpts) -> Result<String> {
    let mut buf = String::new();
    write_canon_loose(&mut buf, v, opts, None)?;
    Ok(buf)
}

/// Canonicalize with custom options and an active key dictionary, enabling
/// compact-key (`#N`) emission for keys present in the dictionary.
pub fn canonicalize_loose_with_dict(
    v: &GValue,
    opts: &LooseCanonOpts,
    dict: &dyn KeyDictionary,
) -> Result<String> {
    let mut buf = String::new();
    write_canon_loose(&mut buf, v, opts, Some(dict))?;
    Ok(buf)
}

/// Get fingerprint (canonical form) of a GValue. Used as the
/// `base_fingerprint` input to patches.
pub fn fingerprint_loose(v: &GValue) -> Result<String> {
    canonicalize_loose(v)
}

/// First 16 hex chars of the SHA-256 of the canonical form of `v`.
pub fn fingerprint_hash(v: &GValue) -> Result<String> {
    let canonical = canonicalize_loose(v)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();
    Ok(hex_encode(&result[..8]))
}

/// Get SHA-256 hash of canonical form (first 16 hex chars).
///
/// Kept as an alias of [`fingerprint_hash`] for source compatibility with
/// earlier call sites that named it this way.
pub fn hash_loose(v: &GValue) -> Result<String> {
    fingerprint_hash(v)
}

/// Check if two GValues are semantically equal (canonical equality).
pub fn equal_loose(a: &GValue, b: &GValue) -> Result<bool> {
    Ok(canonicalize_loose(a)? == canonicalize_loose(b)?)
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================
// Internal canonicalization
// ============================================================

fn write_canon_loose(
    buf: &mut String,
    v: &GValue,
    opts: &LooseCanonOpts,
    dict: Option<&dyn KeyDictionary>,
) -> Result<()> {
    match v {
        GValue::Null => buf.push_str(canon_null(opts.null_style)),
        GValue::Bool(b) => buf.push(if *b { 't' } else { 'f' }),
        GValue::Int(n) => buf.push_str(&canon_int(*n)),
        GValue::Float(f) => buf.push_str(&canon_float(*f)?),
        GValue::Str(s) => buf.push_str(&canon_string(s)),
        GValue::Bytes(data) => write_canon_bytes(buf, data),
        GValue::Time(t) => buf.push_str(&t.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        GValue::Id(ref_id) => write_canon_ref(buf, ref_id),
        GValue::List(items) => write_canon_list(buf, items, opts, dict)?,
        GValue::Map(entries) => write_canon_map(buf, entries, opts, dict)?,
        GValue::Struct(s) => write_canon_struct(buf, s, opts, dict)?,
        GValue::Sum(s) => write_canon_sum(buf, s, opts, dict)?,
        GValue::Blob(b) => write_canon_blob(buf, b, opts),
        GValue::PoolRef(p) => write_canon_pool_ref(buf, p),
    }
    Ok(())
}

fn canon_null(style: NullStyle) -> &'static str {
    match style {
        NullStyle::Underscore => "_",
        NullStyle::Symbol => "∅",
    }
}

fn canon_int(n: i64) -> String {
    n.to_string()
}

/// Shortest round-trip decimal form, exponent letter lowercased to `e`.
/// NaN/±infinity cannot be canonicalized (spec §4.3.1, §7) and surface as
/// [`GlyphError::NonFiniteFloat`] rather than a panic.
fn canon_float(f: f64) -> Result<String> {
    if f.is_nan() || f.is_infinite() {
        return Err(GlyphError::NonFiniteFloat(f));
    }

    // Negative zero canonicalizes the same as zero.
    let f = if f == 0.0 { 0.0 } else { f };

    let mut s = ryu::Buffer::new().format_finite(f).to_string();
    // ryu emits e.g. "1e0", "1.5e10"; lowercase is already guaranteed, but
    // ryu also always includes a decimal point ("1.0"); collapse whole
    // numbers with no exponent to bare integers per the spec's "shortest"
    // rule.
    let out = if let Some(epos) = s.find(['e', 'E']) {
        s.make_ascii_lowercase();
        let _ = epos;
        s
    } else if let Some(stripped) = s.strip_suffix(".0") {
        stripped.to_string()
    } else {
        s
    };
    Ok(out)
}

/// Bare-safe pattern: `[A-Za-z_][A-Za-z0-9_\-./]*`, excluding reserved
/// words.
fn is_bare_safe(s: &str) -> bool {
    let mut chars = s.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')) {
        return false;
    }
    const RESERVED: &[&str] = &["t", "f", "true", "false", "null", "none", "nil"];
    !RESERVED.contains(&s)
}

fn canon_string(s: &str) -> String {
    if is_bare_safe(s) {
        s.to_string()
    } else {
        quote_string(s)
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn write_canon_bytes(buf: &mut String, data: &[u8]) {
    buf.push_str("b64\"");
    buf.push_str(&BASE64.encode(data));
    buf.push('"');
}

fn write_canon_ref(buf: &mut String, ref_id: &RefId) {
    buf.push('^');
    if !ref_id.prefix.is_empty() {
        buf.push_str(&ref_id.prefix);
        buf.push(':');
    }
    if is_ref_safe(&ref_id.value) {
        buf.push_str(&ref_id.value);
    } else {
        buf.push_str(&quote_string(&ref_id.value));
    }
}

/// Ref-safe characters per spec §4.3.1: letters, digits, `_`, `-`, `.`,
/// `/`, `:`. More permissive than a bare string (digits may lead).
fn is_ref_safe(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':') || (c as u32) > 127)
}

fn write_canon_blob(buf: &mut String, b: &BlobRef, opts: &LooseCanonOpts) {
    buf.push_str("Blob{");
    let mut fields: Vec<(String, String)> = vec![
        ("cid".to_string(), canon_string(&b.cid)),
        ("mime".to_string(), canon_string(&b.mime)),
        ("bytes".to_string(), canon_int(b.bytes as i64)),
    ];
    if let Some(name) = &b.name {
        fields.push(("name".to_string(), canon_string(name)));
    }
    if let Some(caption) = &b.caption {
        fields.push(("caption".to_string(), canon_string(caption)));
    }
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    for (i, (k, v)) in fields.iter().enumerate() {
        if i > 0 {
            buf.push(' ');
        }
        buf.push_str(&canon_string(k));
        buf.push('=');
        buf.push_str(v);
    }
    let _ = opts;
    buf.push('}');
}

fn write_canon_pool_ref(buf: &mut String, p: &PoolRef) {
    buf.push('^');
    buf.push_str(&p.pool_id);
    buf.push(':');
    buf.push_str(&p.index.to_string());
}

fn write_canon_list(
    buf: &mut String,
    items: &[GValue],
    opts: &LooseCanonOpts,
    dict: Option<&dyn KeyDictionary>,
) -> Result<()> {
    if opts.auto_tabular {
        if let Some(tabular) = try_emit_tabular(items, opts, dict)? {
            buf.push_str(&tabular);
            return Ok(());
        }
    }

    buf.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            buf.push(' ');
        }
        write_canon_loose(buf, item, opts, dict)?;
    }
    buf.push(']');
    Ok(())
}

/// Render a single entry key, preferring a compact `#N` form when `dict`
/// has the key and falls back to the canonical bare/quoted form otherwise.
fn canon_key(key: &str, dict: Option<&dyn KeyDictionary>) -> String {
    if let Some(d) = dict {
        if let Some(idx) = d.lookup_index(key) {
            return format!("#{}", idx);
        }
    }
    canon_string(key)
}

fn sort_key(key: &str) -> String {
    canon_string(key)
}

fn write_canon_map(
    buf: &mut String,
    entries: &[MapEntry],
    opts: &LooseCanonOpts,
    dict: Option<&dyn KeyDictionary>,
) -> Result<()> {
    buf.push('{');
    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort_by(|a, b| sort_key(&a.key).cmp(&sort_key(&b.key)));

    for (i, entry) in sorted.iter().enumerate() {
        if i > 0 {
            buf.push(' ');
        }
        buf.push_str(&canon_key(&entry.key, dict));
        buf.push('=');
        write_canon_loose(buf, &entry.value, opts, dict)?;
    }
    buf.push('}');
    Ok(())
}

fn write_canon_struct(
    buf: &mut String,
    s: &StructValue,
    opts: &LooseCanonOpts,
    dict: Option<&dyn KeyDictionary>,
) -> Result<()> {
    buf.push_str(&s.type_name);
    buf.push('{');

    let mut sorted: Vec<_> = s.fields.iter().collect();
    sorted.sort_by(|a, b| sort_key(&a.key).cmp(&sort_key(&b.key)));

    for (i, field) in sorted.iter().enumerate() {
        if i > 0 {
            buf.push(' ');
        }
        buf.push_str(&canon_key(&field.key, dict));
        buf.push('=');
        write_canon_loose(buf, &field.value, opts, dict)?;
    }
    buf.push('}');
    Ok(())
}

fn write_canon_sum(
    buf: &mut String,
    s: &SumValue,
    opts: &LooseCanonOpts,
    dict: Option<&dyn KeyDictionary>,
) -> Result<()> {
    buf.push_str(&s.tag);
    if let GValue::Struct(inner) = s.inner.as_ref() {
        write_canon_struct(buf, inner, opts, dict)?;
    } else {
        buf.push('(');
        write_canon_loose(buf, &s.inner, opts, dict)?;
        buf.push(')');
    }
    Ok(())
}

// ============================================================
// Auto-tabular detection and emission
// ============================================================

fn try_emit_tabular(
    items: &[GValue],
    opts: &LooseCanonOpts,
    dict: Option<&dyn KeyDictionary>,
) -> Result<Option<String>> {
    if items.len() < opts.min_rows {
        return Ok(None);
    }

    let mut all_keys: HashSet<String> = HashSet::new();
    let mut row_keys: Vec<HashSet<String>> = Vec::new();

    for item in items {
        let keys = match get_object_keys(item) {
            Some(keys) => keys,
            None => return Ok(None),
        };
        let key_set: HashSet<String> = keys.into_iter().collect();
        all_keys.extend(key_set.clone());
        row_keys.push(key_set);
    }

    if all_keys.is_empty() || all_keys.len() > opts.max_cols {
        return Ok(None);
    }

    if !opts.allow_missing {
        let first_keys = &row_keys[0];
        for keys in &row_keys[1..] {
            if keys != first_keys {
                return Ok(None);
            }
        }
    } else {
        // Open question resolution: at least 50% of the union of keys
        // must be common to every row.
        let mut common_keys: HashSet<String> = row_keys[0].clone();
        for keys in &row_keys[1..] {
            common_keys = common_keys.intersection(keys).cloned().collect();
        }
        if common_keys.len() * 2 < all_keys.len() {
            return Ok(None);
        }
    }

    let mut cols: Vec<String> = all_keys.into_iter().collect();
    cols.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let mut buf = String::new();
    buf.push_str(&format!(
        "@tab _ rows={} cols={} [{}]\n",
        items.len(),
        cols.len(),
        cols.iter()
            .map(|c| canon_string(c))
            .collect::<Vec<_>>()
            .join(" ")
    ));

    for item in items {
        buf.push('|');
        let values = get_object_values(item);
        for col in &cols {
            let cell = match values.get(col) {
                Some(v) => {
                    let mut cell_buf = String::new();
                    write_canon_loose(&mut cell_buf, v, opts, dict)?;
                    cell_buf.replace('|', "\\|")
                }
                None => canon_null(opts.null_style).to_string(),
            };
            buf.push_str(&cell);
            buf.push('|');
        }
        buf.push('\n');
    }
    buf.push_str("@end");

    Ok(Some(buf))
}

fn get_object_keys(v: &GValue) -> Option<Vec<String>> {
    match v {
        GValue::Map(entries) => Some(entries.iter().map(|e| e.key.clone()).collect()),
        GValue::Struct(s) => Some(s.fields.iter().map(|f| f.key.clone()).collect()),
        _ => None,
    }
}

fn get_object_values(v: &GValue) -> std::collections::HashMap<String, &GValue> {
    match v {
        GValue::Map(entries) => entries.iter().map(|e| (e.key.clone(), &e.value)).collect(),
        GValue::Struct(s) => s.fields.iter().map(|f| (f.key.clone(), &f.value)).collect(),
        _ => std::collections::HashMap::new(),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::parser::parse;
    use proptest::prelude::*;

    /// A finite float, generated separately from NaN/infinity since those
    /// are rejected by `canon_float` rather than round-tripped.
    fn finite_float() -> impl Strategy<Value = f64> {
        any::<f64>().prop_filter("finite", |f| f.is_finite())
    }

    fn scalar() -> impl Strategy<Value = GValue> {
        prop_oneof![
            Just(GValue::Null),
            any::<bool>().prop_map(GValue::bool),
            any::<i64>().prop_map(GValue::int),
            finite_float().prop_map(GValue::float),
            "[a-zA-Z][a-zA-Z0-9_]{0,12}".prop_map(GValue::str),
        ]
    }

    fn map_value() -> impl Strategy<Value = GValue> {
        prop::collection::vec(("[a-z][a-z0-9]{0,6}", scalar()), 0..5)
            .prop_map(|pairs| GValue::map(pairs.into_iter().map(|(k, v)| field(k, v)).collect()))
    }

    proptest! {
        /// Canonicalizing a value, parsing it back, and canonicalizing
        /// again must reach a fixed point (spec's canonical-form idempotence
        /// invariant).
        #[test]
        fn canonicalize_is_idempotent(v in map_value()) {
            let once = canonicalize_loose(&v).unwrap();
            let reparsed = parse(&once).unwrap();
            let twice = canonicalize_loose(&reparsed).unwrap();
            prop_assert_eq!(once, twice);
        }

        /// Map key order never affects the canonical form.
        #[test]
        fn canonicalize_is_key_order_independent(v in map_value()) {
            let GValue::Map(mut entries) = v else { return Ok(()); };
            let forward = canonicalize_loose(&GValue::Map(entries.clone())).unwrap();
            entries.reverse();
            let reversed = canonicalize_loose(&GValue::Map(entries)).unwrap();
            prop_assert_eq!(forward, reversed);
        }
    }
}
