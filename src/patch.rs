//! Patch engine (C6): paths, ops, wire form, apply, and diff.

use crate::canon::{canonicalize_loose, fingerprint_hash};
use crate::error::{GlyphError, Result};
use crate::packed::KeyMode;
use crate::parser::parse;
use crate::types::{field, GValue, MapEntry, RefId, StructValue};

/// A single path segment.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// `.name` — field by canonical or wire name.
    Name(String),
    /// `.#fid` — field by FID.
    Fid(u32),
    /// `[n]` — list index.
    Index(usize),
    /// `["key"]` — map key.
    Key(String),
}

/// An ordered sequence of path segments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path(pub Vec<PathSegment>);

impl Path {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![PathSegment::Name(name.into())])
    }

    pub fn push(mut self, seg: PathSegment) -> Self {
        self.0.push(seg);
        self
    }

    pub fn render(&self, mode: KeyMode) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            match seg {
                PathSegment::Name(n) => {
                    out.push('.');
                    out.push_str(n);
                }
                PathSegment::Fid(fid) => out.push_str(&format!(".#{fid}")),
                PathSegment::Index(i) => out.push_str(&format!("[{i}]")),
                PathSegment::Key(k) => out.push_str(&format!("[\"{k}\"]")),
            }
        }
        out
    }

    fn parse(s: &str) -> Result<Self> {
        let mut segs = Vec::new();
        let mut chars = s.char_indices().peekable();
        while let Some(&(i, c)) = chars.peek() {
            match c {
                '.' => {
                    chars.next();
                    if chars.peek().map(|&(_, c)| c) == Some('#') {
                        chars.next();
                        let start = i + 2;
                        let mut end = start;
                        while let Some(&(j, c)) = chars.peek() {
                            if c.is_ascii_digit() {
                                end = j + 1;
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        let fid: u32 = s[start..end]
                            .parse()
                            .map_err(|_| GlyphError::BadPath(s.to_string()))?;
                        segs.push(PathSegment::Fid(fid));
                    } else {
                        let start = i + 1;
                        let mut end = start;
                        while let Some(&(j, c)) = chars.peek() {
                            if c == '.' || c == '[' {
                                break;
                            }
                            end = j + c.len_utf8();
                            chars.next();
                        }
                        segs.push(PathSegment::Name(s[start..end].to_string()));
                    }
                }
                '[' => {
                    chars.next();
                    if chars.peek().map(|&(_, c)| c) == Some('"') {
                        chars.next();
                        let start = i + 2;
                        let mut end = start;
                        while let Some(&(j, c)) = chars.peek() {
                            if c == '"' {
                                end = j;
                                chars.next();
                                break;
                            }
                            chars.next();
                        }
                        if chars.peek().map(|&(_, c)| c) == Some(']') {
                            chars.next();
                        }
                        segs.push(PathSegment::Key(s[start..end].to_string()));
                    } else {
                        let start = i + 1;
                        let mut end = start;
                        while let Some(&(j, c)) = chars.peek() {
                            if c == ']' {
                                end = j;
                                chars.next();
                                break;
                            }
                            end = j + c.len_utf8();
                            chars.next();
                        }
                        let idx: usize = s[start..end]
                            .parse()
                            .map_err(|_| GlyphError::BadPath(s.to_string()))?;
                        segs.push(PathSegment::Index(idx));
                    }
                }
                _ => return Err(GlyphError::BadPath(s.to_string())),
            }
        }
        Ok(Path(segs))
    }
}

/// A single patch operation (closed set, spec §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set { path: Path, value: GValue },
    Append { path: Path, value: GValue, idx: Option<usize> },
    Delete { path: Path },
    Delta { path: Path, amount: f64 },
}

impl PatchOp {
    fn glyph(&self) -> char {
        match self {
            PatchOp::Set { .. } => '=',
            PatchOp::Append { .. } => '+',
            PatchOp::Delete { .. } => '-',
            PatchOp::Delta { .. } => '~',
        }
    }

    fn path(&self) -> &Path {
        match self {
            PatchOp::Set { path, .. }
            | PatchOp::Append { path, .. }
            | PatchOp::Delete { path }
            | PatchOp::Delta { path, .. } => path,
        }
    }
}

/// A full patch: target, optional schema binding, optional optimistic
/// concurrency base, and an ordered operation list.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub target: RefId,
    pub schema_hash: Option<String>,
    pub key_mode: KeyMode,
    pub base_fingerprint: Option<String>,
    pub ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new(target: RefId) -> Self {
        Self {
            target,
            schema_hash: None,
            key_mode: KeyMode::Name,
            base_fingerprint: None,
            ops: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: &GValue) -> Result<Self> {
        self.base_fingerprint = Some(fingerprint_hash(base)?);
        Ok(self)
    }

    pub fn push(mut self, op: PatchOp) -> Self {
        self.ops.push(op);
        self
    }
}

/// Render a patch to its wire form. `sort_ops`, when true (the default),
/// sorts operations by rendered path then by operation glyph; apply
/// semantics always follow the patch's read order regardless.
pub fn emit_patch(p: &Patch, sort_ops: bool) -> Result<String> {
    let mut out = String::new();
    out.push_str("@patch ");
    if let Some(hash) = &p.schema_hash {
        out.push_str(&format!("@schema#{hash} "));
    }
    let mode_str = match p.key_mode {
        KeyMode::Wire => "wire",
        KeyMode::Name => "name",
        KeyMode::Fid => "fid",
    };
    out.push_str(&format!("@keys={mode_str} "));
    out.push_str(&format!("@target={}:{} ", p.target.prefix, p.target.value));
    if let Some(base) = &p.base_fingerprint {
        out.push_str(&format!("@base={base} "));
    }
    out.push('\n');

    let mut ops: Vec<&PatchOp> = p.ops.iter().collect();
    if sort_ops {
        ops.sort_by(|a, b| {
            let pa = a.path().render(p.key_mode);
            let pb = b.path().render(p.key_mode);
            pa.cmp(&pb).then(a.glyph().cmp(&b.glyph()))
        });
    }

    for op in ops {
        out.push_str(&render_op(op, p.key_mode)?);
        out.push('\n');
    }
    out.push_str("@end");
    Ok(out)
}

fn render_op(op: &PatchOp, mode: KeyMode) -> Result<String> {
    Ok(match op {
        PatchOp::Set { path, value } => {
            format!("= {} {}", path.render(mode), canonicalize_loose(value)?)
        }
        PatchOp::Append { path, value, idx } => {
            let mut s = format!("+ {} {}", path.render(mode), canonicalize_loose(value)?);
            if let Some(i) = idx {
                s.push_str(&format!(" @idx={i}"));
            }
            s
        }
        PatchOp::Delete { path } => format!("- {}", path.render(mode)),
        PatchOp::Delta { path, amount } => format!("~ {} {}", path.render(mode), amount),
    })
}

/// Parse a patch's wire form.
pub fn parse_patch(src: &str) -> Result<Patch> {
    let mut lines = src.lines();
    let header = lines.next().ok_or_else(|| GlyphError::Parse("empty patch".to_string()))?;
    let header = header
        .strip_prefix("@patch")
        .ok_or_else(|| GlyphError::Parse("patch must start with @patch".to_string()))?;

    let mut schema_hash = None;
    let mut key_mode = KeyMode::Name;
    let mut target = None;
    let mut base_fingerprint = None;

    for tok in header.split_whitespace() {
        if let Some(hash) = tok.strip_prefix("@schema#") {
            schema_hash = Some(hash.to_string());
        } else if let Some(mode) = tok.strip_prefix("@keys=") {
            key_mode = match mode {
                "wire" => KeyMode::Wire,
                "fid" => KeyMode::Fid,
                _ => KeyMode::Name,
            };
        } else if let Some(t) = tok.strip_prefix("@target=") {
            let (prefix, value) = t.split_once(':').unwrap_or(("", t));
            target = Some(RefId::new(prefix, value));
        } else if let Some(base) = tok.strip_prefix("@base=") {
            base_fingerprint = Some(base.to_string());
        }
    }

    let target = target.ok_or_else(|| GlyphError::Parse("patch missing @target".to_string()))?;
    let mut patch = Patch {
        target,
        schema_hash,
        key_mode,
        base_fingerprint,
        ops: Vec::new(),
    };

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line == "@end" {
            continue;
        }
        patch.ops.push(parse_op_line(line)?);
    }

    Ok(patch)
}

fn parse_op_line(line: &str) -> Result<PatchOp> {
    let mut parts = line.splitn(2, ' ');
    let glyph = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match glyph {
        "-" => {
            let path = Path::parse(rest)?;
            Ok(PatchOp::Delete { path })
        }
        "=" => {
            let (path_str, value_str) = rest
                .split_once(' ')
                .ok_or_else(|| GlyphError::Parse(format!("malformed set op: {line}")))?;
            let path = Path::parse(path_str)?;
            let value = parse(value_str.trim())?;
            Ok(PatchOp::Set { path, value })
        }
        "~" => {
            let (path_str, amount_str) = rest
                .split_once(' ')
                .ok_or_else(|| GlyphError::Parse(format!("malformed delta op: {line}")))?;
            let path = Path::parse(path_str)?;
            let amount: f64 = amount_str
                .trim()
                .parse()
                .map_err(|_| GlyphError::Parse(format!("bad delta amount: {amount_str}")))?;
            Ok(PatchOp::Delta { path, amount })
        }
        "+" => {
            let (path_str, value_rest) = rest
                .split_once(' ')
                .ok_or_else(|| GlyphError::Parse(format!("malformed append op: {line}")))?;
            let path = Path::parse(path_str)?;
            let (value_str, idx) = match value_rest.rsplit_once(" @idx=") {
                Some((v, i)) => (
                    v,
                    Some(i.trim().parse::<usize>().map_err(|_| {
                        GlyphError::Parse(format!("bad @idx in append op: {line}"))
                    })?),
                ),
                None => (value_rest, None),
            };
            let value = parse(value_str.trim())?;
            Ok(PatchOp::Append { path, value, idx })
        }
        other => Err(GlyphError::Parse(format!("unknown patch op glyph: {other:?}"))),
    }
}

/// Apply a patch's operations to `base` in read order, returning the
/// resulting value. All-or-nothing per operation: a mid-patch failure
/// leaves `base` unmodified (the caller re-applies from a copy).
pub fn apply_patch(base: &GValue, patch: &Patch) -> Result<GValue> {
    if let Some(expected) = &patch.base_fingerprint {
        let got = fingerprint_hash(base)?;
        if &got != expected {
            return Err(GlyphError::BaseFingerprintMismatch {
                expected: expected.clone(),
                got,
            });
        }
    }
    let mut result = base.clone();
    for op in &patch.ops {
        apply_op(&mut result, op)?;
    }
    Ok(result)
}

fn apply_op(root: &mut GValue, op: &PatchOp) -> Result<()> {
    match op {
        PatchOp::Set { path, value } => set_at(root, &path.0, value.clone()),
        PatchOp::Append { path, value, idx } => append_at(root, &path.0, value.clone(), *idx),
        PatchOp::Delete { path } => delete_at(root, &path.0),
        PatchOp::Delta { path, amount } => delta_at(root, &path.0, *amount),
    }
}

fn navigate<'a>(root: &'a mut GValue, segs: &[PathSegment]) -> Result<&'a mut GValue> {
    let mut cur = root;
    for seg in segs {
        cur = step(cur, seg)?;
    }
    Ok(cur)
}

fn step<'a>(v: &'a mut GValue, seg: &PathSegment) -> Result<&'a mut GValue> {
    match (v, seg) {
        (GValue::Struct(s), PathSegment::Name(name)) => s
            .fields
            .iter_mut()
            .find(|e| &e.key == name)
            .map(|e| &mut e.value)
            .ok_or_else(|| GlyphError::DeleteNonExistent(name.clone())),
        (GValue::Map(entries), PathSegment::Name(name)) | (GValue::Map(entries), PathSegment::Key(name)) => entries
            .iter_mut()
            .find(|e| &e.key == name)
            .map(|e| &mut e.value)
            .ok_or_else(|| GlyphError::DeleteNonExistent(name.clone())),
        (GValue::List(items), PathSegment::Index(i)) => {
            let len = items.len();
            items.get_mut(*i).ok_or(GlyphError::IndexOutOfBounds {
                path: format!("[{i}]"),
                index: *i,
                len,
            })
        }
        (_, PathSegment::Fid(fid)) => Err(GlyphError::BadPath(format!(
            "FID path segments require a schema context: .#{fid}"
        ))),
        (_, seg) => Err(GlyphError::BadPath(format!("{seg:?} does not apply here"))),
    }
}

fn set_at(root: &mut GValue, segs: &[PathSegment], value: GValue) -> Result<()> {
    if segs.is_empty() {
        *root = value;
        return Ok(());
    }
    let (last, init) = segs.split_last().unwrap();
    let parent = navigate_create(root, init)?;
    match (parent, last) {
        (GValue::Struct(s), PathSegment::Name(name)) => {
            if let Some(e) = s.fields.iter_mut().find(|e| &e.key == name) {
                e.value = value;
            } else {
                s.fields.push(field(name.clone(), value));
            }
        }
        (GValue::Map(entries), PathSegment::Name(name)) | (GValue::Map(entries), PathSegment::Key(name)) => {
            if let Some(e) = entries.iter_mut().find(|e| &e.key == name) {
                e.value = value;
            } else {
                entries.push(MapEntry::new(name.clone(), value));
            }
        }
        (GValue::List(items), PathSegment::Index(i)) => {
            if *i < items.len() {
                items[*i] = value;
            } else {
                return Err(GlyphError::IndexOutOfBounds {
                    path: format!("[{i}]"),
                    index: *i,
                    len: items.len(),
                });
            }
        }
        (_, seg) => return Err(GlyphError::BadPath(format!("{seg:?} does not apply here"))),
    }
    Ok(())
}

/// Like [`navigate`], but creates a missing map/struct field holding an
/// empty map so a `Set` at a not-yet-existing path can succeed.
fn navigate_create<'a>(root: &'a mut GValue, segs: &[PathSegment]) -> Result<&'a mut GValue> {
    let mut cur = root;
    for seg in segs {
        ensure_child(cur, seg);
        cur = step(cur, seg)?;
    }
    Ok(cur)
}

fn ensure_child(v: &mut GValue, seg: &PathSegment) {
    match (v, seg) {
        (GValue::Struct(s), PathSegment::Name(name)) => {
            if s.get(name).is_none() {
                s.fields.push(field(name.clone(), GValue::Map(Vec::new())));
            }
        }
        (GValue::Map(entries), PathSegment::Name(name) | PathSegment::Key(name)) => {
            if !entries.iter().any(|e| &e.key == name) {
                entries.push(MapEntry::new(name.clone(), GValue::Map(Vec::new())));
            }
        }
        _ => {}
    }
}

fn append_at(root: &mut GValue, segs: &[PathSegment], value: GValue, idx: Option<usize>) -> Result<()> {
    let target = navigate_create(root, segs)?;
    match target {
        GValue::List(items) => {
            let at = idx.unwrap_or(items.len());
            if at > items.len() {
                return Err(GlyphError::IndexOutOfBounds {
                    path: format!("[{at}]"),
                    index: at,
                    len: items.len(),
                });
            }
            items.insert(at, value);
        }
        GValue::Null => {
            *target = GValue::List(vec![value]);
        }
        GValue::Struct(s) => {
            s.fields.push(field(format!("_{}", s.fields.len()), value));
        }
        GValue::Map(entries) => {
            entries.push(MapEntry::new(format!("_{}", entries.len()), value));
        }
        _ => return Err(GlyphError::BadPath("append target is not a list".to_string())),
    }
    Ok(())
}

fn delete_at(root: &mut GValue, segs: &[PathSegment]) -> Result<()> {
    let (last, init) = segs
        .split_last()
        .ok_or_else(|| GlyphError::BadPath("delete requires a non-empty path".to_string()))?;
    let parent = navigate(root, init)?;
    match (parent, last) {
        (GValue::Struct(s), PathSegment::Name(name)) => {
            let before = s.fields.len();
            s.fields.retain(|e| &e.key != name);
            if s.fields.len() == before {
                return Err(GlyphError::DeleteNonExistent(name.clone()));
            }
        }
        (GValue::Map(entries), PathSegment::Name(name) | PathSegment::Key(name)) => {
            let before = entries.len();
            entries.retain(|e| &e.key != name);
            if entries.len() == before {
                return Err(GlyphError::DeleteNonExistent(name.clone()));
            }
        }
        (GValue::List(items), PathSegment::Index(i)) => {
            if *i >= items.len() {
                return Err(GlyphError::IndexOutOfBounds {
                    path: format!("[{i}]"),
                    index: *i,
                    len: items.len(),
                });
            }
            items.remove(*i);
        }
        (_, seg) => return Err(GlyphError::BadPath(format!("{seg:?} does not apply here"))),
    }
    Ok(())
}

fn delta_at(root: &mut GValue, segs: &[PathSegment], amount: f64) -> Result<()> {
    let target = navigate(root, segs)?;
    match target {
        GValue::Int(n) => {
            *n += amount as i64;
        }
        GValue::Float(f) => {
            *f += amount;
        }
        other => {
            return Err(GlyphError::DeltaNonNumeric(format!("{other:?}")));
        }
    }
    Ok(())
}

/// Compute the minimal patch transforming `from` into `to`. Struct/map
/// differences are walked field by field; lists are replaced wholesale
/// when not identical (spec's documented Open Question resolution — no
/// LCS/edit-script in the core engine).
pub fn diff(from: &GValue, to: &GValue, target: RefId) -> Patch {
    let mut ops = Vec::new();
    diff_into(from, to, &mut Vec::new(), &mut ops);
    Patch {
        target,
        schema_hash: None,
        key_mode: KeyMode::Name,
        base_fingerprint: None,
        ops,
    }
}

fn diff_into(from: &GValue, to: &GValue, path: &mut Vec<PathSegment>, ops: &mut Vec<PatchOp>) {
    match (from, to) {
        (GValue::Struct(a), GValue::Struct(b)) if a.type_name == b.type_name => {
            diff_entries(&a.fields, &b.fields, path, ops);
        }
        (GValue::Map(a), GValue::Map(b)) => {
            diff_entries(a, b, path, ops);
        }
        (GValue::Int(_), GValue::Int(_)) | (GValue::Float(_), GValue::Float(_)) => {
            let (a, _) = from.number();
            let (b, _) = to.number();
            if a != b {
                if let GValue::Int(_) = from {
                    ops.push(PatchOp::Delta {
                        path: Path(path.clone()),
                        amount: b - a,
                    });
                } else {
                    ops.push(PatchOp::Set {
                        path: Path(path.clone()),
                        value: to.clone(),
                    });
                }
            }
        }
        _ => {
            if !from.structural_eq(to) {
                ops.push(PatchOp::Set {
                    path: Path(path.clone()),
                    value: to.clone(),
                });
            }
        }
    }
}

fn diff_entries(a: &[MapEntry], b: &[MapEntry], path: &mut Vec<PathSegment>, ops: &mut Vec<PatchOp>) {
    for entry in a {
        if !b.iter().any(|e| e.key == entry.key) {
            path.push(PathSegment::Name(entry.key.clone()));
            ops.push(PatchOp::Delete { path: Path(path.clone()) });
            path.pop();
        }
    }
    for entry in b {
        match a.iter().find(|e| e.key == entry.key) {
            Some(prev) => {
                path.push(PathSegment::Name(entry.key.clone()));
                diff_into(&prev.value, &entry.value, path, ops);
                path.pop();
            }
            None => {
                path.push(PathSegment::Name(entry.key.clone()));
                ops.push(PatchOp::Set {
                    path: Path(path.clone()),
                    value: entry.value.clone(),
                });
                path.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::field;

    fn score_state(home: i64, away: i64) -> GValue {
        GValue::map(vec![
            field("home", GValue::map(vec![field("score", GValue::int(home))])),
            field("away", GValue::map(vec![field("score", GValue::int(away))])),
        ])
    }

    #[test]
    fn apply_matches_spec_scenario_s4() {
        let base = score_state(0, 0);
        let patch = Patch::new(RefId::simple("game1"))
            .push(PatchOp::Set {
                path: Path::new(vec![PathSegment::Name("home".into()), PathSegment::Name("score".into())]),
                value: GValue::int(2),
            })
            .push(PatchOp::Set {
                path: Path::new(vec![PathSegment::Name("away".into()), PathSegment::Name("score".into())]),
                value: GValue::int(1),
            });
        let result = apply_patch(&base, &patch).unwrap();
        assert_eq!(result, score_state(2, 1));
    }

    #[test]
    fn delta_preserves_int_type() {
        let base = GValue::map(vec![field("n", GValue::int(5))]);
        let patch = Patch::new(RefId::simple("x")).push(PatchOp::Delta {
            path: Path::field("n"),
            amount: 3.0,
        });
        let result = apply_patch(&base, &patch).unwrap();
        assert_eq!(result.get("n"), Some(&GValue::int(8)));
    }

    #[test]
    fn delete_missing_field_errors() {
        let base = GValue::map(vec![field("n", GValue::int(5))]);
        let patch = Patch::new(RefId::simple("x")).push(PatchOp::Delete {
            path: Path::field("missing"),
        });
        assert!(apply_patch(&base, &patch).is_err());
    }

    #[test]
    fn diff_then_apply_round_trips() {
        let from = score_state(0, 0);
        let to = score_state(2, 1);
        let patch = diff(&from, &to, RefId::simple("game1"));
        let result = apply_patch(&from, &patch).unwrap();
        assert_eq!(result, to);
    }

    #[test]
    fn diff_on_list_is_whole_value_replacement() {
        let from = GValue::map(vec![field("items", GValue::list(vec![GValue::int(1)]))]);
        let to = GValue::map(vec![field("items", GValue::list(vec![GValue::int(1), GValue::int(2)]))]);
        let patch = diff(&from, &to, RefId::simple("x"));
        assert_eq!(patch.ops.len(), 1);
        assert!(matches!(patch.ops[0], PatchOp::Set { .. }));
        let result = apply_patch(&from, &patch).unwrap();
        assert_eq!(result, to);
    }

    #[test]
    fn parse_patch_round_trips_wire_form() {
        let base = score_state(0, 0);
        let patch = Patch::new(RefId::simple("game1")).push(PatchOp::Set {
            path: Path::field("home"),
            value: GValue::map(vec![field("score", GValue::int(2))]),
        });
        let wire = emit_patch(&patch, true).unwrap();
        let parsed = parse_patch(&wire).unwrap();
        assert_eq!(parsed.target, patch.target);
        assert_eq!(parsed.ops, patch.ops);
        let _ = base;
    }
}
