//! Schema registry (C4 foundation): struct/sum type definitions, field
//! constraints, and the deterministic schema hash used to bind a wire
//! payload to a schema by reference.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{GlyphError, Result, ValidationResult, Warning};
use crate::types::GValue;

/// A field or list/map element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Time,
    Id,
    List(Box<TypeSpec>),
    Map(Box<TypeSpec>, Box<TypeSpec>),
    /// Reference to another named type in the same schema.
    Ref(String),
    InlineStruct(Box<StructDef>),
}

impl TypeSpec {
    /// Deterministic textual tag used by schema hashing.
    fn canonical_tag(&self) -> String {
        match self {
            TypeSpec::Null => "Null".to_string(),
            TypeSpec::Bool => "Bool".to_string(),
            TypeSpec::Int => "Int".to_string(),
            TypeSpec::Float => "Float".to_string(),
            TypeSpec::Str => "Str".to_string(),
            TypeSpec::Bytes => "Bytes".to_string(),
            TypeSpec::Time => "Time".to_string(),
            TypeSpec::Id => "Id".to_string(),
            TypeSpec::List(t) => format!("List<{}>", t.canonical_tag()),
            TypeSpec::Map(k, v) => format!("Map<{},{}>", k.canonical_tag(), v.canonical_tag()),
            TypeSpec::Ref(name) => format!("Ref({name})"),
            TypeSpec::InlineStruct(def) => format!("InlineStruct({})", def.canonical_form()),
        }
    }
}

/// Closed set of field/value constraints (spec §3.2, §7).
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Min(f64),
    Max(f64),
    Range(f64, f64),
    MinLen(usize),
    MaxLen(usize),
    Len(usize),
    NonEmpty,
    Regex(String),
    Enum(Vec<String>),
    Unique,
}

impl Constraint {
    fn canonical_form(&self) -> String {
        match self {
            Constraint::Min(n) => format!("min({n})"),
            Constraint::Max(n) => format!("max({n})"),
            Constraint::Range(lo, hi) => format!("range({lo},{hi})"),
            Constraint::MinLen(n) => format!("min_len({n})"),
            Constraint::MaxLen(n) => format!("max_len({n})"),
            Constraint::Len(n) => format!("len({n})"),
            Constraint::NonEmpty => "nonempty".to_string(),
            Constraint::Regex(p) => format!("regex({p})"),
            Constraint::Enum(vs) => format!("enum({})", vs.join(",")),
            Constraint::Unique => "unique".to_string(),
        }
    }

    /// Check a constraint against a single value. `existing` is only
    /// consulted for `Unique` (the already-seen values in the same list).
    pub(crate) fn check(&self, v: &GValue, existing: &[&GValue]) -> std::result::Result<(), String> {
        match self {
            Constraint::Min(n) => {
                let (num, ok) = v.number();
                if ok && num < *n {
                    return Err(format!("value {num} below min {n}"));
                }
            }
            Constraint::Max(n) => {
                let (num, ok) = v.number();
                if ok && num > *n {
                    return Err(format!("value {num} above max {n}"));
                }
            }
            Constraint::Range(lo, hi) => {
                let (num, ok) = v.number();
                if ok && (num < *lo || num > *hi) {
                    return Err(format!("value {num} outside range [{lo}, {hi}]"));
                }
            }
            Constraint::MinLen(n) => {
                if let Some(len) = value_len(v) {
                    if len < *n {
                        return Err(format!("length {len} below min_len {n}"));
                    }
                }
            }
            Constraint::MaxLen(n) => {
                if let Some(len) = value_len(v) {
                    if len > *n {
                        return Err(format!("length {len} above max_len {n}"));
                    }
                }
            }
            Constraint::Len(n) => {
                if let Some(len) = value_len(v) {
                    if len != *n {
                        return Err(format!("length {len} does not equal len {n}"));
                    }
                }
            }
            Constraint::NonEmpty => {
                if let Some(0) = value_len(v) {
                    return Err("value is empty".to_string());
                }
            }
            Constraint::Regex(pattern) => {
                if let Some(s) = v.as_str() {
                    let re = regex::Regex::new(pattern)
                        .map_err(|e| format!("invalid regex {pattern:?}: {e}"))?;
                    if !re.is_match(s) {
                        return Err(format!("{s:?} does not match {pattern:?}"));
                    }
                }
            }
            Constraint::Enum(values) => {
                if let Some(s) = v.as_str() {
                    if !values.iter().any(|allowed| allowed == s) {
                        return Err(format!("{s:?} is not one of {values:?}"));
                    }
                }
            }
            Constraint::Unique => {
                if existing.iter().any(|e| e.structural_eq(v)) {
                    return Err("duplicate value, expected unique".to_string());
                }
            }
        }
        Ok(())
    }
}

fn value_len(v: &GValue) -> Option<usize> {
    match v {
        GValue::Str(s) => Some(s.chars().count()),
        GValue::Bytes(b) => Some(b.len()),
        GValue::List(l) => Some(l.len()),
        GValue::Map(m) => Some(m.len()),
        _ => None,
    }
}

/// A single field within a struct definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeSpec,
    pub fid: u32,
    pub wire_key: Option<String>,
    pub optional: bool,
    pub keep_null: bool,
    pub constraints: Vec<Constraint>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeSpec, fid: u32) -> Self {
        Self {
            name: name.into(),
            ty,
            fid,
            wire_key: None,
            optional: false,
            keep_null: false,
            constraints: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn keep_null(mut self) -> Self {
        self.keep_null = true;
        self
    }

    pub fn wire_key(mut self, key: impl Into<String>) -> Self {
        self.wire_key = Some(key.into());
        self
    }

    pub fn constrain(mut self, c: Constraint) -> Self {
        self.constraints.push(c);
        self
    }

    fn canonical_form(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:[{}]",
            self.fid,
            self.name,
            self.ty.canonical_tag(),
            self.wire_key.as_deref().unwrap_or(""),
            self.optional,
            self.keep_null,
            self.constraints
                .iter()
                .map(Constraint::canonical_form)
                .collect::<Vec<_>>()
                .join(",")
        )
    }
}

/// Struct type definition.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub version: String,
    pub open: bool,
    pub packed: bool,
    pub tabular_hint: bool,
    pub fields: Vec<FieldDef>,
}

impl StructDef {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            open: false,
            packed: false,
            tabular_hint: false,
            fields: Vec::new(),
        }
    }

    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    pub fn tabular_hint(mut self) -> Self {
        self.tabular_hint = true;
        self
    }

    pub fn field(mut self, f: FieldDef) -> Self {
        self.fields.push(f);
        self
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_fid(&self, fid: u32) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.fid == fid)
    }

    pub fn field_by_wire_key(&self, wire_key: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.wire_key.as_deref() == Some(wire_key))
    }

    /// Fields in FID-ascending order, used for packed/tabular column order.
    pub fn fields_in_fid_order(&self) -> Vec<&FieldDef> {
        let mut fs: Vec<&FieldDef> = self.fields.iter().collect();
        fs.sort_by_key(|f| f.fid);
        fs
    }

    pub fn optional_fields_in_fid_order(&self) -> Vec<&FieldDef> {
        self.fields_in_fid_order()
            .into_iter()
            .filter(|f| f.optional)
            .collect()
    }

    pub fn required_fields_in_fid_order(&self) -> Vec<&FieldDef> {
        self.fields_in_fid_order()
            .into_iter()
            .filter(|f| !f.optional)
            .collect()
    }

    fn canonical_form(&self) -> String {
        let mut fields = self.fields.clone();
        fields.sort_by_key(|f| f.fid);
        format!(
            "struct:v{}:open={}:packed={}:tab={}:[{}]",
            self.version,
            self.open,
            self.packed,
            self.tabular_hint,
            fields
                .iter()
                .map(FieldDef::canonical_form)
                .collect::<Vec<_>>()
                .join(";")
        )
    }

    /// Validate a struct value against this definition. Never mutates the
    /// input, never fatal — collects errors/warnings instead.
    pub fn validate(&self, type_name: &str, v: &crate::types::StructValue) -> ValidationResult {
        let mut out = ValidationResult::default();
        for field_entry in &v.fields {
            if self.field_by_name(&field_entry.key).is_none() {
                let w = Warning::new(
                    "SCHEMA_UNKNOWN_FIELD",
                    field_entry.key.clone(),
                    format!("unknown field {:?} on {type_name}", field_entry.key),
                );
                if self.open {
                    out.push_warning(w);
                } else {
                    out.push_error(w);
                }
            }
        }
        for f in &self.fields {
            match v.get(&f.name) {
                Some(value) => {
                    for c in &f.constraints {
                        if matches!(c, Constraint::Unique) {
                            let elements: Vec<&GValue> = match value {
                                GValue::List(items) => items.iter().collect(),
                                other => vec![other],
                            };
                            let mut seen: Vec<&GValue> = Vec::with_capacity(elements.len());
                            for elem in elements {
                                if let Err(msg) = c.check(elem, &seen) {
                                    out.push_error(Warning::new(
                                        "SCHEMA_CONSTRAINT_VIOLATION",
                                        f.name.clone(),
                                        msg,
                                    ));
                                }
                                seen.push(elem);
                            }
                        } else if let Err(msg) = c.check(value, &[]) {
                            out.push_error(Warning::new(
                                "SCHEMA_CONSTRAINT_VIOLATION",
                                f.name.clone(),
                                msg,
                            ));
                        }
                    }
                }
                None if !f.optional => {
                    out.push_error(Warning::new(
                        "SCHEMA_REQUIRED_MISSING",
                        f.name.clone(),
                        format!("required field {:?} missing", f.name),
                    ));
                }
                None => {}
            }
        }
        out
    }
}

/// Sum (tagged union) type definition: an ordered list of `{tag, type}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SumDef {
    pub variants: Vec<(String, TypeSpec)>,
}

impl SumDef {
    pub fn new(variants: Vec<(String, TypeSpec)>) -> Self {
        Self { variants }
    }

    pub fn variant(&self, tag: &str) -> Option<&TypeSpec> {
        self.variants.iter().find(|(t, _)| t == tag).map(|(_, ty)| ty)
    }

    fn canonical_form(&self) -> String {
        let mut vs = self.variants.clone();
        vs.sort_by(|a, b| a.0.cmp(&b.0));
        format!(
            "sum:[{}]",
            vs.iter()
                .map(|(tag, ty)| format!("{tag}:{}", ty.canonical_tag()))
                .collect::<Vec<_>>()
                .join(";")
        )
    }
}

/// A type definition is either a struct or a sum.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Struct(StructDef),
    Sum(SumDef),
}

/// A schema: a mapping from type name to type definition, plus its hash.
#[derive(Debug, Clone)]
pub struct Schema {
    types: HashMap<String, TypeDef>,
    hash: String,
}

/// Number of hex characters kept from the full SHA-256 digest for a
/// schema hash. Long enough that collisions are not a practical concern
/// for a registry of a few thousand schemas.
const SCHEMA_HASH_LEN: usize = 16;

impl Schema {
    /// Build a schema from its type map and compute its hash.
    pub fn new(types: HashMap<String, TypeDef>) -> Self {
        let hash = compute_schema_hash(&types);
        Self { types, hash }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn struct_def(&self, type_name: &str) -> Option<&StructDef> {
        match self.types.get(type_name) {
            Some(TypeDef::Struct(s)) => Some(s),
            _ => None,
        }
    }

    pub fn sum_def(&self, type_name: &str) -> Option<&SumDef> {
        match self.types.get(type_name) {
            Some(TypeDef::Sum(s)) => Some(s),
            _ => None,
        }
    }

    pub fn type_def(&self, type_name: &str) -> Option<&TypeDef> {
        self.types.get(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Resolve a wire key (short field alias) on a given type to its
    /// canonical field name. Falls through to treating `wire_key` as
    /// already-canonical if no alias matches, so callers can use this
    /// uniformly whether or not a schema is bound.
    pub fn resolve_wire_key(&self, type_name: &str, wire_key: &str) -> Option<String> {
        let def = self.struct_def(type_name)?;
        if let Some(f) = def.field_by_wire_key(wire_key) {
            return Some(f.name.clone());
        }
        if def.field_by_name(wire_key).is_some() {
            return Some(wire_key.to_string());
        }
        None
    }

    /// Validate a full value against a named type in this schema.
    pub fn validate_as(&self, type_name: &str, v: &GValue) -> Result<ValidationResult> {
        match self.type_def(type_name) {
            Some(TypeDef::Struct(def)) => match v.as_struct() {
                Some(sv) => Ok(def.validate(type_name, sv)),
                None => Err(GlyphError::FieldTypeMismatch {
                    path: String::new(),
                    expected: format!("{type_name} struct"),
                    got: format!("{v:?}"),
                }),
            },
            Some(TypeDef::Sum(def)) => match v.as_sum() {
                Some(sv) => {
                    let mut out = ValidationResult::default();
                    if def.variant(&sv.tag).is_none() {
                        out.push_error(Warning::new(
                            "SCHEMA_UNKNOWN_FIELD",
                            sv.tag.clone(),
                            format!("unknown sum variant {:?} for {type_name}", sv.tag),
                        ));
                    }
                    Ok(out)
                }
                None => Err(GlyphError::FieldTypeMismatch {
                    path: String::new(),
                    expected: format!("{type_name} sum"),
                    got: format!("{v:?}"),
                }),
            },
            None => Err(GlyphError::UnknownType(type_name.to_string())),
        }
    }
}

fn compute_schema_hash(types: &HashMap<String, TypeDef>) -> String {
    let mut names: Vec<&String> = types.keys().collect();
    names.sort();
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        let form = match &types[name] {
            TypeDef::Struct(s) => s.canonical_form(),
            TypeDef::Sum(s) => s.canonical_form(),
        };
        hasher.update(form.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..SCHEMA_HASH_LEN].to_string()
}

/// Process-wide (or per-session) registry of schemas by hash, looked up
/// when a `@schema#<hash>` header is encountered with no inline body.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    by_hash: HashMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: Schema) -> String {
        let hash = schema.hash().to_string();
        self.by_hash.insert(hash.clone(), schema);
        hash
    }

    pub fn get(&self, hash: &str) -> Option<&Schema> {
        self.by_hash.get(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{field, GValue, StructValue};

    fn match_schema() -> Schema {
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
    fn hash_is_deterministic_for_identical_schemas() {
        let a = match_schema();
        let b = match_schema();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn hash_changes_when_field_order_in_source_differs_but_fid_is_same() {
        // Building fields in a different insertion order must not change
        // the hash: the hash is FID-sorted, not insertion-sorted.
        let mut types = HashMap::new();
        let def = StructDef::new("1")
            .packed()
            .field(FieldDef::new("p2", TypeSpec::Int, 2))
            .field(FieldDef::new("p1", TypeSpec::Int, 1));
        types.insert("T".to_string(), TypeDef::Struct(def));
        let a = Schema::new(types);

        let mut types2 = HashMap::new();
        let def2 = StructDef::new("1")
            .packed()
            .field(FieldDef::new("p1", TypeSpec::Int, 1))
            .field(FieldDef::new("p2", TypeSpec::Int, 2));
        types2.insert("T".to_string(), TypeDef::Struct(def2));
        let b = Schema::new(types2);

        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn resolve_wire_key_falls_back_to_canonical_name() {
        let schema = match_schema();
        assert_eq!(
            schema.resolve_wire_key("Match", "p1"),
            Some("p1".to_string())
        );
    }

    #[test]
    fn validate_reports_missing_required_field() {
        let schema = match_schema();
        let sv = StructValue::new("Match", vec![field("p1", GValue::int(1))]);
        let result = schema.struct_def("Match").unwrap().validate("Match", &sv);
        assert!(!result.is_valid());
    }

    #[test]
    fn unique_constraint_fires_on_duplicate_list_elements() {
        let mut types = HashMap::new();
        let def = StructDef::new("1").field(
            FieldDef::new("tags", TypeSpec::List(Box::new(TypeSpec::Str)), 1)
                .constrain(Constraint::Unique),
        );
        types.insert("Tagged".to_string(), TypeDef::Struct(def));
        let schema = Schema::new(types);
        let sv = StructValue::new(
            "Tagged",
            vec![field(
                "tags",
                GValue::List(vec![GValue::str("a"), GValue::str("b"), GValue::str("a")]),
            )],
        );
        let result = schema.struct_def("Tagged").unwrap().validate("Tagged", &sv);
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn unique_constraint_passes_on_distinct_list_elements() {
        let mut types = HashMap::new();
        let def = StructDef::new("1").field(
            FieldDef::new("tags", TypeSpec::List(Box::new(TypeSpec::Str)), 1)
                .constrain(Constraint::Unique),
        );
        types.insert("Tagged".to_string(), TypeDef::Struct(def));
        let schema = Schema::new(types);
        let sv = StructValue::new(
            "Tagged",
            vec![field(
                "tags",
                GValue::List(vec![GValue::str("a"), GValue::str("b")]),
            )],
        );
        let result = schema.struct_def("Tagged").unwrap().validate("Tagged", &sv);
        assert!(result.is_valid());
    }

    #[test]
    fn validate_allows_unknown_field_on_open_struct() {
        let mut types = HashMap::new();
        let def = StructDef::new("1").open().field(FieldDef::new("a", TypeSpec::Int, 1));
        types.insert("Open".to_string(), TypeDef::Struct(def));
        let schema = Schema::new(types);
        let sv = StructValue::new(
            "Open",
            vec![field("a", GValue::int(1)), field("extra", GValue::int(2))],
        );
        let result = schema.struct_def("Open").unwrap().validate("Open", &sv);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }
}
