//! Core GLYPH value model.

use chrono::{DateTime, Utc};

/// GLYPH value type enumeration.
///
/// Exactly the fourteen variants in the spec: `Int`/`Float` are kept
/// distinct (no implicit widening), and container variants own their
/// children directly so the tree has no shared ownership.
#[derive(Debug, Clone, PartialEq)]
pub enum GValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value (i64). Never silently promoted to `Float`.
    Int(i64),
    /// Floating point value (f64). NaN/±infinity cannot be canonicalized.
    Float(f64),
    /// String value.
    Str(String),
    /// Binary data (bytes), emitted as `b64"..."`.
    Bytes(Vec<u8>),
    /// Timestamp (UTC, canonical form truncates to second precision).
    Time(DateTime<Utc>),
    /// Reference ID with optional prefix, written `^prefix:value`.
    Id(RefId),
    /// Ordered list of values.
    List(Vec<GValue>),
    /// Key-value map. Construction order is preserved; canonicalization
    /// sorts by the bytewise order of the canonical key form.
    Map(Vec<MapEntry>),
    /// Typed struct with name and fields; semantically a named,
    /// schema-bearing map.
    Struct(StructValue),
    /// Sum type (tagged union): `Tag(inner)`.
    Sum(SumValue),
    /// Content-addressed external blob descriptor.
    Blob(BlobRef),
    /// Deferred reference into a named pool (`^S1:7`).
    PoolRef(PoolRef),
}

/// Reference ID with optional prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefId {
    pub prefix: String,
    pub value: String,
}

impl RefId {
    pub fn new(prefix: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            value: value.into(),
        }
    }

    /// Bare reference with no prefix.
    pub fn simple(value: impl Into<String>) -> Self {
        Self {
            prefix: String::new(),
            value: value.into(),
        }
    }
}

/// Content-addressed external blob descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRef {
    /// Hash string prefixed by its algorithm, e.g. `sha256:...`.
    pub cid: String,
    pub mime: String,
    pub bytes: u64,
    pub name: Option<String>,
    pub caption: Option<String>,
}

impl BlobRef {
    pub fn new(cid: impl Into<String>, mime: impl Into<String>, bytes: u64) -> Self {
        Self {
            cid: cid.into(),
            mime: mime.into(),
            bytes,
            name: None,
            caption: None,
        }
    }
}

/// Deferred reference into a named pool (`^S1:7`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolRef {
    pub pool_id: String,
    pub index: u64,
}

impl PoolRef {
    pub fn new(pool_id: impl Into<String>, index: u64) -> Self {
        Self {
            pool_id: pool_id.into(),
            index,
        }
    }
}

/// Map entry (key-value pair).
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub key: String,
    pub value: GValue,
}

impl MapEntry {
    pub fn new(key: impl Into<String>, value: GValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Typed struct value.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub type_name: String,
    pub fields: Vec<MapEntry>,
}

impl StructValue {
    pub fn new(type_name: impl Into<String>, fields: Vec<MapEntry>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&GValue> {
        self.fields.iter().find(|e| e.key == key).map(|e| &e.value)
    }
}

/// Sum type (tagged union): `Tag(inner)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SumValue {
    pub tag: String,
    pub inner: Box<GValue>,
}

impl SumValue {
    pub fn new(tag: impl Into<String>, inner: GValue) -> Self {
        Self {
            tag: tag.into(),
            inner: Box::new(inner),
        }
    }
}

// ============================================================
// Builder functions
// ============================================================

impl GValue {
    pub fn null() -> Self {
        GValue::Null
    }

    pub fn bool(v: bool) -> Self {
        GValue::Bool(v)
    }

    pub fn int(v: i64) -> Self {
        GValue::Int(v)
    }

    pub fn float(v: f64) -> Self {
        GValue::Float(v)
    }

    pub fn str(v: impl Into<String>) -> Self {
        GValue::Str(v.into())
    }

    pub fn bytes(v: Vec<u8>) -> Self {
        GValue::Bytes(v)
    }

    pub fn time(v: DateTime<Utc>) -> Self {
        GValue::Time(v)
    }

    pub fn id(prefix: impl Into<String>, value: impl Into<String>) -> Self {
        GValue::Id(RefId::new(prefix, value))
    }

    pub fn simple_id(value: impl Into<String>) -> Self {
        GValue::Id(RefId::simple(value))
    }

    pub fn list(items: Vec<GValue>) -> Self {
        GValue::List(items)
    }

    pub fn map(entries: Vec<MapEntry>) -> Self {
        GValue::Map(entries)
    }

    pub fn struct_val(type_name: impl Into<String>, fields: Vec<MapEntry>) -> Self {
        GValue::Struct(StructValue::new(type_name, fields))
    }

    pub fn sum(tag: impl Into<String>, inner: GValue) -> Self {
        GValue::Sum(SumValue::new(tag, inner))
    }

    pub fn blob(b: BlobRef) -> Self {
        GValue::Blob(b)
    }

    pub fn pool_ref(pool_id: impl Into<String>, index: u64) -> Self {
        GValue::PoolRef(PoolRef::new(pool_id, index))
    }

    // ============================================================
    // Type checking
    // ============================================================

    pub fn is_null(&self) -> bool {
        matches!(self, GValue::Null)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, GValue::Bool(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, GValue::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, GValue::Float(_))
    }

    pub fn is_str(&self) -> bool {
        matches!(self, GValue::Str(_))
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, GValue::Bytes(_))
    }

    pub fn is_time(&self) -> bool {
        matches!(self, GValue::Time(_))
    }

    pub fn is_id(&self) -> bool {
        matches!(self, GValue::Id(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, GValue::List(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, GValue::Map(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, GValue::Struct(_))
    }

    pub fn is_sum(&self) -> bool {
        matches!(self, GValue::Sum(_))
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, GValue::Blob(_))
    }

    pub fn is_pool_ref(&self) -> bool {
        matches!(self, GValue::PoolRef(_))
    }

    // ============================================================
    // Value extraction
    // ============================================================

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            GValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            GValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Coerce `Int`/`Float` into `f64`. The only sanctioned implicit-numeric
    /// view: everything else reports failure rather than guessing.
    pub fn number(&self) -> (f64, bool) {
        match self {
            GValue::Int(v) => (*v as f64, true),
            GValue::Float(v) => (*v, true),
            _ => (0.0, false),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            GValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&DateTime<Utc>> {
        match self {
            GValue::Time(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&RefId> {
        match self {
            GValue::Id(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[GValue]> {
        match self {
            GValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<GValue>> {
        match self {
            GValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[MapEntry]> {
        match self {
            GValue::Map(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            GValue::Struct(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_sum(&self) -> Option<&SumValue> {
        match self {
            GValue::Sum(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobRef> {
        match self {
            GValue::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pool_ref(&self) -> Option<&PoolRef> {
        match self {
            GValue::PoolRef(v) => Some(v),
            _ => None,
        }
    }

    /// Get a value from a map or struct by key.
    pub fn get(&self, key: &str) -> Option<&GValue> {
        match self {
            GValue::Map(entries) => entries.iter().find(|e| e.key == key).map(|e| &e.value),
            GValue::Struct(s) => s.get(key),
            _ => None,
        }
    }

    /// Get a value from a list by index.
    pub fn index(&self, idx: usize) -> Option<&GValue> {
        match self {
            GValue::List(items) => items.get(idx),
            _ => None,
        }
    }

    /// Append to a list in place; returns false if `self` is not a list.
    pub fn append(&mut self, v: GValue) -> bool {
        match self {
            GValue::List(items) => {
                items.push(v);
                true
            }
            _ => false,
        }
    }

    /// Deep copy. `GValue` is already fully owned (no `Rc`/`Arc` sharing),
    /// so this is `Clone`, named to make the intent explicit at call sites
    /// that care about cutting ties with a shared buffer.
    pub fn deep_copy(&self) -> GValue {
        self.clone()
    }

    /// Structural equality: variant-by-variant, with maps compared as
    /// sorted sequences (so field order doesn't matter).
    pub fn structural_eq(&self, other: &GValue) -> bool {
        use GValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (Id(a), Id(b)) => a == b,
            (List(a), List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (Map(a), Map(b)) => entries_structural_eq(a, b),
            (Struct(a), Struct(b)) => a.type_name == b.type_name && entries_structural_eq(&a.fields, &b.fields),
            (Sum(a), Sum(b)) => a.tag == b.tag && a.inner.structural_eq(&b.inner),
            (Blob(a), Blob(b)) => a == b,
            (PoolRef(a), PoolRef(b)) => a == b,
            _ => false,
        }
    }
}

fn entries_structural_eq(a: &[MapEntry], b: &[MapEntry]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut sa: Vec<&MapEntry> = a.iter().collect();
    let mut sb: Vec<&MapEntry> = b.iter().collect();
    sa.sort_by(|x, y| x.key.cmp(&y.key));
    sb.sort_by(|x, y| x.key.cmp(&y.key));
    sa.iter()
        .zip(sb.iter())
        .all(|(x, y)| x.key == y.key && x.value.structural_eq(&y.value))
}

/// Helper to create a map entry.
pub fn field(key: impl Into<String>, value: GValue) -> MapEntry {
    MapEntry::new(key, value)
}
