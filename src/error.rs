//! Error types for GLYPH codec.
//!
//! The taxonomy is closed (spec §7): lex/syntax, structural, schema, packed,
//! patch, streaming, pool/dict, and I/O. Every variant carries a machine
//! code and, where it applies, a path string pointing at the offending
//! location.

use thiserror::Error;

/// Errors that can occur during GLYPH operations.
#[derive(Error, Debug)]
pub enum GlyphError {
    // ---- Lex / Syntax ----
    #[error("bad token at {path}: {message}")]
    BadToken { path: String, message: String },
    #[error("unterminated string starting at {path}")]
    UnterminatedString { path: String },
    #[error("bad escape sequence in string at {path}: {message}")]
    BadEscape { path: String, message: String },
    #[error("bad number literal at {path}: {message}")]
    BadNumber { path: String, message: String },

    // ---- Structural ----
    #[error("unterminated container at {path}")]
    UnterminatedContainer { path: String },
    #[error("mismatched bracket at {path}: expected {expected}, found {found}")]
    MismatchedBracket {
        path: String,
        expected: String,
        found: String,
    },

    // ---- Schema ----
    #[error("unknown type: {0}")]
    UnknownType(String),
    #[error("unknown field on closed struct {type_name}: {field}")]
    UnknownField { type_name: String, field: String },
    #[error("field type mismatch at {path}: expected {expected}, got {got}")]
    FieldTypeMismatch {
        path: String,
        expected: String,
        got: String,
    },
    #[error("required field missing: {path}")]
    RequiredFieldMissing { path: String },
    #[error("constraint violation at {path}: {constraint}")]
    ConstraintViolation { path: String, constraint: String },

    // ---- Packed ----
    #[error("bitmap width {width} exceeds optional field count {max} for {type_name}")]
    BitmapWidthExceeded {
        type_name: String,
        width: usize,
        max: usize,
    },
    #[error("wrong number of positional values for {type_name}: expected {expected}, got {got}")]
    WrongPositionalCount {
        type_name: String,
        expected: usize,
        got: usize,
    },

    // ---- Patch ----
    #[error("bad path: {0}")]
    BadPath(String),
    #[error("index out of bounds at {path}: index {index}, len {len}")]
    IndexOutOfBounds { path: String, index: usize, len: usize },
    #[error("delete on non-existent field at {0}")]
    DeleteNonExistent(String),
    #[error("delta on non-numeric field at {0}")]
    DeltaNonNumeric(String),
    #[error("base fingerprint mismatch: expected {expected}, got {got}")]
    BaseFingerprintMismatch { expected: String, got: String },

    // ---- Streaming ----
    #[error("max nesting depth {max} exceeded at {path}")]
    DepthExceeded { path: String, max: usize },
    #[error("key length exceeded at {path}: max {max}")]
    KeyLengthExceeded { path: String, max: usize },
    #[error("value length exceeded at {path}: max {max}")]
    ValueLengthExceeded { path: String, max: usize },
    #[error("unexpected end of input at {path}")]
    UnexpectedEof { path: String },
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    // ---- Canonicalization ----
    #[error("cannot canonicalize non-finite float: {0}")]
    NonFiniteFloat(f64),

    // ---- Pool / Dict ----
    #[error("pool not found: {0}")]
    PoolNotFound(String),
    #[error("pool index out of bounds: pool {pool_id} index {index}")]
    PoolIndexOutOfBounds { pool_id: String, index: u64 },
    #[error("dictionary checksum mismatch")]
    ChecksumMismatch,
    #[error("invalid dictionary magic")]
    InvalidDictMagic,

    // ---- Generic / legacy ----
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },
    #[error("Invalid float: {0}")]
    InvalidFloat(String),
    #[error("Missing required field: {0}")]
    MissingField(String),

    // ---- I/O ----
    #[error("JSON conversion error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GlyphError {
    /// Machine-readable error code, stable across versions.
    pub fn code(&self) -> &'static str {
        use GlyphError::*;
        match self {
            BadToken { .. } => "LEX_BAD_TOKEN",
            UnterminatedString { .. } => "LEX_UNTERMINATED_STRING",
            BadEscape { .. } => "LEX_BAD_ESCAPE",
            BadNumber { .. } => "LEX_BAD_NUMBER",
            UnterminatedContainer { .. } => "STRUCT_UNTERMINATED_CONTAINER",
            MismatchedBracket { .. } => "STRUCT_MISMATCHED_BRACKET",
            UnknownType(_) => "SCHEMA_UNKNOWN_TYPE",
            UnknownField { .. } => "SCHEMA_UNKNOWN_FIELD",
            FieldTypeMismatch { .. } => "SCHEMA_TYPE_MISMATCH",
            RequiredFieldMissing { .. } => "SCHEMA_REQUIRED_MISSING",
            ConstraintViolation { .. } => "SCHEMA_CONSTRAINT_VIOLATION",
            BitmapWidthExceeded { .. } => "PACKED_BITMAP_WIDTH",
            WrongPositionalCount { .. } => "PACKED_WRONG_COUNT",
            BadPath(_) => "PATCH_BAD_PATH",
            IndexOutOfBounds { .. } => "PATCH_INDEX_OOB",
            DeleteNonExistent(_) => "PATCH_DELETE_MISSING",
            DeltaNonNumeric(_) => "PATCH_DELTA_NON_NUMERIC",
            BaseFingerprintMismatch { .. } => "PATCH_BASE_MISMATCH",
            DepthExceeded { .. } => "STREAM_DEPTH_EXCEEDED",
            KeyLengthExceeded { .. } => "STREAM_KEY_TOO_LONG",
            ValueLengthExceeded { .. } => "STREAM_VALUE_TOO_LONG",
            UnexpectedEof { .. } => "STREAM_UNEXPECTED_EOF",
            UnknownTool(_) => "UNKNOWN_TOOL",
            NonFiniteFloat(_) => "CANON_NON_FINITE_FLOAT",
            PoolNotFound(_) => "POOL_NOT_FOUND",
            PoolIndexOutOfBounds { .. } => "POOL_INDEX_OOB",
            ChecksumMismatch => "DICT_CHECKSUM_MISMATCH",
            InvalidDictMagic => "DICT_BAD_MAGIC",
            Parse(_) => "PARSE_ERROR",
            InvalidValue(_) => "INVALID_VALUE",
            TypeMismatch { .. } => "TYPE_MISMATCH",
            InvalidFloat(_) => "INVALID_FLOAT",
            MissingField(_) => "MISSING_FIELD",
            JsonError(_) => "JSON_ERROR",
            Io(_) => "IO_ERROR",
        }
    }

    /// The path associated with this error, if any.
    pub fn path(&self) -> Option<&str> {
        use GlyphError::*;
        match self {
            BadToken { path, .. }
            | UnterminatedString { path }
            | BadEscape { path, .. }
            | BadNumber { path, .. }
            | UnterminatedContainer { path }
            | MismatchedBracket { path, .. }
            | FieldTypeMismatch { path, .. }
            | RequiredFieldMissing { path }
            | ConstraintViolation { path, .. }
            | IndexOutOfBounds { path, .. }
            | DepthExceeded { path, .. }
            | KeyLengthExceeded { path, .. }
            | ValueLengthExceeded { path, .. }
            | UnexpectedEof { path } => Some(path),
            BadPath(p) | DeleteNonExistent(p) | DeltaNonNumeric(p) => Some(p),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GlyphError>;

/// A single recoverable problem recorded by the tolerant parser or by
/// schema validation. Never fatal on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub code: String,
    pub path: String,
    pub message: String,
}

impl Warning {
    pub fn new(code: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of schema validation: never fatal, never mutates the input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub errors: Vec<Warning>,
    pub warnings: Vec<Warning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push_error(&mut self, w: Warning) {
        self.errors.push(w);
    }

    pub fn push_warning(&mut self, w: Warning) {
        self.warnings.push(w);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}
