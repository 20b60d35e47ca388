//! GLYPH — deterministic, self-describing data interchange for LLMs and
//! services.
//!
//! GLYPH is a serialization format designed for LLM tool calls and
//! service-to-service payloads: a human-readable textual form that's
//! 30-50% more token-efficient than JSON, a schema-aware packed binary
//! form for high-throughput paths, and streaming primitives (incremental
//! parser, tool-call validator, session dictionary) for feeding it from
//! an LLM token-by-token.
//!
//! # Example
//!
//! ```rust
//! use glyph_core::{from_json, canonicalize_loose, GValue};
//! use serde_json::json;
//!
//! let data = json!({"action": "search", "query": "weather"});
//! let gvalue = from_json(&data);
//! let glyph = canonicalize_loose(&gvalue).unwrap();
//! assert_eq!(glyph, "{action=search query=weather}");
//! ```
//!
//! Schema-aware packed encoding round-trips through the same value model:
//!
//! ```rust
//! use glyph_core::schema::{FieldDef, Schema, StructDef, TypeDef, TypeSpec};
//! use glyph_core::packed::{emit_packed, parse_packed};
//! use glyph_core::{field, GValue, StructValue};
//! use std::collections::HashMap;
//!
//! let mut types = HashMap::new();
//! types.insert(
//!     "Point".to_string(),
//!     TypeDef::Struct(
//!         StructDef::new("1")
//!             .field(FieldDef::new("x", TypeSpec::Int, 1))
//!             .field(FieldDef::new("y", TypeSpec::Int, 2)),
//!     ),
//! );
//! let schema = Schema::new(types);
//! let point = StructValue::new("Point", vec![field("x", GValue::int(1)), field("y", GValue::int(2))]);
//! let wire = emit_packed(&point, &schema).unwrap();
//! let back = parse_packed(&wire, &schema).unwrap();
//! assert_eq!(back, point);
//! ```

pub mod canon;
pub mod dict;
pub mod error;
pub mod json_bridge;
pub mod lexer;
pub mod packed;
pub mod parser;
pub mod patch;
pub mod pool;
pub mod schema;
pub mod stream;
pub mod tabular;
pub mod toolcall;
pub mod types;

pub use canon::*;
pub use error::*;
pub use json_bridge::*;
pub use types::*;

#[cfg(test)]
mod tests;
