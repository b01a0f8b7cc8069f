//! Manifest model and tool identity types for Quarry.
//!
//! This crate defines the schema layer: repository and stack manifests share one
//! shape (`Manifest` with `ToolEntry` items) and one validator parameterized by
//! `ManifestKind`. Validation never fails fast; it returns every finding as a
//! `ManifestIssue` whose `Display` is a stable error code.

pub mod manifest;
pub mod types;

pub use manifest::{
    is_sha256_hex, lookup, parse_manifest_file, parse_manifest_str, parse_manifest_strict,
    parse_manifest_value, validate, Manifest, ManifestIssue, ManifestKind, SchemaError, ToolEntry,
    ToolField, ToolLocation, SUPPORTED_SCHEMA_VERSION,
};
pub use types::{ToolId, ToolRequest, ToolVersion};
