use crate::types::{ToolId, ToolVersion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// The only `schema_version` this build understands.
pub const SUPPORTED_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest rejected: {}", join_codes(.0))]
    Invalid(Vec<ManifestIssue>),
}

fn join_codes(issues: &[ManifestIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Which flavor of manifest is being validated. The two share one shape and
/// differ only in the location field every tool entry must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestKind {
    /// Remotely fetchable tools; entries carry `archive_path` or `archive_url`.
    Repository,
    /// A frozen local toolset; entries carry `path`.
    Stack,
}

/// Tool entry field named in a per-entry error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolField {
    Id,
    Version,
    Path,
    Archive,
}

impl fmt::Display for ToolField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Id => "id",
            Self::Version => "version",
            Self::Path => "path",
            Self::Archive => "archive",
        })
    }
}

/// A single validation finding. `Display` yields the stable error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestIssue {
    #[error("invalid_json")]
    InvalidJson(String),
    #[error("root_not_object")]
    RootNotObject,
    #[error("schema_version_missing")]
    SchemaVersionMissing,
    #[error("schema_version_not_int")]
    SchemaVersionNotInt,
    #[error("schema_version_unsupported")]
    SchemaVersionUnsupported,
    #[error("name_missing")]
    NameMissing,
    #[error("name_not_string")]
    NameNotString,
    #[error("name_empty")]
    NameEmpty,
    #[error("tools_missing")]
    ToolsMissing,
    #[error("tools_not_array")]
    ToolsNotArray,
    #[error("tools_empty")]
    ToolsEmpty,
    #[error("tool_not_object:{0}")]
    ToolNotObject(usize),
    #[error("tool_{field}_missing:{index}")]
    ToolFieldMissing { index: usize, field: ToolField },
    #[error("tool_{field}_not_string:{index}")]
    ToolFieldNotString { index: usize, field: ToolField },
    #[error("tool_{field}_empty:{index}")]
    ToolFieldEmpty { index: usize, field: ToolField },
    #[error("tool_sha256_invalid:{0}")]
    ToolSha256Invalid(usize),
    #[error("tool_size_invalid:{0}")]
    ToolSizeInvalid(usize),
}

impl ManifestIssue {
    /// Stable machine-readable code, e.g. `tool_not_object:2`.
    pub fn code(&self) -> String {
        self.to_string()
    }

    /// True for failures to read the document at all, as opposed to schema findings.
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Self::InvalidJson(_) | Self::RootNotObject)
    }
}

/// Where a tool's archive lives. Serializes as a single flattened key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolLocation {
    /// Stack manifests: local archive path.
    Path(String),
    /// Repository manifests: path relative to the mirror root.
    ArchivePath(String),
    /// Repository manifests: remote or `file://` URL.
    ArchiveUrl(String),
}

impl ToolLocation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Path(s) | Self::ArchivePath(s) | Self::ArchiveUrl(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolEntry {
    pub id: ToolId,
    pub version: ToolVersion,
    #[serde(flatten)]
    pub location: ToolLocation,
    /// Lowercase hex SHA-256 of the archive. `None` means unverified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ToolEntry {
    pub fn matches(&self, id: &str, version: &str) -> bool {
        self.id == id && self.version == version
    }
}

/// A repository or stack descriptor.
///
/// Built fresh on every load. When validation reported issues the fields are
/// best-effort values kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    #[serde(skip)]
    pub kind: ManifestKind,
    pub schema_version: i64,
    pub name: String,
    pub tools: Vec<ToolEntry>,
}

impl Manifest {
    /// First entry matching `(id, version)`.
    pub fn lookup(&self, id: &str, version: &str) -> Option<&ToolEntry> {
        lookup(&self.tools, id, version)
    }

    /// Canonical object form, suitable for writing back to disk.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_default()
    }
}

/// Return the first entry whose `(id, version)` matches. Duplicates are not an error.
pub fn lookup<'a>(entries: &'a [ToolEntry], id: &str, version: &str) -> Option<&'a ToolEntry> {
    entries.iter().find(|e| e.matches(id, version))
}

/// Validate a decoded document, collecting every violation.
pub fn validate(raw: &Value, kind: ManifestKind) -> Vec<ManifestIssue> {
    parse_manifest_value(raw, kind).1
}

/// Build a manifest from a decoded document along with its validation findings.
pub fn parse_manifest_value(raw: &Value, kind: ManifestKind) -> (Manifest, Vec<ManifestIssue>) {
    let mut issues = Vec::new();
    let mut manifest = Manifest {
        kind,
        schema_version: 0,
        name: String::new(),
        tools: Vec::new(),
    };

    let Some(root) = raw.as_object() else {
        issues.push(ManifestIssue::RootNotObject);
        return (manifest, issues);
    };

    manifest.schema_version = check_schema_version(root.get("schema_version"), &mut issues);

    match root.get("name") {
        None | Some(Value::Null) => issues.push(ManifestIssue::NameMissing),
        Some(Value::String(name)) => {
            if name.trim().is_empty() {
                issues.push(ManifestIssue::NameEmpty);
            }
            name.clone_into(&mut manifest.name);
        }
        Some(_) => issues.push(ManifestIssue::NameNotString),
    }

    match root.get("tools") {
        None | Some(Value::Null) => issues.push(ManifestIssue::ToolsMissing),
        Some(Value::Array(items)) => {
            if items.is_empty() {
                issues.push(ManifestIssue::ToolsEmpty);
            }
            for (index, item) in items.iter().enumerate() {
                let Some(obj) = item.as_object() else {
                    issues.push(ManifestIssue::ToolNotObject(index));
                    continue;
                };
                manifest
                    .tools
                    .push(parse_tool_entry(obj, index, kind, &mut issues));
            }
        }
        Some(_) => issues.push(ManifestIssue::ToolsNotArray),
    }

    (manifest, issues)
}

/// Parse manifest text. Malformed JSON and a non-object root are reported as
/// dedicated codes rather than schema findings.
pub fn parse_manifest_str(input: &str, kind: ManifestKind) -> (Manifest, Vec<ManifestIssue>) {
    match serde_json::from_str::<Value>(input) {
        Ok(value) => parse_manifest_value(&value, kind),
        Err(e) => {
            tracing::warn!("manifest is not valid JSON: {e}");
            let empty = Manifest {
                kind,
                schema_version: 0,
                name: String::new(),
                tools: Vec::new(),
            };
            (empty, vec![ManifestIssue::InvalidJson(e.to_string())])
        }
    }
}

pub fn parse_manifest_file(
    path: impl AsRef<Path>,
    kind: ManifestKind,
) -> Result<(Manifest, Vec<ManifestIssue>), SchemaError> {
    let content = fs::read_to_string(path)?;
    Ok(parse_manifest_str(&content, kind))
}

/// Parse and reject on any finding. The only form callers should trust.
pub fn parse_manifest_strict(input: &str, kind: ManifestKind) -> Result<Manifest, SchemaError> {
    let (manifest, issues) = parse_manifest_str(input, kind);
    if issues.is_empty() {
        Ok(manifest)
    } else {
        Err(SchemaError::Invalid(issues))
    }
}

fn check_schema_version(value: Option<&Value>, issues: &mut Vec<ManifestIssue>) -> i64 {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        issues.push(ManifestIssue::SchemaVersionMissing);
        return 0;
    };
    let Some(version) = whole_number(value) else {
        issues.push(ManifestIssue::SchemaVersionNotInt);
        return 0;
    };
    if version != SUPPORTED_SCHEMA_VERSION {
        issues.push(ManifestIssue::SchemaVersionUnsupported);
    }
    version
}

/// Integer value of a JSON number, accepting floats with no fractional part.
fn whole_number(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if n.as_u64().is_some() {
        // Out of i64 range, still whole: never equal to the supported version.
        return Some(i64::MAX);
    }
    let f = n.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn parse_tool_entry(
    obj: &Map<String, Value>,
    index: usize,
    kind: ManifestKind,
    issues: &mut Vec<ManifestIssue>,
) -> ToolEntry {
    let id = required_string(obj.get("id"), index, ToolField::Id, issues);
    let version = required_string(obj.get("version"), index, ToolField::Version, issues);

    let location = match kind {
        ManifestKind::Stack => ToolLocation::Path(required_string(
            obj.get("path"),
            index,
            ToolField::Path,
            issues,
        )),
        ManifestKind::Repository => {
            let url = obj.get("archive_url").filter(|v| !v.is_null());
            if url.is_some() {
                ToolLocation::ArchiveUrl(required_string(url, index, ToolField::Archive, issues))
            } else {
                ToolLocation::ArchivePath(required_string(
                    obj.get("archive_path"),
                    index,
                    ToolField::Archive,
                    issues,
                ))
            }
        }
    };

    let sha256 = match obj.get("sha256") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if is_sha256_hex(s) => Some(s.clone()),
        Some(other) => {
            issues.push(ManifestIssue::ToolSha256Invalid(index));
            other.as_str().map(str::to_owned)
        }
    };

    let size = match obj.get("size") {
        None | Some(Value::Null) => None,
        Some(v) => match whole_number(v) {
            Some(n) if n > 0 => Some(n as u64),
            _ => {
                issues.push(ManifestIssue::ToolSizeInvalid(index));
                None
            }
        },
    };

    ToolEntry {
        id: ToolId::new(id),
        version: ToolVersion::new(version),
        location,
        sha256,
        size,
    }
}

fn required_string(
    value: Option<&Value>,
    index: usize,
    field: ToolField,
    issues: &mut Vec<ManifestIssue>,
) -> String {
    match value {
        None | Some(Value::Null) => {
            issues.push(ManifestIssue::ToolFieldMissing { index, field });
            String::new()
        }
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                issues.push(ManifestIssue::ToolFieldEmpty { index, field });
            }
            s.clone()
        }
        Some(_) => {
            issues.push(ManifestIssue::ToolFieldNotString { index, field });
            String::new()
        }
    }
}

/// Exactly 64 lowercase hex characters.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
