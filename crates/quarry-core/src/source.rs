//! Where manifests and archives come from.

use crate::CoreError;
use quarry_remote::HttpClient;
use quarry_schema::{parse_manifest_str, Manifest, ManifestIssue, ManifestKind, ToolLocation};
use quarry_store::resolve_archive_path;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stand-in root for confining paths that will be appended to a mirror URL.
const VIRTUAL_ROOT: &str = "/mirror";

fn is_http(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Local path named by a `file://` URL, or `None` for any other input.
///
/// Accepts `file:///abs`, `file://localhost/abs` and Windows drive forms, and
/// decodes percent escapes. URLs naming any other host yield `None`.
pub fn file_url_to_path(input: &str) -> Option<PathBuf> {
    let rest = input.trim();
    if !rest.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("file://")) {
        return None;
    }
    let rest = &rest[7..];
    let split_at = rest.find('/').unwrap_or(rest.len());
    let (host, rest) = rest.split_at(split_at);
    if !host.is_empty() && !host.eq_ignore_ascii_case("localhost") {
        return None;
    }
    if rest.is_empty() {
        return None;
    }
    let decoded = percent_decode(rest);
    // file:///C:/x
    let bytes = decoded.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        return Some(PathBuf::from(&decoded[1..]));
    }
    Some(PathBuf::from(decoded))
}

fn percent_decode(s: &str) -> String {
    let hex = |b: u8| (b as char).to_digit(16);
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Where the manifest for a run is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// Local file, given as a bare path or a `file://` URL.
    Local(PathBuf),
    /// `http://` or `https://` endpoint returning the manifest JSON.
    Remote(String),
}

impl ManifestSource {
    pub fn parse(input: &str) -> Self {
        if is_http(input) {
            Self::Remote(input.trim().to_owned())
        } else if let Some(path) = file_url_to_path(input) {
            Self::Local(path)
        } else {
            Self::Local(PathBuf::from(input))
        }
    }

    /// Directory containing the manifest, used as the mirror root when none
    /// is configured.
    pub fn default_mirror(&self) -> Option<MirrorRoot> {
        match self {
            Self::Local(path) => {
                let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
                Some(MirrorRoot::Local(
                    parent.map_or_else(|| PathBuf::from("."), Path::to_path_buf),
                ))
            }
            Self::Remote(url) => {
                let without_query = url.split(['?', '#']).next().unwrap_or(url);
                let scheme_end = without_query.find("://")? + 3;
                let slash = without_query[scheme_end..].rfind('/')?;
                Some(MirrorRoot::Url(
                    without_query[..=scheme_end + slash].to_owned(),
                ))
            }
        }
    }

    /// Read the raw manifest text. Remote reads go through `client`, and so
    /// through its gate.
    pub fn read(&self, client: &HttpClient) -> Result<String, CoreError> {
        match self {
            Self::Local(path) => {
                debug!("reading manifest from {}", path.display());
                Ok(std::fs::read_to_string(path)?)
            }
            Self::Remote(url) => {
                debug!("fetching manifest from {url}");
                let response = client.get(url)?;
                String::from_utf8(response.body)
                    .map_err(|_| CoreError::ManifestEncoding(url.clone()))
            }
        }
    }

    /// Read and validate. Any finding rejects the manifest.
    pub fn load(&self, kind: ManifestKind, client: &HttpClient) -> Result<Manifest, CoreError> {
        let text = self.read(client)?;
        let (manifest, issues) = parse_manifest_str(&text, kind);
        if issues.is_empty() {
            return Ok(manifest);
        }
        if issues.iter().any(ManifestIssue::is_parse_failure) {
            warn!("manifest {self} could not be parsed");
        } else {
            warn!("manifest {self} failed validation with {} issue(s)", issues.len());
        }
        Err(CoreError::ManifestRejected(issues))
    }
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// Trusted base under which relative archive paths must resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorRoot {
    Local(PathBuf),
    /// Base URL, always ending in `/`.
    Url(String),
}

impl MirrorRoot {
    pub fn parse(input: &str) -> Self {
        if is_http(input) {
            let mut base = input.trim().to_owned();
            if !base.ends_with('/') {
                base.push('/');
            }
            Self::Url(base)
        } else if let Some(path) = file_url_to_path(input) {
            Self::Local(path)
        } else {
            Self::Local(PathBuf::from(input))
        }
    }
}

impl fmt::Display for MirrorRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// Concrete origin of one tool archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    /// Copied byte-for-byte into staging.
    Local(PathBuf),
    /// Downloaded into staging.
    Remote(String),
}

impl fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// Turn a tool entry's location into something that can be staged.
///
/// URLs and absolute paths are taken as given. Relative paths must resolve
/// inside `mirror`; against a URL mirror they are confined to a virtual root
/// first and then appended to the base URL.
pub fn resolve_archive_source(
    location: &ToolLocation,
    mirror: Option<&MirrorRoot>,
) -> Result<ArchiveSource, CoreError> {
    let raw = location.as_str().trim();
    if is_http(raw) {
        return Ok(ArchiveSource::Remote(raw.to_owned()));
    }
    if let Some(path) = file_url_to_path(raw) {
        return Ok(ArchiveSource::Local(path));
    }
    if let ToolLocation::ArchiveUrl(url) = location {
        return Err(CoreError::UnsupportedSource(url.clone()));
    }
    if matches!(location, ToolLocation::Path(_)) && Path::new(raw).is_absolute() {
        return Ok(ArchiveSource::Local(PathBuf::from(raw)));
    }

    match mirror {
        Some(MirrorRoot::Local(root)) => Ok(ArchiveSource::Local(resolve_archive_path(root, raw)?)),
        Some(MirrorRoot::Url(base)) => {
            let confined = resolve_archive_path(Path::new(VIRTUAL_ROOT), raw)?;
            let confined = confined.to_string_lossy().replace('\\', "/");
            let relative = confined
                .get(VIRTUAL_ROOT.len()..)
                .unwrap_or_default()
                .trim_start_matches('/');
            Ok(ArchiveSource::Remote(format!("{base}{relative}")))
        }
        None => Err(CoreError::NoMirrorRoot(raw.to_owned())),
    }
}
