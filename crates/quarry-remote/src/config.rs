use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that forces `force_offline` on at load time.
pub const FORCE_OFFLINE_ENV: &str = "QUARRY_FORCE_OFFLINE";

/// Process-wide network policy read by the [`OfflineGate`](crate::OfflineGate).
///
/// An empty allowlist allows every value for that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub offline_mode: bool,
    #[serde(default)]
    pub force_offline: bool,
    #[serde(default)]
    pub allowed_hosts: BTreeSet<String>,
    #[serde(default)]
    pub allowed_ports: BTreeSet<u16>,
}

impl PolicyConfig {
    #[must_use]
    pub fn offline() -> Self {
        Self {
            offline_mode: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_allowed_host(mut self, host: &str) -> Self {
        self.allowed_hosts.insert(host.to_ascii_lowercase());
        self
    }

    #[must_use]
    pub fn with_allowed_port(mut self, port: u16) -> Self {
        self.allowed_ports.insert(port);
        self
    }

    /// Load from `~/.config/quarry/policy.json`; a missing file yields defaults.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_policy_path()?;
        let config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid policy config: {e}")))?;
        Ok(config.with_env_overrides())
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    fn with_env_overrides(mut self) -> Self {
        if std::env::var(FORCE_OFFLINE_ENV).as_deref() == Ok("1") {
            self.force_offline = true;
        }
        self.allowed_hosts = self
            .allowed_hosts
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        self
    }
}

pub fn default_policy_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/quarry/policy.json"))
}

/// Timeouts and limits for the retrieval client.
///
/// One bounded deadline applies to connection establishment and one to every
/// response wait, for plain requests and downloads alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_redirects: usize,
    pub chunk_size: usize,
    /// Upper bound on a fully buffered `get` body.
    pub max_body_bytes: u64,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            poll_interval_ms: 10,
            max_redirects: 5,
            chunk_size: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024,
            user_agent: concat!("quarry/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl ClientOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/policy.json");

        let config = PolicyConfig::default()
            .with_allowed_host("Mirror.Example.com")
            .with_allowed_port(443);
        config.save(&path).unwrap();

        let loaded = PolicyConfig::load(&path).unwrap();
        assert!(!loaded.offline_mode);
        assert!(loaded.allowed_hosts.contains("mirror.example.com"));
        assert!(loaded.allowed_ports.contains(&443));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"offline_mode": true}"#).unwrap();
        let loaded = PolicyConfig::load(&path).unwrap();
        assert!(loaded.offline_mode);
        assert!(loaded.allowed_hosts.is_empty());
        assert!(loaded.allowed_ports.is_empty());
    }

    #[test]
    fn malformed_policy_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, "offline = true").unwrap();
        assert!(matches!(
            PolicyConfig::load(&path),
            Err(RemoteError::Config(_))
        ));
    }

    #[test]
    fn client_options_defaults() {
        let opts = ClientOptions::default();
        assert_eq!(opts.max_redirects, 5);
        assert_eq!(opts.connect_timeout(), Duration::from_secs(10));
        assert!(opts.user_agent.starts_with("quarry/"));
    }

    #[test]
    fn client_options_partial_json() {
        let opts: ClientOptions = serde_json::from_str(r#"{"read_timeout_ms": 250}"#).unwrap();
        assert_eq!(opts.read_timeout(), Duration::from_millis(250));
        assert_eq!(opts.max_redirects, 5);
    }
}
