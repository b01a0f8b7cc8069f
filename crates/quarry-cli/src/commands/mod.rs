pub mod fetch;
pub mod hash;
pub mod hydrate;
pub mod list;
pub mod policy;
pub mod validate;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use quarry_remote::{OfflineGate, PolicyConfig};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_POLICY_ERROR: u8 = 3;
pub const EXIT_PARTIAL: u8 = 4;

/// Per-invocation overrides layered on top of the policy file.
#[derive(Debug, Clone, Default, Args)]
pub struct NetworkArgs {
    /// Refuse every network connection for this run.
    #[arg(long, default_value_t = false)]
    pub offline: bool,
    /// Same as `offline`, but meant as a hard override for scripts.
    #[arg(long, default_value_t = false)]
    pub force_offline: bool,
    /// Allow only these hosts (repeatable).
    #[arg(long = "allow-host")]
    pub allow_hosts: Vec<String>,
    /// Allow only these ports (repeatable).
    #[arg(long = "allow-port")]
    pub allow_ports: Vec<u16>,
}

impl NetworkArgs {
    /// Layer the flags over `policy`. An allowlist from the file is narrowed
    /// to the entries the flags repeat; an empty one takes the flag values.
    pub fn apply(&self, mut policy: PolicyConfig) -> PolicyConfig {
        policy.offline_mode |= self.offline;
        policy.force_offline |= self.force_offline;

        if !self.allow_hosts.is_empty() {
            let hosts: BTreeSet<String> =
                self.allow_hosts.iter().map(|h| h.to_ascii_lowercase()).collect();
            if policy.allowed_hosts.is_empty() {
                policy.allowed_hosts = hosts;
            } else {
                policy.allowed_hosts.retain(|h| hosts.contains(h));
                if policy.allowed_hosts.is_empty() {
                    warn!("--allow-host matches no host in the policy file; denying all access");
                    policy.offline_mode = true;
                }
            }
        }

        if !self.allow_ports.is_empty() {
            let ports: BTreeSet<u16> = self.allow_ports.iter().copied().collect();
            if policy.allowed_ports.is_empty() {
                policy.allowed_ports = ports;
            } else {
                policy.allowed_ports.retain(|p| ports.contains(p));
                if policy.allowed_ports.is_empty() {
                    warn!("--allow-port matches no port in the policy file; denying all access");
                    policy.offline_mode = true;
                }
            }
        }
        policy
    }
}

pub fn load_policy(
    policy_file: Option<&Path>,
    network: &NetworkArgs,
) -> Result<PolicyConfig, String> {
    let policy = match policy_file {
        Some(path) => PolicyConfig::load(path),
        None => PolicyConfig::load_default(),
    }
    .map_err(|e| format!("policy config: {e}"))?;
    let policy = network.apply(policy);
    debug!("effective network policy: {policy:?}");
    Ok(policy)
}

pub fn make_gate(
    policy_file: Option<&Path>,
    network: &NetworkArgs,
) -> Result<Arc<OfflineGate>, String> {
    Ok(Arc::new(OfflineGate::new(load_policy(policy_file, network)?)))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Byte-level transfer bar. The length is set from progress callbacks.
pub fn transfer_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb.set_prefix(prefix.to_owned());
    pb
}

pub fn colorize_outcome(label: &str) -> String {
    use console::Style;
    match label {
        "installed" | "allowed" | "verified" => Style::new().green().apply_to(label).to_string(),
        "present" => Style::new().cyan().apply_to(label).to_string(),
        "failed" => Style::new().red().bold().apply_to(label).to_string(),
        "denied" => Style::new().yellow().bold().apply_to(label).to_string(),
        other => other.to_owned(),
    }
}
