//! The single choke point every outbound connection must pass.
//!
//! No other component reads offline configuration directly; callers ask
//! [`OfflineGate::guard_network_call`] and treat a denial as an ordinary
//! failure of the one operation they were attempting.

use crate::config::PolicyConfig;
use crate::RemoteError;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Host and port a connection is about to be opened to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTarget {
    pub host: String,
    pub port: u16,
}

impl NetworkTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub error_message: String,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            error_message: String::new(),
        }
    }

    fn deny(message: String) -> Self {
        Self {
            allowed: false,
            error_message: message,
        }
    }
}

#[derive(Debug, Default)]
pub struct OfflineGate {
    policy: RwLock<PolicyConfig>,
}

impl OfflineGate {
    pub fn new(policy: PolicyConfig) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    /// Decide whether a network attempt may proceed.
    ///
    /// `reason` is a diagnostic label only. With `target = None` only the two
    /// offline switches are consulted; with a target the host and port
    /// allowlists apply as well.
    pub fn check(&self, reason: &str, target: Option<&NetworkTarget>) -> GateDecision {
        let policy = self.policy.read().unwrap_or_else(PoisonError::into_inner);
        let decision = decide(&policy, target);
        debug!(
            reason,
            allowed = decision.allowed,
            "network gate: {}",
            if decision.allowed {
                "allowed"
            } else {
                decision.error_message.as_str()
            }
        );
        decision
    }

    /// [`check`](Self::check) as a `Result`, for `?` at call sites.
    pub fn guard_network_call(
        &self,
        reason: &str,
        target: Option<&NetworkTarget>,
    ) -> Result<(), RemoteError> {
        let decision = self.check(reason, target);
        if decision.allowed {
            Ok(())
        } else {
            Err(RemoteError::PolicyDenied(decision.error_message))
        }
    }

    pub fn policy(&self) -> PolicyConfig {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_policy(&self, policy: PolicyConfig) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn set_offline_mode(&self, enabled: bool) {
        self.policy
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .offline_mode = enabled;
    }

    pub fn set_force_offline(&self, enabled: bool) {
        self.policy
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .force_offline = enabled;
    }
}

fn decide(policy: &PolicyConfig, target: Option<&NetworkTarget>) -> GateDecision {
    if policy.force_offline {
        return GateDecision::deny("network access blocked: force_offline is enabled".to_owned());
    }
    if policy.offline_mode {
        return GateDecision::deny("network access blocked: offline mode is enabled".to_owned());
    }
    let Some(target) = target else {
        return GateDecision::allow();
    };
    if !policy.allowed_hosts.is_empty()
        && !policy
            .allowed_hosts
            .iter()
            .any(|h| h.eq_ignore_ascii_case(&target.host))
    {
        return GateDecision::deny(format!(
            "network access blocked: host '{}' is not in the allowlist",
            target.host
        ));
    }
    if !policy.allowed_ports.is_empty() && !policy.allowed_ports.contains(&target.port) {
        return GateDecision::deny(format!(
            "network access blocked: port {} is not in the allowlist",
            target.port
        ));
    }
    GateDecision::allow()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> NetworkTarget {
        NetworkTarget::new("mirror.example.com", 443)
    }

    #[test]
    fn default_policy_allows_everything() {
        let gate = OfflineGate::default();
        assert!(gate.check("test", None).allowed);
        assert!(gate.check("test", Some(&target())).allowed);
    }

    #[test]
    fn offline_switches_deny_independently() {
        let gate = OfflineGate::new(PolicyConfig::offline());
        let d = gate.check("test", None);
        assert!(!d.allowed);
        assert!(d.error_message.contains("offline mode"));

        let gate = OfflineGate::new(PolicyConfig {
            force_offline: true,
            ..PolicyConfig::default()
        });
        let d = gate.check("test", Some(&target()));
        assert!(!d.allowed);
        assert!(d.error_message.contains("force_offline"));
    }

    #[test]
    fn host_allowlist_is_case_insensitive() {
        let gate = OfflineGate::new(PolicyConfig::default().with_allowed_host("Mirror.Example.com"));
        assert!(gate.check("t", Some(&target())).allowed);
        assert!(
            gate.check("t", Some(&NetworkTarget::new("MIRROR.example.com", 80)))
                .allowed
        );
        let d = gate.check("t", Some(&NetworkTarget::new("evil.example.com", 443)));
        assert!(!d.allowed);
        assert!(d.error_message.contains("evil.example.com"));
    }

    #[test]
    fn port_allowlist_applies_independently_of_hosts() {
        let gate = OfflineGate::new(PolicyConfig::default().with_allowed_port(443));
        assert!(gate.check("t", Some(&target())).allowed);
        assert!(!gate.check("t", Some(&NetworkTarget::new("mirror.example.com", 8080))).allowed);
    }

    #[test]
    fn allowlists_do_not_apply_without_target() {
        let gate = OfflineGate::new(
            PolicyConfig::default()
                .with_allowed_host("only.example.com")
                .with_allowed_port(1),
        );
        assert!(gate.check("batch", None).allowed);
    }

    #[test]
    fn reason_never_affects_decision() {
        let gate = OfflineGate::new(PolicyConfig::offline());
        assert_eq!(gate.check("a", None), gate.check("something else", None));
    }

    #[test]
    fn setters_update_policy_at_runtime() {
        let gate = OfflineGate::default();
        gate.set_offline_mode(true);
        assert!(gate.guard_network_call("t", None).is_err());
        gate.set_offline_mode(false);
        assert!(gate.guard_network_call("t", None).is_ok());
        gate.set_force_offline(true);
        let err = gate.guard_network_call("t", None).unwrap_err();
        assert!(matches!(err, RemoteError::PolicyDenied(_)));
        gate.set_policy(PolicyConfig::default());
        assert!(!gate.policy().force_offline);
    }
}
