use crate::config::RunOn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Persisted migration ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationsState {
    /// App version of the last fully migrated launch. Empty before first install.
    #[serde(default)]
    pub app_version: String,

    /// Applied migration versions per service, in application order.
    #[serde(default)]
    pub applied: BTreeMap<String, Vec<String>>,
}

impl MigrationsState {
    pub fn is_applied(&self, service: &str, version: &str) -> bool {
        self.applied
            .get(service)
            .is_some_and(|versions| versions.iter().any(|v| v == version))
    }

    /// Record `version` for `service`. Re-recording is a no-op.
    pub fn mark_applied(&mut self, service: &str, version: &str) {
        let versions = self.applied.entry(service.to_string()).or_default();
        if !versions.iter().any(|v| v == version) {
            versions.push(version.to_string());
        }
    }

    /// Phase of this launch given the manifest's app version.
    pub fn phase_for(&self, manifest_version: &str) -> InstallPhase {
        if self.app_version.is_empty() {
            InstallPhase::FirstInstall
        } else if self.app_version != manifest_version {
            InstallPhase::Upgrade
        } else {
            InstallPhase::Current
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    FirstInstall,
    Upgrade,
    Current,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallPhase::FirstInstall => "first_install",
            InstallPhase::Upgrade => "upgrade",
            InstallPhase::Current => "current",
        };
        f.write_str(s)
    }
}

impl RunOn {
    /// Whether a migration with this `run_on` is eligible in `phase`.
    pub fn matches(&self, phase: InstallPhase) -> bool {
        match self {
            RunOn::Always => true,
            RunOn::FirstInstall => phase == InstallPhase::FirstInstall,
            RunOn::Upgrade => phase == InstallPhase::Upgrade,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_detection() {
        let mut state = MigrationsState::default();
        assert_eq!(state.phase_for("1.0.0"), InstallPhase::FirstInstall);

        state.app_version = "1.0.0".to_string();
        assert_eq!(state.phase_for("1.0.0"), InstallPhase::Current);
        assert_eq!(state.phase_for("1.1.0"), InstallPhase::Upgrade);
    }

    #[test]
    fn test_run_on_matrix() {
        use InstallPhase::*;
        assert!(RunOn::Always.matches(FirstInstall));
        assert!(RunOn::Always.matches(Current));
        assert!(RunOn::FirstInstall.matches(FirstInstall));
        assert!(!RunOn::FirstInstall.matches(Upgrade));
        assert!(RunOn::Upgrade.matches(Upgrade));
        assert!(!RunOn::Upgrade.matches(FirstInstall));
        assert!(!RunOn::Upgrade.matches(Current));
    }

    #[test]
    fn test_mark_applied_is_idempotent() {
        let mut state = MigrationsState::default();
        state.mark_applied("db", "001");
        state.mark_applied("db", "001");
        state.mark_applied("db", "002");
        assert_eq!(state.applied["db"], vec!["001", "002"]);
        assert!(state.is_applied("db", "002"));
        assert!(!state.is_applied("api", "001"));
    }
}
