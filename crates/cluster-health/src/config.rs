//! Harness configuration.
//!
//! Values come from built-in defaults, an optional TOML file and finally
//! command-line flags or environment variables (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::HealthError;

/// Polling cadence for convergence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time between attempts, in milliseconds.
    pub interval_ms: u64,
    /// Total budget, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            timeout_ms: 30_000,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Full harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Namespace the agents run in.
    pub namespace: String,
    /// Label selector identifying agent pods.
    pub agent_selector: String,
    /// Container to exec into.
    pub container: String,
    /// Health CLI available inside the agent container.
    pub status_tool: String,
    /// Substring whose presence in probe output marks a failure.
    pub error_marker: String,
    /// Commands run on every agent when a verification fails.
    pub diagnostics: Vec<String>,
    /// Kubeconfig to use instead of the default resolution.
    pub kubeconfig: Option<PathBuf>,
    pub poll: PollConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            agent_selector: "k8s-app=cilium".to_string(),
            container: "cilium-agent".to_string(),
            status_tool: "cilium-health".to_string(),
            error_marker: "error".to_string(),
            diagnostics: vec!["cilium endpoint list".to_string()],
            kubeconfig: None,
            poll: PollConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file, filling unset keys with defaults.
    pub fn from_file(path: &Path) -> Result<Self, HealthError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            HealthError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, HealthError> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| HealthError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that deserialization cannot express.
    pub fn validate(&self) -> Result<(), HealthError> {
        if self.namespace.trim().is_empty() {
            return Err(HealthError::Config("namespace must not be empty".into()));
        }
        if self.status_tool.trim().is_empty() {
            return Err(HealthError::Config("status_tool must not be empty".into()));
        }
        if self.poll.interval_ms == 0 {
            return Err(HealthError::Config("poll interval must be positive".into()));
        }
        if self.poll.interval_ms > self.poll.timeout_ms {
            return Err(HealthError::Config(format!(
                "poll interval ({}ms) exceeds timeout ({}ms)",
                self.poll.interval_ms, self.poll.timeout_ms
            )));
        }
        Ok(())
    }
}
