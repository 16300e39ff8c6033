//! Error and violation types for health verification.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while querying or waiting on agent health status.
#[derive(Error, Debug)]
pub enum HealthError {
    /// No agent is scheduled on the node, or it has no address yet.
    #[error("No agent found on node {0}")]
    NotFound(String),

    /// More than one agent matched a node.
    #[error("Expected exactly one agent on node {node}, found {count}")]
    AmbiguousAgent { node: String, count: usize },

    /// The executor could not reach the agent or the command exited non-zero.
    #[error("Communication with agent {agent} failed: {message}")]
    CommunicationFailure { agent: String, message: String },

    /// Agent output did not parse against the status schema.
    #[error("Malformed response from agent {agent}: {message}")]
    MalformedResponse { agent: String, message: String },

    /// A path query did not resolve against a parsed document.
    #[error("Path {0} did not resolve")]
    PathNotResolved(String),

    /// A polled value never appeared within the timeout.
    #[error(transparent)]
    Convergence(#[from] ConvergenceFailure),

    /// Kubernetes API call failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid harness configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl HealthError {
    /// Only transport failures are retried, and only inside a polling window.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommunicationFailure { .. })
    }
}

/// An expected value never appeared in an agent's status output.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error(
    "Never saw {expected:?} from agent {agent} running `{command}` after {attempts} attempt(s) in {elapsed:?} (last observed: {})",
    .last_observed.as_deref().unwrap_or("<nothing>")
)]
pub struct ConvergenceFailure {
    pub agent: String,
    pub command: String,
    pub expected: String,
    /// Last output seen, or the last error message if no output was obtained.
    pub last_observed: Option<String>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// A structural or semantic defect found in a status document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaViolation {
    /// The value leaf is absent or empty.
    MissingField { path: String },
    /// The agent reported a non-empty status for the path.
    UnhealthyPath { path: String, status: String },
    /// The raw output contains the error marker.
    ErrorMarker { marker: String, excerpt: String },
}

impl SchemaViolation {
    /// The path (or marker) this violation refers to.
    pub fn path(&self) -> &str {
        match self {
            Self::MissingField { path } | Self::UnhealthyPath { path, .. } => path,
            Self::ErrorMarker { marker, .. } => marker,
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { path } => write!(f, "missing field {path}: expected a non-empty value"),
            Self::UnhealthyPath { path, status } => {
                write!(f, "unhealthy path {path}: expected empty status, observed {status:?}")
            }
            Self::ErrorMarker { marker, excerpt } => {
                write!(f, "output contains {marker:?}: {excerpt}")
            }
        }
    }
}
