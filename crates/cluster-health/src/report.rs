//! Verification report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SchemaViolation;
use crate::matrix::MatrixReport;

/// States of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Querying,
    Converged,
    TimedOut,
    Validating,
    Passed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Querying => write!(f, "querying"),
            Self::Converged => write!(f, "converged"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Validating => write!(f, "validating"),
            Self::Passed => write!(f, "✅ PASSED"),
            Self::Failed => write!(f, "❌ FAILED"),
        }
    }
}

/// Output of a diagnostic command collected after a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub node: String,
    pub agent: String,
    pub command: String,
    pub output: String,
}

/// Everything a verification run observed.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub nodes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: Phase,
    /// Every phase entered, in order.
    pub history: Vec<Phase>,
    pub matrix: MatrixReport,
    pub violations: Vec<SchemaViolation>,
    /// Fatal error that ended the run early.
    pub error: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl VerificationReport {
    pub fn new(nodes: Vec<String>) -> Self {
        Self {
            nodes,
            started_at: Utc::now(),
            finished_at: None,
            phase: Phase::Idle,
            history: vec![Phase::Idle],
            matrix: MatrixReport::default(),
            violations: Vec::new(),
            error: None,
            diagnostics: Vec::new(),
        }
    }

    /// Move to `phase`, recording it in the history.
    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.history.push(phase);
        if phase.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Record a fatal error and fail the run.
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
        self.enter(Phase::Failed);
    }

    pub fn passed(&self) -> bool {
        self.phase == Phase::Passed
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Health verification: {}", self.phase)?;
        writeln!(f, "Nodes: {}", self.nodes.join(", "))?;
        writeln!(
            f,
            "Reachability: {}/{} pairs passed",
            self.matrix.pairs_checked - self.matrix.failures.len(),
            self.matrix.pairs_checked
        )?;

        for failure in &self.matrix.failures {
            writeln!(f, "  ❌ {failure}")?;
        }

        if !self.violations.is_empty() {
            writeln!(f, "Schema violations: {}", self.violations.len())?;
            for violation in &self.violations {
                writeln!(f, "  ❌ {violation}")?;
            }
        }

        if let Some(error) = &self.error {
            writeln!(f, "Error: {error}")?;
        }

        for diagnostic in &self.diagnostics {
            writeln!(
                f,
                "--- {} on {} ({}) ---\n{}",
                diagnostic.command,
                diagnostic.agent,
                diagnostic.node,
                diagnostic.output.trim_end()
            )?;
        }

        Ok(())
    }
}
