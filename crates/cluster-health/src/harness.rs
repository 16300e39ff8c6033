//! Full verification run.
//!
//! ```text
//! Idle -> Querying -> {Converged, TimedOut} -> Validating -> {Passed, Failed}
//! ```
//!
//! A timeout while querying fails the run without validating. After any
//! failure the configured diagnostic commands are run on every agent that can
//! still be located and their output is attached to the report.

use std::sync::Arc;

use tracing::{info, warn};

use crate::client::StatusClient;
use crate::cluster::{AgentLocator, CommandExecutor, Node};
use crate::config::HarnessConfig;
use crate::error::HealthError;
use crate::matrix::MatrixVerifier;
use crate::poll::{PollSettings, PollingMatcher};
use crate::report::{Diagnostic, Phase, VerificationReport};
use crate::validator;

/// Drives matrix verification and schema validation for a node set.
#[derive(Clone)]
pub struct HealthVerifier {
    locator: Arc<dyn AgentLocator>,
    client: StatusClient,
    matrix: MatrixVerifier,
    error_marker: String,
    diagnostics: Vec<String>,
}

impl HealthVerifier {
    pub fn new(
        locator: Arc<dyn AgentLocator>,
        executor: Arc<dyn CommandExecutor>,
        config: &HarnessConfig,
    ) -> Self {
        let client = StatusClient::new(executor, &config.status_tool);
        let matcher = PollingMatcher::new(client.clone(), PollSettings::from(config.poll));
        Self {
            matrix: MatrixVerifier::new(locator.clone(), matcher),
            locator,
            client,
            error_marker: config.error_marker.clone(),
            diagnostics: config.diagnostics.clone(),
        }
    }

    /// Run a complete verification over `nodes`.
    pub async fn run(&self, nodes: &[Node]) -> VerificationReport {
        let mut report =
            VerificationReport::new(nodes.iter().map(|n| n.name.clone()).collect());

        info!(nodes = nodes.len(), "Starting health verification");

        if let Err(e) = self.execute(nodes, &mut report).await {
            warn!(error = %e, "Health verification aborted");
            report.fail(e);
        }

        if report.phase == Phase::Failed {
            self.collect_diagnostics(nodes, &mut report).await;
        }

        info!(phase = %report.phase, "Health verification finished");
        report
    }

    async fn execute(
        &self,
        nodes: &[Node],
        report: &mut VerificationReport,
    ) -> Result<(), HealthError> {
        let Some(first) = nodes.first() else {
            return Err(HealthError::Config("no nodes to verify".into()));
        };

        report.enter(Phase::Querying);
        report.matrix = self.matrix.verify_matrix(nodes).await;
        report.error.clone_from(&report.matrix.aborted);

        if !report.matrix.passed() {
            if report.matrix.convergence_failures().next().is_some() {
                report.enter(Phase::TimedOut);
            }
            report.enter(Phase::Failed);
            return Ok(());
        }
        report.enter(Phase::Converged);

        report.enter(Phase::Validating);
        let agent = self.locator.locate_agent(first).await?;

        let probe = self.client.document(&agent, true).await?;
        if let Err(violation) = validator::check_error_marker(probe.raw(), &self.error_marker) {
            report.violations.push(violation);
        }

        let document = self.client.document(&agent, false).await?;
        if let Err(violations) = validator::validate(&document, nodes.len()) {
            report.violations.extend(violations);
        }

        if report.violations.is_empty() {
            report.enter(Phase::Passed);
        } else {
            warn!(
                violations = report.violations.len(),
                "Health status document has violations"
            );
            report.enter(Phase::Failed);
        }
        Ok(())
    }

    async fn collect_diagnostics(&self, nodes: &[Node], report: &mut VerificationReport) {
        for node in nodes {
            let agent = match self.locator.locate_agent(node).await {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(node = %node, error = %e, "Skipping diagnostics, agent not found");
                    continue;
                }
            };

            for command in &self.diagnostics {
                match self.client.run_unchecked(&agent, command).await {
                    Ok(output) => report.diagnostics.push(Diagnostic {
                        node: node.name.clone(),
                        agent: agent.to_string(),
                        command: command.clone(),
                        output: if output.stderr.is_empty() {
                            output.stdout
                        } else {
                            format!("{}{}", output.stdout, output.stderr)
                        },
                    }),
                    Err(e) => {
                        warn!(agent = %agent, command = %command, error = %e, "Diagnostic command failed");
                    }
                }
            }
        }
    }
}
