//! Cross-node reachability matrix.
//!
//! Every agent must list every node's address (its own included) in its
//! health table. Propagation bugs are often one-directional, so all ordered
//! pairs are checked, observers in the outer loop and targets in the inner.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cluster::{Agent, AgentLocator, Node};
use crate::error::{ConvergenceFailure, HealthError};
use crate::path::{PathQuery, StatusField};
use crate::poll::{Expectation, PollingMatcher};

/// One ordered pair that did not check out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairFailure {
    pub observer: String,
    pub target: String,
    /// Address the observer was expected to report.
    pub expected: String,
    pub reason: String,
    /// Set when the failure was a timeout rather than a fatal error.
    pub convergence: Option<ConvergenceFailure>,
}

impl fmt::Display for PairFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: expected {} in health table: {}",
            self.observer, self.target, self.expected, self.reason
        )
    }
}

/// Outcome of a full matrix check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatrixReport {
    pub pairs_checked: usize,
    pub failures: Vec<PairFailure>,
    /// Agent lookup error that stopped the check before every pair ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl MatrixReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures caused by the timeout budget running out.
    pub fn convergence_failures(&self) -> impl Iterator<Item = &ConvergenceFailure> {
        self.failures.iter().filter_map(|f| f.convergence.as_ref())
    }
}

/// Checks that every agent observes every node.
#[derive(Clone)]
pub struct MatrixVerifier {
    locator: Arc<dyn AgentLocator>,
    matcher: PollingMatcher,
    query: PathQuery,
}

impl MatrixVerifier {
    pub fn new(locator: Arc<dyn AgentLocator>, matcher: PollingMatcher) -> Self {
        Self {
            locator,
            matcher,
            query: PathQuery::all_nodes(StatusField::HostIp),
        }
    }

    /// Verify all N² ordered pairs, self-pairs included.
    ///
    /// Per-pair failures are collected and the remaining pairs are still
    /// checked. An agent lookup failure is recorded against the pair that hit
    /// it and stops the check, keeping every result gathered so far.
    pub async fn verify_matrix(&self, nodes: &[Node]) -> MatrixReport {
        let mut report = MatrixReport::default();

        for observer_node in nodes {
            for target_node in nodes {
                let (observer, target) = match self.locate_pair(observer_node, target_node).await
                {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(
                            observer = %observer_node,
                            target = %target_node,
                            error = %e,
                            "Agent lookup failed, stopping reachability check"
                        );
                        report.pairs_checked += 1;
                        report.failures.push(PairFailure {
                            observer: observer_node.name.clone(),
                            target: target_node.name.clone(),
                            expected: "<unknown>".to_string(),
                            reason: e.to_string(),
                            convergence: None,
                        });
                        report.aborted = Some(e.to_string());
                        return report;
                    }
                };
                let expected = Expectation::Contains(target.address.clone());

                report.pairs_checked += 1;

                match self
                    .matcher
                    .await_value(&observer, &self.query, &expected)
                    .await
                {
                    Ok(converged) => {
                        info!(
                            observer = %observer_node,
                            target = %target_node,
                            address = %target.address,
                            attempts = converged.attempts,
                            "Observer sees target"
                        );
                    }
                    Err(e) => {
                        warn!(
                            observer = %observer_node,
                            target = %target_node,
                            address = %target.address,
                            error = %e,
                            "Observer never saw target"
                        );
                        let convergence = match &e {
                            HealthError::Convergence(failure) => Some(failure.clone()),
                            _ => None,
                        };
                        report.failures.push(PairFailure {
                            observer: observer_node.name.clone(),
                            target: target_node.name.clone(),
                            expected: target.address,
                            reason: e.to_string(),
                            convergence,
                        });
                    }
                }
            }
        }

        info!(
            pairs = report.pairs_checked,
            failed = report.failures.len(),
            "Reachability matrix checked"
        );

        report
    }

    async fn locate_pair(&self, observer: &Node, target: &Node) -> Result<(Agent, Agent), HealthError> {
        let observer = self.locator.locate_agent(observer).await?;
        let target = self.locator.locate_agent(target).await?;
        Ok((observer, target))
    }
}
