//! Polling matcher.
//!
//! Health results propagate through the cluster asynchronously, so a
//! freshly started peer may take a while to appear in every agent's table.
//! [`PollingMatcher`] re-runs a status command until its output matches an
//! [`Expectation`] or the timeout budget is spent.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, timeout as deadline, Instant};
use tracing::{debug, info, warn};

use crate::client::StatusClient;
use crate::cluster::Agent;
use crate::config::PollConfig;
use crate::error::{ConvergenceFailure, HealthError};
use crate::path::PathQuery;

/// What a polled output must look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Expectation {
    /// Trimmed output equals the value exactly.
    Equals(String),
    /// The value is one of the whitespace-separated tokens of the output.
    Contains(String),
}

impl Expectation {
    pub fn matches(&self, observed: &str) -> bool {
        match self {
            Self::Equals(value) => observed.trim() == value,
            Self::Contains(value) => observed.split_whitespace().any(|token| token == value),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Equals(value) | Self::Contains(value) => value,
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(value) => write!(f, "== {value:?}"),
            Self::Contains(value) => write!(f, "contains {value:?}"),
        }
    }
}

/// Interval and total budget for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        PollConfig::default().into()
    }
}

impl From<PollConfig> for PollSettings {
    fn from(config: PollConfig) -> Self {
        Self::new(config.interval(), config.timeout())
    }
}

/// A successful poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    pub observed: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Re-runs status commands until they report an expected value.
#[derive(Clone)]
pub struct PollingMatcher {
    client: StatusClient,
    settings: PollSettings,
}

impl PollingMatcher {
    pub fn new(client: StatusClient, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Wait until the value at `query` on `agent` satisfies `expected`.
    pub async fn await_value(
        &self,
        agent: &Agent,
        query: &PathQuery,
        expected: &Expectation,
    ) -> Result<Converged, HealthError> {
        let command = self.client.command(Some(query), false).to_string();
        self.await_command(agent, &command, expected).await
    }

    /// Wait until the output of a raw `command` on `agent` satisfies
    /// `expected`.
    ///
    /// Communication failures are retried inside the window. Any other error
    /// ends the wait immediately. The first attempt runs without delay, and
    /// each attempt is cut off when the remaining budget runs out.
    pub async fn await_command(
        &self,
        agent: &Agent,
        command: &str,
        expected: &Expectation,
    ) -> Result<Converged, HealthError> {
        let PollSettings { interval, timeout } = self.settings;
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last_observed = None;

        loop {
            attempts += 1;

            let remaining = timeout.saturating_sub(start.elapsed());
            let result = match deadline(remaining, self.client.run(agent, command)).await {
                Ok(result) => result,
                Err(_) => Err(HealthError::CommunicationFailure {
                    agent: agent.to_string(),
                    message: format!("no response within {remaining:?}"),
                }),
            };

            match result {
                Ok(stdout) => {
                    let observed = stdout.trim();
                    if expected.matches(observed) {
                        let elapsed = start.elapsed();
                        info!(
                            agent = %agent,
                            expected = %expected,
                            attempts,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Value converged"
                        );
                        return Ok(Converged {
                            observed: observed.to_string(),
                            attempts,
                            elapsed,
                        });
                    }
                    debug!(agent = %agent, observed = %observed, expected = %expected, attempts, "Value not yet present");
                    last_observed = Some(observed.to_string());
                }
                Err(e) if e.is_retryable() => {
                    debug!(agent = %agent, error = %e, attempts, "Status query failed, retrying");
                    last_observed = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(
                    agent = %agent,
                    command = %command,
                    expected = %expected,
                    attempts,
                    elapsed_secs = elapsed.as_secs(),
                    "Timeout waiting for value"
                );
                return Err(ConvergenceFailure {
                    agent: agent.to_string(),
                    command: command.to_string(),
                    expected: expected.value().to_string(),
                    last_observed,
                    attempts,
                    elapsed,
                }
                .into());
            }

            sleep(interval.min(timeout - elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::testing::{agent, ScriptedExecutor};
    use crate::cluster::ExecOutput;
    use crate::path::StatusField;

    const IPS: &str = "cilium-health status -o jsonpath='{.nodes[*].host.primary-address.ip}'";

    fn matcher(executor: &Arc<ScriptedExecutor>) -> PollingMatcher {
        PollingMatcher::new(
            StatusClient::new(executor.clone(), "cilium-health"),
            PollSettings::new(Duration::from_secs(1), Duration::from_secs(30)),
        )
    }

    fn observer() -> Agent {
        agent("cilium-a", "k8s1", "10.0.0.1")
    }

    #[test]
    fn test_expectation_matching() {
        assert!(Expectation::Equals("10.0.0.1".into()).matches(" 10.0.0.1\n"));
        assert!(!Expectation::Equals("10.0.0.1".into()).matches("10.0.0.1 10.0.0.2"));
        assert!(Expectation::Contains("10.0.0.2".into()).matches("10.0.0.1 10.0.0.2"));
        assert!(!Expectation::Contains("10.0.0.1".into()).matches("10.0.0.10 10.0.0.11"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_satisfied_returns_without_sleeping() {
        let executor = Arc::new(ScriptedExecutor::default());
        executor.respond("cilium-a", IPS, Ok(ExecOutput::success("10.0.0.1 10.0.0.2")));

        let start = Instant::now();
        let converged = matcher(&executor)
            .await_value(
                &observer(),
                &PathQuery::all_nodes(StatusField::HostIp),
                &Expectation::Contains("10.0.0.2".into()),
            )
            .await
            .unwrap();

        assert_eq!(converged.attempts, 1);
        assert_eq!(converged.elapsed, Duration::ZERO);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_retries() {
        let executor = Arc::new(ScriptedExecutor::default());
        executor.respond("cilium-a", IPS, Ok(ExecOutput::success("10.0.0.1")));
        executor.respond(
            "cilium-a",
            IPS,
            Err(HealthError::CommunicationFailure {
                agent: "kube-system/cilium-a".into(),
                message: "container not running".into(),
            }),
        );
        executor.respond("cilium-a", IPS, Ok(ExecOutput::success("10.0.0.1 10.0.0.2")));

        let converged = matcher(&executor)
            .await_command(&observer(), IPS, &Expectation::Contains("10.0.0.2".into()))
            .await
            .unwrap();

        assert_eq!(converged.attempts, 3);
        assert_eq!(converged.elapsed, Duration::from_secs(2));
        assert_eq!(converged.observed, "10.0.0.1 10.0.0.2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_satisfied_fails_only_after_full_timeout() {
        let executor = Arc::new(ScriptedExecutor::default());
        executor.respond("cilium-a", IPS, Ok(ExecOutput::success("10.0.0.1")));

        let start = Instant::now();
        let err = matcher(&executor)
            .await_command(&observer(), IPS, &Expectation::Contains("10.0.0.2".into()))
            .await
            .unwrap_err();

        assert!(start.elapsed() >= Duration::from_secs(30));
        let HealthError::Convergence(failure) = err else {
            panic!("expected a convergence failure, got {err:?}");
        };
        assert_eq!(failure.agent, "kube-system/cilium-a");
        assert_eq!(failure.command, IPS);
        assert_eq!(failure.expected, "10.0.0.2");
        assert_eq!(failure.last_observed.as_deref(), Some("10.0.0.1"));
        assert_eq!(failure.attempts, 31);
        assert!(failure.elapsed >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_sleep_is_clamped_to_remaining_budget() {
        let executor = Arc::new(ScriptedExecutor::default());
        executor.respond("cilium-a", IPS, Ok(ExecOutput::success("")));

        let matcher = PollingMatcher::new(
            StatusClient::new(executor.clone(), "cilium-health"),
            PollSettings::new(Duration::from_secs(4), Duration::from_secs(10)),
        );
        let start = Instant::now();
        let err = matcher
            .await_command(&observer(), IPS, &Expectation::Equals("10.0.0.2".into()))
            .await
            .unwrap_err();

        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(matches!(err, HealthError::Convergence(ref f) if f.attempts == 4));
    }

    /// Never answers, like a `kubectl exec` stuck on a dead connection.
    struct StalledExecutor;

    #[async_trait::async_trait]
    impl crate::cluster::CommandExecutor for StalledExecutor {
        async fn execute(&self, _agent: &Agent, _command: &str) -> Result<ExecOutput, HealthError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(ExecOutput::success("10.0.0.2"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_command_fails_at_the_deadline() {
        let matcher = PollingMatcher::new(
            StatusClient::new(Arc::new(StalledExecutor), "cilium-health"),
            PollSettings::new(Duration::from_secs(1), Duration::from_secs(30)),
        );

        let start = Instant::now();
        let err = matcher
            .await_command(&observer(), IPS, &Expectation::Contains("10.0.0.2".into()))
            .await
            .unwrap_err();

        assert_eq!(start.elapsed(), Duration::from_secs(30));
        let HealthError::Convergence(failure) = err else {
            panic!("expected a convergence failure, got {err:?}");
        };
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.elapsed, Duration::from_secs(30));
        assert!(failure
            .last_observed
            .as_deref()
            .is_some_and(|observed| observed.contains("no response within")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_is_not_retried() {
        let executor = Arc::new(ScriptedExecutor::default());
        executor.respond(
            "cilium-a",
            IPS,
            Err(HealthError::MalformedResponse {
                agent: "kube-system/cilium-a".into(),
                message: "unexpected token".into(),
            }),
        );

        let start = Instant::now();
        let err = matcher(&executor)
            .await_command(&observer(), IPS, &Expectation::Contains("10.0.0.2".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, HealthError::MalformedResponse { .. }));
        assert_eq!(executor.calls().len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
