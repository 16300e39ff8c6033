//! Status query client.
//!
//! Issues `<tool> status` requests against one agent and turns the raw
//! executor output into a [`StatusDocument`] or a filtered leaf.

use std::sync::Arc;

use tracing::debug;

use crate::cluster::{Agent, CommandExecutor, ExecOutput};
use crate::command::StatusCommand;
use crate::document::StatusDocument;
use crate::error::HealthError;
use crate::path::PathQuery;

/// Result of a status query.
#[derive(Debug, Clone)]
pub enum StatusOutput {
    /// The full document.
    Document(StatusDocument),
    /// Text of the sub-tree or scalar selected by a filter.
    Filtered(String),
}

impl StatusOutput {
    /// Text to compare against an expected value.
    pub fn text(&self) -> &str {
        match self {
            Self::Document(document) => document.raw(),
            Self::Filtered(text) => text,
        }
    }
}

/// Client for an agent's health status API.
#[derive(Clone)]
pub struct StatusClient {
    executor: Arc<dyn CommandExecutor>,
    tool: String,
}

impl StatusClient {
    pub fn new(executor: Arc<dyn CommandExecutor>, tool: impl Into<String>) -> Self {
        Self {
            executor,
            tool: tool.into(),
        }
    }

    /// The command a query with `filter` would run.
    pub fn command(&self, filter: Option<&PathQuery>, probe: bool) -> StatusCommand {
        let command = match filter {
            Some(query) => StatusCommand::filtered(&self.tool, *query),
            None => StatusCommand::json(&self.tool),
        };
        command.with_probe(probe)
    }

    /// Query an agent, optionally scoped to `filter`.
    pub async fn query(
        &self,
        agent: &Agent,
        filter: Option<&PathQuery>,
    ) -> Result<StatusOutput, HealthError> {
        let command = self.command(filter, false);
        let stdout = self.run(agent, &command.to_string()).await?;

        match filter {
            Some(_) => Ok(StatusOutput::Filtered(stdout.trim().to_string())),
            None => Ok(StatusOutput::Document(StatusDocument::parse(
                &agent.to_string(),
                stdout,
            )?)),
        }
    }

    /// Fetch the full document, optionally forcing a fresh probe.
    pub async fn document(&self, agent: &Agent, probe: bool) -> Result<StatusDocument, HealthError> {
        let command = self.command(None, probe);
        let stdout = self.run(agent, &command.to_string()).await?;
        StatusDocument::parse(&agent.to_string(), stdout)
    }

    /// Run a raw command and return its stdout. A non-zero exit is a
    /// communication failure.
    pub async fn run(&self, agent: &Agent, command: &str) -> Result<String, HealthError> {
        let output = self.executor.execute(agent, command).await?;
        debug!(
            agent = %agent,
            command = %command,
            exit_code = ?output.exit_code,
            "Status command finished"
        );
        ensure_success(agent, output)
    }

    /// Run a raw command and hand back the output regardless of exit status.
    pub async fn run_unchecked(&self, agent: &Agent, command: &str) -> Result<ExecOutput, HealthError> {
        self.executor.execute(agent, command).await
    }
}

fn ensure_success(agent: &Agent, output: ExecOutput) -> Result<String, HealthError> {
    if output.succeeded() {
        return Ok(output.stdout);
    }

    let detail = output.stderr.trim();
    let message = match output.exit_code {
        Some(code) if detail.is_empty() => format!("command exited with status {code}"),
        Some(code) => format!("command exited with status {code}: {detail}"),
        None => format!("command terminated by signal: {detail}"),
    };
    Err(HealthError::CommunicationFailure {
        agent: agent.to_string(),
        message,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted executor shared by unit tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::cluster::{Agent, CommandExecutor, ExecOutput};
    use crate::error::HealthError;

    type Response = Result<ExecOutput, HealthError>;

    /// Replays queued responses per (agent id, command). The last queued
    /// response repeats once the queue drains.
    #[derive(Default)]
    pub struct ScriptedExecutor {
        responses: Mutex<HashMap<(String, String), VecDeque<Response>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedExecutor {
        pub fn respond(&self, agent: &str, command: &str, response: Response) {
            self.responses
                .lock()
                .unwrap()
                .entry((agent.to_string(), command.to_string()))
                .or_default()
                .push_back(response);
        }

        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn duplicate(response: &Response) -> Response {
        match response {
            Ok(output) => Ok(output.clone()),
            Err(HealthError::CommunicationFailure { agent, message }) => {
                Err(HealthError::CommunicationFailure {
                    agent: agent.clone(),
                    message: message.clone(),
                })
            }
            Err(HealthError::MalformedResponse { agent, message }) => {
                Err(HealthError::MalformedResponse {
                    agent: agent.clone(),
                    message: message.clone(),
                })
            }
            Err(other) => Err(HealthError::Config(other.to_string())),
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn execute(&self, agent: &Agent, command: &str) -> Response {
            self.calls
                .lock()
                .unwrap()
                .push((agent.id.clone(), command.to_string()));

            let mut responses = self.responses.lock().unwrap();
            let Some(queue) = responses.get_mut(&(agent.id.clone(), command.to_string())) else {
                return Err(HealthError::CommunicationFailure {
                    agent: agent.to_string(),
                    message: format!("no scripted response for `{command}`"),
                });
            };
            if queue.len() > 1 {
                queue.pop_front().expect("queue is non-empty")
            } else {
                duplicate(queue.front().expect("queue is non-empty"))
            }
        }
    }

    pub fn agent(id: &str, node: &str, address: &str) -> Agent {
        Agent {
            id: id.to_string(),
            namespace: "kube-system".to_string(),
            node: node.to_string(),
            address: address.to_string(),
        }
    }
}
