//! Cluster collaborators: agent lookup and remote command execution.
//!
//! The verification core only talks to the cluster through the
//! [`AgentLocator`] and [`CommandExecutor`] traits. The Kubernetes
//! implementations here resolve agents through the API server and run
//! commands with `kubectl exec`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client as KubeClient;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::HealthError;

/// A cluster member, identified by its node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Node {
    pub name: String,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The health-reporting agent running on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agent {
    /// Pod name.
    pub id: String,
    pub namespace: String,
    pub node: String,
    /// Address the agent was assigned.
    pub address: String,
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// Raw result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated without an exit code.
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// A successful run with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Resolves which agent runs on a node.
#[async_trait]
pub trait AgentLocator: Send + Sync {
    /// Find the single agent scheduled on `node`.
    async fn locate_agent(&self, node: &Node) -> Result<Agent, HealthError>;
}

/// Runs a shell command inside an agent.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command`. Transport failures are errors; a non-zero exit is
    /// reported in the returned [`ExecOutput`].
    async fn execute(&self, agent: &Agent, command: &str) -> Result<ExecOutput, HealthError>;
}

/// Locates agent pods through the Kubernetes API.
#[derive(Clone)]
pub struct KubeAgentLocator {
    client: KubeClient,
    namespace: String,
    selector: String,
}

impl KubeAgentLocator {
    pub fn new(
        client: KubeClient,
        namespace: impl Into<String>,
        selector: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            selector: selector.into(),
        }
    }

    /// Build a locator from harness configuration.
    pub async fn from_config(config: &HarnessConfig) -> Result<Self, HealthError> {
        let client = kube_client(config.kubeconfig.as_deref()).await?;
        Ok(Self::new(
            client,
            &config.namespace,
            &config.agent_selector,
        ))
    }
}

#[async_trait]
impl AgentLocator for KubeAgentLocator {
    async fn locate_agent(&self, node: &Node) -> Result<Agent, HealthError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let field_selector = format!("spec.nodeName={}", node.name);
        let lp = ListParams::default()
            .labels(&self.selector)
            .fields(&field_selector);

        let pod_list = pods.list(&lp).await?;
        let agent = select_agent(node, &self.namespace, pod_list.items)?;

        debug!(node = %node, pod = %agent.id, address = %agent.address, "Located agent");
        Ok(agent)
    }
}

/// Pick the agent for `node` out of the pods scheduled there.
///
/// Exactly one pod must be Running and it must have an address.
fn select_agent(node: &Node, namespace: &str, pods: Vec<Pod>) -> Result<Agent, HealthError> {
    let mut running: Vec<Pod> = pods
        .into_iter()
        .filter(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running")
        })
        .collect();

    let pod = match running.len() {
        1 => running.remove(0),
        0 => return Err(HealthError::NotFound(node.name.clone())),
        count => {
            return Err(HealthError::AmbiguousAgent {
                node: node.name.clone(),
                count,
            })
        }
    };

    let address = pod
        .status
        .and_then(|s| s.pod_ip)
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| HealthError::NotFound(node.name.clone()))?;

    Ok(Agent {
        id: pod.metadata.name.unwrap_or_default(),
        namespace: namespace.to_string(),
        node: node.name.clone(),
        address,
    })
}

/// Create a Kubernetes client from an explicit kubeconfig or the default
/// resolution chain.
async fn kube_client(kubeconfig: Option<&Path>) -> Result<KubeClient, HealthError> {
    let Some(path) = kubeconfig else {
        return Ok(KubeClient::try_default().await?);
    };

    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        HealthError::Config(format!("failed to read kubeconfig {}: {e}", path.display()))
    })?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| HealthError::Config(format!("invalid kubeconfig: {e}")))?;
    Ok(KubeClient::try_from(config)?)
}

/// Executes commands in agent pods with `kubectl exec`.
#[derive(Debug, Clone)]
pub struct KubectlExecutor {
    container: String,
    kubeconfig: Option<PathBuf>,
}

impl KubectlExecutor {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            kubeconfig: None,
        }
    }

    #[must_use]
    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.container).with_kubeconfig(config.kubeconfig.clone())
    }

    fn args<'a>(&'a self, agent: &'a Agent, command: &'a str) -> Vec<&'a str> {
        vec![
            "exec",
            "-n",
            &agent.namespace,
            &agent.id,
            "-c",
            &self.container,
            "--",
            "sh",
            "-c",
            command,
        ]
    }
}

#[async_trait]
impl CommandExecutor for KubectlExecutor {
    async fn execute(&self, agent: &Agent, command: &str) -> Result<ExecOutput, HealthError> {
        debug!(agent = %agent, command = %command, "Executing in agent");

        let mut cmd = Command::new("kubectl");
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig);
        }

        let output = cmd
            .args(self.args(agent, command))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| HealthError::CommunicationFailure {
                agent: agent.to_string(),
                message: format!("failed to execute kubectl: {e}"),
            })?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::{Agent, AgentLocator, Node};
    use crate::error::HealthError;

    /// Resolves nodes from a fixed table.
    #[derive(Default)]
    pub struct StaticLocator {
        agents: HashMap<String, Agent>,
    }

    impl StaticLocator {
        pub fn with(mut self, agent: Agent) -> Self {
            self.agents.insert(agent.node.clone(), agent);
            self
        }
    }

    #[async_trait]
    impl AgentLocator for StaticLocator {
        async fn locate_agent(&self, node: &Node) -> Result<Agent, HealthError> {
            self.agents
                .get(&node.name)
                .cloned()
                .ok_or_else(|| HealthError::NotFound(node.name.clone()))
        }
    }
}
