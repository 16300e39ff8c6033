//! # Cluster health verification
//!
//! Verifies that every Cilium agent in a cluster observes every node, and
//! that each agent's health report is complete and free of errors.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cluster_health::{HarnessConfig, HealthVerifier, KubeAgentLocator, KubectlExecutor, Node};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = HarnessConfig::default();
//! let locator = KubeAgentLocator::from_config(&config).await?;
//! let executor = KubectlExecutor::from_config(&config);
//!
//! let verifier = HealthVerifier::new(Arc::new(locator), Arc::new(executor), &config);
//! let report = verifier.run(&[Node::new("k8s1"), Node::new("k8s2")]).await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cluster;
pub mod command;
pub mod config;
pub mod document;
pub mod error;
pub mod harness;
pub mod matrix;
pub mod path;
pub mod poll;
pub mod report;
pub mod validator;

pub use client::{StatusClient, StatusOutput};
pub use cluster::{
    Agent, AgentLocator, CommandExecutor, ExecOutput, KubeAgentLocator, KubectlExecutor, Node,
};
pub use command::StatusCommand;
pub use config::{HarnessConfig, PollConfig};
pub use document::StatusDocument;
pub use error::{ConvergenceFailure, HealthError, SchemaViolation};
pub use harness::HealthVerifier;
pub use matrix::{MatrixReport, MatrixVerifier, PairFailure};
pub use path::{NodeSelector, PathQuery, StatusField};
pub use poll::{Converged, Expectation, PollSettings, PollingMatcher};
pub use report::{Phase, VerificationReport};
