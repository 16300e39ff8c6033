//! CLI for cluster health verification
//!
//! Run `cluster-health --help` for usage information.

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cluster_health::{
    AgentLocator, Expectation, HarnessConfig, HealthVerifier, KubeAgentLocator, KubectlExecutor,
    Node, PathQuery, PollSettings, PollingMatcher, StatusClient, StatusOutput,
};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cluster-health")]
#[command(about = "Verify Cilium health reporting across cluster nodes")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "CLUSTER_HEALTH_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace the agents run in
    #[arg(short, long, env = "CLUSTER_HEALTH_NAMESPACE")]
    namespace: Option<String>,

    /// Kubeconfig to use instead of the default resolution
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Total polling budget in seconds
    #[arg(long, env = "CLUSTER_HEALTH_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Milliseconds between polling attempts
    #[arg(long, env = "CLUSTER_HEALTH_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Output format: json, text
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Check reachability between all nodes and validate health status
    Verify {
        /// Node names to verify (repeatable)
        #[arg(long = "node", required = true)]
        nodes: Vec<String>,
    },

    /// Print the health status reported by one node's agent
    Status {
        /// Node whose agent to query
        #[arg(long)]
        node: String,

        /// Path query, e.g. '{.nodes[0].host.primary-address.icmp}'
        #[arg(long)]
        filter: Option<String>,

        /// Run a fresh probe instead of reading cached results
        #[arg(long)]
        probe: bool,
    },

    /// Wait for a value to appear at a path on one node's agent
    Await {
        /// Node whose agent to poll
        #[arg(long)]
        node: String,

        /// Path query to poll
        #[arg(long)]
        filter: String,

        /// Expected value
        #[arg(long)]
        expect: String,

        /// Accept the value as one of several whitespace-separated tokens
        #[arg(long)]
        contains: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    let config = load_config(&cli)?;
    let locator = KubeAgentLocator::from_config(&config)
        .await
        .context("Failed to create Kubernetes client")?;
    let executor = Arc::new(KubectlExecutor::from_config(&config));

    match cli.command {
        Commands::Verify { nodes } => {
            let nodes: Vec<Node> = nodes.into_iter().map(Node::new).collect();
            let verifier = HealthVerifier::new(Arc::new(locator), executor, &config);
            let report = verifier.run(&nodes).await;

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print!("{report}"),
            }

            if !report.passed() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status {
            node,
            filter,
            probe,
        } => {
            let agent = locator.locate_agent(&Node::new(node)).await?;
            let client = StatusClient::new(executor, &config.status_tool);
            let filter = filter.as_deref().map(PathQuery::parse).transpose()?;

            let output = match (&filter, probe) {
                (None, true) => StatusOutput::Document(client.document(&agent, true).await?),
                _ => client.query(&agent, filter.as_ref()).await?,
            };
            println!("{}", output.text());
        }
        Commands::Await {
            node,
            filter,
            expect,
            contains,
        } => {
            let agent = locator.locate_agent(&Node::new(node)).await?;
            let query = PathQuery::parse(&filter)?;
            let expected = if contains {
                Expectation::Contains(expect)
            } else {
                Expectation::Equals(expect)
            };

            let matcher = PollingMatcher::new(
                StatusClient::new(executor, &config.status_tool),
                PollSettings::from(config.poll),
            );
            match matcher.await_value(&agent, &query, &expected).await {
                Ok(converged) => println!(
                    "{} {} after {} attempt(s)",
                    "✅".green(),
                    converged.observed,
                    converged.attempts
                ),
                Err(e) => {
                    eprintln!("{} {e}", "❌".red());
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

/// Defaults, then the config file, then flags and environment.
fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };

    if let Some(namespace) = &cli.namespace {
        config.namespace.clone_from(namespace);
    }
    if let Some(kubeconfig) = &cli.kubeconfig {
        config.kubeconfig = Some(kubeconfig.clone());
    }
    if let Some(timeout) = cli.timeout_secs {
        config.poll.timeout_ms = timeout.saturating_mul(1_000);
    }
    if let Some(interval) = cli.interval_ms {
        config.poll.interval_ms = interval;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
