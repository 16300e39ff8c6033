//! Construction of status-tool command lines.

use std::fmt;

use crate::path::PathQuery;

/// Output format requested from the status tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// The full document as JSON.
    Json,
    /// Server-side filtered output.
    JsonPath(PathQuery),
}

/// A `<tool> status [--probe] -o <format>` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCommand {
    tool: String,
    probe: bool,
    output: OutputFormat,
}

impl StatusCommand {
    /// Request the full JSON document.
    pub fn json(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            probe: false,
            output: OutputFormat::Json,
        }
    }

    /// Request the value at `query` only.
    pub fn filtered(tool: impl Into<String>, query: PathQuery) -> Self {
        Self {
            tool: tool.into(),
            probe: false,
            output: OutputFormat::JsonPath(query),
        }
    }

    /// Force a synchronous probe instead of reading cached results.
    #[must_use]
    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }
}

impl fmt::Display for StatusCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} status", self.tool)?;
        if self.probe {
            f.write_str(" --probe")?;
        }
        match self.output {
            OutputFormat::Json => f.write_str(" -o json"),
            OutputFormat::JsonPath(query) => write!(f, " -o jsonpath='{query}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::StatusField;

    #[test]
    fn test_json_command() {
        assert_eq!(
            StatusCommand::json("cilium-health").to_string(),
            "cilium-health status -o json"
        );
        assert_eq!(
            StatusCommand::json("cilium-health")
                .with_probe(true)
                .to_string(),
            "cilium-health status --probe -o json"
        );
    }

    #[test]
    fn test_jsonpath_command() {
        let command =
            StatusCommand::filtered("cilium-health", PathQuery::all_nodes(StatusField::HostIp));
        assert_eq!(
            command.to_string(),
            "cilium-health status -o jsonpath='{.nodes[*].host.primary-address.ip}'"
        );
    }
}
