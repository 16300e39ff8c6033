//! Typed path queries over a health status document.
//!
//! A [`PathQuery`] selects a node (by index or all of them), one of the
//! fields the health API reports, and optionally that field's `status`
//! sibling. It renders to and parses from the jsonpath wire form used by
//! `cilium-health status -o jsonpath=...`:
//!
//! ```text
//! {.nodes[1].host.primary-address.icmp.status}
//! {.nodes[*].host.primary-address.ip}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::HealthError;

/// Which node entries a query selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeSelector {
    /// A single node by position in the `nodes` array.
    Index(usize),
    /// Every node; results are joined by a single space.
    All,
}

impl fmt::Display for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::All => write!(f, "*"),
        }
    }
}

/// Fields reported per node by the health API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusField {
    HealthEndpointIcmp,
    HealthEndpointHttp,
    HealthEndpointIp,
    HostIcmp,
    HostHttp,
    HostIp,
}

impl StatusField {
    /// Probe results that must be present and report an empty status.
    pub const PROBES: [StatusField; 4] = [
        StatusField::HealthEndpointIcmp,
        StatusField::HealthEndpointHttp,
        StatusField::HostIcmp,
        StatusField::HostHttp,
    ];

    const ALL: [StatusField; 6] = [
        StatusField::HealthEndpointIcmp,
        StatusField::HealthEndpointHttp,
        StatusField::HealthEndpointIp,
        StatusField::HostIcmp,
        StatusField::HostHttp,
        StatusField::HostIp,
    ];

    /// Dotted field path below a node entry.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HealthEndpointIcmp => "health-endpoint.primary-address.icmp",
            Self::HealthEndpointHttp => "health-endpoint.primary-address.http",
            Self::HealthEndpointIp => "health-endpoint.primary-address.ip",
            Self::HostIcmp => "host.primary-address.icmp",
            Self::HostHttp => "host.primary-address.http",
            Self::HostIp => "host.primary-address.ip",
        }
    }

    /// Path segments below a node entry.
    pub fn segments(self) -> impl Iterator<Item = &'static str> {
        self.as_str().split('.')
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusField {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| HealthError::Config(format!("unknown status field: {s}")))
    }
}

/// A structured query addressing one field of a status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PathQuery {
    pub node: NodeSelector,
    pub field: StatusField,
    /// Address the `status` sibling of the field instead of the field.
    pub status: bool,
}

impl PathQuery {
    /// Query a field of a single node.
    pub fn node(index: usize, field: StatusField) -> Self {
        Self {
            node: NodeSelector::Index(index),
            field,
            status: false,
        }
    }

    /// Query a field across every node.
    pub fn all_nodes(field: StatusField) -> Self {
        Self {
            node: NodeSelector::All,
            field,
            status: false,
        }
    }

    /// Address the `status` sibling of this query's field.
    #[must_use]
    pub fn status(mut self) -> Self {
        self.status = true;
        self
    }

    /// Parse the `{.nodes[<i>|*].<field>[.status]}` wire form.
    pub fn parse(expr: &str) -> Result<Self, HealthError> {
        let invalid = || HealthError::Config(format!("invalid path query: {expr}"));

        let inner = expr
            .trim()
            .strip_prefix("{.nodes[")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(invalid)?;
        let (selector, rest) = inner.split_once("].").ok_or_else(invalid)?;

        let node = if selector == "*" {
            NodeSelector::All
        } else {
            NodeSelector::Index(selector.parse().map_err(|_| invalid())?)
        };

        let (field, status) = match rest.strip_suffix(".status") {
            Some(field) => (field, true),
            None => (rest, false),
        };
        let field = field.parse().map_err(|_| invalid())?;

        Ok(Self {
            node,
            field,
            status,
        })
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{.nodes[{}].{}", self.node, self.field)?;
        if self.status {
            f.write_str(".status")?;
        }
        f.write_str("}")
    }
}

impl FromStr for PathQuery {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
