//! Parsed health status documents.

use serde_json::Value;

use crate::error::HealthError;
use crate::path::{NodeSelector, PathQuery};

/// A health status document as returned by `cilium-health status -o json`.
///
/// The raw text is kept alongside the parsed tree so whole-output checks
/// (such as scanning for an error marker) see exactly what the agent printed.
#[derive(Debug, Clone)]
pub struct StatusDocument {
    raw: String,
    value: Value,
}

impl StatusDocument {
    /// Parse agent output. The document must be an object with a `nodes` array.
    pub fn parse(agent: &str, raw: impl Into<String>) -> Result<Self, HealthError> {
        let raw = raw.into();
        let malformed = |message: String| HealthError::MalformedResponse {
            agent: agent.to_string(),
            message,
        };

        let value: Value =
            serde_json::from_str(&raw).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
        match value.get("nodes") {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(malformed("`nodes` is not an array".to_string())),
            None => return Err(malformed("missing `nodes` array".to_string())),
        }

        Ok(Self { raw, value })
    }

    /// The output exactly as the agent printed it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Number of entries in the `nodes` array.
    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    fn nodes(&self) -> &[Value] {
        self.value
            .get("nodes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resolve a query to its rendered text.
    ///
    /// An empty string is a successful resolution; a missing node or key is
    /// [`HealthError::PathNotResolved`].
    pub fn resolve(&self, query: &PathQuery) -> Result<String, HealthError> {
        let unresolved = || HealthError::PathNotResolved(query.to_string());

        match query.node {
            NodeSelector::Index(index) => {
                let node = self.nodes().get(index).ok_or_else(unresolved)?;
                resolve_in_node(node, query).map(render).ok_or_else(unresolved)
            }
            NodeSelector::All => {
                // Wildcards skip nodes lacking the field, as kubectl jsonpath does.
                let parts: Vec<String> = self
                    .nodes()
                    .iter()
                    .filter_map(|node| resolve_in_node(node, query))
                    .map(render)
                    .collect();
                if parts.is_empty() && self.node_count() > 0 {
                    return Err(unresolved());
                }
                Ok(parts.join(" "))
            }
        }
    }
}

fn resolve_in_node<'a>(node: &'a Value, query: &PathQuery) -> Option<&'a Value> {
    let mut current = node;
    for segment in query.field.segments() {
        current = current.get(segment)?;
    }
    if query.status {
        current = current.get("status")?;
    }
    Some(current)
}

/// Render a JSON value the way jsonpath output prints it.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use crate::path::StatusField;

    fn doc(value: &Value) -> StatusDocument {
        StatusDocument::parse("cilium-abc", value.to_string()).unwrap()
    }

    #[test]
    fn test_parse_rejects_non_json_and_wrong_shape() {
        assert!(matches!(
            StatusDocument::parse("a", "not json"),
            Err(HealthError::MalformedResponse { .. })
        ));
        assert!(matches!(
            StatusDocument::parse("a", r#"{"nodes": {}}"#),
            Err(HealthError::MalformedResponse { .. })
        ));
        assert!(matches!(
            StatusDocument::parse("a", r#"{"local": "k8s1"}"#),
            Err(HealthError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_resolve_scalar_and_subtree() {
        let document = doc(&fixtures::healthy());
        assert_eq!(
            document
                .resolve(&PathQuery::node(1, StatusField::HostIp))
                .unwrap(),
            "10.0.0.2"
        );

        let subtree = document
            .resolve(&PathQuery::node(1, StatusField::HostIcmp))
            .unwrap();
        let parsed: Value = serde_json::from_str(&subtree).unwrap();
        assert_eq!(parsed, fixtures::probe("10.0.0.2", ""));
    }

    #[test]
    fn test_resolve_each_declared_field_at_its_position() {
        let healthy = fixtures::healthy();
        let document = doc(&healthy);
        for index in 0..document.node_count() {
            for field in StatusField::PROBES {
                let query = PathQuery::node(index, field);
                let mut expected = &healthy["nodes"][index];
                for segment in field.segments() {
                    expected = &expected[segment];
                }
                let resolved = document.resolve(&query).unwrap();
                assert_eq!(resolved, expected.to_string(), "{query}");

                let reparsed = PathQuery::parse(&query.to_string()).unwrap();
                assert_eq!(document.resolve(&reparsed).unwrap(), resolved);
            }
        }
    }

    #[test]
    fn test_empty_status_is_distinct_from_missing() {
        let mut value = fixtures::healthy();
        value["nodes"][0]["host"]["primary-address"]["http"]
            .as_object_mut()
            .unwrap()
            .remove("status");
        let document = doc(&value);

        assert_eq!(
            document
                .resolve(&PathQuery::node(0, StatusField::HostIcmp).status())
                .unwrap(),
            ""
        );
        assert!(matches!(
            document.resolve(&PathQuery::node(0, StatusField::HostHttp).status()),
            Err(HealthError::PathNotResolved(_))
        ));
    }

    #[test]
    fn test_resolve_out_of_range_node() {
        let document = doc(&fixtures::healthy());
        assert!(matches!(
            document.resolve(&PathQuery::node(2, StatusField::HostIp)),
            Err(HealthError::PathNotResolved(_))
        ));
    }

    #[test]
    fn test_wildcard_joins_all_nodes() {
        let document = doc(&fixtures::healthy());
        assert_eq!(
            document
                .resolve(&PathQuery::all_nodes(StatusField::HostIp))
                .unwrap(),
            "10.0.0.1 10.0.0.2"
        );
    }

    #[test]
    fn test_wildcard_over_empty_node_list() {
        let document = StatusDocument::parse("a", r#"{"nodes": []}"#).unwrap();
        assert_eq!(
            document
                .resolve(&PathQuery::all_nodes(StatusField::HostIp))
                .unwrap(),
            ""
        );
    }
}
