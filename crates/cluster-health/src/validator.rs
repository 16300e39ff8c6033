//! Status document validation.
//!
//! For every node and probe field the value must be present and non-empty,
//! while its `status` sibling must be present and *empty*: an empty status is
//! how the health API reports success. Violations are collected rather than
//! returned on first failure.

use crate::document::StatusDocument;
use crate::error::SchemaViolation;
use crate::path::{PathQuery, StatusField};

/// Characters of context kept around an error marker.
const EXCERPT_RADIUS: usize = 60;

/// Validate probe results for nodes `0..node_count`.
pub fn validate(document: &StatusDocument, node_count: usize) -> Result<(), Vec<SchemaViolation>> {
    let mut violations = Vec::new();

    for node in 0..node_count {
        for field in StatusField::PROBES {
            let value_query = PathQuery::node(node, field);
            match document.resolve(&value_query) {
                Ok(value) if !value.is_empty() => {}
                _ => violations.push(SchemaViolation::MissingField {
                    path: value_query.to_string(),
                }),
            }

            let status_query = value_query.status();
            match document.resolve(&status_query) {
                Ok(status) if status.is_empty() => {}
                Ok(status) => violations.push(SchemaViolation::UnhealthyPath {
                    path: status_query.to_string(),
                    status,
                }),
                Err(_) => violations.push(SchemaViolation::MissingField {
                    path: status_query.to_string(),
                }),
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Coarse whole-output check: `raw` must not contain `marker`.
pub fn check_error_marker(raw: &str, marker: &str) -> Result<(), SchemaViolation> {
    if marker.is_empty() {
        return Ok(());
    }
    let Some(position) = raw.find(marker) else {
        return Ok(());
    };

    let start = floor_char_boundary(raw, position.saturating_sub(EXCERPT_RADIUS));
    let end = ceil_char_boundary(raw, (position + marker.len() + EXCERPT_RADIUS).min(raw.len()));

    Err(SchemaViolation::ErrorMarker {
        marker: marker.to_string(),
        excerpt: raw[start..end].trim().to_string(),
    })
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
