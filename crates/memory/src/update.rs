//! Mutation applier: validates a partial update against one node and writes
//! it back through the record codec.
//!
//! The file's current on-disk content is re-decoded before applying changes,
//! so concurrent external edits to untouched fields are never clobbered.
//! Validation runs before any field is mutated; a rejected update leaves the
//! file byte-identical.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::Graph;
use crate::record::{self, Value};

/// Statuses accepted on the editing path. Values read from disk are
/// unconstrained.
pub const ALLOWED_STATUS: [&str; 4] = ["planned", "in-progress", "blocked", "done"];

/// Partial update: unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeChanges {
    pub title: Option<String>,
    pub status: Option<String>,
    /// Raw user input; coerced to a number, clamped into [0, 1] and rounded
    /// to two decimals.
    pub readiness: Option<String>,
    pub body: Option<String>,
}

impl NodeChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.readiness.is_none()
            && self.body.is_none()
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    /// Stale identifier: the node was not in the last build. Callers treat
    /// this as a local no-op, not a user-facing error.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("invalid status {0:?}: expected one of planned, in-progress, blocked, done")]
    InvalidStatus(String),
    #[error("readiness {0:?} is not a number")]
    InvalidReadiness(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Applies `changes` to the node behind `id` and returns the written path.
/// The caller is expected to trigger a full rebuild before acknowledging.
pub fn apply_update(graph: &Graph, id: &str, changes: &NodeChanges) -> Result<PathBuf, UpdateError> {
    let node = graph
        .get(id)
        .ok_or_else(|| UpdateError::NodeNotFound(id.to_string()))?;

    // Validate everything up front so a rejected update touches nothing.
    if let Some(status) = &changes.status {
        if !ALLOWED_STATUS.contains(&status.as_str()) {
            return Err(UpdateError::InvalidStatus(status.clone()));
        }
    }
    let readiness = match &changes.readiness {
        Some(raw) => Some(
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(|n| (n.clamp(0.0, 1.0) * 100.0).round() / 100.0)
                .ok_or_else(|| UpdateError::InvalidReadiness(raw.clone()))?,
        ),
        None => None,
    };

    let raw = fs::read_to_string(&node.file_path)?;
    let (mut frontmatter, mut body) = record::decode(&raw);

    if let Some(title) = &changes.title {
        let trimmed = title.trim();
        // Empty titles are dropped silently, leaving the field unchanged.
        if !trimmed.is_empty() {
            frontmatter.set("title", Value::text(trimmed));
        }
    }
    if let Some(status) = &changes.status {
        frontmatter.set("status", Value::text(status));
    }
    if let Some(readiness) = readiness {
        frontmatter.set("readiness", Value::Number(readiness));
    }
    if let Some(new_body) = &changes.body {
        body = new_body.clone();
    }

    fs::write(&node.file_path, record::encode(&frontmatter, &body))?;
    Ok(node.file_path.clone())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn bank_with(name: &str, contents: &str) -> (TempDir, Graph) {
        let root = TempDir::new().unwrap();
        let bank = root.path().join("memory-bank");
        fs::create_dir(&bank).unwrap();
        fs::write(bank.join(name), contents).unwrap();
        let graph = build(root.path(), "memory-bank");
        (root, graph)
    }

    fn reload(root: &Path) -> Graph {
        build(root, "memory-bank")
    }

    #[test]
    fn unknown_node_is_reported() {
        let (_root, graph) = bank_with("a.md", "---\nid: a\n---\n\n");
        let err = apply_update(&graph, "missing", &NodeChanges::default()).unwrap_err();
        assert!(matches!(err, UpdateError::NodeNotFound(id) if id == "missing"));
    }

    #[test]
    fn status_allow_list_enforced() {
        let (root, graph) = bank_with("a.md", "---\nid: a\nstatus: planned\n---\n\nbody");
        let before = fs::read_to_string(graph.get("a").unwrap().file_path.clone()).unwrap();

        let changes = NodeChanges {
            status: Some("archived".to_string()),
            ..Default::default()
        };
        let err = apply_update(&graph, "a", &changes).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidStatus(v) if v == "archived"));
        // Rejected update leaves the file untouched.
        let after = fs::read_to_string(graph.get("a").unwrap().file_path.clone()).unwrap();
        assert_eq!(before, after);

        let changes = NodeChanges {
            status: Some("done".to_string()),
            ..Default::default()
        };
        apply_update(&graph, "a", &changes).unwrap();
        let rebuilt = reload(root.path());
        assert_eq!(rebuilt.get("a").unwrap().status, "done");
    }

    #[test]
    fn readiness_is_clamped_and_rounded() {
        let (root, graph) = bank_with("a.md", "---\nid: a\n---\n\n");

        for (input, expected) in [("1.5", 1.0), ("-0.3", 0.0), ("0.333", 0.33)] {
            let changes = NodeChanges {
                readiness: Some(input.to_string()),
                ..Default::default()
            };
            apply_update(&graph, "a", &changes).unwrap();
            let rebuilt = reload(root.path());
            assert_eq!(rebuilt.get("a").unwrap().readiness, Some(expected), "input {input}");
        }
    }

    #[test]
    fn non_numeric_readiness_rejected_file_unchanged() {
        let (_root, graph) = bank_with("a.md", "---\nid: a\nreadiness: 0.5\n---\n\nbody");
        let path = graph.get("a").unwrap().file_path.clone();
        let before = fs::read_to_string(&path).unwrap();

        let changes = NodeChanges {
            readiness: Some("abc".to_string()),
            ..Default::default()
        };
        let err = apply_update(&graph, "a", &changes).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidReadiness(v) if v == "abc"));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn empty_title_is_silently_ignored() {
        let (root, graph) = bank_with("a.md", "---\nid: a\ntitle: Keep Me\n---\n\n");
        let changes = NodeChanges {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        apply_update(&graph, "a", &changes).unwrap();
        let rebuilt = reload(root.path());
        assert_eq!(rebuilt.get("a").unwrap().title, "Keep Me");
    }

    #[test]
    fn partial_update_preserves_other_fields_and_unknown_keys() {
        let (root, graph) = bank_with(
            "a.md",
            "---\nid: a\ntitle: Alpha\nstatus: planned\nowner: sam\ntags: [x, y]\n---\n\noriginal body",
        );
        let changes = NodeChanges {
            status: Some("in-progress".to_string()),
            ..Default::default()
        };
        apply_update(&graph, "a", &changes).unwrap();

        let path = graph.get("a").unwrap().file_path.clone();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("owner: sam"));
        assert!(raw.contains("title: Alpha"));
        assert!(raw.contains("tags: [x, y]"));
        assert!(raw.ends_with("original body"));

        let rebuilt = reload(root.path());
        assert_eq!(rebuilt.get("a").unwrap().status, "in-progress");
    }

    #[test]
    fn concurrent_external_edit_is_not_clobbered() {
        let (root, graph) = bank_with("a.md", "---\nid: a\ntitle: Old\n---\n\nbody");
        let path = graph.get("a").unwrap().file_path.clone();

        // An external writer updates the title after our build.
        fs::write(&path, "---\nid: a\ntitle: External\n---\n\nbody").unwrap();

        // Our update touches only the status; the external title survives
        // because the applier re-decodes current on-disk content.
        let changes = NodeChanges {
            status: Some("blocked".to_string()),
            ..Default::default()
        };
        apply_update(&graph, "a", &changes).unwrap();

        let rebuilt = reload(root.path());
        let node = rebuilt.get("a").unwrap();
        assert_eq!(node.title, "External");
        assert_eq!(node.status, "blocked");
    }

    #[test]
    fn body_replaced_verbatim_when_provided() {
        let (root, graph) = bank_with("a.md", "---\nid: a\n---\n\nold body");
        let changes = NodeChanges {
            body: Some("new body\nwith two lines".to_string()),
            ..Default::default()
        };
        apply_update(&graph, "a", &changes).unwrap();
        let rebuilt = reload(root.path());
        assert_eq!(
            rebuilt.get("a").unwrap().body.as_deref(),
            Some("new body\nwith two lines")
        );
    }
}
