//! Graph builder: walks the managed directory, decodes every markdown record
//! into a [`Node`], and links nodes into a forest via the `parent` field.
//!
//! Every build is a full, independent re-read. A build never fails: missing
//! directories produce an empty graph tagged `exists = false`, unreadable
//! files are logged and skipped, and a dangling `parent` silently leaves the
//! node in the root set.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::record::{self, Value};

/// One parsed memory record. The node is a read/write handle on its backing
/// file, not an owner of the file's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Free string when read from disk (default `"unknown"`); the editing
    /// path constrains it to the allow-list in [`crate::update`].
    pub status: String,
    pub readiness: Option<f64>,
    /// Weak reference: resolved at build time, never validated on read.
    pub parent: Option<String>,
    pub tags: Vec<String>,
    pub file_path: PathBuf,
    /// `None` means "not yet loaded", distinct from a loaded-but-empty body.
    pub body: Option<String>,
    /// Derived on every build, in walk order. Never persisted. This is the
    /// sole traversal structure; cycles through `parent` are not detected.
    pub children: Vec<String>,
}

/// One complete, immutable snapshot of the bank.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Directory-walk order, not sorted.
    pub nodes: Vec<Node>,
    /// Resolved managed directory.
    pub dir: PathBuf,
    /// `false` when the managed directory is missing. A normal empty state,
    /// not an error.
    pub exists: bool,
    index: HashMap<String, usize>,
}

impl Graph {
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&slot| &self.nodes[slot])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no parent, plus nodes whose parent reference dangles.
    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| {
            node.parent
                .as_ref()
                .is_none_or(|parent| !self.index.contains_key(parent))
        })
    }
}

/// The managed directory is the root itself when the root's name matches,
/// otherwise `root/dir_name`.
pub fn resolve_bank_dir(root: &Path, dir_name: &str) -> PathBuf {
    if root.file_name().and_then(|name| name.to_str()) == Some(dir_name) {
        root.to_path_buf()
    } else {
        root.join(dir_name)
    }
}

pub fn build(root: &Path, dir_name: &str) -> Graph {
    let dir = resolve_bank_dir(root, dir_name);
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "managed directory missing; empty graph");
        return Graph {
            dir,
            ..Graph::default()
        };
    }

    let mut nodes: Vec<Node> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in WalkDir::new(&dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(?err, "walk error; entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), ?err, "unreadable record skipped");
                continue;
            }
        };
        let node = node_from_record(path, &raw);
        match index.get(&node.id) {
            Some(&slot) => {
                warn!(
                    id = %node.id,
                    shadowed = %nodes[slot].file_path.display(),
                    kept = %path.display(),
                    "duplicate record id; last walked wins"
                );
                nodes[slot] = node;
            }
            None => {
                index.insert(node.id.clone(), nodes.len());
                nodes.push(node);
            }
        }
    }

    // Second pass: resolve parent references into children edges. Dangling
    // parents stay on the node but contribute no edge.
    for slot in 0..nodes.len() {
        let Some(parent) = nodes[slot].parent.clone() else {
            continue;
        };
        let child_id = nodes[slot].id.clone();
        if let Some(&parent_slot) = index.get(&parent) {
            nodes[parent_slot].children.push(child_id);
        }
    }

    Graph {
        nodes,
        dir,
        exists: true,
        index,
    }
}

fn node_from_record(path: &Path, raw: &str) -> Node {
    let (frontmatter, body) = record::decode(raw);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string();

    let id = scalar(&frontmatter, "id").unwrap_or(stem);
    let title = scalar(&frontmatter, "title").unwrap_or_else(|| id.clone());
    let kind = scalar(&frontmatter, "type").unwrap_or_else(|| "item".to_string());
    let status = scalar(&frontmatter, "status").unwrap_or_else(|| "unknown".to_string());
    let readiness = frontmatter.get("readiness").and_then(Value::as_number);
    let parent = scalar(&frontmatter, "parent");
    let tags = match frontmatter.get("tags") {
        Some(Value::List(items)) => items.clone(),
        Some(Value::Text(tag)) if !tag.is_empty() => vec![tag.clone()],
        _ => Vec::new(),
    };

    Node {
        id,
        title,
        kind,
        status,
        readiness,
        parent,
        tags,
        file_path: path.to_path_buf(),
        body: Some(body),
        children: Vec::new(),
    }
}

fn scalar(frontmatter: &record::Frontmatter, key: &str) -> Option<String> {
    match frontmatter.get(key)? {
        Value::Text(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(format!("{number}")),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
