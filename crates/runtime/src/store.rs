//! Client graph store: the client-side mirror of the node set, with
//! selection state, persisted view preferences, and derived views (filtered
//! list, grouped list, neighborhood, progress digest).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use membank_memory::{Digest, Node, digest};

use crate::InitPayload;

/// Well-known id of the progress node when none is typed `progress`.
const PROGRESS_SENTINEL: &str = "progress";

/// UI preferences that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewPrefs {
    pub filter: String,
    /// Field the list is grouped by: `"type"`, `"status"`, or empty for a
    /// flat list.
    pub group_by: String,
    pub panel_width: u16,
    pub theme: String,
    /// Selection to restore after navigating away through a digest link.
    pub last_selected: Option<String>,
}

impl Default for ViewPrefs {
    fn default() -> Self {
        Self {
            filter: String::new(),
            group_by: "type".to_string(),
            panel_width: 320,
            theme: "dark".to_string(),
            last_selected: None,
        }
    }
}

impl ViewPrefs {
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|raw| toml::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// A node's immediate graph neighborhood.
#[derive(Debug, Clone)]
pub struct Neighborhood<'a> {
    pub node: &'a Node,
    /// `None` when the node is a root or its parent reference dangles.
    pub parent: Option<&'a Node>,
    pub children: Vec<&'a Node>,
}

#[derive(Debug, Default)]
pub struct GraphStore {
    /// Last `Init`'s order.
    nodes: Vec<Node>,
    by_id: HashMap<String, usize>,
    selected: Option<String>,
    pub prefs: ViewPrefs,
}

impl GraphStore {
    pub fn with_prefs(prefs: ViewPrefs) -> Self {
        Self {
            prefs,
            ..Self::default()
        }
    }

    /// Replaces the mirror with an authoritative snapshot. A selection no
    /// longer present falls back to the first node, or the empty state.
    pub fn apply_init(&mut self, payload: InitPayload) {
        self.nodes = payload.nodes;
        self.by_id = self
            .nodes
            .iter()
            .enumerate()
            .map(|(slot, node)| (node.id.clone(), slot))
            .collect();
        if let Some(id) = &self.selected {
            if !self.by_id.contains_key(id) {
                self.selected = self.nodes.first().map(|node| node.id.clone());
            }
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.by_id.get(id).map(|&slot| &self.nodes[slot])
    }

    /// Records the selection even when the id is absent; rendering an
    /// absent selection as the empty state is the view's concern.
    pub fn select(&mut self, id: impl Into<String>) {
        self.selected = Some(id.into());
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_node(&self) -> Option<&Node> {
        self.selected.as_ref().and_then(|id| self.get(id))
    }

    /// Stores a lazily fetched body. A `None` from a failed fetch never
    /// clobbers a body already loaded. Returns `false` for ids not in the
    /// mirror.
    pub fn set_body(&mut self, id: &str, body: Option<String>) -> bool {
        match self.by_id.get(id) {
            Some(&slot) => {
                if let Some(body) = body {
                    self.nodes[slot].body = Some(body);
                }
                true
            }
            None => false,
        }
    }

    /// Case-insensitive title substring filter from the persisted prefs.
    pub fn filtered(&self) -> Vec<&Node> {
        let needle = self.prefs.filter.to_lowercase();
        self.nodes
            .iter()
            .filter(|node| needle.is_empty() || node.title.to_lowercase().contains(&needle))
            .collect()
    }

    /// Partitions the filtered list by the preferred grouping field. Missing
    /// values group under `"unknown"`; groups iterate in sorted key order
    /// for reproducible renders.
    pub fn grouped(&self) -> BTreeMap<String, Vec<&Node>> {
        let mut groups: BTreeMap<String, Vec<&Node>> = BTreeMap::new();
        for node in self.filtered() {
            groups
                .entry(group_key(node, &self.prefs.group_by))
                .or_default()
                .push(node);
        }
        groups
    }

    pub fn neighborhood(&self, id: &str) -> Option<Neighborhood<'_>> {
        let node = self.get(id)?;
        let parent = node.parent.as_ref().and_then(|parent| self.get(parent));
        let children = node
            .children
            .iter()
            .filter_map(|child| self.get(child))
            .collect();
        Some(Neighborhood {
            node,
            parent,
            children,
        })
    }

    /// The distinguished node the digest is mined from: the first node typed
    /// `progress`, else the well-known sentinel id.
    pub fn progress_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| node.kind == "progress")
            .or_else(|| self.get(PROGRESS_SENTINEL))
    }

    /// Digest over the progress node's body. `None` when there is no
    /// progress node or its body has not been loaded yet.
    pub fn digest(&self) -> Option<Digest> {
        let node = self.progress_node()?;
        let body = node.body.as_deref()?;
        let subsystems: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|node| node.kind == "subsystem")
            .collect();
        Some(digest::extract(body, &subsystems))
    }
}

fn group_key(node: &Node, field: &str) -> String {
    let value = match field {
        "type" => Some(node.kind.clone()),
        "status" => Some(node.status.clone()),
        "parent" => node.parent.clone(),
        _ => None,
    };
    match value {
        Some(value) if !value.is_empty() => value,
        _ => "unknown".to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
