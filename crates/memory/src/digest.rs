//! Progress digest extractor: a best-effort text-mining pass over one
//! distinguished node's body.
//!
//! Pulls bullet items out of the Backlog / In Progress / Done / Log sections,
//! strips an optional priority marker, and tags each item against the
//! subsystem nodes it mentions. A derived view only: heuristics here never
//! leak into the graph model, and malformed markdown never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::graph::Node;

/// Items surfaced per section.
const SECTION_LIMIT: usize = 12;

/// Keywords that link free text to a subsystem whose id or title carries the
/// same word. Curated, not derived.
const SYNONYMS: &[&str] = &[
    "graph", "sync", "watch", "codec", "record", "digest", "client", "store", "protocol",
];

static PRIORITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Bare `P1`, bracket `[P1]`, or parenthesis `(P1)` form; first match wins.
    Regex::new(r"(?i)\[(p[123])\]|\((p[123])\)|\b(p[123])\b").expect("priority pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
}

impl Priority {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "p1" => Some(Priority::P1),
            "p2" => Some(Priority::P2),
            "p3" => Some(Priority::P3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestItem {
    pub text: String,
    pub priority: Option<Priority>,
    /// Ids of subsystem nodes the item text mentions.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub backlog: Vec<DigestItem>,
    pub in_progress: Vec<DigestItem>,
    pub done: Vec<DigestItem>,
    pub log: Vec<DigestItem>,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
            && self.in_progress.is_empty()
            && self.done.is_empty()
            && self.log.is_empty()
    }
}

/// Extracts the digest from one node's body. `subsystems` are the nodes
/// tagging is matched against (conventionally those with `type: subsystem`).
pub fn extract(body: &str, subsystems: &[&Node]) -> Digest {
    Digest {
        backlog: section_items(body, "backlog", subsystems),
        in_progress: section_items(body, "in progress", subsystems),
        done: section_items(body, "done", subsystems),
        log: section_items(body, "log", subsystems),
    }
}

fn section_items(body: &str, heading: &str, subsystems: &[&Node]) -> Vec<DigestItem> {
    let Some(section) = section_text(body, heading) else {
        return Vec::new();
    };
    let mut items: Vec<DigestItem> = section
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix('-'))
        .map(str::trim)
        // A bare `---` rule is not a bullet.
        .filter(|rest| !rest.starts_with('-'))
        .map(|rest| parse_item(rest, subsystems))
        .filter(|item| !item.text.is_empty())
        .collect();

    // Priority rank first, ties broken by descending tag count. The sort is
    // stable, so equal items keep their section order.
    items.sort_by_key(|item| (priority_rank(item.priority), usize::MAX - item.tags.len()));
    items.truncate(SECTION_LIMIT);
    items
}

fn priority_rank(priority: Option<Priority>) -> u8 {
    match priority {
        Some(Priority::P1) => 0,
        Some(Priority::P2) => 1,
        Some(Priority::P3) => 2,
        None => 3,
    }
}

/// The first level-2 heading matching `name` (case-insensitive) opens the
/// section; it runs until the next level-2 heading or end of text.
fn section_text(body: &str, name: &str) -> Option<String> {
    let mut collected: Option<String> = None;
    for line in body.lines() {
        match level2_heading(line) {
            Some(heading) => {
                if collected.is_some() {
                    break;
                }
                if heading.eq_ignore_ascii_case(name) {
                    collected = Some(String::new());
                }
            }
            None => {
                if let Some(section) = collected.as_mut() {
                    section.push_str(line);
                    section.push('\n');
                }
            }
        }
    }
    collected
}

fn level2_heading(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("##")?;
    if rest.starts_with('#') {
        return None;
    }
    Some(rest.trim())
}

fn parse_item(text: &str, subsystems: &[&Node]) -> DigestItem {
    let (priority, cleaned) = strip_priority(text);
    let tags = tag_subsystems(&cleaned, subsystems);
    DigestItem {
        text: cleaned,
        priority,
        tags,
    }
}

fn strip_priority(text: &str) -> (Option<Priority>, String) {
    let Some(captures) = PRIORITY_RE.captures(text) else {
        return (None, normalize(text));
    };
    let token = captures
        .iter()
        .skip(1)
        .flatten()
        .next()
        .map(|group| group.as_str())
        .unwrap_or_default();
    let whole = captures.get(0).expect("match group 0");
    let mut cleaned = String::with_capacity(text.len());
    cleaned.push_str(&text[..whole.start()]);
    cleaned.push_str(&text[whole.end()..]);
    (Priority::parse(token), normalize(&cleaned))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tag_subsystems(text: &str, subsystems: &[&Node]) -> Vec<String> {
    let haystack = text.to_lowercase();
    let mut tags = Vec::new();
    for node in subsystems {
        let id = node.id.to_lowercase();
        let title = node.title.to_lowercase();
        let direct = (!id.is_empty() && haystack.contains(&id))
            || (!title.is_empty() && haystack.contains(&title));
        let via_synonym = SYNONYMS.iter().any(|keyword| {
            haystack.contains(keyword) && (id.contains(keyword) || title.contains(keyword))
        });
        if (direct || via_synonym) && !tags.contains(&node.id) {
            tags.push(node.id.clone());
        }
    }
    tags
}

// ── Tests ────────────────────────────────────────────────────────────────────
