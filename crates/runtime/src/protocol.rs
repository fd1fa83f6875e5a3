//! Sync protocol: the message vocabulary between the engine daemon and its
//! clients. One JSON message per line; each message is self-contained, and
//! the only ordering the protocol relies on is "the latest `Init` wins".

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use membank_memory::{Node, NodeChanges};

/// Feature flags the client needs to decide what to render.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewFlags {
    pub graph_view: bool,
    pub markdown_preview: bool,
}

/// The full graph snapshot sent after every successful rebuild. Each `Init`
/// is authoritative: clients discard any node not present in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    /// Walk order. Bodies are `None` when the deployment omits them from
    /// snapshots; fetch them with [`ClientRequest::FetchBody`].
    pub nodes: Vec<Node>,
    pub root: PathBuf,
    pub bank_dir: PathBuf,
    /// `false` when the managed directory is missing; the client renders an
    /// explanatory empty state, not an error banner.
    pub exists: bool,
    pub watch_pattern: String,
    pub flags: ViewFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Open a persistent connection that receives every `Init` broadcast.
    Subscribe,
    /// Lazy body retrieval for one node; idempotent.
    FetchBody { id: String },
    UpdateNode { id: String, changes: NodeChanges },
    /// Fire-and-forget: open the node's backing file in the configured
    /// editor. No acknowledgment.
    OpenFile { id: String },
    /// Forwarded client-side diagnostics. Appended to the daemon log; never
    /// answered, never errors back.
    Log {
        level: LogLevel,
        message: String,
        stack: Option<String>,
    },
    Ping,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    Init(InitPayload),
    /// `body: None` means the fetch could not be served (unknown id or
    /// unreadable file), distinct from an empty body.
    Body { id: String, body: Option<String> },
    Saved { id: String },
    /// Structured validation rejection, so clients can display the reason
    /// inline instead of relying on out-of-band notifications.
    UpdateRejected { id: String, reason: String },
    Error(String),
    Ack(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip_through_json() {
        let requests = [
            ClientRequest::Subscribe,
            ClientRequest::FetchBody { id: "alpha".into() },
            ClientRequest::OpenFile { id: "alpha".into() },
            ClientRequest::Log {
                level: LogLevel::Warn,
                message: "render failed".into(),
                stack: Some("at renderTree".into()),
            },
            ClientRequest::Ping,
        ];
        for request in requests {
            let line = serde_json::to_string(&request).unwrap();
            let back: ClientRequest = serde_json::from_str(&line).unwrap();
            assert_eq!(
                serde_json::to_string(&back).unwrap(),
                line,
                "request {line}"
            );
        }
    }

    #[test]
    fn node_kind_serializes_as_type() {
        let node = Node {
            id: "a".into(),
            title: "A".into(),
            kind: "subsystem".into(),
            status: "planned".into(),
            readiness: Some(0.5),
            parent: None,
            tags: vec!["x".into()],
            file_path: "/bank/a.md".into(),
            body: None,
            children: Vec::new(),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "subsystem");
        assert!(json["body"].is_null());
    }

    #[test]
    fn log_level_wire_format_is_lowercase() {
        assert_eq!(serde_json::to_string(&LogLevel::Error).unwrap(), "\"error\"");
        let level: LogLevel = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
    }
}
