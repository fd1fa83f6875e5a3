//! Engine daemon: owns the current graph snapshot, rebuilds it on debounced
//! filesystem changes and after every accepted mutation, and serves clients
//! over a unix socket with one JSON message per line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use membank_config::AppConfig;
use membank_memory::{self as memory, Graph, UpdateError, watch_bank};

use crate::{ClientRequest, InitPayload, LogLevel, ServerEvent, ViewFlags};

/// Broadcast channel capacity. Old snapshots are dropped when subscribers
/// lag; only the latest `Init` matters.
const BROADCAST_CAP: usize = 256;

struct DaemonState {
    config: AppConfig,
    root: PathBuf,
    /// Immutable snapshot; replaced wholesale on every rebuild. Handlers
    /// holding the previous `Arc` keep a consistent view.
    graph: Arc<Graph>,
    /// Fans `Init` snapshots out to all subscribers.
    event_tx: broadcast::Sender<ServerEvent>,
}

impl DaemonState {
    fn init_payload(&self) -> InitPayload {
        let mut nodes = self.graph.nodes.clone();
        if !self.config.view.include_bodies {
            for node in &mut nodes {
                node.body = None;
            }
        }
        InitPayload {
            nodes,
            root: self.root.clone(),
            bank_dir: self.graph.dir.clone(),
            exists: self.graph.exists,
            watch_pattern: format!("{}/**/*.md", self.config.bank.dir_name),
            flags: ViewFlags {
                graph_view: self.config.view.graph_view,
                markdown_preview: self.config.view.markdown_preview,
            },
        }
    }

    /// Full reconstruction, then exactly one `Init` superseding all prior
    /// node state.
    fn rebuild(&mut self) {
        let graph = memory::build(&self.root, &self.config.bank.dir_name);
        info!(nodes = graph.len(), exists = graph.exists, "bank graph rebuilt");
        self.graph = Arc::new(graph);
        let _ = self.event_tx.send(ServerEvent::Init(self.init_payload()));
    }
}

pub async fn run_daemon(config: AppConfig, root: impl AsRef<Path>) -> Result<()> {
    let root = root.as_ref().to_path_buf();
    let socket_path = PathBuf::from(&config.daemon.socket_path);
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }

    let graph = memory::build(&root, &config.bank.dir_name);
    info!(
        nodes = graph.len(),
        exists = graph.exists,
        dir = %graph.dir.display(),
        "initial bank graph built"
    );

    let bank_dir = graph.dir.clone();
    let bank_exists = graph.exists;
    let debounce = Duration::from_millis(config.watch.debounce_ms);
    let (event_tx, _) = broadcast::channel::<ServerEvent>(BROADCAST_CAP);

    let state = Arc::new(Mutex::new(DaemonState {
        config,
        root: root.clone(),
        graph: Arc::new(graph),
        event_tx,
    }));

    // Watcher: one debounced rebuild request per event burst. When the bank
    // directory is missing, watch the root instead so creating it later
    // still triggers a rebuild.
    let (rebuild_tx, mut rebuild_rx) = mpsc::channel::<()>(16);
    let watch_target = if bank_exists { bank_dir } else { root };
    let _watcher = match watch_bank(&watch_target, debounce, rebuild_tx) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(?err, dir = %watch_target.display(), "bank watcher unavailable; edits still rebuild");
            None
        }
    };
    {
        let state = state.clone();
        tokio::spawn(async move {
            while rebuild_rx.recv().await.is_some() {
                state.lock().await.rebuild();
            }
        });
    }

    let listener = UnixListener::bind(&socket_path)?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    info!(path = %socket_path.display(), "membank daemon listening");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                let (stream, _) = accept?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, state, shutdown_tx).await {
                        error!(?err, "daemon connection handler failed");
                    }
                });
            }
        }
    }

    info!("daemon shutting down gracefully");
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    state: Arc<Mutex<DaemonState>>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }

    let request: ClientRequest = serde_json::from_str(line.trim())?;

    match request {
        // ── Persistent subscription: register for broadcasts and take the
        //    snapshot under one lock, so a rebuild landing in between can
        //    never be missed. A duplicated Init is harmless; the latest
        //    one wins.
        ClientRequest::Subscribe => {
            let (mut rx, snapshot) = {
                let state = state.lock().await;
                (
                    state.event_tx.subscribe(),
                    ServerEvent::Init(state.init_payload()),
                )
            };
            send_event(&mut write_half, snapshot).await?;
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if send_event(&mut write_half, event).await.is_err() {
                            break; // client disconnected
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(n, "subscriber lagged; {n} snapshots dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        ClientRequest::FetchBody { id } => {
            let body = {
                let state = state.lock().await;
                match state.graph.get(&id) {
                    Some(node) => match std::fs::read_to_string(&node.file_path) {
                        Ok(raw) => Some(memory::decode(&raw).1),
                        Err(err) => {
                            warn!(id, ?err, "body fetch failed");
                            None
                        }
                    },
                    None => {
                        warn!(id, "body fetch for unknown node");
                        None
                    }
                }
            };
            send_event(&mut write_half, ServerEvent::Body { id, body }).await?;
        }
        ClientRequest::UpdateNode { id, changes } => {
            let outcome = {
                let mut state = state.lock().await;
                let graph = state.graph.clone();
                let result = memory::apply_update(&graph, &id, &changes);
                if result.is_ok() {
                    // Rebuild before acknowledging so the Saved ack never
                    // races a stale snapshot.
                    state.rebuild();
                }
                result
            };
            let event = match outcome {
                Ok(path) => {
                    debug!(id, path = %path.display(), "node updated");
                    ServerEvent::Saved { id }
                }
                Err(UpdateError::NodeNotFound(stale)) => {
                    // Stale identifier: a local no-op, not a user-facing
                    // error.
                    warn!(id = %stale, "update for unknown node ignored");
                    ServerEvent::Ack("stale update ignored".to_string())
                }
                Err(err @ (UpdateError::InvalidStatus(_) | UpdateError::InvalidReadiness(_))) => {
                    ServerEvent::UpdateRejected {
                        id,
                        reason: err.to_string(),
                    }
                }
                Err(UpdateError::Io(err)) => {
                    error!(id, ?err, "update write failed");
                    ServerEvent::Error(format!("write failed: {err}"))
                }
            };
            send_event(&mut write_half, event).await?;
        }
        ClientRequest::OpenFile { id } => {
            let (path, editor) = {
                let state = state.lock().await;
                (
                    state.graph.get(&id).map(|node| node.file_path.clone()),
                    state.config.editor_command(),
                )
            };
            match (path, editor) {
                (Some(path), Some(editor)) => {
                    if let Err(err) = tokio::process::Command::new(&editor).arg(&path).spawn() {
                        warn!(%editor, path = %path.display(), ?err, "editor spawn failed");
                    }
                }
                (None, _) => warn!(id, "open request for unknown node"),
                (_, None) => warn!("no editor configured; set [daemon].editor or $EDITOR"),
            }
        }
        ClientRequest::Log {
            level,
            message,
            stack,
        } => {
            forward_client_log(level, &message, stack.as_deref());
        }
        ClientRequest::Ping => {
            send_event(&mut write_half, ServerEvent::Ack("pong".to_string())).await?;
        }
        ClientRequest::Shutdown => {
            let _ = shutdown_tx.send(true);
            send_event(
                &mut write_half,
                ServerEvent::Ack("shutdown requested".to_string()),
            )
            .await?;
        }
    }

    Ok(())
}

/// Relays a client diagnostic into the daemon's durable log stream.
fn forward_client_log(level: LogLevel, message: &str, stack: Option<&str>) {
    let stack = stack.unwrap_or_default();
    match level {
        LogLevel::Error => error!(target: "client", stack, "{message}"),
        LogLevel::Warn => warn!(target: "client", stack, "{message}"),
        LogLevel::Info => info!(target: "client", stack, "{message}"),
        LogLevel::Debug => debug!(target: "client", stack, "{message}"),
    }
}

async fn send_event(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    event: ServerEvent,
) -> Result<()> {
    let encoded = serde_json::to_string(&event)?;
    writer.write_all(encoded.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
