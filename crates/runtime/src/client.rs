//! Client connector: one request per connection, line-delimited JSON, plus a
//! persistent subscription mode for live snapshots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::warn;

use membank_memory::NodeChanges;

use crate::{ClientRequest, LogLevel, ServerEvent};

/// Result of an `UpdateNode` round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Saved,
    /// Validation failure; the file was left untouched.
    Rejected(String),
    /// The id was not in the daemon's last build; nothing happened.
    Stale,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub async fn connect_with_backoff(&self, max_attempts: usize) -> Result<()> {
        let mut delay = Duration::from_millis(100);
        for attempt in 0..max_attempts.max(1) {
            match UnixStream::connect(&self.socket_path).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if attempt + 1 == max_attempts.max(1) {
                        return Err(err.into());
                    }
                    warn!(attempt, ?err, "daemon connect failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
            }
        }
        Ok(())
    }

    /// Persistent subscription: forwards the initial snapshot and every
    /// subsequent `Init` until the connection drops or the receiver closes.
    pub async fn subscribe(&self, tx: mpsc::UnboundedSender<ServerEvent>) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let request = serde_json::to_string(&ClientRequest::Subscribe)?;
        write_half.write_all(request.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event: ServerEvent = match serde_json::from_str(trimmed) {
                Ok(event) => event,
                Err(err) => {
                    warn!("subscribe: bad json: {err}");
                    continue;
                }
            };
            if tx.send(event).is_err() {
                break; // subscriber has dropped the receiver
            }
        }
        Ok(())
    }

    pub async fn fetch_body(&self, id: &str) -> Result<Option<String>> {
        let events = self
            .request_events(ClientRequest::FetchBody { id: id.to_string() })
            .await?;
        for event in events {
            if let ServerEvent::Body { body, .. } = event {
                return Ok(body);
            }
        }
        bail!("daemon body response missing")
    }

    pub async fn update_node(&self, id: &str, changes: NodeChanges) -> Result<UpdateOutcome> {
        let events = self
            .request_events(ClientRequest::UpdateNode {
                id: id.to_string(),
                changes,
            })
            .await?;
        for event in events {
            match event {
                ServerEvent::Saved { .. } => return Ok(UpdateOutcome::Saved),
                ServerEvent::UpdateRejected { reason, .. } => {
                    return Ok(UpdateOutcome::Rejected(reason));
                }
                ServerEvent::Ack(_) => return Ok(UpdateOutcome::Stale),
                ServerEvent::Error(message) => bail!(message),
                _ => {}
            }
        }
        bail!("daemon update response missing")
    }

    /// Fire-and-forget: no acknowledgment is read.
    pub async fn open_file(&self, id: &str) -> Result<()> {
        self.send_only(ClientRequest::OpenFile { id: id.to_string() })
            .await
    }

    /// Forward a client-side diagnostic to the daemon's durable log.
    pub async fn forward_log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        stack: Option<String>,
    ) -> Result<()> {
        self.send_only(ClientRequest::Log {
            level,
            message: message.into(),
            stack,
        })
        .await
    }

    pub async fn ping(&self) -> Result<()> {
        let events = self.request_events(ClientRequest::Ping).await?;
        for event in events {
            if let ServerEvent::Ack(_) = event {
                return Ok(());
            }
        }
        bail!("daemon ping response missing")
    }

    pub async fn graceful_shutdown(&self) -> Result<()> {
        let _ = self.request_events(ClientRequest::Shutdown).await?;
        Ok(())
    }

    async fn send_only(&self, request: ClientRequest) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (_read_half, mut write_half) = stream.into_split();
        let encoded = serde_json::to_string(&request)?;
        write_half.write_all(encoded.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;
        Ok(())
    }

    async fn request_events(&self, request: ClientRequest) -> Result<Vec<ServerEvent>> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let encoded = serde_json::to_string(&request)?;
        write_half.write_all(encoded.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let mut events = Vec::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let event: ServerEvent = serde_json::from_str(line.trim())?;
            let done = matches!(
                event,
                ServerEvent::Ack(_)
                    | ServerEvent::Body { .. }
                    | ServerEvent::Saved { .. }
                    | ServerEvent::UpdateRejected { .. }
                    | ServerEvent::Error(_)
            );
            events.push(event);
            if done {
                break;
            }
        }

        Ok(events)
    }
}
