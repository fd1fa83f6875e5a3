use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Bank config ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Name of the managed subdirectory scanned for memory records.
    /// The workspace root itself is used when its directory name matches.
    pub dir_name: String,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            dir_name: "memory-bank".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period after the last filesystem event before a rebuild fires.
    /// Events arriving mid-window reset the window.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 200 }
    }
}

// ── View config ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub graph_view: bool,
    pub markdown_preview: bool,
    /// Ship node bodies inside every `Init` payload.  When `false` the client
    /// fetches bodies lazily one node at a time, keeping the snapshot small.
    pub include_bodies: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            graph_view: true,
            markdown_preview: true,
            include_bodies: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
    /// Command used to open a record's backing file from the view.
    /// Overridden by `$EDITOR` when this is empty.
    pub editor: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/membank.sock".to_string(),
            editor: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bank: BankConfig,
    pub watch: WatchConfig,
    pub view: ViewConfig,
    pub daemon: DaemonConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        // Env overrides take precedence over the config file.
        if let Ok(value) = env::var("MEMBANK_SOCKET") {
            if !value.is_empty() {
                config.daemon.socket_path = value;
            }
        }
        if let Ok(value) = env::var("MEMBANK_LOG") {
            if !value.is_empty() {
                config.telemetry.log_level = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Editor command for `OpenFile` requests, falling back to `$EDITOR`.
    pub fn editor_command(&self) -> Option<String> {
        if !self.daemon.editor.is_empty() {
            return Some(self.daemon.editor.clone());
        }
        env::var("EDITOR").ok().filter(|cmd| !cmd.is_empty())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
