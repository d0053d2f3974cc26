//! Process supervision seam.
//!
//! The lifecycle layer only talks to a [`ProcessDaemon`]: something that can launch a named,
//! auto-restarting OS process, report its state, and publish a stream of lifecycle events.
//! [`LocalDaemon`] is the in-process implementation built on `tokio::process`.

mod local;
pub mod naming;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

pub use local::LocalDaemon;
pub use naming::{instance_id_from_process_name, process_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    Launching,
    Online,
    WaitingRestart,
    Stopping,
    Stopped,
    Errored,
}

impl ProcessStatus {
    /// A live entry is one the daemon is still keeping (or trying to keep) up.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ProcessStatus::Launching | ProcessStatus::Online | ProcessStatus::WaitingRestart
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Launching => "launching",
            ProcessStatus::Online => "online",
            ProcessStatus::WaitingRestart => "waiting-restart",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Errored => "errored",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessDescription {
    pub name: String,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub restarts: u32,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessEventKind {
    Online,
    Exit,
    Error,
    Stop,
    RestartOverlimit,
}

impl ProcessEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessEventKind::Online => "online",
            ProcessEventKind::Exit => "exit",
            ProcessEventKind::Error => "error",
            ProcessEventKind::Stop => "stop",
            ProcessEventKind::RestartOverlimit => "restart overlimit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub kind: ProcessEventKind,
    pub name: String,
    /// Status of the process right after the event.
    pub status: ProcessStatus,
    pub restarts: u32,
    pub exit_code: Option<i32>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub autorestart: bool,
    /// Consecutive restarts allowed for runs shorter than `min_uptime`.
    pub max_restarts: u32,
    pub min_uptime: Duration,
    pub restart_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    pub out_file: PathBuf,
    pub err_file: PathBuf,
    pub restart: RestartPolicy,
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("process daemon is not connected")]
    NotConnected,

    #[error("process {0} not found")]
    NotFound(String),

    #[error("process {0} already exists")]
    AlreadyExists(String),

    #[error("failed to spawn process {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal process {name}: {reason}")]
    Signal { name: String, reason: String },

    #[error("event bus closed")]
    BusClosed,
}

pub type EventStream = BoxStream<'static, Result<ProcessEvent, DaemonError>>;

#[async_trait]
pub trait ProcessDaemon: Send + Sync {
    async fn connect(&self) -> Result<(), DaemonError>;

    /// Stops every managed process and closes all event streams.
    async fn disconnect(&self);

    async fn describe(&self, name: &str) -> Result<Option<ProcessDescription>, DaemonError>;

    async fn start(&self, spec: LaunchSpec) -> Result<ProcessDescription, DaemonError>;

    /// Stops the process but keeps its entry. Stopping an already-stopped entry is not an error.
    async fn stop(&self, name: &str) -> Result<(), DaemonError>;

    async fn delete(&self, name: &str) -> Result<(), DaemonError>;

    async fn events(&self) -> Result<EventStream, DaemonError>;
}

/// Lazily connected, process-wide handle to the daemon.
pub struct DaemonConnection {
    daemon: Arc<dyn ProcessDaemon>,
    connected: Mutex<bool>,
}

impl DaemonConnection {
    pub fn new(daemon: Arc<dyn ProcessDaemon>) -> Self {
        Self {
            daemon,
            connected: Mutex::new(false),
        }
    }

    /// Connects on first use. Concurrent callers wait for the same attempt.
    pub async fn ensure_connected(&self) -> Result<&dyn ProcessDaemon, DaemonError> {
        let mut connected = self.connected.lock().await;
        if !*connected {
            self.daemon.connect().await?;
            *connected = true;
            info!("🔌 Connected to process daemon");
        }
        Ok(self.daemon.as_ref())
    }

    pub async fn disconnect(&self) {
        let mut connected = self.connected.lock().await;
        if *connected {
            self.daemon.disconnect().await;
            *connected = false;
            info!("Disconnected from process daemon");
        }
    }
}
