use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::{
    DaemonError, EventStream, LaunchSpec, ProcessDaemon, ProcessDescription, ProcessEvent,
    ProcessEventKind, ProcessStatus,
};

const EVENT_BUFFER: usize = 256;
const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Supervises child processes from inside this process.
///
/// Every started process gets a watcher task that waits on the child, applies the restart
/// policy and publishes lifecycle events on a broadcast bus. Children are spawned with
/// `kill_on_drop`, so nothing outlives the manager.
#[derive(Clone)]
pub struct LocalDaemon {
    inner: Arc<Inner>,
    kill_timeout: Duration,
}

#[derive(Default)]
struct Inner {
    processes: Mutex<HashMap<String, ManagedProcess>>,
    events: Mutex<Option<broadcast::Sender<ProcessEvent>>>,
}

struct ManagedProcess {
    description: ProcessDescription,
    control: Option<Control>,
}

struct Control {
    stop_tx: oneshot::Sender<()>,
    done_rx: oneshot::Receiver<()>,
}

impl LocalDaemon {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
        }
    }

    /// How long a process gets to exit after SIGTERM before it is killed.
    pub fn with_kill_timeout(mut self, kill_timeout: Duration) -> Self {
        self.kill_timeout = kill_timeout;
        self
    }

    async fn require_connected(&self) -> Result<(), DaemonError> {
        if self.inner.events.lock().await.is_some() {
            Ok(())
        } else {
            Err(DaemonError::NotConnected)
        }
    }
}

impl Default for LocalDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    async fn update<F>(&self, name: &str, apply: F) -> Option<ProcessDescription>
    where
        F: FnOnce(&mut ProcessDescription),
    {
        let mut processes = self.processes.lock().await;
        let entry = processes.get_mut(name)?;
        apply(&mut entry.description);
        Some(entry.description.clone())
    }

    async fn emit(
        &self,
        kind: ProcessEventKind,
        description: &ProcessDescription,
        exit_code: Option<i32>,
    ) {
        let event = ProcessEvent {
            kind,
            name: description.name.clone(),
            status: description.status,
            restarts: description.restarts,
            exit_code,
            at: Utc::now(),
        };
        if let Some(tx) = self.events.lock().await.as_ref() {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl ProcessDaemon for LocalDaemon {
    async fn connect(&self) -> Result<(), DaemonError> {
        let mut events = self.inner.events.lock().await;
        if events.is_none() {
            let (tx, _) = broadcast::channel(EVENT_BUFFER);
            *events = Some(tx);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let names: Vec<String> = self.inner.processes.lock().await.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop(&name).await {
                warn!("Failed to stop {} during disconnect: {}", name, e);
            }
        }
        self.inner.processes.lock().await.clear();
        // Dropping the sender ends every open event stream.
        self.inner.events.lock().await.take();
    }

    async fn describe(&self, name: &str) -> Result<Option<ProcessDescription>, DaemonError> {
        self.require_connected().await?;
        let processes = self.inner.processes.lock().await;
        Ok(processes.get(name).map(|p| p.description.clone()))
    }

    async fn start(&self, spec: LaunchSpec) -> Result<ProcessDescription, DaemonError> {
        self.require_connected().await?;
        let name = spec.name.clone();

        {
            let mut processes = self.inner.processes.lock().await;
            if let Some(existing) = processes.get(&name) {
                let status = existing.description.status;
                if status.is_live() || status == ProcessStatus::Stopping {
                    return Err(DaemonError::AlreadyExists(name));
                }
            }
            processes.insert(
                name.clone(),
                ManagedProcess {
                    description: ProcessDescription {
                        name: name.clone(),
                        pid: None,
                        status: ProcessStatus::Launching,
                        restarts: 0,
                        started_at: None,
                    },
                    control: None,
                },
            );
        }

        let child = match spawn_child(&spec).await {
            Ok(child) => child,
            Err(source) => {
                self.inner.processes.lock().await.remove(&name);
                return Err(DaemonError::Spawn { name, source });
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let description = {
            let mut processes = self.inner.processes.lock().await;
            let entry = match processes.get_mut(&name) {
                Some(entry) if entry.description.status == ProcessStatus::Launching => entry,
                // Stopped or deleted while spawning. Dropping the child kills it.
                Some(entry) => {
                    entry.description.status = ProcessStatus::Stopped;
                    return Err(DaemonError::NotFound(name));
                }
                None => return Err(DaemonError::NotFound(name)),
            };
            entry.description.pid = child.id();
            entry.description.status = ProcessStatus::Online;
            entry.description.started_at = Some(Utc::now());
            entry.control = Some(Control { stop_tx, done_rx });
            entry.description.clone()
        };

        info!(
            "▶️ Started {} (pid {:?}): {} {}",
            name,
            description.pid,
            spec.program.display(),
            spec.args.join(" ")
        );
        self.inner
            .emit(ProcessEventKind::Online, &description, None)
            .await;

        tokio::spawn(watch_process(
            self.inner.clone(),
            spec,
            child,
            stop_rx,
            done_tx,
            self.kill_timeout,
        ));

        Ok(description)
    }

    async fn stop(&self, name: &str) -> Result<(), DaemonError> {
        self.require_connected().await?;

        let control = {
            let mut processes = self.inner.processes.lock().await;
            let entry = processes
                .get_mut(name)
                .ok_or_else(|| DaemonError::NotFound(name.to_string()))?;
            if !entry.description.status.is_live() {
                return Ok(());
            }
            entry.description.status = ProcessStatus::Stopping;
            entry.control.take()
        };

        if let Some(Control { stop_tx, done_rx }) = control {
            let _ = stop_tx.send(());
            // The watcher signals once the child is gone.
            let _ = done_rx.await;
        }
        debug!("Stopped {}", name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), DaemonError> {
        self.stop(name).await?;
        self.inner.processes.lock().await.remove(name);
        debug!("Deleted {}", name);
        Ok(())
    }

    async fn events(&self) -> Result<EventStream, DaemonError> {
        let rx = {
            let events = self.inner.events.lock().await;
            events.as_ref().ok_or(DaemonError::NotConnected)?.subscribe()
        };

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Process event subscriber lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

async fn watch_process(
    inner: Arc<Inner>,
    spec: LaunchSpec,
    mut child: Child,
    mut stop_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<()>,
    kill_timeout: Duration,
) {
    let name = spec.name.clone();
    let policy = spec.restart;
    let mut started = Instant::now();
    let mut unstable_restarts = 0u32;

    loop {
        // A dropped stop sender counts as a stop request too.
        let exited = tokio::select! {
            _ = &mut stop_rx => None,
            status = child.wait() => Some(status),
        };

        let Some(status) = exited else {
            terminate(&name, &mut child, kill_timeout).await;
            if let Some(d) = inner
                .update(&name, |d| {
                    d.status = ProcessStatus::Stopped;
                    d.pid = None;
                })
                .await
            {
                inner.emit(ProcessEventKind::Stop, &d, None).await;
            }
            break;
        };

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to wait on {}: {}", name, e);
                None
            }
        };
        let uptime = started.elapsed();
        if uptime >= policy.min_uptime {
            unstable_restarts = 0;
        }

        if !policy.autorestart {
            let final_status = if exit_code == Some(0) {
                ProcessStatus::Stopped
            } else {
                ProcessStatus::Errored
            };
            if let Some(d) = inner
                .update(&name, |d| {
                    d.status = final_status;
                    d.pid = None;
                })
                .await
            {
                inner.emit(ProcessEventKind::Exit, &d, exit_code).await;
            }
            break;
        }

        if unstable_restarts >= policy.max_restarts {
            error!(
                "💥 {} exited with {:?} after {:?}; restart limit ({}) reached",
                name, exit_code, uptime, policy.max_restarts
            );
            if let Some(d) = inner
                .update(&name, |d| {
                    d.status = ProcessStatus::Errored;
                    d.pid = None;
                })
                .await
            {
                inner.emit(ProcessEventKind::Exit, &d, exit_code).await;
                inner.emit(ProcessEventKind::RestartOverlimit, &d, exit_code).await;
            }
            break;
        }

        warn!(
            "{} exited with {:?} after {:?}, restarting in {:?}",
            name, exit_code, uptime, policy.restart_delay
        );
        if let Some(d) = inner
            .update(&name, |d| {
                d.status = ProcessStatus::WaitingRestart;
                d.pid = None;
            })
            .await
        {
            inner.emit(ProcessEventKind::Exit, &d, exit_code).await;
        }

        let stop_requested = tokio::select! {
            _ = &mut stop_rx => true,
            _ = tokio::time::sleep(policy.restart_delay) => false,
        };
        if stop_requested {
            if let Some(d) = inner
                .update(&name, |d| d.status = ProcessStatus::Stopped)
                .await
            {
                inner.emit(ProcessEventKind::Stop, &d, None).await;
            }
            break;
        }

        match spawn_child(&spec).await {
            Ok(next) => {
                child = next;
                started = Instant::now();
                unstable_restarts += 1;
                let pid = child.id();
                if let Some(d) = inner
                    .update(&name, |d| {
                        d.status = ProcessStatus::Online;
                        d.pid = pid;
                        d.restarts += 1;
                        d.started_at = Some(Utc::now());
                    })
                    .await
                {
                    info!("🔄 Restarted {} (pid {:?}, restart #{})", name, pid, d.restarts);
                    inner.emit(ProcessEventKind::Online, &d, None).await;
                }
            }
            Err(e) => {
                error!("Failed to respawn {}: {}", name, e);
                if let Some(d) = inner
                    .update(&name, |d| d.status = ProcessStatus::Errored)
                    .await
                {
                    inner.emit(ProcessEventKind::Error, &d, None).await;
                }
                break;
            }
        }
    }

    let _ = done_tx.send(());
}

/// SIGTERM first so the engine can close its database cleanly, SIGKILL after `kill_timeout`.
async fn terminate(name: &str, child: &mut Child, kill_timeout: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                if tokio::time::timeout(kill_timeout, child.wait()).await.is_ok() {
                    return;
                }
                warn!("{} ignored SIGTERM for {:?}, killing", name, kill_timeout);
            }
            Err(e) => debug!("SIGTERM to {} failed: {}", name, e),
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Kill of {} failed: {}", name, e);
    }
}

async fn spawn_child(spec: &LaunchSpec) -> std::io::Result<Child> {
    let stdout = open_log(&spec.out_file).await?;
    let stderr = open_log(&spec.err_file).await?;

    Command::new(&spec.program)
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()
}

async fn open_log(path: &Path) -> std::io::Result<Stdio> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(Stdio::from(file.into_std().await))
}
