use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use shared::LaunchPolicy;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::daemon::{
    process_name, DaemonConnection, DaemonError, LaunchSpec, ProcessDaemon, ProcessDescription,
    ProcessStatus, RestartPolicy,
};
use crate::error::LifecycleError;
use crate::repositories::InstanceRepository;
use crate::services::config_builder::{ConfigSynthesizer, GeneratedConfig, InstancePaths};

const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(ProcessDescription),
    /// A live process already existed; nothing was spawned.
    AlreadyRunning(ProcessDescription),
}

impl StartOutcome {
    pub fn description(&self) -> &ProcessDescription {
        match self {
            StartOutcome::Started(d) | StartOutcome::AlreadyRunning(d) => d,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub instance_id: String,
    pub process_name: String,
    pub running: bool,
    pub process: Option<ProcessDescription>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub resumed: usize,
    pub cleared: usize,
    pub failed: usize,
}

/// One async mutex per instance id. Held across the whole of start, stop and restart so two
/// requests for the same instance never interleave. Entries live only while someone holds or
/// waits on them.
#[derive(Default)]
struct InstanceLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

struct InstanceGuard<'a> {
    locks: &'a InstanceLocks,
    instance_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InstanceLocks {
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn acquire(&self, instance_id: &str) -> InstanceGuard<'_> {
        let lock = self
            .table()
            .entry(instance_id.to_string())
            .or_default()
            .clone();
        InstanceGuard {
            locks: self,
            instance_id: instance_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().len()
    }
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.locks.table();
        // Clones are only taken under the table lock, so a count of one means nobody waits.
        if table
            .get(&self.instance_id)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false)
        {
            table.remove(&self.instance_id);
        }
    }
}

/// Starts and stops trading-engine processes and keeps the `running` flag honest.
pub struct Supervisor {
    daemon: Arc<DaemonConnection>,
    instances: InstanceRepository,
    synthesizer: ConfigSynthesizer,
    policy: LaunchPolicy,
    locks: InstanceLocks,
}

impl Supervisor {
    pub fn new(
        daemon: Arc<DaemonConnection>,
        instances: InstanceRepository,
        synthesizer: ConfigSynthesizer,
        policy: LaunchPolicy,
    ) -> Self {
        Self {
            daemon,
            instances,
            synthesizer,
            policy,
            locks: InstanceLocks::default(),
        }
    }

    pub fn process_name(&self, instance_id: &str) -> String {
        process_name(&self.policy.process_prefix, instance_id)
    }

    pub async fn start(&self, instance_id: &str) -> Result<StartOutcome, LifecycleError> {
        let _guard = self.locks.acquire(instance_id).await;
        self.start_locked(instance_id).await
    }

    /// Stops the process if any and always clears the daemon entry. With `mark_inactive` the
    /// instance is also deactivated so it cannot be started again until reactivated.
    pub async fn stop(&self, instance_id: &str, mark_inactive: bool) -> Result<(), LifecycleError> {
        let _guard = self.locks.acquire(instance_id).await;
        self.stop_locked(instance_id, mark_inactive).await
    }

    pub async fn restart(&self, instance_id: &str) -> Result<StartOutcome, LifecycleError> {
        let _guard = self.locks.acquire(instance_id).await;
        self.stop_locked(instance_id, false).await?;
        self.start_locked(instance_id).await
    }

    /// Reports daemon state and repairs a `running` flag that disagrees with it.
    pub async fn status(&self, instance_id: &str) -> Result<InstanceStatus, LifecycleError> {
        let _guard = self.locks.acquire(instance_id).await;
        self.status_locked(instance_id).await
    }

    /// Run once at startup: instances flagged running whose process is gone are relaunched
    /// when still eligible, otherwise their flag is cleared.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, LifecycleError> {
        let flagged = self.instances.find_running().await?;
        let mut report = ReconcileReport {
            checked: flagged.len(),
            ..Default::default()
        };
        let now = Utc::now();

        for instance in flagged {
            let status = match self.status(&instance.id).await {
                Ok(status) => status,
                Err(e) => {
                    error!("Failed to reconcile instance {}: {}", instance.id, e);
                    report.failed += 1;
                    continue;
                }
            };
            if status.running {
                continue;
            }

            if instance.active && !instance.is_expired_at(now) {
                match self.start(&instance.id).await {
                    Ok(_) => {
                        info!("♻️ Resumed instance {}", instance.id);
                        report.resumed += 1;
                    }
                    Err(e) => {
                        error!("Failed to resume instance {}: {}", instance.id, e);
                        report.failed += 1;
                    }
                }
            } else {
                report.cleared += 1;
            }
        }

        info!(
            "Reconciled {} running instances ({} resumed, {} cleared, {} failed)",
            report.checked, report.resumed, report.cleared, report.failed
        );
        Ok(report)
    }

    async fn start_locked(&self, instance_id: &str) -> Result<StartOutcome, LifecycleError> {
        let daemon = self.daemon.ensure_connected().await?;

        let instance = self
            .instances
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| LifecycleError::InstanceNotFound(instance_id.to_string()))?;

        if !instance.active {
            return Err(LifecycleError::Inactive(instance_id.to_string()));
        }
        let now = Utc::now();
        if instance.is_expired_at(now) {
            return Err(LifecycleError::Expired {
                instance_id: instance_id.to_string(),
                expired_at: instance.expiry_date,
            });
        }

        let name = self.process_name(instance_id);
        if let Some(existing) = daemon.describe(&name).await? {
            if existing.status.is_live() {
                if !instance.running {
                    self.instances.set_running(instance_id, true).await?;
                }
                info!("Instance {} already running as {} ({})", instance_id, name, existing.status);
                return Ok(StartOutcome::AlreadyRunning(existing));
            }
            debug!("Removing stale {} entry for {}", existing.status, name);
            if let Err(e) = daemon.delete(&name).await {
                warn!("Failed to remove stale entry {}: {}", name, e);
            }
        }

        let generated = match self.synthesizer.generate_instance_config(&instance).await {
            Ok(generated) => generated,
            Err(e) => {
                error!("❌ Config generation failed for {}: {}", instance_id, e);
                self.clear_running(instance_id).await;
                return Err(e);
            }
        };

        let launched = match daemon.start(self.launch_spec(&name, &generated)).await {
            Ok(launched) => launched,
            Err(e) => {
                error!("❌ Failed to launch {}: {}", name, e);
                self.clear_running(instance_id).await;
                return Err(e.into());
            }
        };

        let online = match self.await_online(daemon, &name, launched).await {
            Ok(online) => online,
            Err(e) => {
                error!("❌ {} did not come online: {}", name, e);
                if let Err(del) = daemon.delete(&name).await {
                    warn!("Failed to remove failed launch {}: {}", name, del);
                }
                self.clear_running(instance_id).await;
                return Err(e);
            }
        };

        if self.instances.mark_started(instance_id, Utc::now()).await? == 0 {
            warn!("Instance {} disappeared while starting", instance_id);
        }
        info!("✅ Started instance {} as {} (pid {:?})", instance_id, name, online.pid);
        Ok(StartOutcome::Started(online))
    }

    async fn stop_locked(
        &self,
        instance_id: &str,
        mark_inactive: bool,
    ) -> Result<(), LifecycleError> {
        let daemon = self.daemon.ensure_connected().await?;
        let name = self.process_name(instance_id);

        let stopped = match daemon.stop(&name).await {
            Ok(()) => Ok(()),
            Err(DaemonError::NotFound(_)) => {
                debug!("{} not known to the daemon, nothing to stop", name);
                Ok(())
            }
            Err(e) => Err(e),
        };

        match daemon.delete(&name).await {
            Ok(()) | Err(DaemonError::NotFound(_)) => {}
            Err(e) => warn!("Failed to delete {} from daemon: {}", name, e),
        }

        match stopped {
            Ok(()) => {
                if self.instances.mark_stopped(instance_id, mark_inactive).await? == 0 {
                    return Err(LifecycleError::InstanceNotFound(instance_id.to_string()));
                }
                info!(
                    "🛑 Stopped instance {}{}",
                    instance_id,
                    if mark_inactive { " and deactivated it" } else { "" }
                );
                Ok(())
            }
            Err(e) => {
                error!("❌ Failed to stop {}: {}", name, e);
                self.clear_running(instance_id).await;
                Err(e.into())
            }
        }
    }

    async fn status_locked(&self, instance_id: &str) -> Result<InstanceStatus, LifecycleError> {
        let instance = self
            .instances
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| LifecycleError::InstanceNotFound(instance_id.to_string()))?;

        let daemon = self.daemon.ensure_connected().await?;
        let name = self.process_name(instance_id);
        let process = daemon.describe(&name).await?;
        let live = process.as_ref().map(|p| p.status.is_live()).unwrap_or(false);

        if instance.running != live {
            info!(
                "Reconciling {}: running flag {} but process is {}",
                instance_id,
                instance.running,
                process
                    .as_ref()
                    .map(|p| p.status.as_str())
                    .unwrap_or("absent")
            );
            self.instances.set_running(instance_id, live).await?;
        }

        Ok(InstanceStatus {
            instance_id: instance_id.to_string(),
            process_name: name,
            running: live,
            process,
        })
    }

    async fn await_online(
        &self,
        daemon: &dyn ProcessDaemon,
        name: &str,
        launched: ProcessDescription,
    ) -> Result<ProcessDescription, LifecycleError> {
        if launched.status == ProcessStatus::Online {
            return Ok(launched);
        }

        let waited = self.policy.launch_timeout;
        let deadline = Instant::now() + waited;
        loop {
            match daemon.describe(name).await? {
                Some(d) if d.status == ProcessStatus::Online => return Ok(d),
                Some(d) if !d.status.is_live() => {
                    return Err(LifecycleError::LaunchFailed {
                        name: name.to_string(),
                        status: d.status.to_string(),
                    })
                }
                Some(_) => {}
                None => {
                    return Err(LifecycleError::LaunchFailed {
                        name: name.to_string(),
                        status: "missing".to_string(),
                    })
                }
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::LaunchTimeout {
                    name: name.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(LAUNCH_POLL_INTERVAL).await;
        }
    }

    fn launch_spec(&self, name: &str, generated: &GeneratedConfig) -> LaunchSpec {
        let paths = &generated.paths;
        LaunchSpec {
            name: name.to_string(),
            program: self.policy.executable.clone(),
            args: engine_args(paths),
            env: vec![
                ("PYTHONIOENCODING".to_string(), "UTF-8".to_string()),
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ],
            cwd: paths.instance_dir.clone(),
            out_file: paths.stdout_file.clone(),
            err_file: paths.stderr_file.clone(),
            restart: RestartPolicy {
                autorestart: true,
                max_restarts: self.policy.max_restarts,
                min_uptime: self.policy.min_uptime,
                restart_delay: self.policy.restart_delay,
            },
        }
    }

    async fn clear_running(&self, instance_id: &str) {
        if let Err(e) = self.instances.set_running(instance_id, false).await {
            warn!("Failed to clear running flag for {}: {}", instance_id, e);
        }
    }
}

/// Command line for the engine, all paths absolute.
pub fn engine_args(paths: &InstancePaths) -> Vec<String> {
    vec![
        "-u".to_string(),
        "-m".to_string(),
        "freqtrade".to_string(),
        "trade".to_string(),
        "--config".to_string(),
        paths.config_file.to_string_lossy().into_owned(),
        "--strategy-path".to_string(),
        paths.strategies_dir.to_string_lossy().into_owned(),
    ]
}
