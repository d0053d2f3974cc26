use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde_json::json;
use shared::entity::notifications::KIND_SYSTEM_ALERT;
use tracing::{debug, error, info, warn};

use crate::daemon::{
    instance_id_from_process_name, DaemonConnection, DaemonError, ProcessEvent, ProcessEventKind,
    ProcessStatus,
};
use crate::error::LifecycleError;
use crate::repositories::{InstanceRepository, NotificationRepository, TemplateRepository};
use crate::services::notifier::{Notifier, EVENT_BOT_STATUS_UPDATE};

/// Persisted state the monitor decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub user_id: i64,
    pub running: bool,
    pub active: bool,
    pub bot_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorAction {
    Ignore,
    /// Set `running = false`, then notify once.
    MarkCrashed { message: String },
    /// Set `running = true` after the daemon brought a crashed instance back.
    MarkRecovered { message: String },
}

/// Terminal deaths only. A requested stop ends in `stopped` and does not count.
pub fn is_crash_event(event: &ProcessEvent) -> bool {
    match event.kind {
        ProcessEventKind::Exit | ProcessEventKind::Error | ProcessEventKind::RestartOverlimit => {
            !event.status.is_live()
        }
        ProcessEventKind::Stop => event.status == ProcessStatus::Errored,
        ProcessEventKind::Online => false,
    }
}

/// What an event means for an instance. Pure, so replaying the same event against the
/// state it produced yields [`MonitorAction::Ignore`].
pub fn assess(event: &ProcessEvent, instance: &InstanceSnapshot) -> MonitorAction {
    if is_crash_event(event) && instance.running {
        return MonitorAction::MarkCrashed {
            message: format!(
                "Bot \"{}\" stopped unexpectedly or encountered an error and could not be \
                 restarted automatically. Please check its logs.",
                instance.bot_name
            ),
        };
    }

    if event.kind == ProcessEventKind::Online
        && event.restarts > 0
        && instance.active
        && !instance.running
    {
        return MonitorAction::MarkRecovered {
            message: format!("Bot \"{}\" recovered and is running again.", instance.bot_name),
        };
    }

    MonitorAction::Ignore
}

/// Watches the daemon's event stream and turns unexpected process deaths into a cleared
/// `running` flag plus user notifications.
pub struct CrashMonitor {
    daemon: Arc<DaemonConnection>,
    instances: InstanceRepository,
    templates: TemplateRepository,
    notifications: NotificationRepository,
    notifier: Arc<dyn Notifier>,
    process_prefix: String,
    initialized: AtomicBool,
}

impl CrashMonitor {
    pub fn new(
        daemon: Arc<DaemonConnection>,
        instances: InstanceRepository,
        templates: TemplateRepository,
        notifications: NotificationRepository,
        notifier: Arc<dyn Notifier>,
        process_prefix: String,
    ) -> Self {
        Self {
            daemon,
            instances,
            templates,
            notifications,
            notifier,
            process_prefix,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Consumes events until the bus closes or fails. A second concurrent call returns
    /// immediately. Once this returns the monitor is uninitialized and may be run again.
    pub async fn run(&self) -> Result<(), DaemonError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Crash monitor already running");
            return Ok(());
        }

        let result = self.consume().await;
        self.initialized.store(false, Ordering::SeqCst);
        match &result {
            Ok(()) => warn!("Process event bus closed, crash monitor stopped"),
            Err(e) => error!("Crash monitor stopped: {}", e),
        }
        result
    }

    async fn consume(&self) -> Result<(), DaemonError> {
        let mut events = self.daemon.ensure_connected().await?.events().await?;
        info!("👀 Crash monitor subscribed to process events");

        while let Some(next) = events.next().await {
            let event = next?;
            match AssertUnwindSafe(self.handle_event(&event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    "Failed to handle {} event for {}: {}",
                    event.kind.as_str(),
                    event.name,
                    e
                ),
                Err(_) => error!(
                    "Panic while handling {} event for {}",
                    event.kind.as_str(),
                    event.name
                ),
            }
        }
        Ok(())
    }

    pub async fn handle_event(&self, event: &ProcessEvent) -> Result<(), LifecycleError> {
        let Some(instance_id) = instance_id_from_process_name(&self.process_prefix, &event.name)
        else {
            return Ok(());
        };
        if !is_crash_event(event) && event.kind != ProcessEventKind::Online {
            return Ok(());
        }

        let Some(instance) = self.instances.find_by_id(instance_id).await? else {
            warn!("Event for {} but instance {} does not exist", event.name, instance_id);
            return Ok(());
        };

        let bot_name = match self.templates.find_by_id(instance.bot_id).await {
            Ok(Some(template)) => template.name,
            _ => fallback_bot_name(&instance.id),
        };
        let snapshot = InstanceSnapshot {
            instance_id: instance.id.clone(),
            user_id: instance.user_id,
            running: instance.running,
            active: instance.active,
            bot_name,
        };

        match assess(event, &snapshot) {
            MonitorAction::Ignore => {
                debug!("{} event for {} needs no action", event.kind.as_str(), event.name);
            }
            MonitorAction::MarkCrashed { message } => {
                // Conditional write: only the event that flips the flag notifies.
                if !self
                    .instances
                    .compare_and_set_running(instance_id, true, false)
                    .await?
                {
                    return Ok(());
                }
                warn!(
                    "💥 Instance {} crashed ({} event, exit code {:?})",
                    instance_id,
                    event.kind.as_str(),
                    event.exit_code
                );

                let payload = json!({
                    "instanceId": instance_id,
                    "status": "CRASHED",
                    "running": false,
                    "botName": snapshot.bot_name,
                    "event": event.kind.as_str(),
                    "message": message,
                });
                if let Err(e) = self
                    .notifier
                    .notify(snapshot.user_id, EVENT_BOT_STATUS_UPDATE, payload)
                    .await
                {
                    warn!("Failed to push crash notification for {}: {}", instance_id, e);
                }
                self.notifications
                    .create(snapshot.user_id, KIND_SYSTEM_ALERT, &message)
                    .await?;
            }
            MonitorAction::MarkRecovered { message } => {
                if !self
                    .instances
                    .compare_and_set_running(instance_id, false, true)
                    .await?
                {
                    return Ok(());
                }
                info!("Instance {} recovered after {} restarts", instance_id, event.restarts);

                let payload = json!({
                    "instanceId": instance_id,
                    "status": "RUNNING",
                    "running": true,
                    "botName": snapshot.bot_name,
                    "message": message,
                });
                if let Err(e) = self
                    .notifier
                    .notify(snapshot.user_id, EVENT_BOT_STATUS_UPDATE, payload)
                    .await
                {
                    warn!("Failed to push recovery notification for {}: {}", instance_id, e);
                }
            }
        }
        Ok(())
    }
}

fn fallback_bot_name(instance_id: &str) -> String {
    let tail: String = instance_id
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("Bot {}", tail)
}
