use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use shared::SchedulerSettings;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::error::LifecycleError;
use crate::repositories::InstanceRepository;
use crate::services::notifier::{Notifier, EVENT_DEMO_EXPIRED};
use crate::services::supervisor::Supervisor;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub stopped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Periodically stops and deactivates demo instances past their expiry date.
pub struct ExpiryScheduler {
    supervisor: Arc<Supervisor>,
    instances: InstanceRepository,
    notifier: Arc<dyn Notifier>,
    settings: SchedulerSettings,
}

impl ExpiryScheduler {
    pub fn new(
        supervisor: Arc<Supervisor>,
        instances: InstanceRepository,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            supervisor,
            instances,
            notifier,
            settings,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, LifecycleError> {
        self.sweep_at(Utc::now()).await
    }

    /// One pass. A failure on one instance is logged and the rest are still processed; only a
    /// failed query aborts the pass.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
        let expired = self.instances.find_expired_demos(now).await?;
        let mut report = SweepReport {
            expired: expired.len(),
            ..Default::default()
        };
        if expired.is_empty() {
            return Ok(report);
        }
        info!("⏰ Found {} expired demo instances", expired.len());

        for instance in expired {
            if let Err(e) = self.supervisor.stop(&instance.id, true).await {
                error!("Failed to stop expired demo {}: {}", instance.id, e);
                report.failed.push((instance.id.clone(), e.to_string()));
                continue;
            }

            let message = format!(
                "Your demo period for the bot ({}) has expired. \
                 Please subscribe to continue trading.",
                instance.exchange
            );
            if let Err(e) = self
                .notifier
                .notify(
                    instance.user_id,
                    EVENT_DEMO_EXPIRED,
                    json!({ "instanceId": instance.id, "message": message }),
                )
                .await
            {
                warn!("Failed to notify user {} about expired demo: {}", instance.user_id, e);
            }
            info!("Deactivated expired demo {}", instance.id);
            report.stopped.push(instance.id);
        }

        Ok(report)
    }

    /// Registers the recurring sweep and schedules one catch-up sweep shortly after startup.
    /// The returned scheduler must be kept and shut down on exit.
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler> {
        info!(
            "Starting expiry scheduler with cron: {}",
            self.settings.expiry_cron
        );

        let scheduler = JobScheduler::new().await?;
        let this = self.clone();
        let job = Job::new_async(self.settings.expiry_cron.as_str(), move |_uuid, _lock| {
            let this = this.clone();
            Box::pin(async move {
                this.run_logged("scheduled").await;
            })
        })?;
        scheduler.add(job).await?;
        scheduler.start().await?;

        let this = self.clone();
        let delay = self.settings.startup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.run_logged("startup").await;
        });

        Ok(scheduler)
    }

    async fn run_logged(&self, trigger: &str) {
        match self.sweep().await {
            Ok(report) if report.expired > 0 => info!(
                "Expiry sweep ({}) done: {} stopped, {} failed",
                trigger,
                report.stopped.len(),
                report.failed.len()
            ),
            Ok(_) => {}
            Err(e) => error!("Expiry sweep ({}) failed: {}", trigger, e),
        }
    }
}
