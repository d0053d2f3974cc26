use std::sync::Arc;

use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use shared::{get_db_connection, get_redis_client, Config, Redis};
use tracing::info;

use crate::daemon::{DaemonConnection, LocalDaemon};
use crate::repositories::{InstanceRepository, NotificationRepository, TemplateRepository};
use crate::services::{
    CommandQueue, ConfigSynthesizer, CrashMonitor, ExpiryScheduler, Notifier, RedisNotifier,
    Supervisor,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<DatabaseConnection>,
    pub redis: Redis,
    pub daemon: Arc<DaemonConnection>,
    pub supervisor: Arc<Supervisor>,
    pub monitor: Arc<CrashMonitor>,
    pub expiry: Arc<ExpiryScheduler>,
    pub command_queue: Arc<CommandQueue>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let db = Arc::new(get_db_connection(&config.database_url).await?);
        info!("Connected to database successfully");
        Migrator::up(db.as_ref(), None).await?;
        info!("Database migrations applied");

        let redis = get_redis_client(&config.redis_url)?;
        let codec = config.secret_codec()?;

        let instances = InstanceRepository::new(db.clone());
        let templates = TemplateRepository::new(db.clone());
        let notifications = NotificationRepository::new(db.clone());

        let daemon = Arc::new(DaemonConnection::new(Arc::new(LocalDaemon::new())));
        let notifier: Arc<dyn Notifier> = Arc::new(RedisNotifier::new(redis.clone()));

        let synthesizer =
            ConfigSynthesizer::new(config.workspace.clone(), codec, templates.clone());
        let supervisor = Arc::new(Supervisor::new(
            daemon.clone(),
            instances.clone(),
            synthesizer,
            config.launch.clone(),
        ));
        let monitor = Arc::new(CrashMonitor::new(
            daemon.clone(),
            instances.clone(),
            templates,
            notifications,
            notifier.clone(),
            config.launch.process_prefix.clone(),
        ));
        let expiry = Arc::new(ExpiryScheduler::new(
            supervisor.clone(),
            instances,
            notifier,
            config.scheduler.clone(),
        ));
        let command_queue = Arc::new(CommandQueue::new(
            redis.clone(),
            config.command_queue_key.clone(),
            supervisor.clone(),
        ));

        Ok(AppState {
            config: Arc::new(config),
            db,
            redis,
            daemon,
            supervisor,
            monitor,
            expiry,
            command_queue,
        })
    }
}
