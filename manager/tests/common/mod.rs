//! Shared fixtures: in-memory SQLite with migrations applied, a scripted process daemon,
//! a recording notifier and throwaway workspace directories.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use manager::daemon::{
    DaemonConnection, DaemonError, EventStream, LaunchSpec, ProcessDaemon, ProcessDescription,
    ProcessEvent, ProcessEventKind, ProcessStatus,
};
use manager::repositories::{InstanceRepository, NotificationRepository, TemplateRepository};
use manager::services::{ConfigSynthesizer, Notifier, Supervisor};
use migration::{Migrator, MigratorTrait};
use sea_orm::prelude::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde_json::{json, Value};
use shared::entity::{bot_instances, bot_templates};
use shared::{LaunchPolicy, SecretCodec, WorkspaceSettings};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const TEST_PREFIX: &str = "freqtrade";
pub const STRATEGY: &str = "TrendFollower";

#[derive(Default)]
pub struct FakeState {
    pub processes: HashMap<String, ProcessDescription>,
    pub starts: Vec<LaunchSpec>,
    pub stops: Vec<String>,
    pub deletes: Vec<String>,
    pub connects: u32,
    /// Status `start` reports back. `None` means online.
    pub start_status: Option<ProcessStatus>,
    pub fail_stop_for: HashSet<String>,
}

/// Scripted daemon: records every call and never spawns anything.
pub struct FakeDaemon {
    pub state: Mutex<FakeState>,
    events: Mutex<Option<broadcast::Sender<ProcessEvent>>>,
}

impl FakeDaemon {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(FakeState::default()),
            events: Mutex::new(Some(tx)),
        }
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts.len()
    }

    pub fn last_start(&self) -> Option<LaunchSpec> {
        self.state.lock().unwrap().starts.last().cloned()
    }

    pub fn set_start_status(&self, status: ProcessStatus) {
        self.state.lock().unwrap().start_status = Some(status);
    }

    pub fn fail_stop_for(&self, name: &str) {
        self.state.lock().unwrap().fail_stop_for.insert(name.to_string());
    }

    pub fn set_status(&self, name: &str, status: ProcessStatus) {
        if let Some(p) = self.state.lock().unwrap().processes.get_mut(name) {
            p.status = status;
        }
    }

    pub fn process(&self, name: &str) -> Option<ProcessDescription> {
        self.state.lock().unwrap().processes.get(name).cloned()
    }

    pub fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn close_bus(&self) {
        self.events.lock().unwrap().take();
    }
}

#[async_trait]
impl ProcessDaemon for FakeDaemon {
    async fn connect(&self) -> Result<(), DaemonError> {
        self.state.lock().unwrap().connects += 1;
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn describe(&self, name: &str) -> Result<Option<ProcessDescription>, DaemonError> {
        Ok(self.process(name))
    }

    async fn start(&self, spec: LaunchSpec) -> Result<ProcessDescription, DaemonError> {
        // Widen the window for racing starts.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let description = {
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = state.processes.get(&spec.name) {
                if existing.status.is_live() {
                    return Err(DaemonError::AlreadyExists(spec.name.clone()));
                }
            }
            let description = ProcessDescription {
                name: spec.name.clone(),
                pid: Some(4242),
                status: state.start_status.unwrap_or(ProcessStatus::Online),
                restarts: 0,
                started_at: Some(Utc::now()),
            };
            state.processes.insert(spec.name.clone(), description.clone());
            state.starts.push(spec);
            description
        };

        if description.status == ProcessStatus::Online {
            self.emit(event(ProcessEventKind::Online, &description.name, ProcessStatus::Online, 0));
        }
        Ok(description)
    }

    async fn stop(&self, name: &str) -> Result<(), DaemonError> {
        let mut state = self.state.lock().unwrap();
        state.stops.push(name.to_string());
        if state.fail_stop_for.contains(name) {
            return Err(DaemonError::Signal {
                name: name.to_string(),
                reason: "operation not permitted".to_string(),
            });
        }
        match state.processes.get_mut(name) {
            Some(p) => {
                p.status = ProcessStatus::Stopped;
                p.pid = None;
                Ok(())
            }
            None => Err(DaemonError::NotFound(name.to_string())),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), DaemonError> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(name.to_string());
        match state.processes.remove(name) {
            Some(_) => Ok(()),
            None => Err(DaemonError::NotFound(name.to_string())),
        }
    }

    async fn events(&self) -> Result<EventStream, DaemonError> {
        let rx = self
            .events
            .lock()
            .unwrap()
            .as_ref()
            .ok_or(DaemonError::BusClosed)?
            .subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(_) => None,
            }
        });
        Ok(stream.boxed())
    }
}

pub fn event(
    kind: ProcessEventKind,
    name: &str,
    status: ProcessStatus,
    restarts: u32,
) -> ProcessEvent {
    ProcessEvent {
        kind,
        name: name.to_string(),
        status,
        restarts,
        exit_code: None,
        at: Utc::now(),
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(i64, String, Value)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(i64, String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: i64, event_type: &str, payload: Value) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id, event_type.to_string(), payload));
        Ok(())
    }
}

pub struct TestEnv {
    pub db: Arc<DatabaseConnection>,
    pub data_dir: TempDir,
    pub strategy_dir: TempDir,
    pub codec: SecretCodec,
    pub daemon: Arc<FakeDaemon>,
    pub connection: Arc<DaemonConnection>,
    pub notifier: Arc<RecordingNotifier>,
    pub instances: InstanceRepository,
    pub templates: TemplateRepository,
    pub notifications: NotificationRepository,
    pub synthesizer: ConfigSynthesizer,
    pub supervisor: Arc<Supervisor>,
}

pub async fn connect_test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.expect("sqlite connect");
    Migrator::up(&db, None).await.expect("migrations");
    db
}

pub async fn setup() -> TestEnv {
    let db = Arc::new(connect_test_db().await);
    let data_dir = tempfile::tempdir().unwrap();
    let strategy_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        strategy_dir.path().join(format!("{}.py", STRATEGY)),
        "class TrendFollower(IStrategy):\n    pass\n",
    )
    .unwrap();

    let codec = SecretCodec::from_hex_key(TEST_KEY).unwrap();
    let daemon = Arc::new(FakeDaemon::new());
    let connection = Arc::new(DaemonConnection::new(daemon.clone()));
    let notifier = Arc::new(RecordingNotifier::default());

    let instances = InstanceRepository::new(db.clone());
    let templates = TemplateRepository::new(db.clone());
    let notifications = NotificationRepository::new(db.clone());

    let workspace = WorkspaceSettings {
        user_data_dir: data_dir.path().to_path_buf(),
        strategy_source_dir: strategy_dir.path().to_path_buf(),
        storage_database: None,
    };
    let synthesizer = ConfigSynthesizer::new(workspace, codec.clone(), templates.clone());
    let policy = LaunchPolicy {
        process_prefix: TEST_PREFIX.to_string(),
        launch_timeout: Duration::from_millis(300),
        ..Default::default()
    };
    let supervisor = Arc::new(Supervisor::new(
        connection.clone(),
        instances.clone(),
        synthesizer.clone(),
        policy,
    ));

    TestEnv {
        db,
        data_dir,
        strategy_dir,
        codec,
        daemon,
        connection,
        notifier,
        instances,
        templates,
        notifications,
        synthesizer,
        supervisor,
    }
}

pub struct InstanceSeed {
    pub account_type: &'static str,
    pub active: bool,
    pub running: bool,
    pub strategy: Option<String>,
    pub expiry_date: DateTime<Utc>,
    pub config: Value,
    pub api_secret: String,
}

impl Default for InstanceSeed {
    fn default() -> Self {
        Self {
            account_type: bot_instances::ACCOUNT_DEMO,
            active: true,
            running: false,
            strategy: None,
            expiry_date: Utc::now() + chrono::Duration::days(7),
            config: json!({}),
            api_secret: "s3cret".to_string(),
        }
    }
}

impl TestEnv {
    pub async fn seed_template(&self, default_config: Value) -> bot_templates::Model {
        self.seed_template_with(default_config, Some(STRATEGY)).await
    }

    pub async fn seed_template_with(
        &self,
        default_config: Value,
        default_strategy: Option<&str>,
    ) -> bot_templates::Model {
        let now = Utc::now();
        self.templates
            .create(bot_templates::ActiveModel {
                name: Set(format!("Grid Master {}", uuid::Uuid::new_v4())),
                description: Set("Grid trading".to_string()),
                price: Set(Decimal::new(4900, 2)),
                duration_months: Set(1),
                profit_fee: Set(Decimal::new(1000, 2)),
                features: Set(json!(["grid"])),
                default_config: Set(default_config),
                default_strategy: Set(default_strategy.map(str::to_string)),
                active: Set(true),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn seed_instance(
        &self,
        template_id: i32,
        seed: InstanceSeed,
    ) -> bot_instances::Model {
        let now = Utc::now();
        self.instances
            .create(bot_instances::ActiveModel {
                id: Set(uuid::Uuid::new_v4().to_string()),
                user_id: Set(7),
                bot_id: Set(template_id),
                api_key: Set("api-key".to_string()),
                api_secret_key: Set(self.codec.encrypt(&seed.api_secret).unwrap()),
                active: Set(seed.active),
                running: Set(seed.running),
                account_type: Set(seed.account_type.to_string()),
                strategy: Set(seed.strategy),
                exchange: Set("Binance".to_string()),
                config: Set(seed.config),
                purchase_date: Set(now - chrono::Duration::days(1)),
                expiry_date: Set(seed.expiry_date),
                last_executed: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            })
            .await
            .unwrap()
    }

    pub async fn set_expiry(&self, id: &str, at: DateTime<Utc>) {
        bot_instances::Entity::update_many()
            .col_expr(bot_instances::Column::ExpiryDate, Expr::value(at))
            .filter(bot_instances::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .unwrap();
    }

    pub async fn reload(&self, id: &str) -> bot_instances::Model {
        self.instances.find_by_id(id).await.unwrap().unwrap()
    }

    /// Same workspace and key, but templates come from another store.
    pub fn synthesizer_with(&self, templates: TemplateRepository) -> ConfigSynthesizer {
        let workspace = WorkspaceSettings {
            user_data_dir: self.data_dir.path().to_path_buf(),
            strategy_source_dir: self.strategy_dir.path().to_path_buf(),
            storage_database: None,
        };
        ConfigSynthesizer::new(workspace, self.codec.clone(), templates)
    }

    pub fn process_name(&self, id: &str) -> String {
        format!("{}-{}", TEST_PREFIX, id)
    }
}
