pub mod config;
pub mod crypto;
pub mod database;
pub mod entity;
pub mod redis;

pub use config::{
    Config, LaunchPolicy, LogFormat, SchedulerSettings, StorageDatabase, WorkspaceSettings,
};
pub use crypto::{CryptoError, SecretCodec};
pub use database::get_db_connection;
pub use redis::{get_redis_client, Redis};
