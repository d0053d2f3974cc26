use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::{json, Value};
use shared::redis::notification_channel;
use shared::Redis;
use tokio::sync::OnceCell;
use tracing::debug;

pub const EVENT_BOT_STATUS_UPDATE: &str = "bot_status_update";
pub const EVENT_DEMO_EXPIRED: &str = "demo_expired";

/// Real-time, best-effort delivery to a user's open sessions.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, event_type: &str, payload: Value) -> Result<()>;
}

/// Publishes `{type, payload, timestamp}` on the user's Redis channel. The WebSocket gateway
/// subscribes to those channels and relays to browsers.
pub struct RedisNotifier {
    client: Redis,
    connection: OnceCell<MultiplexedConnection>,
}

impl RedisNotifier {
    pub fn new(client: Redis) -> Self {
        Self {
            client,
            connection: OnceCell::new(),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;
        Ok(conn.clone())
    }
}

pub fn notification_message(event_type: &str, payload: Value) -> Value {
    json!({
        "type": event_type,
        "payload": payload,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, user_id: i64, event_type: &str, payload: Value) -> Result<()> {
        let mut conn = self.connection().await?;
        let channel = notification_channel(user_id);
        let message = notification_message(event_type, payload);
        let receivers: i64 = conn.publish(&channel, message.to_string()).await?;
        debug!("Published {} to {} ({} receivers)", event_type, channel, receivers);
        Ok(())
    }
}
