use anyhow::Result;
use redis::Client;
use tracing::info;

pub type Redis = Client;

/// Prefix of the per-user pub/sub channel the WebSocket gateway relays to browsers.
pub const NOTIFICATION_CHANNEL_PREFIX: &str = "notifications";

pub fn get_redis_client(redis_url: &str) -> Result<Redis> {
    info!("Opening Redis client");
    let client = Client::open(redis_url)?;
    Ok(client)
}

pub fn notification_channel(user_id: i64) -> String {
    format!("{}:{}", NOTIFICATION_CHANNEL_PREFIX, user_id)
}
