//! Lifecycle requests from other services, delivered as JSON on a Redis list.
//!
//! ```json
//! {"action": "start", "instance_id": "…", "request_id": "42",
//!  "reply_to": "lifecycle:replies:42"}
//! ```
//!
//! When `reply_to` is set a [`CommandReply`] is pushed onto that list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use shared::Redis;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::daemon::ProcessStatus;
use crate::error::ErrorKind;
use crate::services::supervisor::{StartOutcome, Supervisor};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const REPLY_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Start,
    Stop,
    Restart,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandRequest {
    pub action: CommandAction,
    pub instance_id: String,
    #[serde(default)]
    pub mark_inactive: bool,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub instance_id: String,
    pub action: CommandAction,
    pub ok: bool,
    pub running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub message: String,
}

impl CommandRequest {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    fn reply(&self, ok: bool, message: String) -> CommandReply {
        CommandReply {
            request_id: self.request_id.clone(),
            instance_id: self.instance_id.clone(),
            action: self.action,
            ok,
            running: None,
            status: None,
            error_kind: None,
            message,
        }
    }
}

pub async fn execute(supervisor: &Supervisor, request: &CommandRequest) -> CommandReply {
    let id = request.instance_id.as_str();
    let result = match request.action {
        CommandAction::Start => supervisor
            .start(id)
            .await
            .map(|outcome| started_reply(request, outcome)),
        CommandAction::Restart => supervisor
            .restart(id)
            .await
            .map(|outcome| started_reply(request, outcome)),
        CommandAction::Stop => supervisor.stop(id, request.mark_inactive).await.map(|()| {
            let mut reply = request.reply(true, "stopped".to_string());
            reply.running = Some(false);
            reply
        }),
        CommandAction::Status => supervisor.status(id).await.map(|status| {
            let message = if status.running { "running" } else { "not running" };
            let mut reply = request.reply(true, message.to_string());
            reply.running = Some(status.running);
            reply.status = status.process.map(|p| p.status);
            reply
        }),
    };

    result.unwrap_or_else(|e| {
        let mut reply = request.reply(false, e.to_string());
        reply.error_kind = Some(e.kind());
        reply
    })
}

fn started_reply(request: &CommandRequest, outcome: StartOutcome) -> CommandReply {
    let message = match &outcome {
        StartOutcome::Started(_) => "started",
        StartOutcome::AlreadyRunning(_) => "already running",
    };
    let mut reply = request.reply(true, message.to_string());
    reply.running = Some(true);
    reply.status = Some(outcome.description().status);
    reply
}

/// Polls the command list and runs each request on its own task. Requests for the same
/// instance are still serialized by the supervisor.
pub struct CommandQueue {
    client: Redis,
    key: String,
    supervisor: Arc<Supervisor>,
}

impl CommandQueue {
    pub fn new(client: Redis, key: String, supervisor: Arc<Supervisor>) -> Self {
        Self {
            client,
            key,
            supervisor,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        info!("📨 Listening for lifecycle commands on {}", self.key);

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            loop {
                let raw: Option<String> = match conn.lpop(&self.key, None).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Failed to poll {}: {}", self.key, e);
                        break;
                    }
                };
                let Some(raw) = raw else { break };
                self.dispatch(conn.clone(), raw);
            }
        }

        info!("Command queue stopped");
        Ok(())
    }

    fn dispatch(&self, conn: MultiplexedConnection, raw: String) {
        let request = match CommandRequest::parse(&raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("Discarding malformed lifecycle command: {} ({})", raw, e);
                return;
            }
        };

        let supervisor = self.supervisor.clone();
        tokio::spawn(async move {
            debug!("Executing {:?} for {}", request.action, request.instance_id);
            let reply = execute(&supervisor, &request).await;
            if !reply.ok {
                warn!(
                    "{:?} for {} failed: {}",
                    request.action, request.instance_id, reply.message
                );
            }
            if let Some(reply_to) = &request.reply_to {
                if let Err(e) = send_reply(conn, reply_to, &reply).await {
                    error!("Failed to send reply to {}: {}", reply_to, e);
                }
            }
        });
    }
}

async fn send_reply(
    mut conn: MultiplexedConnection,
    reply_to: &str,
    reply: &CommandReply,
) -> Result<()> {
    let body = serde_json::to_string(reply)?;
    let _: i64 = conn.rpush(reply_to, body).await?;
    let _: bool = conn.expire(reply_to, REPLY_TTL_SECS).await?;
    Ok(())
}
