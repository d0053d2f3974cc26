use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::CryptoError;
use thiserror::Error;

use crate::daemon::DaemonError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("bot instance {0} not found")]
    InstanceNotFound(String),

    #[error("instance {0} is inactive")]
    Inactive(String),

    #[error("subscription or demo for instance {instance_id} expired on {expired_at}")]
    Expired {
        instance_id: String,
        expired_at: DateTime<Utc>,
    },

    #[error("strategy is not defined for instance {0} and its template has no default")]
    MissingStrategy(String),

    #[error("invalid strategy file name '{0}'")]
    InvalidStrategyName(String),

    #[error("strategy source file not found: {}", .0.display())]
    StrategySourceNotFound(PathBuf),

    #[error("invalid configuration for instance {instance_id}: {reason}")]
    InvalidConfig { instance_id: String, reason: String },

    #[error("could not decrypt API secret for instance {instance_id}")]
    Secret {
        instance_id: String,
        #[source]
        source: CryptoError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process {name} failed to come online (status: {status})")]
    LaunchFailed { name: String, status: String },

    #[error("process {name} did not come online within {waited:?}")]
    LaunchTimeout { name: String, waited: Duration },

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),
}

/// Coarse classification used by callers to pick a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Precondition,
    Configuration,
    Secret,
    Io,
    Process,
    Database,
}

impl LifecycleError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InstanceNotFound(_) => ErrorKind::NotFound,
            Self::Inactive(_) | Self::Expired { .. } => ErrorKind::Precondition,
            Self::MissingStrategy(_)
            | Self::InvalidStrategyName(_)
            | Self::StrategySourceNotFound(_)
            | Self::InvalidConfig { .. } => ErrorKind::Configuration,
            Self::Secret { .. } => ErrorKind::Secret,
            Self::Io { .. } => ErrorKind::Io,
            Self::LaunchFailed { .. } | Self::LaunchTimeout { .. } | Self::Daemon(_) => {
                ErrorKind::Process
            }
            Self::Database(_) => ErrorKind::Database,
        }
    }
}
