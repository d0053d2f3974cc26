use chrono::{DateTime, Utc};
use sea_orm::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::ActiveModelTrait;
use shared::entity::bot_instances::{self, Column};
use shared::{CryptoError, SecretCodec};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Bot instance persistence. Lifecycle writes are partial updates of single columns so they
/// never clobber fields edited concurrently elsewhere.
#[derive(Clone)]
pub struct InstanceRepository {
    db: Arc<DatabaseConnection>,
}

impl InstanceRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<bot_instances::Model>, DbErr> {
        bot_instances::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await
    }

    pub async fn create(
        &self,
        active_model: bot_instances::ActiveModel,
    ) -> Result<bot_instances::Model, DbErr> {
        active_model.insert(self.db.as_ref()).await
    }

    /// Demo instances still flagged active whose expiry is strictly before `now`.
    pub async fn find_expired_demos(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<bot_instances::Model>, DbErr> {
        bot_instances::Entity::find()
            .filter(Column::AccountType.eq(bot_instances::ACCOUNT_DEMO))
            .filter(Column::Active.eq(true))
            .filter(Column::ExpiryDate.lt(now))
            .all(self.db.as_ref())
            .await
    }

    pub async fn find_running(&self) -> Result<Vec<bot_instances::Model>, DbErr> {
        bot_instances::Entity::find()
            .filter(Column::Running.eq(true))
            .all(self.db.as_ref())
            .await
    }

    /// Returns the number of rows touched; zero means the instance does not exist.
    pub async fn set_running(&self, id: &str, running: bool) -> Result<u64, DbErr> {
        let result = bot_instances::Entity::update_many()
            .col_expr(Column::Running, Expr::value(running))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Flips `running` only if it currently equals `expected`. Returns whether it flipped.
    pub async fn compare_and_set_running(
        &self,
        id: &str,
        expected: bool,
        running: bool,
    ) -> Result<bool, DbErr> {
        let result = bot_instances::Entity::update_many()
            .col_expr(Column::Running, Expr::value(running))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Running.eq(expected))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn mark_started(&self, id: &str, at: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = bot_instances::Entity::update_many()
            .col_expr(Column::Running, Expr::value(true))
            .col_expr(Column::LastExecuted, Expr::value(at))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn mark_stopped(&self, id: &str, deactivate: bool) -> Result<u64, DbErr> {
        let mut update = bot_instances::Entity::update_many()
            .col_expr(Column::Running, Expr::value(false))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()));
        if deactivate {
            update = update.col_expr(Column::Active, Expr::value(false));
        }
        let result = update
            .filter(Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Stores exchange credentials, encrypting the secret. Input is trimmed; an empty secret
    /// stays empty.
    pub async fn set_credentials(
        &self,
        id: &str,
        api_key: &str,
        api_secret: &str,
        codec: &SecretCodec,
    ) -> Result<u64, CredentialsError> {
        let encrypted = codec.encrypt(api_secret.trim())?;
        let result = bot_instances::Entity::update_many()
            .col_expr(Column::ApiKey, Expr::value(api_key.trim()))
            .col_expr(Column::ApiSecretKey, Expr::value(encrypted))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
