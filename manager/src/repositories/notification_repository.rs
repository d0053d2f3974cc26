use chrono::Utc;
use sea_orm::prelude::*;
use sea_orm::{QueryOrder, Set};
use shared::entity::notifications;
use std::sync::Arc;

/// Durable per-user notifications, shown in the web inbox.
#[derive(Clone)]
pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        user_id: i64,
        kind: &str,
        message: &str,
    ) -> Result<notifications::Model, DbErr> {
        let model = notifications::ActiveModel {
            user_id: Set(user_id),
            kind: Set(kind.to_string()),
            message: Set(message.to_string()),
            read: Set(false),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        notifications::Entity::insert(model)
            .exec_with_returning(self.db.as_ref())
            .await
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<notifications::Model>, DbErr> {
        notifications::Entity::find()
            .filter(notifications::Column::UserId.eq(user_id))
            .order_by_asc(notifications::Column::Id)
            .all(self.db.as_ref())
            .await
    }
}
