use sea_orm::prelude::*;
use shared::entity::bot_templates;
use std::sync::Arc;

#[derive(Clone)]
pub struct TemplateRepository {
    db: Arc<DatabaseConnection>,
}

impl TemplateRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<bot_templates::Model>, DbErr> {
        bot_templates::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
    }

    pub async fn create(
        &self,
        active_model: bot_templates::ActiveModel,
    ) -> Result<bot_templates::Model, DbErr> {
        bot_templates::Entity::insert(active_model)
            .exec_with_returning(self.db.as_ref())
            .await
    }
}
