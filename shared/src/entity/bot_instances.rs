//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

pub const ACCOUNT_DEMO: &str = "demo";
pub const ACCOUNT_PAID: &str = "paid";

/// A user's runnable bot. `api_secret_key` only ever holds the encrypted envelope.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bot_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: i64,
    pub bot_id: i32,
    pub api_key: String,
    #[sea_orm(column_type = "Text")]
    pub api_secret_key: String,
    pub active: bool,
    pub running: bool,
    pub account_type: String, // "demo", "paid"
    pub strategy: Option<String>,
    pub exchange: String,
    pub config: Json,
    pub purchase_date: DateTimeUtc,
    pub expiry_date: DateTimeUtc,
    pub last_executed: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    pub fn is_demo(&self) -> bool {
        self.account_type.eq_ignore_ascii_case(ACCOUNT_DEMO)
    }

    pub fn is_expired_at(&self, now: DateTimeUtc) -> bool {
        self.expiry_date < now
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bot_templates::Entity",
        from = "Column::BotId",
        to = "super::bot_templates::Column::Id",
        on_update = "NoAction",
        on_delete = "Restrict"
    )]
    BotTemplates,
}

impl Related<super::bot_templates::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BotTemplates.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
