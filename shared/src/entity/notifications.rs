//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

pub const KIND_SYSTEM_ALERT: &str = "system_alert";
pub const KIND_TRADE_UPDATE: &str = "trade_update";
pub const KIND_LOW_BALANCE: &str = "low_balance";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i64,
    #[sea_orm(column_name = "type")]
    pub kind: String, // "system_alert", "trade_update", "low_balance"
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub read: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
