//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

/// A purchasable bot type. Its `default_config` is the base layer of every instance config.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bot_templates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub price: Decimal,
    pub duration_months: i32,
    #[sea_orm(column_type = "Decimal(Some((5, 2)))")]
    pub profit_fee: Decimal,
    pub features: Json,
    pub default_config: Json,
    pub default_strategy: Option<String>,
    pub active: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::bot_instances::Entity")]
    BotInstances,
}

impl Related<super::bot_instances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BotInstances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
