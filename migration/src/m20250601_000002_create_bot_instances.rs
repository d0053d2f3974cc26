use sea_orm_migration::prelude::*;

use crate::m20250601_000001_create_bot_templates::BotTemplates;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BotInstances::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(BotInstances::Id).string_len(36).not_null().primary_key())
                    .col(ColumnDef::new(BotInstances::UserId).big_integer().not_null())
                    .col(ColumnDef::new(BotInstances::BotId).integer().not_null())
                    .col(ColumnDef::new(BotInstances::ApiKey).string().not_null().default(""))
                    .col(ColumnDef::new(BotInstances::ApiSecretKey).text().not_null())
                    .col(ColumnDef::new(BotInstances::Active).boolean().not_null().default(true))
                    .col(ColumnDef::new(BotInstances::Running).boolean().not_null().default(false))
                    // "demo" or "paid"
                    .col(
                        ColumnDef::new(BotInstances::AccountType)
                            .string_len(16)
                            .not_null()
                            .default("demo"),
                    )
                    .col(ColumnDef::new(BotInstances::Strategy).string().null())
                    .col(
                        ColumnDef::new(BotInstances::Exchange)
                            .string_len(32)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(BotInstances::Config).json().not_null())
                    .col(
                        ColumnDef::new(BotInstances::PurchaseDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BotInstances::ExpiryDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BotInstances::LastExecuted)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BotInstances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BotInstances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bot_instances_template")
                            .from(BotInstances::Table, BotInstances::BotId)
                            .to(BotTemplates::Table, BotTemplates::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                    )
                    .to_owned(),
            )
            .await?;

        // The expiry sweep filters on these three columns.
        manager
            .create_index(
                Index::create()
                    .name("idx_bot_instances_expiry")
                    .table(BotInstances::Table)
                    .col(BotInstances::AccountType)
                    .col(BotInstances::Active)
                    .col(BotInstances::ExpiryDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bot_instances_user")
                    .table(BotInstances::Table)
                    .col(BotInstances::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bot_instances_running")
                    .table(BotInstances::Table)
                    .col(BotInstances::Running)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BotInstances::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BotInstances {
    Table,
    Id,
    UserId,
    BotId,
    ApiKey,
    ApiSecretKey,
    Active,
    Running,
    AccountType,
    Strategy,
    Exchange,
    Config,
    PurchaseDate,
    ExpiryDate,
    LastExecuted,
    CreatedAt,
    UpdatedAt,
}
