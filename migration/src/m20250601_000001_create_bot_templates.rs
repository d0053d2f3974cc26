use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BotTemplates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BotTemplates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BotTemplates::Name).string().not_null().unique_key())
                    .col(ColumnDef::new(BotTemplates::Description).text().not_null())
                    .col(ColumnDef::new(BotTemplates::Price).decimal_len(12, 2).not_null())
                    .col(
                        ColumnDef::new(BotTemplates::DurationMonths)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(BotTemplates::ProfitFee).decimal_len(5, 2).not_null())
                    .col(ColumnDef::new(BotTemplates::Features).json().not_null())
                    .col(ColumnDef::new(BotTemplates::DefaultConfig).json().not_null())
                    .col(ColumnDef::new(BotTemplates::DefaultStrategy).string().null())
                    .col(ColumnDef::new(BotTemplates::Active).boolean().not_null().default(true))
                    .col(
                        ColumnDef::new(BotTemplates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BotTemplates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bot_templates_active")
                    .table(BotTemplates::Table)
                    .col(BotTemplates::Active)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BotTemplates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum BotTemplates {
    Table,
    Id,
    Name,
    Description,
    Price,
    DurationMonths,
    ProfitFee,
    Features,
    DefaultConfig,
    DefaultStrategy,
    Active,
    CreatedAt,
    UpdatedAt,
}
