pub use sea_orm_migration::prelude::*;

mod m20250601_000001_create_bot_templates;
mod m20250601_000002_create_bot_instances;
mod m20250601_000003_create_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_bot_templates::Migration),
            Box::new(m20250601_000002_create_bot_instances::Migration),
            Box::new(m20250601_000003_create_notifications::Migration),
        ]
    }
}
