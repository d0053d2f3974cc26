pub mod bot_instances;
pub mod bot_templates;
pub mod notifications;

pub mod prelude {
    pub use super::bot_instances::Entity as BotInstances;
    pub use super::bot_templates::Entity as BotTemplates;
    pub use super::notifications::Entity as Notifications;
}
