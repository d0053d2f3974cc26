pub mod instance_repository;
pub mod notification_repository;
pub mod template_repository;

pub use instance_repository::InstanceRepository;
pub use notification_repository::NotificationRepository;
pub use template_repository::TemplateRepository;
