pub mod command_queue;
pub mod config_builder;
pub mod config_layers;
pub mod expiry_scheduler;
pub mod monitor;
pub mod notifier;
pub mod strategy_files;
pub mod supervisor;

pub use command_queue::CommandQueue;
pub use config_builder::ConfigSynthesizer;
pub use expiry_scheduler::ExpiryScheduler;
pub use monitor::CrashMonitor;
pub use notifier::{Notifier, RedisNotifier};
pub use supervisor::Supervisor;
