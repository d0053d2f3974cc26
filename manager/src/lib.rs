pub mod daemon;
pub mod error;
pub mod repositories;
pub mod services;
pub mod state;

pub use error::{ErrorKind, LifecycleError};
pub use state::AppState;
