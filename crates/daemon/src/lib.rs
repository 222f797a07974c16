// Service modules
pub mod logging;
pub mod services;

// App state (configuration, paths)
pub mod state;

pub use services::{LogoutReport, ServiceError, Services};
pub use state::{AppConfig, AppState, QueueBackend, StateError};
