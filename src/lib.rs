pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod state;

pub use shared::{AppConfig, AppError, init_logging};
pub use state::{AppDependencies, AppLifecycleEvent, AppState};
