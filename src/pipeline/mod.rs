pub mod config;
pub mod scheduler;
pub use config::{ConfigHandle, RuntimeConfig};
pub use scheduler::{FetchScheduler, SchedulerStatus};
