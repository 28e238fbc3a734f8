//! Background clone and refresh of mirrors.

mod config;
mod scheduler;

pub use config::SyncConfig;
pub use scheduler::{SyncHandle, SyncScheduler, SyncTrigger};
