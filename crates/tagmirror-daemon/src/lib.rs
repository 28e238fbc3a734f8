//! tagmirror daemon: configuration loading, telemetry and the commands
//! behind the `tagmirror` binary.

pub mod daemon;
pub mod settings;
pub mod telemetry;

pub use settings::{Settings, SettingsError};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
