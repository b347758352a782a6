//! Shared bootstrap library
//!
//! Provides the pieces every binary in the workspace wires up at startup:
//! - logging (console + optional rolling file, runtime level reload)
//! - layered configuration loading
//! - shutdown signal handling

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use config_loader::load_config;
pub use logging::LogConfig;
