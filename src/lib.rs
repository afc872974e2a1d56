pub mod config;
pub mod core;
pub mod devices;

// Re-export commonly used items for convenience
pub use config::{CompanionConfig, ConfigError};
pub use crate::core::*;
