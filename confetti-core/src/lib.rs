//! Confetti core library: domain types, app configuration, errors.
//!
//! Public API surface:
//! - [`types`]: change set, patch and watch event types
//! - [`config`]: `app_config.json5` loading and service resolution
//! - [`paths`]: path filters and the local cache layout
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{AppConfig, ContainerConfig, Environment};
pub use error::ConfigError;
pub use types::{Change, GitStatus, Patch, SyncBatch, WatchEvent, WatchOperation};
