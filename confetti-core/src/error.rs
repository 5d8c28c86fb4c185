//! Error types for confetti-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or resolving app configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading the config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse app config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// JSON5 parse error on load.
    #[error("failed to parse app config at {path}: {source}")]
    Json5 {
        path: PathBuf,
        #[source]
        source: json5::Error,
    },

    /// None of the known config file names exist in the repository root.
    #[error("no app config found in {root} (expected app_config.json5)")]
    NotFound { root: PathBuf },

    /// The config file declares no environments at all.
    #[error("app config declares no environments")]
    NoEnvironments,

    /// Several environments exist and none was selected.
    #[error("choose an environment with --env (available: {})", known.join(", "))]
    AmbiguousEnvironment { known: Vec<String> },

    /// The requested environment key is not declared.
    #[error("environment '{key}' does not exist (available: {})", known.join(", "))]
    UnknownEnvironment { key: String, known: Vec<String> },

    /// No container (named or default) provides a host for the service.
    #[error("no host configured for service '{service}'")]
    NoHost { service: String },
}
