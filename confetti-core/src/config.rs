//! App configuration and service resolution.
//!
//! The repository root carries an `app_config.json5` (or a YAML variant)
//! describing one or more
//! environments. Each environment lists the containers serving it; a service
//! name resolves to the container that names it, or to the unnamed default
//! container.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Config file names, in lookup order.
pub const CONFIG_FILES: &[&str] = &[
    "app_config.json5",
    "app_config.json",
    "app_config.yaml",
    "app_config.yml",
];

pub const ORCHESTRATOR_API: &str = "http://api.confetti-cms.com/orchestrator";
pub const ORCHESTRATOR_API_LOCALHOST: &str = "http://api.confetti-cms.localhost/orchestrator";

pub const PARSER_SERVICE: &str = "confetti-cms/parser";
pub const RESOURCE_SERVICE: &str = "confetti-cms/shared-resource";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContainerConfig {
    /// Empty for the default container.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub user_service_in_uri: bool,
}

impl ContainerConfig {
    fn uri_for(&self, service: &str) -> String {
        let mut uri = String::new();
        // Only the first path is honoured.
        if let Some(path) = self.paths.first() {
            uri.push('/');
            uri.push_str(path.trim_start_matches('/'));
        }
        if self.user_service_in_uri {
            uri.push('/');
            uri.push_str(service);
        }
        uri.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Environment {
    pub key: String,
    #[serde(default)]
    pub run_on_localhost: bool,
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
}

impl Environment {
    /// Base URL of a logical service, e.g. `confetti-cms/parser`.
    pub fn service_url(&self, service: &str) -> Result<String, ConfigError> {
        let container = self
            .containers
            .iter()
            .rev()
            .find(|c| c.name == service)
            .or_else(|| self.containers.iter().rev().find(|c| c.name.is_empty()))
            .ok_or_else(|| ConfigError::NoHost {
                service: service.to_string(),
            })?;
        let host = container.hosts.first().ok_or_else(|| ConfigError::NoHost {
            service: service.to_string(),
        })?;
        Ok(format!("http://{host}{}", container.uri_for(service)))
    }

    pub fn orchestrator_api(&self) -> &'static str {
        if self.run_on_localhost {
            ORCHESTRATOR_API_LOCALHOST
        } else {
            ORCHESTRATOR_API
        }
    }

    /// Hosts of named containers, deduplicated in declaration order.
    pub fn explicit_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for container in self.containers.iter().filter(|c| !c.name.is_empty()) {
            for host in &container.hosts {
                if !hosts.contains(host) {
                    hosts.push(host.clone());
                }
            }
        }
        hosts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub environments: Vec<Environment>,
}

impl AppConfig {
    /// Pick the environment to run against.
    ///
    /// A single environment is chosen implicitly; otherwise `key` must match.
    pub fn environment(&self, key: Option<&str>) -> Result<&Environment, ConfigError> {
        let known = || self.environments.iter().map(|e| e.key.clone()).collect();
        match (key, self.environments.as_slice()) {
            (_, []) => Err(ConfigError::NoEnvironments),
            (None, [only]) => Ok(only),
            (None, _) => Err(ConfigError::AmbiguousEnvironment { known: known() }),
            (Some(key), envs) => {
                envs.iter()
                    .find(|e| e.key == key)
                    .ok_or_else(|| ConfigError::UnknownEnvironment {
                        key: key.to_string(),
                        known: known(),
                    })
            }
        }
    }
}

/// Locate the config file under `root`.
pub fn config_path(root: &Path) -> Result<PathBuf, ConfigError> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| ConfigError::NotFound {
            root: root.to_path_buf(),
        })
}

/// Load and parse the app config under `root`.
pub fn load(root: &Path) -> Result<AppConfig, ConfigError> {
    let path = config_path(root)?;
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    parse(&path, &contents)
}

/// `.json5` and `.json` go through the JSON5 parser, everything else is YAML.
pub fn parse(path: &Path, contents: &str) -> Result<AppConfig, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json5" | "json") => {
            json5::from_str(contents).map_err(|source| ConfigError::Json5 {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
