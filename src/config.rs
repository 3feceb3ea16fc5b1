//! Configuration loading for ptmanager.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::privacy::{upstream_proxy_uri, UpstreamProxyConfig};
use crate::state::FileStateStore;
use crate::transport::{HelperContext, ProxyRegistry, Role, ServerTransportOptions};

/// Errors from loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// A helper binary and the transports it provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportPlugin {
    pub transports: Vec<String>,
    /// Command line; the first element is the executable.
    pub exec: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// `<transport> key=value ...` lines passed to server helpers.
    #[serde(default)]
    pub server_transport_options: ServerTransportOptions,

    #[serde(default, skip_serializing_if = "UpstreamProxyConfig::is_default")]
    pub upstream: UpstreamProxyConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_transport_plugins: Vec<TransportPlugin>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_transport_plugins: Vec<TransportPlugin>,

    /// Durable state file. Relative paths resolve against the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Private state directory handed to helpers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or_port: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_or_port: Option<String>,

    /// Path the config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load a config file, apply environment overrides, and validate it.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load_from_path(path).await?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file as TOML, YAML, or JSON based on its extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(ext, &contents)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(ext: &str, contents: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        self.upstream = std::mem::take(&mut self.upstream).with_env_overrides();

        if let Ok(path) = env::var("PTMANAGER_STATE_FILE") {
            if !path.is_empty() {
                self.state_file = Some(PathBuf::from(path));
            }
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream.validate().map_err(ConfigError::Invalid)?;
        self.server_transport_options
            .validate()
            .map_err(ConfigError::Invalid)?;

        for plugin in self
            .server_transport_plugins
            .iter()
            .chain(&self.client_transport_plugins)
        {
            if plugin.exec.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "no command given for transports {}",
                    plugin.transports.join(",")
                )));
            }
            if plugin.transports.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "plugin {} provides no transports",
                    plugin.exec[0]
                )));
            }
        }
        Ok(())
    }

    /// Directory containing the config file, if loaded from one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Durable state file, resolved against the config file location.
    pub fn state_file_path(&self) -> PathBuf {
        match &self.state_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => match self.base_dir() {
                Some(base) => base.join(path),
                None => path.clone(),
            },
            None => FileStateStore::default_path(),
        }
    }

    /// Node-wide settings for helper environments.
    pub fn helper_context(&self) -> HelperContext {
        let state_dir = self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ptmanager")
                .join("pt_state")
        });
        HelperContext {
            state_dir,
            or_port: self.or_port.clone(),
            ext_or_port: self.ext_or_port.clone(),
        }
    }

    /// Plugin configured to provide `transport` for `role`.
    pub fn plugin_for(&self, role: Role, transport: &str) -> Option<&TransportPlugin> {
        let plugins = match role {
            Role::Server => &self.server_transport_plugins,
            Role::Client => &self.client_transport_plugins,
        };
        plugins
            .iter()
            .find(|p| p.transports.iter().any(|t| t == transport))
    }

    /// Register every configured transport, one proxy per distinct command.
    ///
    /// Client proxies are handed the upstream proxy URI, if any.
    pub fn build_registry(&self) -> ProxyRegistry {
        let mut registry = ProxyRegistry::new();
        let upstream = upstream_proxy_uri(&self.upstream);

        for (role, plugins) in [
            (Role::Server, &self.server_transport_plugins),
            (Role::Client, &self.client_transport_plugins),
        ] {
            for plugin in plugins {
                for transport in &plugin.transports {
                    let id = registry.launch(role, &plugin.exec, transport);
                    if role == Role::Client {
                        if let Some(mp) = registry.get_mut(id) {
                            mp.set_upstream_proxy(upstream.clone());
                        }
                    }
                }
            }
        }

        registry
    }
}
