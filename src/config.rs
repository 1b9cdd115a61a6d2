//! Endpoint configuration loading and validation
//!
//! A configuration file maps endpoint aliases to exactly one transport shape:
//!
//! ```toml
//! timeout_secs = 90
//!
//! [servers.default]
//! url = "http://localhost:1234/sse"
//!
//! [servers.k8s]
//! command = "k8s-mcp-server"
//! args = ["--stdio"]
//! env = { KUBECONFIG = "/etc/kube/config" }
//! ```
//!
//! TOML, YAML and JSON files are accepted, selected by file extension.

use crate::error::{OrchestratorError, Result};
use crate::session::ClientIdentity;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overall budget shared by every stage of one invocation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// File name looked up under the platform config directory
const DEFAULT_CONFIG_FILE: &str = "servers.toml";

/// How to reach one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Event-streaming network transport
    Sse { url: String },
    /// Locally spawned process speaking over stdin/stdout
    Subprocess {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
}

/// One configured endpoint, immutable after load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    name: String,
    transport: TransportConfig,
}

impl EndpointConfig {
    /// Endpoint reached over SSE at `url`
    pub fn sse<N: Into<String>, U: Into<String>>(name: N, url: U) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Sse { url: url.into() },
        }
    }

    /// Endpoint reached by spawning `command`
    pub fn subprocess<N: Into<String>, C: Into<String>>(name: N, command: C) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Subprocess {
                command: command.into(),
                args: Vec::new(),
                env: BTreeMap::new(),
            },
        }
    }

    /// Set the subprocess arguments; ignored for SSE endpoints
    pub fn with_args(mut self, new_args: Vec<String>) -> Self {
        if let TransportConfig::Subprocess { args, .. } = &mut self.transport {
            *args = new_args;
        }
        self
    }

    /// Add one environment variable for the subprocess; ignored for SSE endpoints
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        if let TransportConfig::Subprocess { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }
}

/// Validated in-memory configuration consumed by the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub timeout: Duration,
    pub client: ClientIdentity,
}

/// On-disk shape, before validation
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    servers: BTreeMap<String, RawServer>,
    timeout_secs: Option<u64>,
    client_name: Option<String>,
    client_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServer {
    url: Option<String>,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl RawServer {
    fn into_endpoint(self, alias: String) -> Result<EndpointConfig> {
        match (self.url, self.command) {
            (Some(_), Some(_)) => Err(OrchestratorError::config(format!(
                "server '{}' sets both 'url' and 'command'; choose one transport",
                alias
            ))),
            (None, None) => Err(OrchestratorError::config(format!(
                "server '{}' sets neither 'url' nor 'command'",
                alias
            ))),
            (Some(url), None) => {
                if !self.args.is_empty() || !self.env.is_empty() {
                    return Err(OrchestratorError::config(format!(
                        "server '{}' uses 'url'; 'args' and 'env' only apply to 'command'",
                        alias
                    )));
                }
                Ok(EndpointConfig::sse(alias, url))
            }
            (None, Some(command)) => {
                if command.trim().is_empty() {
                    return Err(OrchestratorError::config(format!(
                        "server '{}' has an empty command",
                        alias
                    )));
                }
                Ok(EndpointConfig {
                    name: alias,
                    transport: TransportConfig::Subprocess {
                        command,
                        args: self.args,
                        env: self.env,
                    },
                })
            }
        }
    }
}

impl OrchestratorConfig {
    /// Default location: `<config dir>/mcproute/servers.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mcproute").join(DEFAULT_CONFIG_FILE))
    }

    /// Load and validate a configuration file, choosing the parser by extension
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("cannot read '{}': {}", path.display(), e))
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("toml")
            .to_ascii_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&contents),
            "json" => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents)
            .map_err(|e| OrchestratorError::config(format!("invalid TOML: {}", e)))?;
        Self::validate(raw)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(contents)
            .map_err(|e| OrchestratorError::config(format!("invalid YAML: {}", e)))?;
        Self::validate(raw)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(contents)
            .map_err(|e| OrchestratorError::config(format!("invalid JSON: {}", e)))?;
        Self::validate(raw)
    }

    /// Override the overall timeout budget
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(OrchestratorError::config(
                "Timeout must be greater than zero",
            ));
        }
        self.timeout = timeout;
        Ok(self)
    }

    fn validate(raw: RawConfig) -> Result<Self> {
        if raw.servers.is_empty() {
            return Err(OrchestratorError::config("no servers configured"));
        }

        let timeout = match raw.timeout_secs {
            Some(0) => {
                return Err(OrchestratorError::config(
                    "Timeout must be greater than zero",
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        let endpoints = raw
            .servers
            .into_iter()
            .map(|(alias, server)| server.into_endpoint(alias))
            .collect::<Result<Vec<_>>>()?;

        let default_client = ClientIdentity::default();
        let client = ClientIdentity {
            name: raw.client_name.unwrap_or(default_client.name),
            version: raw.client_version.unwrap_or(default_client.version),
        };

        Ok(Self {
            endpoints,
            timeout,
            client,
        })
    }
}
