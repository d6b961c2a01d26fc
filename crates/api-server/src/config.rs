//! Server configuration from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;

use agent_runner::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use thiserror::Error;

const DEFAULT_HTTP_PORT: u16 = 8081;
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration
#[derive(Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    /// When set, runs and events are persisted under this directory
    pub data_dir: Option<PathBuf>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("data_dir", &self.data_dir)
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "<redacted>"))
            .field("anthropic_base_url", &self.anthropic_base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let http_addr = match get("CONDUCTOR_HTTP_ADDR") {
            Some(value) => value.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "CONDUCTOR_HTTP_ADDR",
                value,
                reason: e.to_string(),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], DEFAULT_HTTP_PORT)),
        };

        let max_tokens = match get("CONDUCTOR_MAX_TOKENS") {
            Some(value) => match value.parse::<u32>() {
                Ok(n) if n > 0 => n,
                Ok(_) => {
                    return Err(ConfigError::Invalid {
                        name: "CONDUCTOR_MAX_TOKENS",
                        value,
                        reason: "must be greater than zero".to_string(),
                    })
                }
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        name: "CONDUCTOR_MAX_TOKENS",
                        value,
                        reason: e.to_string(),
                    })
                }
            },
            None => DEFAULT_MAX_TOKENS,
        };

        Ok(Self {
            http_addr,
            data_dir: get("CONDUCTOR_DATA_DIR").map(PathBuf::from),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_base_url: get("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            model: get("CONDUCTOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens,
        })
    }
}
