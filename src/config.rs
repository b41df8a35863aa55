use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the Factory LLM bridge. Claude-family requests go to
    /// `{base_url}/a/v1/messages`, everything else to `{base_url}/o/v1/responses`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Ordered pool of upstream API keys, cycled round-robin when the caller
    /// supplies none.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Caller-facing proxy keys. Empty set means open access.
    #[serde(default)]
    pub proxy_keys: Vec<String>,
    /// Header the caller uses to present a proxy key.
    #[serde(default = "default_proxy_key_header")]
    pub proxy_key_header: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_keys: Vec::new(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            proxy_keys: Vec::new(),
            proxy_key_header: default_proxy_key_header(),
        }
    }
}

fn default_port() -> u16 {
    8787
}

fn default_base_url() -> String {
    "https://app.factory.ai/api/llm".to_string()
}

fn default_proxy_key_header() -> String {
    "x-proxy-key".to_string()
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir. Falls back to
    /// defaults when nothing exists and no path was given explicitly.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(toml::from_str("")?)
    }

    pub fn messages_url(&self) -> String {
        format!("{}/a/v1/messages", self.upstream.base_url.trim_end_matches('/'))
    }

    pub fn responses_url(&self) -> String {
        format!("{}/o/v1/responses", self.upstream.base_url.trim_end_matches('/'))
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("factory-gateway.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("factory-gateway").join("config.toml"));
    }
    if let Ok(home) = std::env::var("HOME") {
        let home = PathBuf::from(home);
        paths.push(home.join(".config").join("factory-gateway").join("config.toml"));
        paths.push(home.join(".factory-gateway.toml"));
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 9000

[upstream]
base_url = "https://example.com/api/llm"
api_keys = ["fk-one", "fk-two"]

[access]
proxy_keys = ["pk-local"]
proxy_key_header = "x-gw-key"
"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.upstream.api_keys.len(), 2);
        assert_eq!(config.access.proxy_keys, vec!["pk-local".to_string()]);
        assert_eq!(config.access.proxy_key_header, "x-gw-key");
        assert_eq!(
            config.messages_url(),
            "https://example.com/api/llm/a/v1/messages"
        );
        assert_eq!(
            config.responses_url(),
            "https://example.com/api/llm/o/v1/responses"
        );
    }

    #[test]
    fn test_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 8787);
        assert_eq!(config.access.proxy_key_header, "x-proxy-key");
        assert!(config.upstream.api_keys.is_empty());
    }
}
