use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Externally reachable base URL, used for directive callbacks.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// TOML file holding the system default IVR config.
    pub default_ivr: Option<String>,
    #[serde(default)]
    pub config_store: ConfigStoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ConfigStoreConfig {
    #[default]
    Memory,
    File {
        root: String,
    },
}

#[derive(Debug, Deserialize, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DispatchConfig {
    #[default]
    Log,
    Http {
        url: String,
        headers: Option<HashMap<String, String>>,
        timeout_ms: Option<u64>,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            log_level: Some("info".to_string()),
            log_file: None,
            public_url: default_public_url(),
            default_ivr: None,
            config_store: ConfigStoreConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read config '{}': {}", path, e))?,
        )?;
        Ok(config)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dump() {
        let config = Config::default();
        let config_str = toml::to_string(&config).unwrap();
        println!("{}", config_str);
        let parsed: Config = toml::from_str(&config_str).unwrap();
        assert_eq!(parsed.http_addr, config.http_addr);
        assert_eq!(parsed.dispatch, DispatchConfig::Log);
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
http_addr = "127.0.0.1:9000"
log_level = "debug"
public_url = "https://ivr.example.com"
default_ivr = "config/default_ivr.toml"

[config_store]
type = "file"
root = "config/tenants"

[dispatch]
type = "http"
url = "https://hooks.example.com/ivr"
timeout_ms = 2000
headers = { Authorization = "Bearer token" }
"#,
        )
        .unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:9000");
        assert_eq!(config.public_url, "https://ivr.example.com");
        assert_eq!(
            config.config_store,
            ConfigStoreConfig::File {
                root: "config/tenants".to_string()
            }
        );
        match config.dispatch {
            DispatchConfig::Http {
                url,
                headers,
                timeout_ms,
            } => {
                assert_eq!(url, "https://hooks.example.com/ivr");
                assert_eq!(timeout_ms, Some(2000));
                assert_eq!(
                    headers.unwrap().get("Authorization").map(String::as_str),
                    Some("Bearer token")
                );
            }
            other => panic!("unexpected dispatch config: {:?}", other),
        }
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.config_store, ConfigStoreConfig::Memory);
        assert!(config.default_ivr.is_none());
    }
}
