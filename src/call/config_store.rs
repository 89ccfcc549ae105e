use super::ivr_config::IvrConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Looks up the IVR configuration owning a dialled phone number.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_ivr_config(&self, phone_number: &str) -> Result<IvrConfig>;
}

/// Reduces a phone number to its digits so `+1 (555) 000-1111` and
/// `15550001111` share a key.
pub fn normalize_number(phone_number: &str) -> Result<String> {
    let digits: String = phone_number
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return Err(anyhow!("'{}' is not a phone number", phone_number));
    }
    Ok(digits)
}

#[derive(Default)]
pub struct MemoryConfigStore {
    configs: HashMap<String, IvrConfig>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, phone_number: &str, config: IvrConfig) -> Result<Self> {
        self.configs.insert(normalize_number(phone_number)?, config);
        Ok(self)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_ivr_config(&self, phone_number: &str) -> Result<IvrConfig> {
        let key = normalize_number(phone_number)?;
        self.configs
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("no IVR config for {}", phone_number))
    }
}

/// One TOML file per number: `<root>/<digits>.toml`.
pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, phone_number: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(normalize_number(phone_number)?)
            .with_extension("toml"))
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get_ivr_config(&self, phone_number: &str) -> Result<IvrConfig> {
        let path = self.path_for(phone_number)?;
        debug!(path = %path.display(), "loading IVR config");
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow!("Failed to read IVR config '{}': {}", path.display(), e))?;
        IvrConfig::from_toml(&content)
            .map_err(|e| anyhow!("Invalid IVR config '{}': {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("+1 (555) 000-1111").unwrap(), "15550001111");
        assert_eq!(normalize_number("15550001111").unwrap(), "15550001111");
        assert!(normalize_number("anonymous").is_err());
        assert!(normalize_number("").is_err());
    }

    #[tokio::test]
    async fn test_memory_store_lookup() {
        let mut config = IvrConfig::default();
        config.enabled = false;
        let store = MemoryConfigStore::new()
            .with_config("+15550001111", config)
            .unwrap();

        let found = store.get_ivr_config("1-555-000-1111").await.unwrap();
        assert!(!found.enabled);
        assert!(store.get_ivr_config("+15550002222").await.is_err());
        assert!(store.get_ivr_config("unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());

        let mut config = IvrConfig::default();
        config.voice_settings.voice_name = "Joanna".to_string();
        let mut file = std::fs::File::create(dir.path().join("15550001111.toml")).unwrap();
        file.write_all(toml::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = store.get_ivr_config("+1 555 000 1111").await.unwrap();
        assert_eq!(loaded, config);

        let mut broken = IvrConfig::default();
        broken.main_menu.timeout_seconds = 0;
        std::fs::write(
            dir.path().join("15550002222.toml"),
            toml::to_string(&broken).unwrap(),
        )
        .unwrap();
        let err = store.get_ivr_config("+15550002222").await.unwrap_err();
        assert!(err.to_string().contains("15550002222.toml"));

        assert!(store.get_ivr_config("+15550003333").await.is_err());
    }
}
