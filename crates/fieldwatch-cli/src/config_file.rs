//! Persistent CLI configuration.

use std::path::{Path, PathBuf};

use fieldwatch_core::SyncSettings;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    /// Backend base URL
    #[serde(default)]
    pub endpoint: Option<String>,
    /// URL probed for connectivity; the endpoint itself when absent
    #[serde(default)]
    pub health_url: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub sync: SyncSettings,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldwatch")
        .join(CONFIG_FILE_NAME)
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("https://") || value.starts_with("http://")
}

impl CliConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self {
                version: default_config_version(),
                ..Self::default()
            });
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        config
            .sync
            .validate()
            .map_err(|error| format!("Invalid sync settings in {}: {error}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Sync settings with `FIELDWATCH_*` environment overrides applied
    pub fn effective_settings(&self) -> Result<SyncSettings, String> {
        let mut settings = self.sync.clone();
        settings
            .apply_env_overrides(|name| std::env::var(name).ok())
            .map_err(|error| error.to_string())?;
        Ok(settings)
    }

    pub fn endpoint(&self) -> Option<String> {
        normalize_text_option(self.endpoint.clone())
    }

    pub fn health_url(&self) -> Option<String> {
        normalize_text_option(self.health_url.clone())
    }

    fn normalize(&mut self) {
        self.endpoint = normalize_text_option(self.endpoint.take());
        self.health_url = normalize_text_option(self.health_url.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some(" https://api.example.com ".to_string())),
            Some("https://api.example.com".to_string())
        );
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.endpoint, None);
        assert_eq!(config.sync, SyncSettings::default());
    }

    #[test]
    fn config_roundtrip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = CliConfig {
            version: 1,
            endpoint: Some(" https://api.fieldwatch.example ".to_string()),
            health_url: Some("   ".to_string()),
            db_path: Some(PathBuf::from("/data/fieldwatch.db")),
            sync: SyncSettings {
                batch_size: 5,
                ..SyncSettings::default()
            },
        };

        config.save_to_path(&path).unwrap();
        let loaded = CliConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.endpoint(), Some("https://api.fieldwatch.example".to_string()));
        assert_eq!(loaded.health_url, None);
        assert_eq!(loaded.sync.batch_size, 5);
        assert_eq!(loaded.db_path, Some(PathBuf::from("/data/fieldwatch.db")));
    }

    #[test]
    fn invalid_sync_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"sync": {"max_concurrency": 0}}"#).unwrap();

        let error = CliConfig::load_from_path(&path).unwrap_err();
        assert!(error.contains("max_concurrency"));
    }

    #[test]
    fn unknown_sync_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"sync": {"batch": 3}}"#).unwrap();

        assert!(CliConfig::load_from_path(&path).is_err());
    }
}
