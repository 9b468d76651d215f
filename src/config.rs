//! Configuration management for Notes.
//!
//! This module handles loading and saving application configuration to/from
//! a JSON file. The config directory can be customized.
//!
//! Settings:
//! - database_file: path to the SQLite database
//! - search_debounce_ms: quiet period before a typed search is dispatched
//! - journal_mode: SQLite journal mode ("WAL" or "DELETE")

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NoteError, NoteResult};

/// Default quiet period for the search pipeline
pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;

fn default_search_debounce_ms() -> u64 {
    DEFAULT_SEARCH_DEBOUNCE_MS
}

fn default_journal_mode() -> String {
    "WAL".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Path to the database file
    #[serde(default)]
    pub database_file: String,
    /// Search debounce in milliseconds
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    /// SQLite journal mode
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            database_file: String::new(),
            search_debounce_ms: default_search_debounce_ms(),
            journal_mode: default_journal_mode(),
        }
    }
}

impl ConfigData {
    fn defaults_for(config_dir: &Path) -> Self {
        Self {
            database_file: config_dir.join("notes.db").to_string_lossy().to_string(),
            ..Self::default()
        }
    }
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Create a new configuration manager
    ///
    /// On mobile platforms (without the `desktop` feature), `config_dir` is required.
    pub fn new(config_dir: Option<PathBuf>) -> NoteResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => {
                #[cfg(feature = "desktop")]
                {
                    dirs::config_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("notecore")
                }
                #[cfg(not(feature = "desktop"))]
                {
                    return Err(NoteError::Config(
                        "config_dir is required on mobile platforms".to_string(),
                    ));
                }
            }
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let data = if config_file.exists() {
            match fs::read_to_string(&config_file) {
                Ok(content) => serde_json::from_str::<ConfigData>(&content)
                    .map(|mut data| {
                        if data.database_file.is_empty() {
                            data.database_file = ConfigData::defaults_for(&config_dir).database_file;
                        }
                        data
                    })
                    .unwrap_or_else(|e| {
                        tracing::warn!("Ignoring unreadable config file: {}", e);
                        ConfigData::defaults_for(&config_dir)
                    }),
                Err(_) => ConfigData::defaults_for(&config_dir),
            }
        } else {
            ConfigData::defaults_for(&config_dir)
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        // Save default config if it doesn't exist
        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> NoteResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the database file path
    pub fn database_file(&self) -> &str {
        &self.data.database_file
    }

    pub fn journal_mode(&self) -> &str {
        &self.data.journal_mode
    }

    /// Quiet period used by the search pipeline
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.data.search_debounce_ms)
    }

    pub fn set_search_debounce_ms(&mut self, ms: u64) -> NoteResult<()> {
        self.data.search_debounce_ms = ms;
        self.save()
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "database_file" => Some(self.data.database_file.clone()),
            "search_debounce_ms" => Some(self.data.search_debounce_ms.to_string()),
            "journal_mode" => Some(self.data.journal_mode.clone()),
            _ => None,
        }
    }

    /// Set a configuration value
    pub fn set(&mut self, key: &str, value: &str) -> NoteResult<()> {
        match key {
            "database_file" => self.data.database_file = value.to_string(),
            "search_debounce_ms" => {
                self.data.search_debounce_ms = value.parse().map_err(|_| {
                    NoteError::Config(format!("search_debounce_ms must be an integer, got {}", value))
                })?
            }
            "journal_mode" => {
                let mode = value.to_ascii_uppercase();
                if mode != "WAL" && mode != "DELETE" {
                    return Err(NoteError::Config(format!(
                        "journal_mode must be WAL or DELETE, got {}",
                        value
                    )));
                }
                self.data.journal_mode = mode;
            }
            _ => return Err(NoteError::Config(format!("Unknown config key: {}", key))),
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();

        assert!(config.database_file().ends_with("notes.db"));
        assert_eq!(config.search_debounce(), Duration::from_millis(300));
        assert_eq!(config.journal_mode(), "WAL");
        assert!(temp_dir.path().join("config.json").exists());
    }

    #[test]
    fn test_config_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();
            config.set_search_debounce_ms(120).unwrap();
            config.set("journal_mode", "delete").unwrap();
        }

        {
            let config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();
            assert_eq!(config.search_debounce(), Duration::from_millis(120));
            assert_eq!(config.journal_mode(), "DELETE");
        }
    }

    #[test]
    fn test_get_and_set() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();

        config.set("search_debounce_ms", "50").unwrap();
        assert_eq!(config.get("search_debounce_ms").as_deref(), Some("50"));
        assert!(config.get("nonexistent").is_none());
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();

        assert!(matches!(config.set("search_debounce_ms", "soon"), Err(NoteError::Config(_))));
        assert!(matches!(config.set("journal_mode", "MEMORY"), Err(NoteError::Config(_))));
        assert!(matches!(config.set("colour", "red"), Err(NoteError::Config(_))));
    }

    #[test]
    fn test_corrupt_config_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("config.json"), "{ not json").unwrap();

        let config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();
        assert_eq!(config.search_debounce(), Duration::from_millis(300));
        assert!(config.database_file().ends_with("notes.db"));
    }

    #[cfg(not(feature = "desktop"))]
    #[test]
    fn test_config_dir_required_without_desktop() {
        assert!(matches!(Config::new(None), Err(NoteError::Config(_))));
    }
}
