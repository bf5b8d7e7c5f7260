//! Settings file loader and serialization.

use crate::config::Settings;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the global settings path: ~/.config/omniflash/settings.json
pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine configuration directory".to_string())
    })?;

    Ok(config_dir.join("omniflash").join("settings.json"))
}

/// Load settings from a JSON file.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    validate_settings_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!("Settings file not found at: {}", path.display()))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let settings: Settings = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    log::debug!("[Config] Loaded settings from {}", path.display());

    Ok(settings)
}

/// Load settings, falling back to defaults when the file does not exist.
pub fn load_settings_or_default(path: &Path) -> Result<Settings, ConfigError> {
    match load_settings(path) {
        Ok(settings) => Ok(settings),
        Err(ConfigError::FileNotFound(_)) => {
            log::info!(
                "[Config] No settings at {}, using defaults",
                path.display()
            );
            Ok(Settings::default())
        }
        Err(e) => Err(e),
    }
}

/// Save settings to a JSON file.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    validate_settings_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let json_content = serde_json::to_string_pretty(settings).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Validate settings path (.json extension required).
pub fn validate_settings_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Settings path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Settings file must have .json extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Settings file must have .json extension".to_string(),
            ))
        }
    }

    if path.to_str().is_none() {
        return Err(ConfigError::ValidationFailed(
            "Settings path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolSourceOverride;
    use crate::models::ToolKind;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        let mut original = Settings::default();
        original.tools_dir = PathBuf::from("/srv/omniflash/tools");
        original.flash_timeout_secs = 900;
        original.tool_sources.insert(
            ToolKind::Edl,
            ToolSourceOverride {
                primary_url: Some("https://mirror.example/edl.zip".to_string()),
                fallback_urls: vec!["https://backup.example/edl.zip".to_string()],
            },
        );

        save_settings(&original, &path).expect("Failed to save settings");
        let loaded = load_settings(&path).expect("Failed to load settings");

        assert_eq!(loaded, original);
    }

    #[test]
    fn test_validate_settings_path() {
        assert!(validate_settings_path(Path::new("settings.json")).is_ok());
        assert!(validate_settings_path(Path::new("settings.toml")).is_err());
        assert!(validate_settings_path(Path::new("settings")).is_err());
        assert!(validate_settings_path(Path::new("")).is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_settings(Path::new("/nonexistent/path/settings.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let settings = load_settings_or_default(Path::new("/nonexistent/path/settings.json"))
            .expect("defaults");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("invalid.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"{ invalid json }").unwrap();

        let result = load_settings(&path);
        assert!(matches!(result, Err(ConfigError::InvalidJson(_))));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dirs/settings.json");

        save_settings(&Settings::default(), &path).expect("Failed to save settings");
        assert!(path.exists());
    }
}
