// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Settings persistence
//
// Settings are stored in a local JSON file. A couple of values can be
// overridden from the environment so deployments need not edit the file.

use crate::types::{AppError, AppSettings};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

/// Environment variable holding the shared admin password
pub const ADMIN_PASSWORD_ENV: &str = "IDROP_ADMIN_PASSWORD";
/// Environment variable overriding the HTTP port
pub const PORT_ENV: &str = "IDROP_PORT";

/// In-memory cache of settings, persisted to disk on changes
pub struct SettingsStore {
    settings: RwLock<AppSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    /// Create a new settings store in the platform config directory
    pub fn new() -> Result<Self, AppError> {
        let file_path = config_dir()?.join("settings.json");
        Self::at(file_path)
    }

    /// Create a settings store backed by an explicit file
    pub fn at(file_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let file_path = file_path.into();
        tracing::info!("Settings file path: {:?}", file_path);

        let mut settings = if file_path.exists() {
            tracing::info!("Loading settings from disk");
            let content = fs::read_to_string(&file_path)
                .map_err(|e| AppError::FileIo(format!("Failed to read settings: {}", e)))?;

            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse settings, using defaults: {}", e);
                AppSettings::default()
            })
        } else {
            tracing::info!("No settings file found, using defaults");
            AppSettings::default()
        };

        // Persist the file-backed values only, never the env overrides
        let store = Self {
            settings: RwLock::new(settings.clone()),
            file_path,
        };

        if !store.file_path.exists() {
            tracing::info!("Creating initial settings file");
            store.persist()?;
        }

        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
        settings.validate()?;
        *store.write_guard() = settings;

        Ok(store)
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, AppSettings> {
        self.settings.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist settings to disk
    fn persist(&self) -> Result<(), AppError> {
        let content = {
            let settings = self.settings.read().unwrap_or_else(|e| e.into_inner());
            let mut on_disk = settings.clone();
            // The password is expected to come from the environment
            if std::env::var(ADMIN_PASSWORD_ENV).is_ok() {
                on_disk.admin_password = None;
            }
            serde_json::to_string_pretty(&on_disk).map_err(|e| {
                AppError::Serialization(format!("Failed to serialize settings: {}", e))
            })?
        };

        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;
        }

        fs::write(&self.file_path, content)
            .map_err(|e| AppError::FileIo(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> AppSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Update settings and persist to disk
    pub fn update(&self, new_settings: AppSettings) -> Result<(), AppError> {
        new_settings.validate()?;
        tracing::info!("Updating settings, port: {}", new_settings.port);
        *self.write_guard() = new_settings;

        let result = self.persist();
        if result.is_ok() {
            tracing::info!("Settings persisted successfully");
        } else {
            tracing::error!("Failed to persist settings: {:?}", result);
        }
        result
    }
}

/// Platform config directory, created if missing
pub(crate) fn config_dir() -> Result<PathBuf, AppError> {
    let config_dir = directories::ProjectDirs::from("app", "idrop", "idrop")
        .ok_or_else(|| AppError::FileIo("Could not determine config directory".to_string()))?
        .config_dir()
        .to_path_buf();

    fs::create_dir_all(&config_dir)
        .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;

    Ok(config_dir)
}

fn apply_env_overrides(settings: &mut AppSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(password) = lookup(ADMIN_PASSWORD_ENV).filter(|p| !p.is_empty()) {
        settings.admin_password = Some(password);
    }

    if let Some(port) = lookup(PORT_ENV) {
        match port.parse::<u16>() {
            Ok(port) => settings.port = port,
            Err(e) => tracing::warn!("Ignoring {}={:?}: {}", PORT_ENV, port, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path() -> PathBuf {
        std::env::temp_dir().join(format!("idrop-settings-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_creates_file_with_defaults() {
        let path = temp_settings_path();
        let store = SettingsStore::at(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.get().sweep_interval_secs, 600);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_update_round_trips_through_disk() {
        let path = temp_settings_path();
        let store = SettingsStore::at(&path).unwrap();
        let mut settings = store.get();
        settings.dashboard_refresh_secs = 5;
        store.update(settings).unwrap();

        let reloaded = SettingsStore::at(&path).unwrap();
        assert_eq!(reloaded.get().dashboard_refresh_secs, 5);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let path = temp_settings_path();
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::at(&path).unwrap();
        assert_eq!(store.get().port, 8417);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = AppSettings::default();
        apply_env_overrides(&mut settings, |key| match key {
            ADMIN_PASSWORD_ENV => Some("hunter2".to_string()),
            PORT_ENV => Some("9100".to_string()),
            _ => None,
        });
        assert_eq!(settings.admin_password.as_deref(), Some("hunter2"));
        assert_eq!(settings.port, 9100);
    }

    #[test]
    fn test_bad_port_override_is_ignored() {
        let mut settings = AppSettings::default();
        apply_env_overrides(&mut settings, |key| {
            (key == PORT_ENV).then(|| "not-a-port".to_string())
        });
        assert_eq!(settings.port, 8417);
    }
}
