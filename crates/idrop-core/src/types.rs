// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest accepted timer period or window: one year
pub const MAX_PERIOD_SECS: u64 = 366 * 24 * 60 * 60;

/// Where pending transfers and analytics events are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process only, lost on restart
    Memory,
    /// Single JSON file, rewritten on every change
    #[default]
    File,
}

/// Application settings (frontend-agnostic)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Port for the HTTP server (default: 8417)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared admin password. None disables the admin view entirely.
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Document store backend
    #[serde(default)]
    pub store_backend: StoreBackend,
    /// Override for the file store location
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Delay before the first retention sweep, and between sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Re-arm the sweep after each run. When false only one sweep ever runs.
    #[serde(default = "default_true")]
    pub sweep_recurring: bool,
    /// How long "Cleanup complete" stays visible
    #[serde(default = "default_status_linger_secs")]
    pub status_linger_secs: u64,
    /// Admin dashboard refresh period
    #[serde(default = "default_dashboard_refresh_secs")]
    pub dashboard_refresh_secs: u64,
    /// Trailing window for the "active users" figure
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: u64,
    /// Upper bound on ID allocation retries
    #[serde(default = "default_max_id_attempts")]
    pub max_id_attempts: u32,
}

fn default_port() -> u16 {
    8417
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_status_linger_secs() -> u64 {
    3
}

fn default_dashboard_refresh_secs() -> u64 {
    30
}

fn default_active_window_secs() -> u64 {
    600
}

fn default_max_id_attempts() -> u32 {
    100
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            admin_password: None,
            store_backend: StoreBackend::default(),
            store_path: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_recurring: true,
            status_linger_secs: default_status_linger_secs(),
            dashboard_refresh_secs: default_dashboard_refresh_secs(),
            active_window_secs: default_active_window_secs(),
            max_id_attempts: default_max_id_attempts(),
        }
    }
}

impl AppSettings {
    /// Reject values that would make the timers or the allocator useless
    pub fn validate(&self) -> Result<(), AppError> {
        if self.sweep_interval_secs == 0 {
            return Err(AppError::InvalidConfig(
                "sweepIntervalSecs must be greater than zero".to_string(),
            ));
        }
        if self.dashboard_refresh_secs == 0 {
            return Err(AppError::InvalidConfig(
                "dashboardRefreshSecs must be greater than zero".to_string(),
            ));
        }
        let periods = [
            ("sweepIntervalSecs", self.sweep_interval_secs),
            ("statusLingerSecs", self.status_linger_secs),
            ("dashboardRefreshSecs", self.dashboard_refresh_secs),
            ("activeWindowSecs", self.active_window_secs),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, secs)| *secs > MAX_PERIOD_SECS) {
            return Err(AppError::InvalidConfig(format!(
                "{} must be at most {}",
                name, MAX_PERIOD_SECS
            )));
        }
        if self.max_id_attempts == 0 {
            return Err(AppError::InvalidConfig(
                "maxIdAttempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the file store location, defaulting to the platform data dir
    pub fn resolve_store_path(&self) -> Result<PathBuf, AppError> {
        if let Some(path) = &self.store_path {
            return Ok(path.clone());
        }

        let data_dir = directories::ProjectDirs::from("app", "idrop", "idrop")
            .ok_or_else(|| AppError::FileIo("Could not determine data directory".to_string()))?
            .data_dir()
            .to_path_buf();

        Ok(data_dir.join("store.json"))
    }
}

/// Error types for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Store write failed: {0}")]
    StoreWrite(String),

    #[error("Store read failed: {0}")]
    StoreRead(String),

    #[error("No free transfer ID after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("File I/O error: {0}")]
    FileIo(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileIo(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}
