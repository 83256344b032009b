// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Admin gate
//
// Hides the analytics dashboard from casual users. This is NOT access
// control: the password is a shared value compared in the clear, and once
// unlocked the flag simply persists in a local file until logout.

use crate::types::AppError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Key code of the `A` key in the reveal chord
pub const ADMIN_KEY_CODE: u32 = 65;

/// A key press with its modifier state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChord {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub alt: bool,
    pub key_code: u32,
}

/// The chord that reveals the admin login screen
pub struct AdminShortcut;

impl AdminShortcut {
    /// Ctrl or Meta, plus Alt, plus `A`
    pub fn matches(chord: &KeyChord) -> bool {
        (chord.ctrl || chord.meta) && chord.alt && chord.key_code == ADMIN_KEY_CODE
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminFlagFile {
    is_admin: bool,
}

/// Shared-password gate with a persisted "unlocked" flag
pub struct AdminGate {
    password: Option<String>,
    flag_path: Option<PathBuf>,
    unlocked: AtomicBool,
}

impl AdminGate {
    /// Gate whose flag lives in the platform config directory
    pub fn new(password: Option<String>) -> Result<Self, AppError> {
        let flag_path = crate::settings::config_dir()?.join("admin.json");
        Ok(Self::with_flag_file(password, flag_path))
    }

    /// Gate whose flag lives in `flag_path`, read back immediately
    pub fn with_flag_file(password: Option<String>, flag_path: impl Into<PathBuf>) -> Self {
        let flag_path = flag_path.into();
        let unlocked = read_flag(&flag_path);
        if unlocked {
            tracing::info!("Admin flag found, dashboard unlocked");
        }

        Self {
            password: password.filter(|p| !p.is_empty()),
            flag_path: Some(flag_path),
            unlocked: AtomicBool::new(unlocked),
        }
    }

    /// Gate that forgets its flag on restart
    pub fn in_memory(password: Option<String>) -> Self {
        Self {
            password: password.filter(|p| !p.is_empty()),
            flag_path: None,
            unlocked: AtomicBool::new(false),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Compare against the configured password and unlock on a match.
    ///
    /// Without a configured password every attempt fails.
    pub fn login(&self, attempt: &str) -> Result<bool, AppError> {
        let matches = self
            .password
            .as_deref()
            .is_some_and(|password| password == attempt);

        if !matches {
            tracing::info!("Admin login rejected");
            return Ok(false);
        }

        self.set_flag(true)?;
        tracing::info!("Admin login accepted");
        Ok(true)
    }

    pub fn logout(&self) -> Result<(), AppError> {
        self.set_flag(false)
    }

    fn set_flag(&self, value: bool) -> Result<(), AppError> {
        if let Some(path) = &self.flag_path {
            write_flag(path, value)?;
        }
        self.unlocked.store(value, Ordering::SeqCst);
        Ok(())
    }
}

fn read_flag(path: &Path) -> bool {
    let Ok(content) = fs::read_to_string(path) else {
        return false;
    };
    match serde_json::from_str::<AdminFlagFile>(&content) {
        Ok(file) => file.is_admin,
        Err(e) => {
            tracing::warn!("Ignoring unreadable admin flag: {}", e);
            false
        }
    }
}

fn write_flag(path: &Path, is_admin: bool) -> Result<(), AppError> {
    let content = serde_json::to_string_pretty(&AdminFlagFile { is_admin })
        .map_err(|e| AppError::Serialization(format!("Failed to serialize admin flag: {}", e)))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;
    }

    fs::write(path, content)
        .map_err(|e| AppError::FileIo(format!("Failed to write admin flag: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_flag_path() -> PathBuf {
        std::env::temp_dir().join(format!("idrop-admin-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_shortcut_chord() {
        let chord = |ctrl, meta, alt, key_code| KeyChord {
            ctrl,
            meta,
            alt,
            key_code,
        };
        assert!(AdminShortcut::matches(&chord(true, false, true, 65)));
        assert!(AdminShortcut::matches(&chord(false, true, true, 65)));
        assert!(!AdminShortcut::matches(&chord(true, false, false, 65)));
        assert!(!AdminShortcut::matches(&chord(false, false, true, 65)));
        assert!(!AdminShortcut::matches(&chord(true, false, true, 66)));
    }

    #[test]
    fn test_login_requires_exact_password() {
        let gate = AdminGate::in_memory(Some("letmein".to_string()));
        assert!(!gate.is_unlocked());
        assert!(!gate.login("LETMEIN").unwrap());
        assert!(!gate.is_unlocked());
        assert!(gate.login("letmein").unwrap());
        assert!(gate.is_unlocked());
    }

    #[test]
    fn test_no_password_configured_never_unlocks() {
        let gate = AdminGate::in_memory(None);
        assert!(!gate.login("").unwrap());
        assert!(!gate.login("anything").unwrap());

        let gate = AdminGate::in_memory(Some(String::new()));
        assert!(!gate.login("").unwrap());
    }

    #[test]
    fn test_flag_persists_until_logout() {
        let path = temp_flag_path();
        let gate = AdminGate::with_flag_file(Some("pw".to_string()), &path);
        assert!(gate.login("pw").unwrap());

        let reloaded = AdminGate::with_flag_file(Some("pw".to_string()), &path);
        assert!(reloaded.is_unlocked());

        reloaded.logout().unwrap();
        assert!(!reloaded.is_unlocked());
        assert!(!AdminGate::with_flag_file(None, &path).is_unlocked());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_garbage_flag_file_stays_locked() {
        let path = temp_flag_path();
        fs::write(&path, "true").unwrap();
        assert!(!AdminGate::with_flag_file(None, &path).is_unlocked());
        let _ = fs::remove_file(&path);
    }
}
