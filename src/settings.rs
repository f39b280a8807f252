use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const MAX_SUGGESTION_MIN_CHARS: usize = 10;
const SALT_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub telemetry_enabled: bool,
    pub suggestion_min_chars: usize,
    pub telemetry_salt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSettings {
    pub telemetry_enabled: bool,
    pub suggestion_min_chars: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsPayload {
    pub telemetry_enabled: Option<bool>,
    pub suggestion_min_chars: Option<usize>,
}

impl UserSettings {
    /// Reads `settings.json`, writing fresh defaults when the file is absent
    /// or no longer parses.
    pub fn load(path: &Path, config: &AppConfig) -> AppResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Self::write_defaults(path, config)
            }
            Err(err) => return Err(AppError::Io(err)),
        };
        match serde_json::from_str::<Self>(&contents) {
            Ok(mut settings) => {
                settings.suggestion_min_chars = clamp_min_chars(settings.suggestion_min_chars);
                Ok(settings)
            }
            Err(err) => {
                warn!(
                    target: "settings",
                    error = ?err,
                    path = %path.display(),
                    "settings file unreadable; writing defaults"
                );
                Self::write_defaults(path, config)
            }
        }
    }

    pub fn persist(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn runtime_profile(&self) -> RuntimeSettings {
        RuntimeSettings {
            telemetry_enabled: self.telemetry_enabled,
            suggestion_min_chars: self.suggestion_min_chars,
        }
    }

    pub fn apply_patch(&mut self, payload: &UpdateSettingsPayload) {
        if let Some(enabled) = payload.telemetry_enabled {
            self.telemetry_enabled = enabled;
        }
        if let Some(min_chars) = payload.suggestion_min_chars {
            self.suggestion_min_chars = clamp_min_chars(min_chars);
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            telemetry_enabled: config.telemetry_enabled_by_default,
            suggestion_min_chars: clamp_min_chars(config.suggestion_min_chars),
            telemetry_salt: generate_salt(),
        }
    }

    fn write_defaults(path: &Path, config: &AppConfig) -> AppResult<Self> {
        let settings = Self::from_config(config);
        settings.persist(path)?;
        Ok(settings)
    }
}

fn clamp_min_chars(value: usize) -> usize {
    value.clamp(1, MAX_SUGGESTION_MIN_CHARS)
}

fn generate_salt() -> String {
    let mut bytes = vec![0_u8; SALT_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::defaults();
        let path = settings_path(dir.path());
        let settings = UserSettings::load(&path, &config).unwrap();
        assert!(!settings.telemetry_salt.is_empty());
        assert_eq!(settings.suggestion_min_chars, 2);
        assert!(path.exists());
    }

    #[test]
    fn patched_settings_survive_reload() {
        let dir = tempdir().unwrap();
        let config = AppConfig::defaults();
        let path = settings_path(dir.path());
        let mut settings = UserSettings::load(&path, &config).unwrap();
        settings.apply_patch(&UpdateSettingsPayload {
            telemetry_enabled: Some(false),
            suggestion_min_chars: Some(3),
        });
        settings.persist(&path).unwrap();
        let reloaded = UserSettings::load(&path, &config).unwrap();
        assert!(!reloaded.telemetry_enabled);
        assert_eq!(reloaded.suggestion_min_chars, 3);
        assert_eq!(settings.telemetry_salt, reloaded.telemetry_salt);
    }

    #[test]
    fn corrupt_file_is_replaced() {
        let dir = tempdir().unwrap();
        let path = settings_path(dir.path());
        fs::write(&path, "{ not json").unwrap();
        let settings = UserSettings::load(&path, &AppConfig::defaults()).unwrap();
        assert!(settings.telemetry_enabled);
        let reparsed: UserSettings =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reparsed.telemetry_salt, settings.telemetry_salt);
    }

    #[test]
    fn suggestion_threshold_is_clamped() {
        let mut settings = UserSettings::from_config(&AppConfig::defaults());
        settings.apply_patch(&UpdateSettingsPayload {
            telemetry_enabled: None,
            suggestion_min_chars: Some(0),
        });
        assert_eq!(settings.suggestion_min_chars, 1);
    }
}
