use std::sync::Arc;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::secrets::SecretVault;

pub const APP_ID_ACCOUNT: &str = "geocoder-app-id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Missing,
    Environment,
    Keychain,
}

/// Process-wide geocoder credential: read once at startup, replaced on save.
#[derive(Clone)]
pub struct PreferenceStore {
    vault: SecretVault,
    current: Arc<RwLock<Option<SecretString>>>,
    source: Arc<RwLock<CredentialSource>>,
}

impl PreferenceStore {
    /// Loads the stored credential, falling back to `env_default` without
    /// persisting it.
    pub fn load(vault: SecretVault, env_default: Option<SecretString>) -> AppResult<Self> {
        let (current, source) = match vault.read_secret(APP_ID_ACCOUNT)? {
            Some(secret) => (Some(secret), CredentialSource::Keychain),
            None => match env_default {
                Some(secret) => (Some(secret), CredentialSource::Environment),
                None => (None, CredentialSource::Missing),
            },
        };
        info!(
            target: "preferences",
            source = ?source,
            "geocoder credential loaded"
        );
        Ok(Self {
            vault,
            current: Arc::new(RwLock::new(current)),
            source: Arc::new(RwLock::new(source)),
        })
    }

    /// Validates and persists a new credential. Blank input leaves the store
    /// untouched.
    pub fn save(&self, input: &str) -> AppResult<()> {
        let key = input.trim();
        if key.is_empty() {
            warn!(target: "preferences", "rejected blank credential");
            return Err(AppError::Validation("enter an API key before saving".into()));
        }
        let secret = SecretString::new(key.into());
        self.vault.write_secret(APP_ID_ACCOUNT, &secret)?;
        *self.current.write() = Some(secret);
        *self.source.write() = CredentialSource::Keychain;
        Ok(())
    }

    pub fn credential(&self) -> Option<SecretString> {
        self.current.read().clone()
    }

    pub fn has_credential(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .map(|secret| !secret.expose_secret().is_empty())
            .unwrap_or(false)
    }

    pub fn source(&self) -> CredentialSource {
        *self.source.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_save_leaves_store_unchanged() {
        let vault = SecretVault::in_memory();
        let store = PreferenceStore::load(vault.clone(), None).unwrap();

        let err = store.save("   ").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!store.has_credential());
        assert!(vault.read_secret(APP_ID_ACCOUNT).unwrap().is_none());
        assert_eq!(store.source(), CredentialSource::Missing);
    }

    #[test]
    fn save_overwrites_and_survives_reload() {
        let vault = SecretVault::in_memory();
        let store = PreferenceStore::load(vault.clone(), None).unwrap();
        store.save(" first ").unwrap();
        store.save("second").unwrap();

        let reloaded = PreferenceStore::load(vault, None).unwrap();
        let secret = reloaded.credential().unwrap();
        assert_eq!(secret.expose_secret(), "second");
        assert_eq!(reloaded.source(), CredentialSource::Keychain);
    }

    #[test]
    fn environment_value_is_not_persisted() {
        let vault = SecretVault::in_memory();
        let store =
            PreferenceStore::load(vault.clone(), Some(SecretString::new("env-key".into())))
                .unwrap();
        assert!(store.has_credential());
        assert_eq!(store.source(), CredentialSource::Environment);
        assert!(vault.read_secret(APP_ID_ACCOUNT).unwrap().is_none());
    }
}
