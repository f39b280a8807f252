use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

/// Credential storage keyed by account name.
///
/// The keychain backend is used by the desktop app; the in-memory backend
/// backs tests and headless runs where no keychain service is reachable.
#[derive(Clone)]
pub struct SecretVault {
    service_name: String,
    backend: SecretBackend,
}

#[derive(Clone)]
enum SecretBackend {
    Keyring,
    Memory(Arc<Mutex<HashMap<String, SecretString>>>),
}

impl SecretVault {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            backend: SecretBackend::Keyring,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            service_name: "in-memory".to_string(),
            backend: SecretBackend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub fn read_secret(&self, account: &str) -> AppResult<Option<SecretString>> {
        let secret = match &self.backend {
            SecretBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, account)?;
                match entry.get_password() {
                    Ok(value) => Some(SecretString::new(value.into())),
                    Err(keyring::Error::NoEntry) => None,
                    Err(err) => return Err(AppError::from(err)),
                }
            }
            SecretBackend::Memory(store) => store.lock().get(account).cloned(),
        };
        debug!(
            target: "secret_vault",
            service = %self.service_name,
            account,
            found = secret.is_some(),
            "looked up secret"
        );
        Ok(secret)
    }

    pub fn write_secret(&self, account: &str, secret: &SecretString) -> AppResult<()> {
        match &self.backend {
            SecretBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, account)?;
                entry.set_password(secret.expose_secret())?;
            }
            SecretBackend::Memory(store) => {
                store.lock().insert(account.to_string(), secret.clone());
            }
        }
        info!(
            target: "secret_vault",
            service = %self.service_name,
            account,
            "stored secret"
        );
        Ok(())
    }
}
