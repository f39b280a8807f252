use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Keychain(#[from] keyring::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Validation(String),
    #[error("no marker at index {index} (list has {len})")]
    InvalidIndex { index: usize, len: usize },
    #[cfg(feature = "desktop")]
    #[error(transparent)]
    Tauri(#[from] tauri::Error),
}
