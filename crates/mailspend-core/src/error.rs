//! Error types for Mailspend

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Revoked/invalid refresh token or undecryptable token material.
    /// Terminal for the account: it is deactivated and needs user re-auth.
    #[error("Authorization error: {0}")]
    Unauthorized(String),

    /// Transient provider failure (timeout, rate limit, 5xx). The next
    /// scheduled run retries naturally.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Whether this error should deactivate the owning mail account
    pub fn is_authorization(&self) -> bool {
        matches!(self, Error::Unauthorized(_) | Error::Encryption(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
