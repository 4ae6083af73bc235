use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the history backend.
///
/// Every fallible path in the crate resolves to one of these variants rather
/// than a raw `io::Error` or `String`, so callers can match on kind instead
/// of parsing messages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid history configuration: {0}")]
    Config(String),

    #[error("master database at {path} could not be opened: {source}")]
    MasterDbUnopenable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("master database at {0} is corrupt or unreadable")]
    MasterDbCorrupt(PathBuf),

    #[error("master database version {found} is unsupported (accepted range {min}..={max})")]
    UnsupportedVersion { found: u32, min: u32, max: u32 },

    #[error("object {0:?} has no configured limits")]
    NoLimitsConfigured(String),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to derive key from secret")]
    KeyDerivation,
    #[error("failed to decrypt data (wrong secret or corrupt file)")]
    Decryption,
    #[error("ciphertext is too short to contain a valid envelope")]
    Truncated,
}

pub type Result<T> = std::result::Result<T, Error>;
