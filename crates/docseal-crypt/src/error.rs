use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptError {
    /// Malformed, truncated or inconsistent `EncryptionInfo`/`EncryptedPackage` data.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// An algorithm, key size or version this crate does not implement.
    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),
    /// A parameter combination rejected while configuring new encryption.
    #[error("invalid encryption options: {0}")]
    InvalidOptions(String),
    /// An operation was called before its precondition (e.g. password confirmation) was met.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("invalid password")]
    InvalidPassword,
    #[error("integrity check failed")]
    IntegrityCheckFailed,
    #[error("EncryptedPackage reported invalid original size {total_size}")]
    EncryptedPackageSizeOverflow { total_size: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CryptError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        CryptError::InvalidFormat(msg.into())
    }
}
