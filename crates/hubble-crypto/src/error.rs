//! Error types for cryptographic operations.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key material has an unusable length.
    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    /// No key registered for a version.
    #[error("key not found for version {0}")]
    KeyNotFound(i16),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed - wrong key or corrupted data.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

impl From<CryptoError> for hubble_core::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidInput(msg) => hubble_core::Error::InvalidInput(msg),
            other => hubble_core::Error::Crypto(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_not_found_display() {
        let err = CryptoError::KeyNotFound(3);
        assert_eq!(err.to_string(), "key not found for version 3");
    }

    #[test]
    fn test_into_core_error() {
        let err: hubble_core::Error = CryptoError::Decryption("bad tag".into()).into();
        assert!(matches!(err, hubble_core::Error::Crypto(_)));

        let err: hubble_core::Error = CryptoError::InvalidInput("empty".into()).into();
        assert!(matches!(err, hubble_core::Error::InvalidInput(_)));
    }
}
