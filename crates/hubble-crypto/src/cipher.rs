//! AES-GCM sealing with a prepended nonce.
//!
//! Sealed form: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// An AES key of 128 or 256 bits.
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey(pub(crate) Vec<u8>);

impl AesKey {
    pub fn new(bytes: Vec<u8>) -> CryptoResult<Self> {
        match bytes.len() {
            16 | 32 => Ok(Self(bytes)),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for AesKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AesKey({} bits)", self.0.len() * 8)
    }
}

/// Generate a random nonce (12 bytes).
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Encrypt `plaintext` under a fresh nonce and return `nonce || ciphertext`.
pub fn seal(key: &AesKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    if plaintext.is_empty() {
        return Err(CryptoError::InvalidInput(
            "plain text must not be empty".to_string(),
        ));
    }

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = match key.0.len() {
        16 => Aes128Gcm::new_from_slice(&key.0)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?
            .encrypt(nonce, plaintext),
        _ => Aes256Gcm::new_from_slice(&key.0)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?
            .encrypt(nonce, plaintext),
    }
    .map_err(|_| CryptoError::Encryption("AES-GCM encryption failed".into()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Split off the nonce and decrypt.
pub fn open(key: &AesKey, sealed: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if sealed.is_empty() {
        return Err(CryptoError::InvalidInput(
            "cipher text must not be empty".to_string(),
        ));
    }
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decryption("cipher text too short".to_string()));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce);
    let plaintext = match key.0.len() {
        16 => Aes128Gcm::new_from_slice(&key.0)
            .map_err(|_| CryptoError::Decryption("Invalid key".to_string()))?
            .decrypt(nonce, ciphertext),
        _ => Aes256Gcm::new_from_slice(&key.0)
            .map_err(|_| CryptoError::Decryption("Invalid key".to_string()))?
            .decrypt(nonce, ciphertext),
    }
    .map_err(|_| CryptoError::Decryption("AES-GCM decryption failed".to_string()))?;

    Ok(Zeroizing::new(plaintext))
}
