//! Versioned TOTP sealing keys.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use hubble_core::{Config, TotpKey};

use crate::cipher::AesKey;
use crate::error::{CryptoError, CryptoResult};

/// Turn configured key material into an AES key.
///
/// Hex material decoding to 16 or 32 bytes is used as is; anything else is
/// hashed with SHA-256 into a 256-bit key.
pub fn derive_key(material: &str) -> AesKey {
    if let Ok(bytes) = hex::decode(material) {
        if let Ok(key) = AesKey::new(bytes) {
            return key;
        }
    }
    AesKey(Sha256::digest(material.as_bytes()).to_vec())
}

/// All known key versions, newest last.
#[derive(Debug, Clone)]
pub struct Keyring {
    keys: BTreeMap<i16, AesKey>,
}

impl Keyring {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a TotpKey>) -> CryptoResult<Self> {
        let keys: BTreeMap<i16, AesKey> = keys
            .into_iter()
            .map(|k| (k.version, derive_key(&k.secret)))
            .collect();
        if keys.is_empty() {
            return Err(CryptoError::InvalidInput("no TOTP keys configured".to_string()));
        }
        Ok(Self { keys })
    }

    /// Keyring from a validated configuration.
    pub fn from_config(config: &Config) -> CryptoResult<Self> {
        Self::new(config.totp_keys())
    }

    pub fn latest_version(&self) -> i16 {
        self.keys.keys().next_back().copied().unwrap_or_default()
    }

    pub fn latest(&self) -> CryptoResult<(i16, &AesKey)> {
        self.keys
            .iter()
            .next_back()
            .map(|(v, k)| (*v, k))
            .ok_or(CryptoError::KeyNotFound(0))
    }

    pub fn get(&self, version: i16) -> Option<&AesKey> {
        self.keys.get(&version)
    }

    /// Seal with the newest key, returning `(version, sealed)`.
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<(i16, Vec<u8>)> {
        let (version, key) = self.latest()?;
        Ok((version, crate::cipher::seal(key, plaintext)?))
    }

    /// Open material sealed under `version`.
    pub fn open(&self, version: i16, sealed: &[u8]) -> CryptoResult<zeroize::Zeroizing<Vec<u8>>> {
        let key = self.get(version).ok_or(CryptoError::KeyNotFound(version))?;
        crate::cipher::open(key, sealed)
    }
}
