//! # hubble-crypto
//!
//! Sealing of stored secrets and key rotation for hubble.
//!
//! ## Primitives
//!
//! - **Symmetric cipher**: AES-GCM (128 or 256-bit keys), random 96-bit nonce
//!   prepended to the ciphertext
//! - **Key material**: hex-encoded AES keys, or SHA-256 of arbitrary material
//! - **Random generation**: thread-local CSPRNG
//!
//! ## Example
//!
//! ```rust
//! use hubble_core::TotpKey;
//! use hubble_crypto::Keyring;
//!
//! let keys = [
//!     TotpKey { version: 1, secret: "first-secret-material".into() },
//!     TotpKey { version: 2, secret: "second-secret-material".into() },
//! ];
//! let keyring = Keyring::new(keys.iter()).unwrap();
//!
//! let (version, sealed) = keyring.seal(b"JBSWY3DPEHPK3PXP").unwrap();
//! assert_eq!(version, 2);
//! assert_eq!(keyring.open(version, &sealed).unwrap().as_slice(), b"JBSWY3DPEHPK3PXP");
//! ```

pub mod cipher;
pub mod error;
pub mod keyring;
pub mod rotator;

pub use cipher::{open, seal, AesKey};
pub use error::{CryptoError, CryptoResult};
pub use keyring::{derive_key, Keyring};
pub use rotator::{RotationFailure, RotationSummary, Scope, SecretRotator};
