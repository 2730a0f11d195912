//! OpenTDF Cryptographic Operations
//!
//! This crate provides the cryptographic capability the OpenTDF client needs:
//! - Zeroizing key handles that never expose raw bytes outside this crate
//! - AES-256-GCM with 12-byte or legacy 3-byte IVs and 96-128 bit tags
//! - ECDH (P-256) and HKDF-SHA256 key agreement with version salts
//! - XOR key splitting across multiple key-access servers
//! - HS256 and GMAC integrity signatures with constant-time verification
//! - ECDH key encapsulation of key shares
//!
//! All randomness comes from an injectable [`RandomSource`].
//!
//! # Example
//!
//! ```
//! use opentdf_crypto::{AesGcmCipher, OsRandom, SymmetricCipher, SymmetricKey};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let key = SymmetricKey::generate(&OsRandom);
//! let cipher = AesGcmCipher::default();
//! let envelope = cipher.encrypt(b"sensitive information", &key, &[0u8; 12])?;
//! let plaintext = cipher.decrypt(&envelope.to_bytes(), &key)?;
//! assert_eq!(plaintext, b"sensitive information");
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod hmac;
pub mod kem;
pub mod key_agreement;
pub mod key_split;
pub mod random;
pub mod types;

use thiserror::Error;

pub use cipher::{
    cipher_for, unwrap_key, wrap_key, AesGcmCipher, CipherAlgorithm, CipherError,
    Envelope, SymmetricCipher, TagSize, GCM_IV_SIZE, LEGACY_IV_SIZE,
};
pub use hmac::{
    calculate_hmac, calculate_policy_binding, calculate_root_signature, decode_signature,
    encode_signature, verify_root_signature, verify_segment_signature, HmacError,
    IntegrityAlgorithm,
};
pub use kem::ec::{EcdhKem, WrappedShare};
pub use kem::{KemError, KeyEncapsulation};
pub use key_agreement::{
    derive_shared_key, extract_public_key_pem, nanotdf_salt, tdf_salt, EcCurve,
    KeyAgreementError, KeyPair, PublicKeyHandle,
};
pub use key_split::{merge_shares, KeySplitError};
pub use random::{os_random, random_bytes, OsRandom, RandomSource, SeededRandom, SharedRandom};
pub use types::{KeyError, KeyMaterial, KeyShare, SymmetricKey, KEY_SIZE};

/// Any failure from this crate
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    KeyAgreement(#[from] KeyAgreementError),

    #[error(transparent)]
    KeySplit(#[from] KeySplitError),

    #[error(transparent)]
    Hmac(#[from] HmacError),

    #[error(transparent)]
    Kem(#[from] KemError),

    #[error(transparent)]
    Key(#[from] KeyError),
}
