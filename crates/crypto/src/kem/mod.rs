//! Key Encapsulation Mechanisms (KEM)
//!
//! Wrapping of key shares to a KAS public key. TDF3 key-access objects carry
//! the result as `wrappedKey` plus the sender's `ephemeralPublicKey`.

use crate::cipher::CipherError;
use crate::key_agreement::KeyAgreementError;
use crate::types::KeyMaterial;
use thiserror::Error;

pub mod ec;

/// KEM-related errors
#[derive(Debug, Error)]
pub enum KemError {
    #[error("Key agreement failed: {0}")]
    KeyAgreement(#[from] KeyAgreementError),

    #[error("Key wrapping failed: {0}")]
    Cipher(#[from] CipherError),

    #[error("Wrapped key too short: {0} bytes")]
    WrappedKeyTooShort(usize),

    #[error("Encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Trait for key encapsulation mechanisms
pub trait KeyEncapsulation {
    /// Recipient public key type
    type PublicKey;

    /// Recipient private key type
    type PrivateKey;

    /// Wrapped key type (ciphertext plus whatever the recipient needs)
    type WrappedKey;

    /// Wrap key material to a recipient public key
    fn wrap<K: KeyMaterial>(
        &self,
        key: &K,
        public_key: &Self::PublicKey,
    ) -> Result<Self::WrappedKey, KemError>;

    /// Unwrap key material with the recipient private key
    fn unwrap<K: KeyMaterial>(
        &self,
        wrapped: &Self::WrappedKey,
        private_key: &Self::PrivateKey,
    ) -> Result<K, KemError>;
}
