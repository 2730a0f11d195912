//! Zeroizing key handles
//!
//! Key bytes never leave this crate: callers hold opaque handles and pass
//! them back into cipher, signature and split operations. Memory is cleared
//! on drop, equality is constant-time, and `Debug` is redacted.

use crate::random::RandomSource;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key length
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

pub(crate) mod sealed {
    pub trait Sealed {
        fn secret_bytes(&self) -> &[u8];
        fn from_secret_bytes(bytes: &[u8]) -> Result<Self, super::KeyError>
        where
            Self: Sized;
    }
}

/// Secret key material that can be wrapped, signed with, or split
pub trait KeyMaterial: sealed::Sealed {}

fn copy_key(bytes: &[u8]) -> Result<[u8; KEY_SIZE], KeyError> {
    <[u8; KEY_SIZE]>::try_from(bytes).map_err(|_| KeyError::InvalidLength {
        expected: KEY_SIZE,
        got: bytes.len(),
    })
}

/// Symmetric key produced by generation, key agreement or unwrap
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn generate(rng: &dyn RandomSource) -> Self {
        let mut key = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut key);
        SymmetricKey(key)
    }

    /// Import raw key bytes received from a trusted unwrap
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        copy_key(bytes).map(SymmetricKey)
    }
}

impl sealed::Sealed for SymmetricKey {
    fn secret_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        Self::from_slice(bytes)
    }
}

impl KeyMaterial for SymmetricKey {}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// One XOR share of a split key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare([u8; KEY_SIZE]);

impl KeyShare {
    pub(crate) fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        KeyShare(bytes)
    }

    pub(crate) fn as_array(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl sealed::Sealed for KeyShare {
    fn secret_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        copy_key(bytes).map(KeyShare)
    }
}

impl KeyMaterial for KeyShare {}

impl PartialEq for KeyShare {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for KeyShare {}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyShare([REDACTED])")
    }
}
