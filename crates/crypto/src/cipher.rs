//! Symmetric cipher adapter
//!
//! A uniform contract over authenticated encryption: `encrypt` returns an
//! [`Envelope`] (IV, ciphertext and tag, also available concatenated as
//! `iv ‖ ciphertext ‖ tag`), and `decrypt` takes the concatenated form back.
//! AES-256-GCM is the only algorithm today; callers select it through
//! [`CipherAlgorithm`] so new ciphers slot in without changing call sites.
//!
//! GCM tags of 96 to 128 bits are supported. IVs are 12 bytes, or 3 bytes for
//! keys wrapped by legacy KAS deployments.

use crate::types::sealed::Sealed;
use crate::types::{KeyMaterial, SymmetricKey};
use aes_gcm::aead::consts::{U12, U13, U14, U15, U16, U3};
use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Standard GCM IV length
pub const GCM_IV_SIZE: usize = 12;

/// IV length used by legacy (`0.0.0`) KAS key wrapping
pub const LEGACY_IV_SIZE: usize = 3;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Integrity check failed: authentication tag rejected")]
    Integrity,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Unsupported IV length: {0} bytes")]
    InvalidIvLength(usize),

    #[error("Unsupported tag length: {0} bytes")]
    UnsupportedTagLength(usize),

    #[error("Envelope too short: {got} bytes, need at least {need}")]
    EnvelopeTooShort { got: usize, need: usize },

    #[error("Unknown cipher algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Unwrapped key has wrong length: {0}")]
    KeyImport(#[from] crate::types::KeyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherAlgorithm {
    #[default]
    Aes256Gcm,
}

impl CipherAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "AES-256-GCM",
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("AES-256-GCM") {
            Ok(CipherAlgorithm::Aes256Gcm)
        } else {
            Err(CipherError::UnknownAlgorithm(s.to_string()))
        }
    }
}

/// GCM tag length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagSize {
    Bits96,
    Bits104,
    Bits112,
    Bits120,
    #[default]
    Bits128,
}

impl TagSize {
    pub fn bytes(self) -> usize {
        match self {
            TagSize::Bits96 => 12,
            TagSize::Bits104 => 13,
            TagSize::Bits112 => 14,
            TagSize::Bits120 => 15,
            TagSize::Bits128 => 16,
        }
    }

    pub fn from_bytes(bytes: usize) -> Result<Self, CipherError> {
        match bytes {
            12 => Ok(TagSize::Bits96),
            13 => Ok(TagSize::Bits104),
            14 => Ok(TagSize::Bits112),
            15 => Ok(TagSize::Bits120),
            16 => Ok(TagSize::Bits128),
            other => Err(CipherError::UnsupportedTagLength(other)),
        }
    }
}

/// Output of one encryption
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

impl Envelope {
    /// `iv ‖ ciphertext ‖ tag`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.auth_tag);
        out
    }

    pub fn len(&self) -> usize {
        self.iv.len() + self.ciphertext.len() + self.auth_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split a concatenated envelope with the given IV and tag lengths
    pub fn from_bytes(bytes: &[u8], iv_len: usize, tag_len: usize) -> Result<Self, CipherError> {
        let need = iv_len + tag_len;
        if bytes.len() < need {
            return Err(CipherError::EnvelopeTooShort {
                got: bytes.len(),
                need,
            });
        }
        let (iv, rest) = bytes.split_at(iv_len);
        let (ciphertext, auth_tag) = rest.split_at(rest.len() - tag_len);
        Ok(Self {
            iv: iv.to_vec(),
            ciphertext: ciphertext.to_vec(),
            auth_tag: auth_tag.to_vec(),
        })
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("iv_len", &self.iv.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .field("tag_len", &self.auth_tag.len())
            .finish()
    }
}

pub trait SymmetricCipher: Send + Sync + fmt::Debug {
    fn algorithm(&self) -> CipherAlgorithm;

    /// IV length this cipher expects inside an envelope
    fn iv_length(&self) -> usize;

    fn tag_length(&self) -> usize;

    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        iv: &[u8],
    ) -> Result<Envelope, CipherError>;

    /// Decrypt with an explicit IV and `ciphertext ‖ tag`
    fn decrypt_parts(
        &self,
        iv: &[u8],
        ciphertext_and_tag: &[u8],
        key: &SymmetricKey,
    ) -> Result<Vec<u8>, CipherError>;

    /// GMAC: the tag over `data` as associated data with an empty message
    fn authenticate(
        &self,
        data: &[u8],
        key: &SymmetricKey,
        iv: &[u8],
    ) -> Result<Vec<u8>, CipherError>;

    /// Decrypt `iv ‖ ciphertext ‖ tag`
    fn decrypt(&self, envelope: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CipherError> {
        let need = self.iv_length() + self.tag_length();
        if envelope.len() < need {
            return Err(CipherError::EnvelopeTooShort {
                got: envelope.len(),
                need,
            });
        }
        let (iv, rest) = envelope.split_at(self.iv_length());
        self.decrypt_parts(iv, rest, key)
    }
}

/// Cipher instance for an algorithm with default parameters
pub fn cipher_for(algorithm: CipherAlgorithm) -> Box<dyn SymmetricCipher> {
    match algorithm {
        CipherAlgorithm::Aes256Gcm => Box::new(AesGcmCipher::default()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesGcmCipher {
    iv_length: usize,
    tag: TagSize,
}

impl Default for AesGcmCipher {
    fn default() -> Self {
        Self {
            iv_length: GCM_IV_SIZE,
            tag: TagSize::Bits128,
        }
    }
}

impl AesGcmCipher {
    pub fn new(tag: TagSize) -> Self {
        Self {
            iv_length: GCM_IV_SIZE,
            tag,
        }
    }

    /// Same cipher with a different envelope IV length (12 or 3)
    pub fn with_iv_length(mut self, iv_length: usize) -> Result<Self, CipherError> {
        match iv_length {
            GCM_IV_SIZE | LEGACY_IV_SIZE => {
                self.iv_length = iv_length;
                Ok(self)
            }
            other => Err(CipherError::InvalidIvLength(other)),
        }
    }

    pub fn tag_size(&self) -> TagSize {
        self.tag
    }
}

fn seal<A: Aead + KeyInit>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = A::new_from_slice(key).map_err(|_| CipherError::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::<A>::from_slice(iv), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)
}

fn open<A: Aead + KeyInit>(key: &[u8], iv: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = A::new_from_slice(key).map_err(|_| CipherError::Integrity)?;
    cipher
        .decrypt(Nonce::<A>::from_slice(iv), sealed)
        .map_err(|_| CipherError::Integrity)
}

fn mac<A: Aead + KeyInit>(key: &[u8], iv: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = A::new_from_slice(key).map_err(|_| CipherError::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::<A>::from_slice(iv), Payload { msg: &[], aad })
        .map_err(|_| CipherError::EncryptionFailed)
}

// Picks the concrete AES-GCM type for an (IV length, tag size) pair.
macro_rules! with_gcm {
    ($iv:expr, $tag:expr, $op:ident($($arg:expr),*)) => {
        match ($iv.len(), $tag) {
            (12, TagSize::Bits96) => $op::<AesGcm<Aes256, U12, U12>>($($arg),*),
            (12, TagSize::Bits104) => $op::<AesGcm<Aes256, U12, U13>>($($arg),*),
            (12, TagSize::Bits112) => $op::<AesGcm<Aes256, U12, U14>>($($arg),*),
            (12, TagSize::Bits120) => $op::<AesGcm<Aes256, U12, U15>>($($arg),*),
            (12, TagSize::Bits128) => $op::<AesGcm<Aes256, U12, U16>>($($arg),*),
            (3, TagSize::Bits96) => $op::<AesGcm<Aes256, U3, U12>>($($arg),*),
            (3, TagSize::Bits104) => $op::<AesGcm<Aes256, U3, U13>>($($arg),*),
            (3, TagSize::Bits112) => $op::<AesGcm<Aes256, U3, U14>>($($arg),*),
            (3, TagSize::Bits120) => $op::<AesGcm<Aes256, U3, U15>>($($arg),*),
            (3, TagSize::Bits128) => $op::<AesGcm<Aes256, U3, U16>>($($arg),*),
            (other, _) => Err(CipherError::InvalidIvLength(other)),
        }
    };
}

impl SymmetricCipher for AesGcmCipher {
    fn algorithm(&self) -> CipherAlgorithm {
        CipherAlgorithm::Aes256Gcm
    }

    fn iv_length(&self) -> usize {
        self.iv_length
    }

    fn tag_length(&self) -> usize {
        self.tag.bytes()
    }

    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        iv: &[u8],
    ) -> Result<Envelope, CipherError> {
        let mut sealed = with_gcm!(iv, self.tag, seal(key.secret_bytes(), iv, plaintext))?;
        let auth_tag = sealed.split_off(sealed.len() - self.tag.bytes());
        Ok(Envelope {
            iv: iv.to_vec(),
            ciphertext: sealed,
            auth_tag,
        })
    }

    fn decrypt_parts(
        &self,
        iv: &[u8],
        ciphertext_and_tag: &[u8],
        key: &SymmetricKey,
    ) -> Result<Vec<u8>, CipherError> {
        if ciphertext_and_tag.len() < self.tag.bytes() {
            return Err(CipherError::EnvelopeTooShort {
                got: ciphertext_and_tag.len(),
                need: self.tag.bytes(),
            });
        }
        with_gcm!(iv, self.tag, open(key.secret_bytes(), iv, ciphertext_and_tag))
    }

    fn authenticate(
        &self,
        data: &[u8],
        key: &SymmetricKey,
        iv: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        with_gcm!(iv, self.tag, mac(key.secret_bytes(), iv, data))
    }
}

/// Encrypt key material under a key-encryption key
pub fn wrap_key<K: KeyMaterial>(
    cipher: &dyn SymmetricCipher,
    key: &K,
    kek: &SymmetricKey,
    iv: &[u8],
) -> Result<Envelope, CipherError> {
    cipher.encrypt(key.secret_bytes(), kek, iv)
}

/// Decrypt and import key material wrapped by [`wrap_key`]
pub fn unwrap_key<K: KeyMaterial>(
    cipher: &dyn SymmetricCipher,
    iv: &[u8],
    ciphertext_and_tag: &[u8],
    kek: &SymmetricKey,
) -> Result<K, CipherError> {
    let bytes = zeroize::Zeroizing::new(cipher.decrypt_parts(iv, ciphertext_and_tag, kek)?);
    Ok(K::from_secret_bytes(&bytes)?)
}
