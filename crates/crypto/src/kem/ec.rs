//! Elliptic curve key encapsulation
//!
//! 1. Generate an ephemeral key pair on the recipient's curve
//! 2. ECDH with the recipient public key, HKDF-SHA256 with `SHA256("TDF")`
//! 3. AES-256-GCM wrap of the key material under a fresh 12-byte IV
//!
//! The wrapped form is `iv ‖ ciphertext ‖ tag` plus the ephemeral public key PEM.

use super::{KemError, KeyEncapsulation};
use crate::cipher::{unwrap_key, wrap_key, AesGcmCipher, SymmetricCipher, GCM_IV_SIZE};
use crate::key_agreement::{derive_shared_key, tdf_salt, EcCurve, KeyPair, PublicKeyHandle};
use crate::random::{random_bytes, SharedRandom};
use crate::types::KeyMaterial;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Output of [`EcdhKem::wrap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedShare {
    pub ephemeral_public_key_pem: String,
    /// `iv ‖ ciphertext ‖ tag`
    pub wrapped_key: Vec<u8>,
}

impl WrappedShare {
    pub fn wrapped_key_base64(&self) -> String {
        BASE64.encode(&self.wrapped_key)
    }

    pub fn from_base64(
        ephemeral_public_key_pem: impl Into<String>,
        wrapped_key_b64: &str,
    ) -> Result<Self, KemError> {
        Ok(Self {
            ephemeral_public_key_pem: ephemeral_public_key_pem.into(),
            wrapped_key: BASE64.decode(wrapped_key_b64)?,
        })
    }
}

/// ECDH key encapsulation mechanism
#[derive(Clone)]
pub struct EcdhKem {
    curve: EcCurve,
    rng: SharedRandom,
}

impl EcdhKem {
    pub fn new(curve: EcCurve, rng: SharedRandom) -> Self {
        Self { curve, rng }
    }

    pub fn curve(&self) -> EcCurve {
        self.curve
    }
}

impl std::fmt::Debug for EcdhKem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKem")
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

impl KeyEncapsulation for EcdhKem {
    type PublicKey = PublicKeyHandle;
    type PrivateKey = KeyPair;
    type WrappedKey = WrappedShare;

    fn wrap<K: KeyMaterial>(
        &self,
        key: &K,
        public_key: &PublicKeyHandle,
    ) -> Result<WrappedShare, KemError> {
        let ephemeral = KeyPair::generate(self.curve, self.rng.as_ref())?;
        let kek = derive_shared_key(&ephemeral, public_key, &tdf_salt())?;
        let iv = random_bytes(self.rng.as_ref(), GCM_IV_SIZE);
        let envelope = wrap_key(&AesGcmCipher::default(), key, &kek, &iv)?;
        Ok(WrappedShare {
            ephemeral_public_key_pem: ephemeral.public_key_pem()?,
            wrapped_key: envelope.to_bytes(),
        })
    }

    fn unwrap<K: KeyMaterial>(
        &self,
        wrapped: &WrappedShare,
        private_key: &KeyPair,
    ) -> Result<K, KemError> {
        let cipher = AesGcmCipher::default();
        if wrapped.wrapped_key.len() < cipher.iv_length() + cipher.tag_length() {
            return Err(KemError::WrappedKeyTooShort(wrapped.wrapped_key.len()));
        }
        let sender = PublicKeyHandle::from_pem(&wrapped.ephemeral_public_key_pem)?;
        let kek = derive_shared_key(private_key, &sender, &tdf_salt())?;
        let (iv, sealed) = wrapped.wrapped_key.split_at(cipher.iv_length());
        Ok(unwrap_key(&cipher, iv, sealed, &kek)?)
    }
}
