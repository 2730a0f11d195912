//! ECDH key agreement and HKDF derivation
//!
//! Both NanoTDF and TDF3 derive symmetric keys the same way:
//! `HKDF-SHA256(salt, ECDH(local, remote), info = "")` expanded to 32 bytes.
//! The salt is `SHA256("L1" ‖ version)` for NanoTDF and `SHA256("TDF")` for
//! TDF3 key shares and KAS rewrap responses.

use crate::random::RandomSource;
use crate::types::{SymmetricKey, KEY_SIZE};
use hkdf::Hkdf;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use p256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;
use zeroize::Zeroizing;

/// NanoTDF magic prefix hashed into the salt
const NANOTDF_MAGIC: &[u8; 2] = b"L1";

const KEYGEN_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum KeyAgreementError {
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(EcCurve),

    #[error("Key generation failed")]
    KeyGen,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("PEM parse error: {0}")]
    Pem(String),

    #[error("Curve mismatch: local {local}, remote {remote}")]
    CurveMismatch { local: EcCurve, remote: EcCurve },

    #[error("Key derivation failed")]
    Derivation,

    #[error("Signature error")]
    Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EcCurve {
    #[default]
    P256,
    P384,
    P521,
    Secp256k1,
}

impl EcCurve {
    pub fn name(self) -> &'static str {
        match self {
            EcCurve::P256 => "secp256r1",
            EcCurve::P384 => "secp384r1",
            EcCurve::P521 => "secp521r1",
            EcCurve::Secp256k1 => "secp256k1",
        }
    }

    /// Compressed SEC1 point length
    pub fn compressed_point_size(self) -> usize {
        match self {
            EcCurve::P256 | EcCurve::Secp256k1 => 33,
            EcCurve::P384 => 49,
            EcCurve::P521 => 67,
        }
    }

    /// Raw `r ‖ s` ECDSA signature length
    pub fn signature_size(self) -> usize {
        match self {
            EcCurve::P256 | EcCurve::Secp256k1 => 64,
            EcCurve::P384 => 96,
            EcCurve::P521 => 132,
        }
    }

    fn ensure_supported(self) -> Result<(), KeyAgreementError> {
        match self {
            EcCurve::P256 => Ok(()),
            other => Err(KeyAgreementError::UnsupportedCurve(other)),
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ephemeral or long-lived EC key pair
#[derive(Clone)]
pub struct KeyPair {
    curve: EcCurve,
    secret: SecretKey,
}

impl KeyPair {
    pub fn generate(curve: EcCurve, rng: &dyn RandomSource) -> Result<Self, KeyAgreementError> {
        curve.ensure_supported()?;
        for _ in 0..KEYGEN_ATTEMPTS {
            let mut scalar = Zeroizing::new([0u8; KEY_SIZE]);
            rng.fill_bytes(scalar.as_mut());
            if let Ok(secret) = SecretKey::from_slice(scalar.as_ref()) {
                return Ok(Self { curve, secret });
            }
        }
        Err(KeyAgreementError::KeyGen)
    }

    pub fn curve(&self) -> EcCurve {
        self.curve
    }

    pub fn public_key(&self) -> PublicKeyHandle {
        PublicKeyHandle {
            curve: self.curve,
            key: self.secret.public_key(),
        }
    }

    /// SubjectPublicKeyInfo PEM
    pub fn public_key_pem(&self) -> Result<String, KeyAgreementError> {
        self.public_key().to_pem()
    }

    pub fn public_key_compressed(&self) -> Vec<u8> {
        self.public_key().to_compressed()
    }

    /// ECDSA-SHA256 signature as raw `r ‖ s`
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyAgreementError> {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key
            .try_sign(message)
            .map_err(|_| KeyAgreementError::Signature)?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

/// Imported remote public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyHandle {
    curve: EcCurve,
    key: PublicKey,
}

impl PublicKeyHandle {
    /// Import a SubjectPublicKeyInfo PEM or an X.509 certificate PEM
    pub fn from_pem(pem: &str) -> Result<Self, KeyAgreementError> {
        let spki_pem = extract_public_key_pem(pem)?;
        let key = PublicKey::from_public_key_pem(&spki_pem)
            .map_err(|e| KeyAgreementError::InvalidPublicKey(e.to_string()))?;
        Ok(Self {
            curve: EcCurve::P256,
            key,
        })
    }

    /// Import a SEC1 point (compressed or uncompressed)
    pub fn from_compressed(curve: EcCurve, bytes: &[u8]) -> Result<Self, KeyAgreementError> {
        curve.ensure_supported()?;
        let key = PublicKey::from_sec1_bytes(bytes)
            .map_err(|e| KeyAgreementError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { curve, key })
    }

    pub fn curve(&self) -> EcCurve {
        self.curve
    }

    pub fn to_pem(&self) -> Result<String, KeyAgreementError> {
        self.key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyAgreementError::Pem(e.to_string()))
    }

    pub fn to_compressed(&self) -> Vec<u8> {
        self.key.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Check an ECDSA-SHA256 `r ‖ s` signature made by this key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), KeyAgreementError> {
        let signature =
            Signature::from_slice(signature).map_err(|_| KeyAgreementError::Signature)?;
        VerifyingKey::from(&self.key)
            .verify(message, &signature)
            .map_err(|_| KeyAgreementError::Signature)
    }
}

/// `HKDF-SHA256(salt, ECDH(local, remote))` with empty info
pub fn derive_shared_key(
    local: &KeyPair,
    remote: &PublicKeyHandle,
    salt: &[u8],
) -> Result<SymmetricKey, KeyAgreementError> {
    if local.curve != remote.curve {
        return Err(KeyAgreementError::CurveMismatch {
            local: local.curve,
            remote: remote.curve,
        });
    }
    let shared = p256::ecdh::diffie_hellman(local.secret.to_nonzero_scalar(), remote.key.as_affine());
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared.raw_secret_bytes());
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(&[], okm.as_mut())
        .map_err(|_| KeyAgreementError::Derivation)?;
    SymmetricKey::from_slice(okm.as_ref()).map_err(|_| KeyAgreementError::Derivation)
}

/// `SHA256("L1" ‖ version)` for a NanoTDF version byte
pub fn nanotdf_salt(version: u8) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(NANOTDF_MAGIC);
    hasher.update([version]);
    hasher.finalize().into()
}

/// `SHA256("TDF")`
pub fn tdf_salt() -> [u8; 32] {
    Sha256::digest(b"TDF").into()
}

/// Normalize a public key PEM or reduce a certificate PEM to its public key
pub fn extract_public_key_pem(input: &str) -> Result<String, KeyAgreementError> {
    let parsed = pem::parse(input.trim()).map_err(|e| KeyAgreementError::Pem(e.to_string()))?;
    let spki_der = match parsed.tag() {
        "PUBLIC KEY" => parsed.contents().to_vec(),
        "CERTIFICATE" => certificate_spki(parsed.contents())?,
        other => {
            return Err(KeyAgreementError::Pem(format!(
                "unexpected PEM block: {other}"
            )))
        }
    };
    let key = PublicKey::from_public_key_der(&spki_der)
        .map_err(|e| KeyAgreementError::InvalidPublicKey(e.to_string()))?;
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeyAgreementError::Pem(e.to_string()))
}

fn certificate_spki(der: &[u8]) -> Result<Vec<u8>, KeyAgreementError> {
    let certificate = Certificate::from_der(der)
        .map_err(|e| KeyAgreementError::Pem(format!("malformed certificate: {e}")))?;
    certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| KeyAgreementError::Pem(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;

    fn der(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        if content.len() < 0x80 {
            out.push(content.len() as u8);
        } else if content.len() <= 0xFF {
            out.extend_from_slice(&[0x81, content.len() as u8]);
        } else {
            out.push(0x82);
            out.extend_from_slice(&(content.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(content);
        out
    }

    fn certificate(spki_der: &[u8]) -> String {
        let ecdsa_with_sha256 =
            der(0x30, &der(0x06, &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02]));
        let common_name = der(0x30, &[der(0x06, &[0x55, 0x04, 0x03]), der(0x0C, b"kas")].concat());
        let name = der(0x30, &der(0x31, &common_name));
        let validity = der(
            0x30,
            &[der(0x17, b"250101000000Z"), der(0x17, b"350101000000Z")].concat(),
        );

        let mut tbs = Vec::new();
        tbs.extend(der(0xA0, &der(0x02, &[2])));
        tbs.extend(der(0x02, &[1]));
        tbs.extend_from_slice(&ecdsa_with_sha256);
        tbs.extend_from_slice(&name);
        tbs.extend(validity);
        tbs.extend_from_slice(&name);
        tbs.extend_from_slice(spki_der);
        let mut cert = der(0x30, &tbs);
        cert.extend(ecdsa_with_sha256);
        cert.extend(der(0x03, &[0, 0x30, 0x00]));
        let cert = der(0x30, &cert);
        pem::encode(&pem::Pem::new("CERTIFICATE", cert))
    }

    #[test]
    fn test_shared_key_agrees() {
        let rng = SeededRandom::new(11);
        let alice = KeyPair::generate(EcCurve::P256, &rng).unwrap();
        let bob = KeyPair::generate(EcCurve::P256, &rng).unwrap();
        let salt = nanotdf_salt(b'L');

        let a = derive_shared_key(&alice, &bob.public_key(), &salt).unwrap();
        let b = derive_shared_key(&bob, &alice.public_key(), &salt).unwrap();
        assert_eq!(a, b);

        let other_salt = derive_shared_key(&alice, &bob.public_key(), &tdf_salt()).unwrap();
        assert_ne!(a, other_salt);
    }

    #[test]
    fn test_salts_differ_by_version() {
        assert_ne!(nanotdf_salt(b'L'), nanotdf_salt(b'M'));
        assert_eq!(nanotdf_salt(b'L'), <[u8; 32]>::from(Sha256::digest(b"L1L")));
    }

    #[test]
    fn test_unsupported_curve() {
        let rng = SeededRandom::new(1);
        assert!(matches!(
            KeyPair::generate(EcCurve::P384, &rng),
            Err(KeyAgreementError::UnsupportedCurve(EcCurve::P384))
        ));
    }

    #[test]
    fn test_pem_and_compressed_forms() {
        let pair = KeyPair::generate(EcCurve::P256, &SeededRandom::new(5)).unwrap();
        let pem = pair.public_key_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let from_pem = PublicKeyHandle::from_pem(&pem).unwrap();
        let compressed = pair.public_key_compressed();
        assert_eq!(compressed.len(), 33);
        let from_point = PublicKeyHandle::from_compressed(EcCurve::P256, &compressed).unwrap();
        assert_eq!(from_pem, from_point);
        assert!(PublicKeyHandle::from_pem("not a pem").is_err());
    }

    #[test]
    fn test_certificate_is_reduced_to_public_key() {
        let pair = KeyPair::generate(EcCurve::P256, &SeededRandom::new(6)).unwrap();
        let pem = pair.public_key_pem().unwrap();
        let spki = pem::parse(&pem).unwrap().contents().to_vec();
        let cert = certificate(&spki);

        assert_eq!(extract_public_key_pem(&cert).unwrap(), pem);
        assert_eq!(PublicKeyHandle::from_pem(&cert).unwrap(), pair.public_key());
    }

    #[test]
    fn test_truncated_certificate_is_rejected() {
        let pair = KeyPair::generate(EcCurve::P256, &SeededRandom::new(7)).unwrap();
        let spki = pem::parse(pair.public_key_pem().unwrap()).unwrap().contents().to_vec();
        let full = pem::parse(certificate(&spki)).unwrap().contents().to_vec();
        let truncated = full[..full.len() - 4].to_vec();
        let truncated = pem::encode(&pem::Pem::new("CERTIFICATE", truncated));

        assert!(matches!(
            extract_public_key_pem(&truncated),
            Err(KeyAgreementError::Pem(_))
        ));
    }

    #[test]
    fn test_signatures() {
        let pair = KeyPair::generate(EcCurve::P256, &SeededRandom::new(9)).unwrap();
        let sig = pair.sign(b"policy").unwrap();
        assert_eq!(sig.len(), EcCurve::P256.signature_size());
        assert!(pair.public_key().verify(b"policy", &sig).is_ok());
        assert!(pair.public_key().verify(b"policY", &sig).is_err());
    }
}
