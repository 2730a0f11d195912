//! Integrity signatures with constant-time verification
//!
//! TDF3 segment and root signatures are carried as `base64(hex(sig))`:
//! - `HS256`: HMAC-SHA256 under the payload key
//! - `GMAC`: for a segment, the trailing 16-byte GCM tag of its encrypted
//!   bytes; for the root, a keyed AES-GCM tag
//!
//! The root signature is taken over the concatenation of every segment's hex
//! signature string, in order. In both modes it is keyed and covers the
//! whole concatenation, including the empty one.

use crate::cipher::{AesGcmCipher, CipherError, SymmetricCipher as _, GCM_IV_SIZE};
use crate::types::sealed::Sealed;
use crate::types::{KeyMaterial, SymmetricKey};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of the GCM tag a GMAC signature is taken from
pub const GMAC_TAG_SIZE: usize = 16;

/// Nonce for the GMAC root signature; each payload key signs one root
const ROOT_GMAC_NONCE: [u8; GCM_IV_SIZE] = [0u8; GCM_IV_SIZE];

#[derive(Debug, Error)]
pub enum HmacError {
    #[error("HMAC initialization failed")]
    InitFailed,

    #[error("HMAC verification failed")]
    VerificationFailed,

    #[error("Input too short for GMAC: {0} bytes")]
    GmacInputTooShort(usize),

    #[error("Unknown integrity algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Signature is not valid UTF-8 hex")]
    Encoding,

    #[error("GMAC computation failed: {0}")]
    Gmac(#[source] CipherError),
}

/// Signature algorithm for segment hashes and the root signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IntegrityAlgorithm {
    #[default]
    Hs256,
    Gmac,
}

impl IntegrityAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrityAlgorithm::Hs256 => "HS256",
            IntegrityAlgorithm::Gmac => "GMAC",
        }
    }

    /// Raw segment signature bytes over encrypted `data`
    pub fn sign(self, key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, HmacError> {
        match self {
            IntegrityAlgorithm::Hs256 => calculate_hmac(key.secret_bytes(), data),
            IntegrityAlgorithm::Gmac => {
                if data.len() < GMAC_TAG_SIZE {
                    return Err(HmacError::GmacInputTooShort(data.len()));
                }
                Ok(data[data.len() - GMAC_TAG_SIZE..].to_vec())
            }
        }
    }

    /// Lowercase hex of [`sign`](Self::sign)
    pub fn sign_hex(self, key: &SymmetricKey, data: &[u8]) -> Result<String, HmacError> {
        self.sign(key, data).map(hex::encode)
    }

    /// Keyed signature over an arbitrary message, used for the root
    pub fn sign_message(
        self,
        key: &SymmetricKey,
        message: &[u8],
    ) -> Result<Vec<u8>, HmacError> {
        match self {
            IntegrityAlgorithm::Hs256 => calculate_hmac(key.secret_bytes(), message),
            IntegrityAlgorithm::Gmac => AesGcmCipher::default()
                .authenticate(message, key, &ROOT_GMAC_NONCE)
                .map_err(HmacError::Gmac),
        }
    }
}

impl fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrityAlgorithm {
    type Err = HmacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HS256" => Ok(IntegrityAlgorithm::Hs256),
            "GMAC" => Ok(IntegrityAlgorithm::Gmac),
            _ => Err(HmacError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// HMAC-SHA256 over data
pub fn calculate_hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, HmacError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| HmacError::InitFailed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `base64(hex)` form stored in the manifest
pub fn encode_signature(hex_sig: &str) -> String {
    BASE64.encode(hex_sig.as_bytes())
}

/// Inverse of [`encode_signature`]
pub fn decode_signature(stored: &str) -> Result<String, HmacError> {
    let bytes = BASE64.decode(stored)?;
    String::from_utf8(bytes).map_err(|_| HmacError::Encoding)
}

/// Root signature over the ordered segment hex signatures
pub fn calculate_root_signature<S: AsRef<str>>(
    alg: IntegrityAlgorithm,
    key: &SymmetricKey,
    segment_hex_sigs: &[S],
) -> Result<String, HmacError> {
    let aggregate = aggregate_hash(segment_hex_sigs);
    let sig = alg.sign_message(key, aggregate.as_bytes())?;
    Ok(encode_signature(&hex::encode(sig)))
}

/// Constant-time check of a stored root signature
pub fn verify_root_signature<S: AsRef<str>>(
    alg: IntegrityAlgorithm,
    key: &SymmetricKey,
    segment_hex_sigs: &[S],
    expected: &str,
) -> Result<(), HmacError> {
    let calculated = calculate_root_signature(alg, key, segment_hex_sigs)?;
    verify_encoded(&calculated, expected)
}

/// Constant-time check of one segment's stored hash
pub fn verify_segment_signature(
    alg: IntegrityAlgorithm,
    key: &SymmetricKey,
    encrypted_segment: &[u8],
    expected: &str,
) -> Result<String, HmacError> {
    let hex_sig = alg.sign_hex(key, encrypted_segment)?;
    verify_encoded(&encode_signature(&hex_sig), expected)?;
    Ok(hex_sig)
}

fn verify_encoded(calculated: &str, expected: &str) -> Result<(), HmacError> {
    if calculated.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(HmacError::VerificationFailed)
    }
}

fn aggregate_hash<S: AsRef<str>>(segment_hex_sigs: &[S]) -> String {
    segment_hex_sigs.iter().map(AsRef::as_ref).collect()
}

/// Key-access policy binding: `base64(hex(HMAC(key, base64(policy_json))))`
pub fn calculate_policy_binding<K: KeyMaterial>(
    policy_json: &str,
    key: &K,
) -> Result<String, HmacError> {
    let policy_base64 = BASE64.encode(policy_json);
    let hmac_result = calculate_hmac(key.secret_bytes(), policy_base64.as_bytes())?;
    Ok(encode_signature(&hex::encode(hmac_result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SymmetricKey {
        SymmetricKey::from_slice(&[0u8; 32]).unwrap()
    }

    #[test]
    fn test_calculate_hmac() {
        let result = calculate_hmac(b"test_key_32_bytes_long_for_hmac!", b"test data").unwrap();
        assert_eq!(result.len(), 32);
    }

    #[test]
    fn test_hs256_known_vector() {
        // RFC 4231 test case 2
        let mac = calculate_hmac(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_gmac_takes_trailing_tag() {
        let data: Vec<u8> = (0u8..40).collect();
        let sig = IntegrityAlgorithm::Gmac.sign(&key(), &data).unwrap();
        assert_eq!(sig, (24u8..40).collect::<Vec<_>>());
        assert!(IntegrityAlgorithm::Gmac.sign(&key(), &[0u8; 8]).is_err());
    }

    #[test]
    fn test_root_signature_roundtrip() {
        let sigs = vec!["0a0b".to_string(), "0c0d".to_string()];
        for alg in [IntegrityAlgorithm::Hs256, IntegrityAlgorithm::Gmac] {
            let root = calculate_root_signature(alg, &key(), &["00".repeat(16)]).unwrap();
            assert!(verify_root_signature(alg, &key(), &["00".repeat(16)], &root).is_ok());
        }
        let root = calculate_root_signature(IntegrityAlgorithm::Hs256, &key(), &sigs).unwrap();
        assert!(verify_root_signature(IntegrityAlgorithm::Hs256, &key(), &sigs, &root).is_ok());
    }

    #[test]
    fn test_gmac_root_is_keyed() {
        let sigs = ["aa".repeat(16), "bb".repeat(16)];
        let root = calculate_root_signature(IntegrityAlgorithm::Gmac, &key(), &sigs).unwrap();
        let other_key = SymmetricKey::from_slice(&[7u8; 32]).unwrap();
        assert_ne!(
            root,
            calculate_root_signature(IntegrityAlgorithm::Gmac, &other_key, &sigs).unwrap()
        );
        assert_eq!(decode_signature(&root).unwrap().len(), 2 * GMAC_TAG_SIZE);
        // the root tag is not the tail of the aggregate
        assert_ne!(decode_signature(&root).unwrap(), sigs[1]);
    }

    #[test]
    fn test_gmac_root_covers_every_segment() {
        let sigs = ["aa".repeat(16), "bb".repeat(16), "cc".repeat(16)];
        let root = calculate_root_signature(IntegrityAlgorithm::Gmac, &key(), &sigs).unwrap();
        let mut duplicated = sigs.clone();
        duplicated[1] = duplicated[0].clone();
        assert!(matches!(
            verify_root_signature(IntegrityAlgorithm::Gmac, &key(), &duplicated, &root),
            Err(HmacError::VerificationFailed)
        ));
        let mut first_changed = sigs.clone();
        first_changed[0] = "dd".repeat(16);
        assert!(
            verify_root_signature(IntegrityAlgorithm::Gmac, &key(), &first_changed, &root).is_err()
        );
    }

    #[test]
    fn test_root_over_no_segments() {
        let none: [&str; 0] = [];
        for alg in [IntegrityAlgorithm::Hs256, IntegrityAlgorithm::Gmac] {
            let root = calculate_root_signature(alg, &key(), &none).unwrap();
            assert!(verify_root_signature(alg, &key(), &none, &root).is_ok());
        }
    }

    #[test]
    fn test_root_signature_detects_reorder() {
        let sigs = ["0a0b", "0c0d"];
        let root = calculate_root_signature(IntegrityAlgorithm::Hs256, &key(), &sigs).unwrap();
        let swapped = ["0c0d", "0a0b"];
        assert!(matches!(
            verify_root_signature(IntegrityAlgorithm::Hs256, &key(), &swapped, &root),
            Err(HmacError::VerificationFailed)
        ));
    }

    #[test]
    fn test_segment_signature_is_base64_hex() {
        let stored = encode_signature(
            &IntegrityAlgorithm::Hs256
                .sign_hex(&key(), b"segment")
                .unwrap(),
        );
        let hex_sig = decode_signature(&stored).unwrap();
        assert_eq!(hex_sig.len(), 64);
        assert!(hex_sig.chars().all(|c| c.is_ascii_hexdigit()));

        let checked =
            verify_segment_signature(IntegrityAlgorithm::Hs256, &key(), b"segment", &stored)
                .unwrap();
        assert_eq!(checked, hex_sig);
        assert!(
            verify_segment_signature(IntegrityAlgorithm::Hs256, &key(), b"segmenT", &stored)
                .is_err()
        );
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("HS256".parse::<IntegrityAlgorithm>().unwrap(), IntegrityAlgorithm::Hs256);
        assert_eq!("gmac".parse::<IntegrityAlgorithm>().unwrap(), IntegrityAlgorithm::Gmac);
        assert!("RS256".parse::<IntegrityAlgorithm>().is_err());
        assert_eq!(IntegrityAlgorithm::default().to_string(), "HS256");
    }

    #[test]
    fn test_policy_binding() {
        let policy = r#"{"body":{"dataAttributes":[]}}"#;
        let binding = calculate_policy_binding(policy, &key()).unwrap();
        let hex_sig = decode_signature(&binding).unwrap();
        assert_eq!(hex_sig.len(), 64);
        assert_eq!(binding, calculate_policy_binding(policy, &key()).unwrap());
    }
}
