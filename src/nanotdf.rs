//! NanoTDF client
//!
//! # Encrypt
//!
//! 1. Fetch the KAS public key (once per client)
//! 2. Generate an ephemeral P-256 key pair
//! 3. `ECDH(ephemeral, kas) + HKDF(SHA256("L1" ‖ version))` → payload key
//! 4. Bind the policy to the key (GMAC tag or ECDSA signature)
//! 5. AES-256-GCM encrypt the payload under IV counter 1
//!
//! # Decrypt
//!
//! Parse the container, rewrap the header with its KAS, decrypt. A policy
//! binding mismatch surfaces as a decrypt failure unless eager binding
//! verification is enabled.

use crate::auth::AuthProvider;
use crate::client::{check_policy, Sealed, TdfClient};
use crate::config::ClientConfig;
use crate::error::TdfError;
use crate::kas::{ClientVersion, KasClient};
use async_trait::async_trait;
use opentdf_crypto::{
    derive_shared_key, nanotdf_salt, AesGcmCipher, CipherError, EcCurve, KeyPair,
    PublicKeyHandle, RandomSource, SharedRandom, SymmetricCipher as _, SymmetricKey, TagSize,
};
use opentdf_protocol::binary::U24_MAX;
use opentdf_protocol::nanotdf::{
    nonce_from_counter, EccAndBindingMode, EccMode, Header, NanoTdf, NanoTdfVersion, Payload,
    Policy as HeaderPolicy, PolicyBindingMode, PolicyBody, ResourceLocator,
    SymmetricAndPayloadConfig, SymmetricCipher, GMAC_BINDING_SIZE, PAYLOAD_IV_SIZE,
    POLICY_IV_COUNTER,
};
use opentdf_protocol::{BinaryWrite, Policy};
use std::sync::Arc;
use tracing::debug;

/// IV counter of the first payload under a fresh key
pub(crate) const FIRST_PAYLOAD_COUNTER: u32 = 1;

/// How the policy travels inside the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyEncoding {
    #[default]
    Plaintext,
    /// Encrypted with the payload key under the reserved IV 0
    Encrypted,
}

/// Header-building parameters shared by the single-shot and dataset clients
#[derive(Debug, Clone)]
pub(crate) struct HeaderOptions {
    pub kas_url: String,
    pub version: NanoTdfVersion,
    pub binding_mode: PolicyBindingMode,
    pub policy_encoding: PolicyEncoding,
    pub tag: TagSize,
}

impl HeaderOptions {
    pub(crate) fn from_config(config: &ClientConfig) -> Result<Self, TdfError> {
        Ok(Self {
            kas_url: config.kas_url.clone(),
            version: NanoTdfVersion::default(),
            binding_mode: PolicyBindingMode::default(),
            policy_encoding: PolicyEncoding::default(),
            tag: config.tag_size()?,
        })
    }
}

/// Negotiate a payload key with the KAS public key and build the header for it
pub(crate) fn build_header(
    options: &HeaderOptions,
    kas_public_key: &str,
    policy: &Policy,
    rng: &dyn RandomSource,
) -> Result<(Header, SymmetricKey), TdfError> {
    let kas_key = PublicKeyHandle::from_pem(kas_public_key).map_err(|e| TdfError::KeyAccess {
        reason: format!("KAS public key for {} is unusable", options.kas_url),
        source: Some(crate::error::KasError::PemParse(e)),
    })?;
    let locator = ResourceLocator::from_url(&options.kas_url)
        .map_err(|e| TdfError::key_access(format!("invalid KAS url: {e}")))?;

    let ephemeral = KeyPair::generate(EcCurve::P256, rng)?;
    let key = derive_shared_key(&ephemeral, &kas_key, &nanotdf_salt(options.version.byte()))?;

    let cipher = AesGcmCipher::new(options.tag);
    let policy_json = policy.to_json()?;
    let policy_nonce = nonce_from_counter(POLICY_IV_COUNTER);

    let (body, policy_tag) = match options.policy_encoding {
        PolicyEncoding::Plaintext => {
            (PolicyBody::EmbeddedPlaintext(policy_json.into_bytes()), None)
        }
        PolicyEncoding::Encrypted => {
            let envelope = cipher
                .encrypt(policy_json.as_bytes(), &key, &policy_nonce)
                .map_err(|e| TdfError::Crypto(e.into()))?;
            let mut content = envelope.ciphertext;
            content.extend_from_slice(&envelope.auth_tag);
            (PolicyBody::EmbeddedEncrypted(content), Some(envelope.auth_tag))
        }
    };
    let content = body.content()?;

    let binding = match options.binding_mode {
        PolicyBindingMode::Gmac => {
            let tag = match policy_tag {
                Some(tag) => tag,
                None => cipher
                    .authenticate(&content, &key, &policy_nonce)
                    .map_err(|e| TdfError::Crypto(e.into()))?,
            };
            tag[tag.len() - GMAC_BINDING_SIZE..].to_vec()
        }
        PolicyBindingMode::Ecdsa => ephemeral.sign(&content)?,
    };

    let cipher_id = SymmetricCipher::from_tag_size(options.tag.bytes()).ok_or_else(|| {
        TdfError::Config(format!("no NanoTDF cipher for a {}-byte tag", options.tag.bytes()))
    })?;
    let header = Header::new(
        options.version,
        locator,
        EccAndBindingMode::new(options.binding_mode, EccMode::Secp256r1),
        SymmetricAndPayloadConfig::new(cipher_id),
        HeaderPolicy::new(body, binding),
        ephemeral.public_key_compressed(),
    )?;
    Ok((header, key))
}

/// Encrypt one payload under `counter` and serialize the full container
pub(crate) fn seal_payload(
    header: &Header,
    key: &SymmetricKey,
    counter: u32,
    plaintext: &[u8],
) -> Result<Vec<u8>, TdfError> {
    let tag = TagSize::from_bytes(header.auth_tag_length())
        .map_err(|e| TdfError::Crypto(e.into()))?;
    let sealed_len = PAYLOAD_IV_SIZE + plaintext.len() + tag.bytes();
    if sealed_len > U24_MAX as usize {
        return Err(TdfError::ResourceLimit(format!(
            "NanoTDF payload of {} bytes exceeds the 24-bit length field",
            plaintext.len()
        )));
    }

    let nonce = nonce_from_counter(counter);
    let envelope = AesGcmCipher::new(tag)
        .encrypt(plaintext, key, &nonce)
        .map_err(|e| TdfError::Crypto(e.into()))?;
    let mut ciphertext_and_tag = envelope.ciphertext;
    ciphertext_and_tag.extend_from_slice(&envelope.auth_tag);

    let mut iv = [0u8; PAYLOAD_IV_SIZE];
    iv.copy_from_slice(&nonce[nonce.len() - PAYLOAD_IV_SIZE..]);
    let payload =
        Payload::new(iv, ciphertext_and_tag).map_err(|e| TdfError::ResourceLimit(e.to_string()))?;
    Ok(NanoTdf::new(header.clone(), payload).to_bytes()?)
}

pub(crate) fn parse_container(container: &[u8]) -> Result<NanoTdf, TdfError> {
    NanoTdf::from_bytes(container)
        .map_err(|e| TdfError::extraction_from("malformed NanoTDF container", e))
}

pub(crate) fn open_payload(tdf: &NanoTdf, key: &SymmetricKey) -> Result<Vec<u8>, TdfError> {
    let tag = TagSize::from_bytes(tdf.header.auth_tag_length()).map_err(TdfError::TdfDecrypt)?;
    AesGcmCipher::new(tag)
        .decrypt_parts(&tdf.payload.nonce(), tdf.payload.ciphertext_and_tag(), key)
        .map_err(TdfError::TdfDecrypt)
}

pub(crate) async fn rewrap(
    kas: &KasClient,
    header: &Header,
    client_version: ClientVersion,
) -> Result<SymmetricKey, TdfError> {
    kas.rewrap_nanotdf(header, client_version)
        .await
        .map_err(|source| TdfError::KasDecrypt {
            url: header.kas_url().unwrap_or_default(),
            source,
        })
}

pub(crate) async fn fetch_kas_public_key(
    kas: &KasClient,
    kas_url: &str,
) -> Result<String, TdfError> {
    kas.public_key(kas_url)
        .await
        .map_err(|source| TdfError::KeyAccess {
            reason: format!("unable to fetch public key from {kas_url}"),
            source: Some(source),
        })
}

/// Eagerly check a header's policy binding against the payload key
///
/// GMAC bindings are recomputed with `key`; ECDSA bindings are checked
/// against the header's ephemeral public key.
pub fn verify_policy_binding(header: &Header, key: &SymmetricKey) -> Result<(), TdfError> {
    let policy = header.policy();
    let content = policy.body().content()?;
    let mismatch = || TdfError::TdfDecrypt(CipherError::Integrity);

    match header.ecc_and_binding_mode().binding {
        PolicyBindingMode::Gmac => {
            let tag_len = header.auth_tag_length();
            let expected = match policy.body() {
                PolicyBody::EmbeddedEncrypted(sealed)
                | PolicyBody::EmbeddedEncryptedWithKeyAccess {
                    content: sealed, ..
                } => {
                    if sealed.len() < tag_len {
                        return Err(mismatch());
                    }
                    sealed[sealed.len() - tag_len..].to_vec()
                }
                _ => {
                    let tag = TagSize::from_bytes(tag_len).map_err(TdfError::TdfDecrypt)?;
                    AesGcmCipher::new(tag)
                        .authenticate(&content, key, &nonce_from_counter(POLICY_IV_COUNTER))
                        .map_err(TdfError::TdfDecrypt)?
                }
            };
            if expected.len() < GMAC_BINDING_SIZE
                || expected[expected.len() - GMAC_BINDING_SIZE..] != *policy.binding()
            {
                return Err(mismatch());
            }
            Ok(())
        }
        PolicyBindingMode::Ecdsa => {
            let signer =
                PublicKeyHandle::from_compressed(EcCurve::P256, header.ephemeral_public_key())?;
            signer
                .verify(&content, policy.binding())
                .map_err(|_| mismatch())
        }
    }
}

/// Recover the policy embedded in a header
pub fn embedded_policy(header: &Header, key: &SymmetricKey) -> Result<Policy, TdfError> {
    let json = match header.policy().body() {
        PolicyBody::EmbeddedPlaintext(json) => json.clone(),
        PolicyBody::EmbeddedEncrypted(sealed)
        | PolicyBody::EmbeddedEncryptedWithKeyAccess { content: sealed, .. } => {
            let tag = TagSize::from_bytes(header.auth_tag_length()).map_err(TdfError::TdfDecrypt)?;
            AesGcmCipher::new(tag)
                .decrypt_parts(&nonce_from_counter(POLICY_IV_COUNTER), sealed, key)
                .map_err(TdfError::TdfDecrypt)?
        }
        PolicyBody::Remote(_) => {
            return Err(TdfError::extraction("remote policies are not carried in the header"))
        }
    };
    let json = String::from_utf8(json)
        .map_err(|e| TdfError::extraction_from("policy is not UTF-8", e))?;
    Ok(Policy::from_json(&json)?)
}

/// Single-payload NanoTDF client
pub struct NanoTdfClient {
    kas: KasClient,
    kas_public_key: Option<String>,
    policy: Policy,
    options: HeaderOptions,
    client_version: ClientVersion,
    verify_binding: bool,
    rng: SharedRandom,
}

impl NanoTdfClient {
    pub fn new(
        config: &ClientConfig,
        policy: Policy,
        auth: Arc<dyn AuthProvider>,
        rng: SharedRandom,
    ) -> Result<Self, TdfError> {
        config.validate()?;
        let kas = KasClient::new(config, auth, rng.as_ref())?;
        Ok(Self {
            kas,
            kas_public_key: None,
            policy,
            options: HeaderOptions::from_config(config)?,
            client_version: ClientVersion::default(),
            verify_binding: false,
            rng,
        })
    }

    /// Use a known KAS public key instead of fetching it
    #[must_use]
    pub fn with_kas_public_key(mut self, pem: impl Into<String>) -> Self {
        self.kas_public_key = Some(pem.into());
        self
    }

    #[must_use]
    pub fn with_binding_mode(mut self, mode: PolicyBindingMode) -> Self {
        self.options.binding_mode = mode;
        self
    }

    #[must_use]
    pub fn with_policy_encoding(mut self, encoding: PolicyEncoding) -> Self {
        self.options.policy_encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: NanoTdfVersion) -> Self {
        self.options.version = version;
        self
    }

    /// Rewrap protocol version used by [`TdfClient::decrypt`]
    #[must_use]
    pub fn with_client_version(mut self, version: ClientVersion) -> Self {
        self.client_version = version;
        self
    }

    /// Check the policy binding before decrypting the payload
    #[must_use]
    pub fn with_eager_binding_check(mut self, enabled: bool) -> Self {
        self.verify_binding = enabled;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Replace the policy; the next encrypt binds the new one
    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
    }

    pub fn kas_client(&self) -> &KasClient {
        &self.kas
    }

    /// Decrypt a container from a `0.0.0` KAS deployment
    pub async fn decrypt_legacy(&mut self, container: &[u8]) -> Result<Vec<u8>, TdfError> {
        self.decrypt_with(container, ClientVersion::Legacy).await
    }

    async fn decrypt_with(
        &self,
        container: &[u8],
        client_version: ClientVersion,
    ) -> Result<Vec<u8>, TdfError> {
        let tdf = parse_container(container)?;
        let key = rewrap(&self.kas, &tdf.header, client_version).await?;
        if self.verify_binding {
            verify_policy_binding(&tdf.header, &key)?;
        }
        open_payload(&tdf, &key)
    }

    async fn kas_public_key(&mut self) -> Result<String, TdfError> {
        if let Some(pem) = &self.kas_public_key {
            return Ok(pem.clone());
        }
        let pem = fetch_kas_public_key(&self.kas, &self.options.kas_url).await?;
        self.kas_public_key = Some(pem.clone());
        Ok(pem)
    }
}

#[async_trait]
impl TdfClient for NanoTdfClient {
    async fn encrypt(&mut self, plaintext: &[u8]) -> Result<Sealed, TdfError> {
        let warnings = check_policy(&self.policy)?;
        let kas_public_key = self.kas_public_key().await?;
        let (header, key) =
            build_header(&self.options, &kas_public_key, &self.policy, self.rng.as_ref())?;
        let container = seal_payload(&header, &key, FIRST_PAYLOAD_COUNTER, plaintext)?;
        debug!(
            kas = %self.options.kas_url,
            plaintext_len = plaintext.len(),
            container_len = container.len(),
            "sealed NanoTDF"
        );
        Ok(Sealed::new(container, warnings))
    }

    async fn decrypt(&mut self, container: &[u8]) -> Result<Vec<u8>, TdfError> {
        self.decrypt_with(container, self.client_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentdf_crypto::SeededRandom;
    use opentdf_protocol::nanotdf::PolicyType;

    fn options(binding_mode: PolicyBindingMode, policy_encoding: PolicyEncoding) -> HeaderOptions {
        HeaderOptions {
            kas_url: "https://kas.example.com".to_string(),
            version: NanoTdfVersion::V12,
            binding_mode,
            policy_encoding,
            tag: TagSize::Bits128,
        }
    }

    fn kas_pair(rng: &SeededRandom) -> (KeyPair, String) {
        let kas = KeyPair::generate(EcCurve::P256, rng).unwrap();
        let pem = kas.public_key_pem().unwrap();
        (kas, pem)
    }

    fn kas_side_key(kas: &KeyPair, header: &Header) -> SymmetricKey {
        let ephemeral =
            PublicKeyHandle::from_compressed(EcCurve::P256, header.ephemeral_public_key()).unwrap();
        derive_shared_key(kas, &ephemeral, &nanotdf_salt(header.version().byte())).unwrap()
    }

    #[test]
    fn test_seal_and_open_with_kas_derived_key() {
        let rng = SeededRandom::new(41);
        let (kas, pem) = kas_pair(&rng);
        let policy = Policy::with_uuid("p-41");
        let (header, key) = build_header(
            &options(PolicyBindingMode::Gmac, PolicyEncoding::Plaintext),
            &pem,
            &policy,
            &rng,
        )
        .unwrap();

        let container = seal_payload(&header, &key, FIRST_PAYLOAD_COUNTER, b"hello nano").unwrap();
        let tdf = parse_container(&container).unwrap();
        assert_eq!(tdf.header, header);
        assert_eq!(tdf.payload.iv(), [0, 0, 1]);

        let kas_key = kas_side_key(&kas, &tdf.header);
        assert_eq!(kas_key, key);
        assert_eq!(open_payload(&tdf, &kas_key).unwrap(), b"hello nano");
        assert!(verify_policy_binding(&tdf.header, &kas_key).is_ok());
        assert_eq!(embedded_policy(&tdf.header, &kas_key).unwrap(), policy);
    }

    #[test]
    fn test_encrypted_policy_and_ecdsa_binding() {
        let rng = SeededRandom::new(42);
        let (kas, pem) = kas_pair(&rng);
        let mut policy = Policy::with_uuid("p-42");
        policy.add_dissem("bob@example.com");
        let (header, key) = build_header(
            &options(PolicyBindingMode::Ecdsa, PolicyEncoding::Encrypted),
            &pem,
            &policy,
            &rng,
        )
        .unwrap();

        assert_eq!(header.policy().body().policy_type(), PolicyType::EmbeddedEncrypted);
        assert_eq!(header.policy().binding().len(), 64);
        let kas_key = kas_side_key(&kas, &header);
        assert!(verify_policy_binding(&header, &kas_key).is_ok());
        assert_eq!(embedded_policy(&header, &kas_key).unwrap(), policy);
    }

    #[test]
    fn test_gmac_binding_detects_wrong_key() {
        let rng = SeededRandom::new(43);
        let (_kas, pem) = kas_pair(&rng);
        let (header, _key) = build_header(
            &options(PolicyBindingMode::Gmac, PolicyEncoding::Plaintext),
            &pem,
            &Policy::with_uuid("p-43"),
            &rng,
        )
        .unwrap();
        let wrong = SymmetricKey::generate(&rng);
        assert!(matches!(
            verify_policy_binding(&header, &wrong),
            Err(TdfError::TdfDecrypt(CipherError::Integrity))
        ));
    }

    #[test]
    fn test_tampered_payload_fails_decrypt() {
        let rng = SeededRandom::new(44);
        let (_kas, pem) = kas_pair(&rng);
        let (header, key) = build_header(
            &options(PolicyBindingMode::Gmac, PolicyEncoding::Plaintext),
            &pem,
            &Policy::with_uuid("p-44"),
            &rng,
        )
        .unwrap();
        let mut container = seal_payload(&header, &key, 1, b"payload").unwrap();
        let last = container.len() - 1;
        container[last] ^= 0x01;
        let tdf = parse_container(&container).unwrap();
        assert!(matches!(open_payload(&tdf, &key), Err(TdfError::TdfDecrypt(_))));
    }

    #[test]
    fn test_oversized_payload_is_resource_limit() {
        let rng = SeededRandom::new(45);
        let (_kas, pem) = kas_pair(&rng);
        let (header, key) = build_header(
            &options(PolicyBindingMode::Gmac, PolicyEncoding::Plaintext),
            &pem,
            &Policy::with_uuid("p-45"),
            &rng,
        )
        .unwrap();
        let plaintext = vec![0u8; U24_MAX as usize];
        assert!(matches!(
            seal_payload(&header, &key, 1, &plaintext),
            Err(TdfError::ResourceLimit(_))
        ));
    }

    #[test]
    fn test_garbage_is_extraction_error() {
        assert!(matches!(
            parse_container(b"PK\x03\x04 not nano"),
            Err(TdfError::TdfPayloadExtraction { .. })
        ));
    }
}
