//! KAS (Key Access Service) client
//!
//! # Protocol Flow
//!
//! 1. Publish the request-signer public key to the credential provider
//! 2. Build the request body: the key-access object (or NanoTDF header) and
//!    the client's ephemeral public key PEM
//! 3. Sign it as a proof-of-possession JWT (ES256, 60 second expiry)
//! 4. POST `{signedRequestToken}` to `{kas}/v2/rewrap` with the bearer header
//! 5. Receive `{sessionPublicKey, entityWrappedKey}`
//! 6. ECDH(ephemeral, session) + HKDF with the format salt → unwrap key
//! 7. AES-GCM decrypt `entityWrappedKey` (`iv ‖ ciphertext ‖ tag`)
//!
//! Legacy (`0.0.0`) KAS deployments answer NanoTDF rewraps with a 3-byte IV;
//! current (`0.0.1`) ones use 12 bytes. The version is sent in the
//! `virtru-ntdf-version` header and selects the split.
//!
//! The client never retries; see [`KasError::is_retryable`].

use crate::auth::AuthProvider;
use crate::config::ClientConfig;
use crate::error::KasError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use opentdf_crypto::{
    derive_shared_key, extract_public_key_pem, nanotdf_salt, tdf_salt, unwrap_key, AesGcmCipher,
    CipherError, CryptoError, EcCurve, KeyMaterial, KeyPair, KeyShare, PublicKeyHandle,
    RandomSource, SymmetricKey, TagSize, GCM_IV_SIZE, LEGACY_IV_SIZE,
};
use opentdf_protocol::kas::EC_SECP256R1;
use opentdf_protocol::nanotdf::{Header, NanoTdfVersion, NANOTDF_MAGIC};
use opentdf_protocol::{
    BinaryWrite, KasPublicKeyResponse, KeyAccess, RewrapRequestBody, RewrapResponse,
    SignedRewrapRequest, UpsertRequest,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Header carrying the client version on NanoTDF rewrap requests
pub const CLIENT_VERSION_HEADER: &str = "virtru-ntdf-version";

/// Proof-of-possession token lifetime
const TOKEN_LIFETIME_SECS: i64 = 60;

/// Wire-compatibility version of the rewrap protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientVersion {
    /// `0.0.0`: wrapped keys carry a 3-byte IV
    Legacy,
    /// `0.0.1`: wrapped keys carry a 12-byte IV
    #[default]
    Current,
}

impl ClientVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientVersion::Legacy => "0.0.0",
            ClientVersion::Current => "0.0.1",
        }
    }

    pub fn parse(version: &str) -> Option<Self> {
        match version {
            "0.0.0" => Some(ClientVersion::Legacy),
            "0.0.1" => Some(ClientVersion::Current),
            _ => None,
        }
    }

    /// IV prefix length of `entityWrappedKey`
    pub fn iv_length(self) -> usize {
        match self {
            ClientVersion::Legacy => LEGACY_IV_SIZE,
            ClientVersion::Current => GCM_IV_SIZE,
        }
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `SHA256(magic ‖ version)` for the three leading NanoTDF header bytes
pub fn salt_for_magic(magic_version: &[u8]) -> Result<[u8; 32], KasError> {
    match magic_version {
        [m0, m1, version] if [*m0, *m1] == NANOTDF_MAGIC => NanoTdfVersion::from_byte(*version)
            .map(|v| nanotdf_salt(v.byte()))
            .ok_or_else(|| {
                KasError::SaltDerivation(format!("unsupported NanoTDF version {version:#04x}"))
            }),
        _ => Err(KasError::SaltDerivation(format!(
            "expected 3 magic bytes starting with L1, got {} bytes",
            magic_version.len()
        ))),
    }
}

/// KAS client for rewrap, public key and upsert
pub struct KasClient {
    http_client: Client,
    auth: Arc<dyn AuthProvider>,
    ephemeral: KeyPair,
    signer: KeyPair,
}

impl KasClient {
    /// Create a client with fresh ephemeral and signer key pairs
    pub fn new(
        config: &ClientConfig,
        auth: Arc<dyn AuthProvider>,
        rng: &dyn RandomSource,
    ) -> Result<Self, KasError> {
        let ephemeral = KeyPair::generate(EcCurve::P256, rng)
            .map_err(|e| KasError::Signing(format!("ephemeral key generation failed: {e}")))?;
        let signer = KeyPair::generate(EcCurve::P256, rng)
            .map_err(|e| KasError::Signing(format!("signer key generation failed: {e}")))?;
        Self::with_key_pairs(config, auth, ephemeral, signer)
    }

    /// Create a client around existing key pairs
    pub fn with_key_pairs(
        config: &ClientConfig,
        auth: Arc<dyn AuthProvider>,
        ephemeral: KeyPair,
        signer: KeyPair,
    ) -> Result<Self, KasError> {
        let http_client = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self {
            http_client,
            auth,
            ephemeral,
            signer,
        })
    }

    /// PEM of the key rewrap responses are wrapped to
    pub fn ephemeral_public_key_pem(&self) -> Result<String, KasError> {
        self.ephemeral.public_key_pem().map_err(KasError::PemParse)
    }

    /// Fetch a KAS public key, reducing certificates to SPKI PEM
    pub async fn public_key(&self, kas_url: &str) -> Result<String, KasError> {
        let url = format!("{}/kas_public_key", kas_url.trim_end_matches('/'));
        debug!(url = %url, "fetching KAS public key");

        let response = self
            .http_client
            .get(&url)
            .query(&[("algorithm", EC_SECP256R1)])
            .send()
            .await?;
        let body = Self::checked_body(response).await?;

        let pem = match serde_json::from_str::<KasPublicKeyResponse>(&body) {
            Ok(parsed) => parsed.public_key().to_string(),
            Err(_) if body.contains("-----BEGIN") => body,
            Err(e) => {
                return Err(KasError::InvalidResponse(format!(
                    "public key body is neither JSON nor PEM: {e}"
                )))
            }
        };
        extract_public_key_pem(&pem).map_err(KasError::PemParse)
    }

    /// Rewrap the payload key of a NanoTDF header
    pub async fn rewrap_nanotdf(
        &self,
        header: &Header,
        client_version: ClientVersion,
    ) -> Result<SymmetricKey, KasError> {
        let header_bytes = header
            .to_bytes()
            .map_err(|e| KasError::InvalidRequest(format!("header encoding failed: {e}")))?;
        let kas_url = header
            .kas_url()
            .map_err(|e| KasError::InvalidRequest(format!("bad KAS locator: {e}")))?;
        let rewrap_url = header
            .kas_rewrap_url()
            .map_err(|e| KasError::InvalidRequest(format!("bad KAS locator: {e}")))?;
        self.rewrap_nanotdf_raw(
            &header_bytes,
            &kas_url,
            &rewrap_url,
            &header.version().magic_bytes(),
            client_version,
            header.auth_tag_length(),
        )
        .await
    }

    /// Rewrap from raw header bytes and explicit protocol parameters
    pub async fn rewrap_nanotdf_raw(
        &self,
        header_bytes: &[u8],
        kas_url: &str,
        kas_rewrap_url: &str,
        magic_version: &[u8],
        client_version: ClientVersion,
        auth_tag_length: usize,
    ) -> Result<SymmetricKey, KasError> {
        let body = RewrapRequestBody {
            algorithm: EC_SECP256R1.to_string(),
            key_access: KeyAccess::remote_header(kas_url, BASE64.encode(header_bytes)),
            client_public_key: self.ephemeral_public_key_pem()?,
            policy: None,
        };
        debug!(url = %kas_rewrap_url, version = %client_version, "NanoTDF rewrap");
        let response = self.rewrap(kas_rewrap_url, &body, Some(client_version)).await?;

        let salt = salt_for_magic(magic_version)?;
        let tag = TagSize::from_bytes(auth_tag_length)
            .map_err(|e| KasError::UnwrapDecrypt(e.into()))?;
        self.unwrap_response(&response, &salt, client_version.iv_length(), tag)
    }

    /// Rewrap one TDF3 key-access object, returning its key share
    pub async fn rewrap_key_access(
        &self,
        key_access: &KeyAccess,
        policy_b64: &str,
    ) -> Result<KeyShare, KasError> {
        let body = RewrapRequestBody {
            algorithm: EC_SECP256R1.to_string(),
            key_access: key_access.clone(),
            client_public_key: self.ephemeral_public_key_pem()?,
            policy: Some(policy_b64.to_string()),
        };
        let url = format!("{}/v2/rewrap", key_access.url.trim_end_matches('/'));
        debug!(url = %url, kind = key_access.access_type.as_str(), "TDF3 rewrap");
        let response = self.rewrap(&url, &body, None).await?;
        self.unwrap_response(&response, &tdf_salt(), GCM_IV_SIZE, TagSize::Bits128)
    }

    /// Register a key-access object and its policy with the KAS
    pub async fn upsert(&self, key_access: &KeyAccess, policy_b64: &str) -> Result<(), KasError> {
        let signature = self.signed_request_token(&json!({
            "keyAccess": key_access,
            "policy": policy_b64,
        }))?;
        let request = UpsertRequest {
            key_access: key_access.clone(),
            policy: policy_b64.to_string(),
            client_payload_signature: signature,
        };
        let url = format!("{}/v2/upsert", key_access.url.trim_end_matches('/'));
        debug!(url = %url, "KAS upsert");
        let _: serde_json::Value = self.post(&url, &request, None).await?;
        Ok(())
    }

    async fn rewrap(
        &self,
        url: &str,
        body: &RewrapRequestBody,
        client_version: Option<ClientVersion>,
    ) -> Result<RewrapResponse, KasError> {
        let request = SignedRewrapRequest {
            signed_request_token: self.signed_request_token(body)?,
        };
        self.post(url, &request, client_version).await
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        client_version: Option<ClientVersion>,
    ) -> Result<R, KasError> {
        let authorization = self.credentials().await?;
        let mut request = self
            .http_client
            .post(url)
            .header("Authorization", authorization)
            .json(body);
        if let Some(version) = client_version {
            request = request.header(CLIENT_VERSION_HEADER, version.as_str());
        }
        let response = request.send().await?;
        let text = Self::checked_body(response).await?;
        let text = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str(text)
            .map_err(|e| KasError::InvalidResponse(format!("unexpected response body: {e}")))
    }

    async fn checked_body(response: reqwest::Response) -> Result<String, KasError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => KasError::AuthenticationFailed,
                403 => KasError::AccessDenied(body),
                code => KasError::Http { status: code, body },
            });
        }
        Ok(response.text().await?)
    }

    /// Publish the signer key and fetch the bearer header
    async fn credentials(&self) -> Result<String, KasError> {
        let signer_pem = self.signer.public_key_pem().map_err(KasError::PemParse)?;
        self.auth
            .update_client_public_key(&BASE64.encode(signer_pem))
            .await?;
        self.auth.authorization().await
    }

    /// ES256 JWT whose `requestBody` claim is the JSON body as a string
    fn signed_request_token<T: Serialize>(&self, body: &T) -> Result<String, KasError> {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let request_body = serde_json::to_string(body)
            .map_err(|e| KasError::Signing(format!("request body encoding failed: {e}")))?;
        let now = chrono::Utc::now().timestamp();
        let header = json!({ "alg": "ES256", "typ": "JWT" });
        let payload = json!({
            "requestBody": request_body,
            "iat": now,
            "exp": now + TOKEN_LIFETIME_SECS,
        });

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        );
        let signature = self
            .signer
            .sign(signing_input.as_bytes())
            .map_err(|e| KasError::Signing(e.to_string()))?;
        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
    }

    fn unwrap_response<K: KeyMaterial>(
        &self,
        response: &RewrapResponse,
        salt: &[u8],
        iv_length: usize,
        tag: TagSize,
    ) -> Result<K, KasError> {
        let wrapped = BASE64
            .decode(&response.entity_wrapped_key)
            .map_err(|e| KasError::InvalidResponse(format!("entityWrappedKey: {e}")))?;
        if wrapped.len() < iv_length + tag.bytes() {
            return Err(KasError::InvalidResponse(format!(
                "entityWrappedKey too short: {} bytes",
                wrapped.len()
            )));
        }
        let (iv, sealed) = wrapped.split_at(iv_length);

        let session = PublicKeyHandle::from_pem(&response.session_public_key)
            .map_err(KasError::PemParse)?;
        let unwrapping_key = derive_shared_key(&self.ephemeral, &session, salt)
            .map_err(|e| KasError::UnwrapDecrypt(e.into()))?;

        let cipher = AesGcmCipher::new(tag)
            .with_iv_length(iv_length)
            .map_err(|e| KasError::UnwrapDecrypt(e.into()))?;
        unwrap_key(&cipher, iv, sealed, &unwrapping_key).map_err(|e| match e {
            CipherError::KeyImport(key_error) => KasError::KeyImport(key_error),
            other => KasError::UnwrapDecrypt(CryptoError::from(other)),
        })
    }
}

impl fmt::Debug for KasClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KasClient")
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}
