//! Simulated KAS for integration tests
//!
//! A mockito server holding one P-256 key pair. It answers the public key
//! endpoint, rewraps NanoTDF headers and TDF3 key-access objects to the
//! requesting client, and remembers key shares upserted for remote KAOs.

#![allow(dead_code)]

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine as _;
use mockito::{Matcher, Mock, Request, Server, ServerGuard};
use opentdf_client::opentdf_crypto::{
    derive_shared_key, nanotdf_salt, random_bytes, tdf_salt, wrap_key, AesGcmCipher, EcCurve,
    EcdhKem, KeyEncapsulation as _, KeyPair, KeyShare, PublicKeyHandle, SeededRandom,
    SharedRandom, SymmetricKey, TagSize, WrappedShare, GCM_IV_SIZE,
};
use opentdf_client::opentdf_protocol::nanotdf::Header;
use opentdf_client::opentdf_protocol::{
    AttributeObject, BinaryRead as _, KeyAccess, Policy, RewrapRequestBody, SignedRewrapRequest,
    UpsertRequest,
};
use opentdf_client::{ClientConfig, ClientVersion, StaticTokenProvider};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

pub const TOKEN: &str = "test-token";

pub const TEST_PLAINTEXT: &[u8] = b"Hello, OpenTDF! This is test data for encryption.";

type HandlerResult<T> = Result<T, Box<dyn Error>>;

/// Route test logs through the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn auth() -> Arc<StaticTokenProvider> {
    Arc::new(StaticTokenProvider::new(TOKEN))
}

pub fn rng(seed: u64) -> SharedRandom {
    Arc::new(SeededRandom::new(seed))
}

/// A policy with one attribute, so no unrestricted warning is raised
pub fn restricted_policy(uuid: &str) -> Policy {
    let mut policy = Policy::with_uuid(uuid);
    policy.add_attribute(AttributeObject::new(
        "https://example.com/attr/classification/value/secret",
    ));
    policy.add_dissem("alice@example.com");
    policy
}

struct KasState {
    key_pair: KeyPair,
    rng: SharedRandom,
    /// Shares upserted for remote key access, by policy uuid
    remote_shares: Mutex<HashMap<String, KeyShare>>,
}

pub struct SimulatedKas {
    pub server: ServerGuard,
    state: Arc<KasState>,
    endpoints: Vec<Mock>,
}

impl SimulatedKas {
    pub async fn start(seed: u64) -> Self {
        let rng = rng(seed);
        let key_pair = KeyPair::generate(EcCurve::P256, rng.as_ref()).unwrap();
        Self {
            server: Server::new_async().await,
            state: Arc::new(KasState {
                key_pair,
                rng,
                remote_shares: Mutex::new(HashMap::new()),
            }),
            endpoints: Vec::new(),
        }
    }

    /// A KAS serving its public key and rewrap for the rest of the test
    pub async fn with_endpoints(seed: u64) -> Self {
        let mut kas = Self::start(seed).await;
        let public_key = kas.mock_public_key().await;
        let rewrap = kas.mock_rewrap().await;
        kas.endpoints.extend([public_key, rewrap]);
        kas
    }

    pub fn url(&self) -> String {
        self.server.url()
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url())
    }

    pub fn public_key_pem(&self) -> String {
        self.state.key_pair.public_key_pem().unwrap()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.state.key_pair
    }

    pub fn remote_share_count(&self) -> usize {
        self.state.remote_shares.lock().unwrap().len()
    }

    /// Serve the KAS public key as `{"publicKey": pem}`
    pub async fn mock_public_key(&mut self) -> Mock {
        let body = json!({ "publicKey": self.public_key_pem(), "kid": "e1" }).to_string();
        self.server
            .mock("GET", "/kas_public_key")
            .match_query(Matcher::UrlEncoded(
                "algorithm".to_string(),
                "ec:secp256r1".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// Rewrap endpoint, not yet created; NanoTDF keys go out with the IV
    /// length of `version`, TDF3 shares always with 12 bytes
    pub fn rewrap_mock(&mut self, version: ClientVersion) -> Mock {
        let state = Arc::clone(&self.state);
        let iv_length = version.iv_length();
        self.server
            .mock("POST", "/v2/rewrap")
            .match_header("authorization", format!("Bearer {TOKEN}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |request| {
                respond(rewrap(&state, request, iv_length))
            })
    }

    pub async fn mock_rewrap(&mut self) -> Mock {
        self.rewrap_mock(ClientVersion::Current).create_async().await
    }

    pub async fn mock_upsert(&mut self) -> Mock {
        let state = Arc::clone(&self.state);
        self.server
            .mock("POST", "/v2/upsert")
            .match_header("authorization", format!("Bearer {TOKEN}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |request| respond(upsert(&state, request)))
            .create_async()
            .await
    }
}

fn respond(result: HandlerResult<Value>) -> Vec<u8> {
    match result {
        Ok(body) => body.to_string().into_bytes(),
        Err(e) => json!({ "error": e.to_string() }).to_string().into_bytes(),
    }
}

/// Claims body carried in the middle segment of the signed request token
fn request_claims(request: &Request) -> HandlerResult<RewrapRequestBody> {
    let signed: SignedRewrapRequest =
        serde_json::from_slice(request.body().map_err(|e| e.to_string())?)?;
    let claims = signed
        .signed_request_token
        .split('.')
        .nth(1)
        .ok_or("signed request token is not a JWT")?;
    let claims: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims)?)?;
    let body = claims["requestBody"]
        .as_str()
        .ok_or("requestBody claim missing")?;
    Ok(serde_json::from_str(body)?)
}

fn rewrap(state: &KasState, request: &Request, nano_iv_length: usize) -> HandlerResult<Value> {
    let body = request_claims(request)?;
    let client_key = PublicKeyHandle::from_pem(&body.client_public_key)?;
    let session = KeyPair::generate(EcCurve::P256, state.rng.as_ref())?;

    let entity_wrapped_key = match &body.key_access.header {
        Some(header_b64) => {
            let header = Header::read_from(&mut Cursor::new(BASE64.decode(header_b64)?))?;
            let salt = nanotdf_salt(header.version().byte());
            let ephemeral =
                PublicKeyHandle::from_compressed(EcCurve::P256, header.ephemeral_public_key())?;
            let payload_key: SymmetricKey = derive_shared_key(&state.key_pair, &ephemeral, &salt)?;

            let kek = derive_shared_key(&session, &client_key, &salt)?;
            let cipher = AesGcmCipher::new(TagSize::from_bytes(header.auth_tag_length())?)
                .with_iv_length(nano_iv_length)?;
            let iv = random_bytes(state.rng.as_ref(), nano_iv_length);
            wrap_key(&cipher, &payload_key, &kek, &iv)?.to_bytes()
        }
        None => {
            let share = share_for(state, &body.key_access, body.policy.as_deref())?;
            let kek = derive_shared_key(&session, &client_key, &tdf_salt())?;
            let iv = random_bytes(state.rng.as_ref(), GCM_IV_SIZE);
            wrap_key(&AesGcmCipher::default(), &share, &kek, &iv)?.to_bytes()
        }
    };

    Ok(json!({
        "sessionPublicKey": session.public_key_pem()?,
        "entityWrappedKey": BASE64.encode(entity_wrapped_key),
    }))
}

/// Unwrap a share carried in the KAO, or look up one stored by upsert
fn share_for(
    state: &KasState,
    access: &KeyAccess,
    policy_b64: Option<&str>,
) -> HandlerResult<KeyShare> {
    if let (Some(wrapped), Some(ephemeral)) = (&access.wrapped_key, &access.ephemeral_public_key)
    {
        let kem = EcdhKem::new(EcCurve::P256, Arc::clone(&state.rng));
        let wrapped = WrappedShare::from_base64(ephemeral.clone(), wrapped)?;
        return Ok(kem.unwrap(&wrapped, &state.key_pair)?);
    }
    let uuid = Policy::from_base64(policy_b64.ok_or("rewrap carries no policy")?)?.uuid;
    let shares = state.remote_shares.lock().map_err(|e| e.to_string())?;
    Ok(shares
        .get(&uuid)
        .cloned()
        .ok_or_else(|| format!("no share upserted for policy {uuid}"))?)
}

fn upsert(state: &KasState, request: &Request) -> HandlerResult<Value> {
    let upsert: UpsertRequest = serde_json::from_slice(request.body().map_err(|e| e.to_string())?)?;
    if upsert.client_payload_signature.split('.').count() != 3 {
        return Err("clientPayloadSignature is not a JWT".into());
    }
    if upsert.key_access.wrapped_key.is_some() {
        let share = share_for(state, &upsert.key_access, None)?;
        let uuid = Policy::from_base64(&upsert.policy)?.uuid;
        state
            .remote_shares
            .lock()
            .map_err(|e| e.to_string())?
            .insert(uuid, share);
    }
    Ok(json!({}))
}

/// Self-contained X.509 certificate around a public key; the signature is
/// a placeholder, only the structure is well formed
pub fn certificate_pem(public_key_pem: &str) -> String {
    fn der(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        match content.len() {
            len if len < 0x80 => out.push(len as u8),
            len if len <= 0xFF => out.extend_from_slice(&[0x81, len as u8]),
            len => {
                out.push(0x82);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            }
        }
        out.extend_from_slice(content);
        out
    }

    let spki: String = public_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let spki = BASE64.decode(spki).unwrap();

    // ecdsa-with-SHA256
    let algorithm = der(0x30, &der(0x06, &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02]));
    let common_name = [der(0x06, &[0x55, 0x04, 0x03]), der(0x0C, b"kas.test")].concat();
    let name = der(0x30, &der(0x31, &der(0x30, &common_name)));
    let validity = [der(0x17, b"240101000000Z"), der(0x17, b"340101000000Z")].concat();

    let mut tbs = Vec::new();
    tbs.extend(der(0xA0, &der(0x02, &[2])));
    tbs.extend(der(0x02, &[0x1F, 0x42]));
    tbs.extend_from_slice(&algorithm);
    tbs.extend_from_slice(&name);
    tbs.extend(der(0x30, &validity));
    tbs.extend_from_slice(&name);
    tbs.extend(spki);
    let mut certificate = der(0x30, &tbs);
    certificate.extend(algorithm);
    certificate.extend(der(0x03, &[0, 0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01]));
    let certificate = der(0x30, &certificate);

    let body = BASE64.encode(certificate);
    let lines: Vec<&str> = body
        .as_bytes()
        .chunks(64)
        .map(|chunk| std::str::from_utf8(chunk).unwrap())
        .collect();
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        lines.join("\n")
    )
}
