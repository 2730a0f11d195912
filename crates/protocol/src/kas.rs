//! KAS wire messages
//!
//! - `GET  {kas}/kas_public_key?algorithm=ec:secp256r1`
//! - `POST {kas}/v2/rewrap` with a signed request token
//! - `POST {kas}/v2/upsert` with a key-access object and its policy

use crate::manifest::KeyAccess;
use serde::{Deserialize, Serialize};

/// Algorithm identifier sent with rewrap requests and key lookups
pub const EC_SECP256R1: &str = "ec:secp256r1";

/// Claims body of a rewrap request, carried as a string inside the JWT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrapRequestBody {
    pub algorithm: String,
    #[serde(rename = "keyAccess")]
    pub key_access: KeyAccess,
    /// PEM of the client's ephemeral public key
    #[serde(rename = "clientPublicKey")]
    pub client_public_key: String,
    /// Base64 policy, sent for TDF3 key-access objects
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRewrapRequest {
    #[serde(rename = "signedRequestToken")]
    pub signed_request_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewrapResponse {
    /// PEM of the KAS session key used for the unwrap agreement
    #[serde(rename = "sessionPublicKey")]
    pub session_public_key: String,
    /// Base64 of `iv ‖ ciphertext ‖ tag`
    #[serde(rename = "entityWrappedKey")]
    pub entity_wrapped_key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertRequest {
    #[serde(rename = "keyAccess")]
    pub key_access: KeyAccess,
    /// Base64 policy
    pub policy: String,
    /// Proof-of-possession token over this request's key access and policy
    #[serde(rename = "clientPayloadSignature")]
    pub client_payload_signature: String,
}

/// Public key endpoint reply: a bare PEM string or an object carrying one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KasPublicKeyResponse {
    Pem(String),
    Object {
        #[serde(rename = "publicKey")]
        public_key: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        kid: Option<String>,
    },
}

impl KasPublicKeyResponse {
    pub fn public_key(&self) -> &str {
        match self {
            KasPublicKeyResponse::Pem(pem) => pem,
            KasPublicKeyResponse::Object { public_key, .. } => public_key,
        }
    }
}
