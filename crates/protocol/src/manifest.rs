//! TDF3 manifest (`0.manifest.json`)
//!
//! The manifest describes the payload entry, the key-access objects holding
//! the split-key shares, the cipher, and the segment integrity chain.
//! Signatures and bindings are computed by the crypto crate; this module only
//! carries them.

use serde::{Deserialize, Serialize};

/// Name of the payload entry inside the archive
pub const PAYLOAD_ENTRY: &str = "0.payload";

/// Name of the manifest entry inside the archive
pub const MANIFEST_ENTRY: &str = "0.manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdfManifest {
    pub payload: Payload,
    #[serde(rename = "encryptionInformation")]
    pub encryption_information: EncryptionInformation,
}

impl TdfManifest {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn key_access(&self) -> &[KeyAccess] {
        &self.encryption_information.key_access
    }

    pub fn integrity(&self) -> &IntegrityInformation {
        &self.encryption_information.integrity_information
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            payload_type: "reference".to_string(),
            url: PAYLOAD_ENTRY.to_string(),
            protocol: "zip".to_string(),
            is_encrypted: true,
            mime_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionInformation {
    #[serde(rename = "type")]
    pub encryption_type: String,
    #[serde(rename = "keyAccess")]
    pub key_access: Vec<KeyAccess>,
    pub method: EncryptionMethod,
    #[serde(rename = "integrityInformation")]
    pub integrity_information: IntegrityInformation,
    /// Base64 of the policy JSON
    pub policy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAccessType {
    #[serde(rename = "wrapped")]
    Wrapped,
    #[serde(rename = "remote")]
    Remote,
}

impl KeyAccessType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAccessType::Wrapped => "wrapped",
            KeyAccessType::Remote => "remote",
        }
    }

    /// Parse a key-access kind; anything but `wrapped` or `remote` is rejected
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "wrapped" => Some(KeyAccessType::Wrapped),
            "remote" => Some(KeyAccessType::Remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub alg: String,
    pub hash: String,
}

/// One key-access object: where a share lives and how it is wrapped
///
/// The wrap fields are transient for remote objects: once the KAS has
/// accepted an upsert they are stripped before the manifest is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAccess {
    #[serde(rename = "type")]
    pub access_type: KeyAccessType,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "wrappedKey", skip_serializing_if = "Option::is_none", default)]
    pub wrapped_key: Option<String>,
    #[serde(rename = "policyBinding", skip_serializing_if = "Option::is_none", default)]
    pub policy_binding: Option<PolicyBinding>,
    #[serde(rename = "encryptedMetadata", skip_serializing_if = "Option::is_none", default)]
    pub encrypted_metadata: Option<String>,
    /// PEM of the ephemeral key the share was wrapped with
    #[serde(rename = "ephemeralPublicKey", skip_serializing_if = "Option::is_none", default)]
    pub ephemeral_public_key: Option<String>,
    /// Base64 NanoTDF header, used when a header stands in for a wrapped key
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kid: Option<String>,
}

impl KeyAccess {
    pub fn new(access_type: KeyAccessType, url: impl Into<String>) -> Self {
        Self {
            access_type,
            url: url.into(),
            protocol: "kas".to_string(),
            wrapped_key: None,
            policy_binding: None,
            encrypted_metadata: None,
            ephemeral_public_key: None,
            header: None,
            kid: None,
        }
    }

    /// Remote key access referring to a NanoTDF header
    pub fn remote_header(url: impl Into<String>, header_b64: String) -> Self {
        let mut access = Self::new(KeyAccessType::Remote, url);
        access.header = Some(header_b64);
        access
    }

    /// Drop the wrap material once a KAS holds it
    pub fn strip_wrap_fields(&mut self) {
        self.wrapped_key = None;
        self.encrypted_metadata = None;
        self.policy_binding = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMethod {
    pub algorithm: String,
    #[serde(rename = "isStreamable")]
    pub is_streamable: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iv: String,
}

impl Default for EncryptionMethod {
    fn default() -> Self {
        Self {
            algorithm: "AES-256-GCM".to_string(),
            is_streamable: true,
            iv: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityInformation {
    #[serde(rename = "rootSignature")]
    pub root_signature: RootSignature,
    #[serde(rename = "segmentSizeDefault")]
    pub segment_size_default: u64,
    #[serde(rename = "encryptedSegmentSizeDefault")]
    pub encrypted_segment_size_default: u64,
    #[serde(rename = "segmentHashAlg")]
    pub segment_hash_alg: String,
    pub segments: Vec<Segment>,
}

impl IntegrityInformation {
    /// Plaintext length of segment `index`
    pub fn plaintext_size(&self, index: usize) -> Option<u64> {
        self.segments
            .get(index)
            .map(|seg| seg.segment_size.unwrap_or(self.segment_size_default))
    }

    /// Encrypted length of segment `index`
    pub fn encrypted_size(&self, index: usize) -> Option<u64> {
        self.segments.get(index).map(|seg| {
            seg.encrypted_segment_size
                .unwrap_or(self.encrypted_segment_size_default)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSignature {
    pub alg: String,
    pub sig: String,
}

/// A segment entry; sizes are present only when they differ from the defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub hash: String,
    #[serde(rename = "segmentSize", skip_serializing_if = "Option::is_none", default)]
    pub segment_size: Option<u64>,
    #[serde(rename = "encryptedSegmentSize", skip_serializing_if = "Option::is_none", default)]
    pub encrypted_segment_size: Option<u64>,
}
