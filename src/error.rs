//! Error types for the OpenTDF client engine
//!
//! [`KasError`] classifies KAS round-trip failures so operators can tell a bad
//! response from a wrong key, a network failure or a malformed PEM.
//! [`TdfError`] is the boundary type every encrypt and decrypt call returns;
//! the proximate cause is always chained through `source()`.
//!
//! # Example
//!
//! ```
//! use opentdf_client::TdfError;
//!
//! let err = TdfError::ManifestIntegrity("root signature mismatch".to_string());
//! assert!(err.is_integrity_error());
//! assert!(!err.is_retryable());
//! ```

use opentdf_crypto::{
    CipherError, CryptoError, HmacError, KemError, KeyAgreementError, KeyError, KeySplitError,
};
use opentdf_protocol::PolicyError;
use thiserror::Error;

/// KAS client errors
#[derive(Debug, Error)]
pub enum KasError {
    #[error("PEM public key to key handle failed; is the PEM formatted correctly?")]
    PemParse(#[source] KeyAgreementError),

    #[error("Salting HKDF failed: {0}")]
    SaltDerivation(String),

    #[error("Unable to decrypt key; is this the right KAS and salt?")]
    UnwrapDecrypt(#[source] CryptoError),

    #[error("Unable to import unwrapped key")]
    KeyImport(#[source] KeyError),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Credential provider error: {0}")]
    Credential(String),

    #[error("Request signing failed: {0}")]
    Signing(String),
}

impl KasError {
    /// Returns true if the error is potentially retryable
    ///
    /// The engine never retries on its own; this is advice for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            KasError::Http { status, .. } => (500..600).contains(status),
            KasError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Returns a suggestion for how to fix this error, if available
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            KasError::AuthenticationFailed => Some("Verify the bearer token is valid and not expired"),
            KasError::AccessDenied(_) => {
                Some("Check that the entity satisfies the policy's attributes and dissem list")
            }
            KasError::PemParse(_) => Some("Verify the KAS returned a PEM public key or certificate"),
            KasError::UnwrapDecrypt(_) => {
                Some("Check the client version; legacy KAS deployments use 3-byte IVs")
            }
            KasError::InvalidResponse(_) => Some("Verify KAS server version compatibility"),
            _ => None,
        }
    }
}

/// Unified error type for encrypt and decrypt operations
#[derive(Debug, Error)]
pub enum TdfError {
    /// Malformed policy: missing uuid, body or dissem
    #[error("Policy integrity error: {0}")]
    PolicyIntegrity(#[from] PolicyError),

    /// Root or segment signature mismatch
    #[error("Manifest integrity error: {0}")]
    ManifestIntegrity(String),

    /// No usable KAS URL or public key source
    #[error("Key access error: {reason}")]
    KeyAccess {
        reason: String,
        #[source]
        source: Option<KasError>,
    },

    #[error("KAS upsert to {url} failed")]
    KasUpsert {
        url: String,
        #[source]
        source: KasError,
    },

    #[error("KAS rewrap from {url} failed")]
    KasDecrypt {
        url: String,
        #[source]
        source: KasError,
    },

    /// Sync requested without a loaded manifest
    #[error("Key sync error: {0}")]
    KeySync(String),

    /// Cipher-level decrypt failure, usually the wrong key or tampered data
    #[error("Decrypt failed")]
    TdfDecrypt(#[source] CipherError),

    /// Archive or container bytes are malformed
    #[error("Payload extraction failed: {reason}")]
    TdfPayloadExtraction {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IV space exhausted: {0}")]
    IvExhausted(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("KAS error: {0}")]
    Kas(#[from] KasError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! crypto_into_tdf_error {
    ($($ty:ty),*) => {
        $(impl From<$ty> for TdfError {
            fn from(err: $ty) -> Self {
                TdfError::Crypto(err.into())
            }
        })*
    };
}

crypto_into_tdf_error!(KeyAgreementError, KeySplitError, HmacError, KemError, KeyError);

impl TdfError {
    pub(crate) fn key_access(reason: impl Into<String>) -> Self {
        TdfError::KeyAccess {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn extraction(reason: impl Into<String>) -> Self {
        TdfError::TdfPayloadExtraction {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn extraction_from(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        TdfError::TdfPayloadExtraction {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if the error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            TdfError::Kas(e)
            | TdfError::KasUpsert { source: e, .. }
            | TdfError::KasDecrypt { source: e, .. } => e.is_retryable(),
            TdfError::KeyAccess { source: Some(e), .. } => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            TdfError::PolicyIntegrity(e) => e.suggestion(),
            TdfError::Kas(e)
            | TdfError::KasUpsert { source: e, .. }
            | TdfError::KasDecrypt { source: e, .. } => e.suggestion(),
            TdfError::IvExhausted(_) => Some("Start a new dataset client to negotiate a fresh key"),
            TdfError::KeySync(_) => Some("Encrypt, decrypt or load a container before syncing"),
            _ => None,
        }
    }

    /// Returns true if data failed an integrity or authenticity check
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            TdfError::ManifestIntegrity(_) | TdfError::TdfDecrypt(_) | TdfError::PolicyIntegrity(_)
        )
    }

    /// Returns true if this is a KAS communication error
    pub fn is_kas_error(&self) -> bool {
        matches!(
            self,
            TdfError::Kas(_) | TdfError::KasUpsert { .. } | TdfError::KasDecrypt { .. }
        )
    }
}

impl From<CipherError> for TdfError {
    fn from(err: CipherError) -> Self {
        TdfError::TdfDecrypt(err)
    }
}

impl From<zip::result::ZipError> for TdfError {
    fn from(err: zip::result::ZipError) -> Self {
        TdfError::extraction_from("archive is not a readable zip", err)
    }
}
