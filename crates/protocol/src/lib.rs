//! OpenTDF protocol types
//!
//! Wire formats shared by the client engine:
//! - NanoTDF binary header, policy and payload codec
//! - TDF3 manifest JSON
//! - Policy JSON model
//! - KAS request and response messages
//!
//! This crate performs no cryptography and no network I/O.

pub mod binary;
pub mod kas;
pub mod manifest;
pub mod nanotdf;
pub mod policy;

pub use binary::{BinaryRead, BinaryWrite};
pub use kas::{
    KasPublicKeyResponse, RewrapRequestBody, RewrapResponse, SignedRewrapRequest, UpsertRequest,
};
pub use manifest::{
    EncryptionInformation, EncryptionMethod, IntegrityInformation, KeyAccess, KeyAccessType,
    Payload, PolicyBinding, RootSignature, Segment, TdfManifest,
};
pub use policy::{AttributeObject, Policy, PolicyBody, PolicyError};
