//! NanoTDF v1 binary format
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Header                             │
//! ├─────────────────────────────────────┤
//! │  Payload (≤ 16 MiB)                 │
//! ├─────────────────────────────────────┤
//! │  Signature (optional)               │
//! └─────────────────────────────────────┘
//! ```
//!
//! Encoding and decoding are exact inverses: `read_from(write_to(h)) == h`
//! byte for byte.

pub mod header;
pub mod payload;
pub mod policy;
pub mod resource_locator;

pub use header::{
    EccAndBindingMode, EccMode, Header, NanoTdfVersion, PolicyBindingMode,
    SymmetricAndPayloadConfig, SymmetricCipher, GMAC_BINDING_SIZE, NANOTDF_MAGIC,
};
pub use payload::{nonce_from_counter, NanoTdf, Payload, GCM_NONCE_SIZE, PAYLOAD_IV_SIZE};
pub use policy::{Policy, PolicyBody, PolicyType};
pub use resource_locator::{Protocol, ResourceLocator};

/// IV counter value reserved for policy encryption and binding
pub const POLICY_IV_COUNTER: u32 = 0;

/// Largest IV counter value; the counter domain is `(0, MAX_IV_COUNTER]`
pub const MAX_IV_COUNTER: u32 = crate::binary::U24_MAX;
