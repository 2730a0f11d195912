//! OpenTDF client engine
//!
//! Three container clients share one [`TdfClient`] capability:
//!
//! - [`NanoTdfClient`]: one compact NanoTDF per call, fresh key each time
//! - [`NanoTdfDatasetClient`]: one negotiated key over many NanoTDF payloads
//! - [`Tdf3Client`]: segmented zip archives with the key split across KAS instances
//!
//! Keys are released by a KAS (Key Access Service) through [`KasClient`];
//! bearer credentials come from an [`AuthProvider`].

pub mod auth;
pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod kas;
pub mod nanotdf;
pub mod tdf3;

pub use auth::{AuthProvider, StaticTokenProvider};
pub use client::{PolicyWarning, Sealed, TdfClient};
pub use config::ClientConfig;
pub use dataset::{DatasetPhase, DatasetSession, NanoTdfDatasetClient};
pub use error::{KasError, TdfError};
pub use kas::{ClientVersion, KasClient};
pub use nanotdf::{NanoTdfClient, PolicyEncoding};
pub use tdf3::{KeyAccessTarget, Tdf3Client, Tdf3EncryptBuilder, Tdf3Reader};

pub use opentdf_crypto;
pub use opentdf_protocol;
pub use opentdf_protocol::{AttributeObject, Policy, TdfManifest};
