//! TDF3: segmented, split-key, zip-packaged containers
//!
//! ```text
//! archive.tdf (zip, stored)
//! ├── 0.payload          segment₀ ‖ segment₁ ‖ …   each iv ‖ ciphertext ‖ tag
//! └── 0.manifest.json    key access, segment hashes, root signature, policy
//! ```
//!
//! Archives can also be read in place over HTTP `Range` requests; see
//! [`remote`].

mod archive;
pub mod key_access;
pub mod reader;
pub mod remote;
pub mod writer;

pub use key_access::KeyAccessTarget;
pub use reader::{PayloadLocation, Segments, Tdf3Reader};
pub use remote::{RangeArchive, DEFAULT_TAIL_WINDOW};
pub use writer::{EncryptStream, Tdf3EncryptBuilder, SEGMENT_OVERHEAD};

use crate::auth::AuthProvider;
use crate::client::{Sealed, TdfClient};
use crate::config::ClientConfig;
use crate::error::TdfError;
use crate::kas::KasClient;
use async_trait::async_trait;
use opentdf_crypto::SharedRandom;
use opentdf_protocol::{Policy, TdfManifest};
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;

/// TDF3 client over in-memory containers
pub struct Tdf3Client {
    kas: KasClient,
    config: ClientConfig,
    policy: Policy,
    targets: Vec<KeyAccessTarget>,
    rng: SharedRandom,
    manifest: Option<TdfManifest>,
}

impl Tdf3Client {
    /// Client whose single key share goes to the configured KAS
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
            config: config.clone(),
            policy,
            targets: Vec::new(),
            rng,
            manifest: None,
        })
    }

    /// Split the key across these targets instead of the configured KAS
    #[must_use]
    pub fn with_key_access(mut self, target: KeyAccessTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn kas_client(&self) -> &KasClient {
        &self.kas
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
    }

    /// Manifest of the last container encrypted, decrypted or loaded
    pub fn manifest(&self) -> Option<&TdfManifest> {
        self.manifest.as_ref()
    }

    /// Encrypt options for this client, ready for more settings or `prepare`
    pub fn builder(&self) -> Tdf3EncryptBuilder {
        let targets = if self.targets.is_empty() {
            vec![KeyAccessTarget::wrapped(self.config.kas_url.clone())]
        } else {
            self.targets.clone()
        };
        targets.into_iter().fold(
            Tdf3EncryptBuilder::from_config(&self.config, self.policy.clone(), self.rng.clone()),
            Tdf3EncryptBuilder::key_access,
        )
    }

    /// Load a container's manifest without decrypting it
    pub fn load(&mut self, container: &[u8]) -> Result<&TdfManifest, TdfError> {
        let (manifest, _, _) = Tdf3Reader::read_manifest(Cursor::new(container))?;
        Ok(self.manifest.insert(manifest))
    }

    /// Re-upsert every key-access object of the loaded manifest
    pub async fn sync(&self) -> Result<(), TdfError> {
        let manifest = self
            .manifest
            .as_ref()
            .ok_or_else(|| TdfError::KeySync("no manifest loaded".to_string()))?;
        key_access::upsert_all(
            &self.kas,
            manifest.key_access(),
            &manifest.encryption_information.policy,
        )
        .await?;
        info!(kas_count = manifest.key_access().len(), "key access synced");
        Ok(())
    }
}

#[async_trait]
impl TdfClient for Tdf3Client {
    async fn encrypt(&mut self, plaintext: &[u8]) -> Result<Sealed, TdfError> {
        let mut stream = self.builder().prepare(plaintext, &self.kas).await?;
        let mut container = Vec::new();
        stream.write_to(&mut container)?;
        let warnings = stream.warnings().to_vec();
        self.manifest = stream.manifest().cloned();
        Ok(Sealed::new(container, warnings))
    }

    async fn decrypt(&mut self, container: &[u8]) -> Result<Vec<u8>, TdfError> {
        let mut reader = Tdf3Reader::open(Cursor::new(container), &self.kas).await?;
        let plaintext = reader.read_to_end()?;
        self.manifest = Some(reader.manifest().clone());
        Ok(plaintext)
    }
}
