//! NanoTDF dataset client
//!
//! One negotiated key encrypts a sequence of payloads, each under the next
//! value of a 24-bit IV counter. Every container repeats the cached header,
//! so each one decrypts on its own.
//!
//! ```text
//!  Unbound ──encrypt──▶ Bound ──encrypt × max_iterations──▶ Exhausted
//!                         ▲                                     │
//!                         └──────────────encrypt────────────────┘
//! ```
//!
//! Reaching `max_iterations` resets the iteration count to zero but keeps the
//! key. The IV counter never resets: once it would pass `0xFFFFFF` the
//! session is cleared and encryption fails with "Dataset full".

use crate::auth::AuthProvider;
use crate::client::{check_policy, PolicyWarning, Sealed, TdfClient};
use crate::config::ClientConfig;
use crate::error::TdfError;
use crate::kas::{ClientVersion, KasClient};
use crate::nanotdf::{
    build_header, fetch_kas_public_key, open_payload, parse_container, rewrap, seal_payload,
    HeaderOptions, PolicyEncoding,
};
use async_trait::async_trait;
use opentdf_crypto::{SharedRandom, SymmetricKey};
use opentdf_protocol::nanotdf::{Header, PolicyBindingMode, MAX_IV_COUNTER, POLICY_IV_COUNTER};
use opentdf_protocol::Policy;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetPhase {
    /// No header or key cached
    Unbound,
    /// Header and key cached, counter active
    Bound,
    /// The iteration count just wrapped to zero; the key stays bound
    Exhausted,
}

#[derive(Debug)]
struct BoundKey {
    header: Header,
    key: SymmetricKey,
    warnings: Vec<PolicyWarning>,
}

/// Encrypt and decrypt state of one dataset client
#[derive(Debug)]
pub struct DatasetSession {
    phase: DatasetPhase,
    bound: Option<BoundKey>,
    iv_counter: u32,
    iteration_count: u32,
    max_iterations: u32,
    wrap_count: u32,
    decrypt_cache: Option<(Vec<u8>, SymmetricKey)>,
}

impl DatasetSession {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            phase: DatasetPhase::Unbound,
            bound: None,
            iv_counter: POLICY_IV_COUNTER,
            iteration_count: 0,
            max_iterations,
            wrap_count: 0,
            decrypt_cache: None,
        }
    }

    pub fn phase(&self) -> DatasetPhase {
        self.phase
    }

    /// Last IV counter value used for a payload; 0 before the first encrypt
    pub fn iv_counter(&self) -> u32 {
        self.iv_counter
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// How many times the iteration count has wrapped to zero
    pub fn wrap_count(&self) -> u32 {
        self.wrap_count
    }

    pub fn header(&self) -> Option<&Header> {
        self.bound.as_ref().map(|bound| &bound.header)
    }

    fn bind(&mut self, header: Header, key: SymmetricKey, warnings: Vec<PolicyWarning>) {
        self.bound = Some(BoundKey {
            header,
            key,
            warnings,
        });
        self.phase = DatasetPhase::Bound;
    }

    /// Reserve the next IV and advance the iteration count
    fn advance(&mut self) -> Result<u32, TdfError> {
        if self.iv_counter >= MAX_IV_COUNTER {
            self.clear();
            return Err(TdfError::IvExhausted("Dataset full".to_string()));
        }
        self.iv_counter += 1;
        self.iteration_count += 1;
        if self.iteration_count >= self.max_iterations {
            self.iteration_count = 0;
            self.wrap_count += 1;
            self.phase = DatasetPhase::Exhausted;
            info!(
                max_iterations = self.max_iterations,
                iv_counter = self.iv_counter,
                "dataset iteration count wrapped; key remains bound"
            );
        } else if self.bound.is_some() {
            self.phase = DatasetPhase::Bound;
        }
        Ok(self.iv_counter)
    }

    fn cached_decrypt_key(&self, ephemeral_public_key: &[u8]) -> Option<&SymmetricKey> {
        self.decrypt_cache
            .as_ref()
            .filter(|(cached, _)| cached.as_slice() == ephemeral_public_key)
            .map(|(_, key)| key)
    }

    /// Drop every cached header and key
    pub fn clear(&mut self) {
        let max_iterations = self.max_iterations;
        *self = Self::new(max_iterations);
    }
}

/// NanoTDF client that reuses one key across many payloads
pub struct NanoTdfDatasetClient {
    kas: KasClient,
    kas_public_key: Option<String>,
    policy: Policy,
    options: HeaderOptions,
    client_version: ClientVersion,
    rng: SharedRandom,
    session: DatasetSession,
}

impl NanoTdfDatasetClient {
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
            rng,
            session: DatasetSession::new(config.max_key_iterations),
        })
    }

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
    pub fn with_client_version(mut self, version: ClientVersion) -> Self {
        self.client_version = version;
        self
    }

    pub fn session(&self) -> &DatasetSession {
        &self.session
    }

    pub fn phase(&self) -> DatasetPhase {
        self.session.phase()
    }

    /// Forget the bound key; the next encrypt negotiates a new one
    pub fn reset(&mut self) {
        self.session.clear();
    }

    async fn ensure_bound(&mut self) -> Result<(), TdfError> {
        if self.session.bound.is_some() {
            return Ok(());
        }
        let warnings = check_policy(&self.policy)?;
        let kas_public_key = match &self.kas_public_key {
            Some(pem) => pem.clone(),
            None => {
                let pem = fetch_kas_public_key(&self.kas, &self.options.kas_url).await?;
                self.kas_public_key = Some(pem.clone());
                pem
            }
        };
        let (header, key) =
            build_header(&self.options, &kas_public_key, &self.policy, self.rng.as_ref())?;
        debug!(kas = %self.options.kas_url, "dataset key bound");
        self.session.bind(header, key, warnings);
        Ok(())
    }
}

#[async_trait]
impl TdfClient for NanoTdfDatasetClient {
    async fn encrypt(&mut self, plaintext: &[u8]) -> Result<Sealed, TdfError> {
        self.ensure_bound().await?;
        let counter = self.session.advance()?;
        let bound = self
            .session
            .bound
            .as_ref()
            .ok_or_else(|| TdfError::IvExhausted("Dataset full".to_string()))?;
        let container = seal_payload(&bound.header, &bound.key, counter, plaintext)?;
        Ok(Sealed::new(container, bound.warnings.clone()))
    }

    async fn decrypt(&mut self, container: &[u8]) -> Result<Vec<u8>, TdfError> {
        let tdf = parse_container(container)?;
        let ephemeral = tdf.header.ephemeral_public_key();
        if let Some(key) = self.session.cached_decrypt_key(ephemeral) {
            return open_payload(&tdf, key);
        }

        let key = rewrap(&self.kas, &tdf.header, self.client_version).await?;
        let plaintext = open_payload(&tdf, &key)?;
        self.session.decrypt_cache = Some((ephemeral.to_vec(), key));
        Ok(plaintext)
    }
}
