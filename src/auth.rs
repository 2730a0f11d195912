//! Bearer credential provider
//!
//! Token acquisition lives outside the engine. The KAS client only needs two
//! things from a provider: a place to publish the request-signer public key,
//! and an `Authorization` header value.

use crate::error::KasError;
use async_trait::async_trait;
use std::sync::Mutex;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Publish the signer public key (base64 of its PEM) so issued tokens bind to it
    async fn update_client_public_key(&self, signer_public_key: &str) -> Result<(), KasError>;

    /// Value for the `Authorization` header, e.g. `Bearer <token>`
    async fn authorization(&self) -> Result<String, KasError>;
}

/// Provider with a fixed bearer token
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: String,
    client_public_key: Mutex<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client_public_key: Mutex::new(None),
        }
    }

    /// Last signer key published through this provider
    pub fn client_public_key(&self) -> Option<String> {
        match self.client_public_key.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn update_client_public_key(&self, signer_public_key: &str) -> Result<(), KasError> {
        let mut slot = self
            .client_public_key
            .lock()
            .map_err(|_| KasError::Credential("signer key slot poisoned".to_string()))?;
        *slot = Some(signer_public_key.to_string());
        Ok(())
    }

    async fn authorization(&self) -> Result<String, KasError> {
        if self.token.is_empty() {
            return Err(KasError::Credential("no bearer token configured".to_string()));
        }
        Ok(format!("Bearer {}", self.token))
    }
}
