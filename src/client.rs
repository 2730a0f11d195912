//! Capability shared by every container client

use crate::error::TdfError;
use async_trait::async_trait;
use opentdf_protocol::Policy;
use std::fmt;
use tracing::warn;

/// Non-fatal findings surfaced alongside a sealed container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyWarning {
    /// No data attributes and no dissemination list: any entity may decrypt
    Unrestricted { uuid: String },
}

impl fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyWarning::Unrestricted { uuid } => {
                write!(f, "policy {uuid} has no attributes or dissem; access is unrestricted")
            }
        }
    }
}

/// An encrypted container plus the warnings raised while producing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub container: Vec<u8>,
    pub warnings: Vec<PolicyWarning>,
}

impl Sealed {
    pub fn new(container: Vec<u8>, warnings: Vec<PolicyWarning>) -> Self {
        Self {
            container,
            warnings,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.container
    }
}

/// Encrypt and decrypt for one container format
///
/// At most one operation may be in flight per client; the `&mut self`
/// receivers enforce it.
#[async_trait]
pub trait TdfClient: Send {
    async fn encrypt(&mut self, plaintext: &[u8]) -> Result<Sealed, TdfError>;

    async fn decrypt(&mut self, container: &[u8]) -> Result<Vec<u8>, TdfError>;
}

/// Validate a policy and collect warnings for it
pub(crate) fn check_policy(policy: &Policy) -> Result<Vec<PolicyWarning>, TdfError> {
    policy.validate()?;
    if policy.is_unrestricted() {
        warn!(
            policy_uuid = %policy.uuid,
            "policy has no data attributes or dissem; any entity can decrypt"
        );
        return Ok(vec![PolicyWarning::Unrestricted {
            uuid: policy.uuid.clone(),
        }]);
    }
    Ok(Vec::new())
}
