//! Key-access objects: one per KAS, each holding one wrapped key share

use crate::error::{KasError, TdfError};
use crate::kas::KasClient;
use futures::future::join_all;
use opentdf_crypto::{
    calculate_policy_binding, EcdhKem, KeyEncapsulation as _, KeyShare, PublicKeyHandle,
};
use opentdf_protocol::manifest::PolicyBinding;
use opentdf_protocol::{KeyAccess, KeyAccessType};
use tracing::{debug, warn};

/// Where one key share goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAccessTarget {
    pub kind: KeyAccessType,
    pub url: String,
    /// KAS public key; fetched from the KAS when absent
    pub public_key_pem: Option<String>,
    pub kid: Option<String>,
}

impl KeyAccessTarget {
    pub fn wrapped(url: impl Into<String>) -> Self {
        Self {
            kind: KeyAccessType::Wrapped,
            url: url.into(),
            public_key_pem: None,
            kid: None,
        }
    }

    /// A share the KAS keeps; its wrap fields are stripped after upsert
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            kind: KeyAccessType::Remote,
            ..Self::wrapped(url)
        }
    }

    /// Build a target from a kind string such as `"wrapped"` or `"remote"`
    pub fn parse(kind: &str, url: impl Into<String>) -> Result<Self, TdfError> {
        let kind = KeyAccessType::parse(kind)
            .ok_or_else(|| TdfError::key_access(format!("unknown key access type: {kind}")))?;
        Ok(Self {
            kind,
            ..Self::wrapped(url)
        })
    }

    #[must_use]
    pub fn with_public_key(mut self, pem: impl Into<String>) -> Self {
        self.public_key_pem = Some(pem.into());
        self
    }

    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn validate(&self) -> Result<(), TdfError> {
        if self.url.trim().is_empty() {
            return Err(TdfError::key_access(format!(
                "{} key access has no KAS url",
                self.kind.as_str()
            )));
        }
        Ok(())
    }
}

/// Fill in missing KAS public keys, fetching concurrently
pub(crate) async fn resolve_public_keys(
    targets: &[KeyAccessTarget],
    kas: &KasClient,
) -> Result<Vec<String>, TdfError> {
    let lookups = targets.iter().map(|target| async move {
        target.validate()?;
        match &target.public_key_pem {
            Some(pem) => Ok(pem.clone()),
            None => {
                debug!(url = %target.url, "fetching KAS public key for key access");
                kas.public_key(&target.url)
                    .await
                    .map_err(|source| TdfError::KeyAccess {
                        reason: format!("no public key available from {}", target.url),
                        source: Some(source),
                    })
            }
        }
    });
    join_all(lookups).await.into_iter().collect()
}

/// Wrap one share to its KAS and bind it to the policy
pub(crate) fn wrap_share(
    target: &KeyAccessTarget,
    public_key_pem: &str,
    share: &KeyShare,
    policy_json: &str,
    kem: &EcdhKem,
) -> Result<KeyAccess, TdfError> {
    let kas_key = PublicKeyHandle::from_pem(public_key_pem).map_err(|e| TdfError::KeyAccess {
        reason: format!("public key for {} is unusable", target.url),
        source: Some(KasError::PemParse(e)),
    })?;
    let wrapped = kem.wrap(share, &kas_key)?;

    let mut access = KeyAccess::new(target.kind, target.url.clone());
    access.wrapped_key = Some(wrapped.wrapped_key_base64());
    access.ephemeral_public_key = Some(wrapped.ephemeral_public_key_pem);
    access.policy_binding = Some(PolicyBinding {
        alg: "HS256".to_string(),
        hash: calculate_policy_binding(policy_json, share)?,
    });
    access.kid = target.kid.clone();
    Ok(access)
}

/// Upsert the given key-access objects concurrently
///
/// Every KAS is attempted. Failures are logged and the first one is
/// returned; KAS instances that accepted the upsert keep it.
pub(crate) async fn upsert_all<'a>(
    kas: &KasClient,
    accesses: impl IntoIterator<Item = &'a KeyAccess>,
    policy_b64: &str,
) -> Result<(), TdfError> {
    let calls = accesses.into_iter().map(|access| async move {
        kas.upsert(access, policy_b64)
            .await
            .map_err(|source| (access.url.clone(), source))
    });
    let mut first_failure = None;
    for result in join_all(calls).await {
        if let Err((url, source)) = result {
            warn!(url = %url, error = %source, "KAS upsert failed");
            first_failure.get_or_insert(TdfError::KasUpsert { url, source });
        }
    }
    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
