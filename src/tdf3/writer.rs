//! TDF3 encrypting writer
//!
//! [`Tdf3EncryptBuilder::prepare`] does the network work up front: resolve
//! KAS public keys, split and wrap the payload key, upsert remote shares.
//! The returned [`EncryptStream`] is then a plain iterator. Each `next()`
//! reads at most one segment from the source, so ciphertext is produced only
//! as fast as the consumer pulls it.

use crate::client::{check_policy, PolicyWarning};
use crate::config::ClientConfig;
use crate::error::TdfError;
use crate::kas::KasClient;
use crate::tdf3::archive::ZipStream;
use crate::tdf3::key_access::{resolve_public_keys, upsert_all, wrap_share, KeyAccessTarget};
use opentdf_crypto::{
    calculate_root_signature, encode_signature, random_bytes, AesGcmCipher, EcCurve, EcdhKem,
    IntegrityAlgorithm, SharedRandom, SymmetricCipher as _, SymmetricKey, GCM_IV_SIZE,
};
use opentdf_protocol::manifest::{MANIFEST_ENTRY, PAYLOAD_ENTRY};
use opentdf_protocol::{
    EncryptionInformation, EncryptionMethod, IntegrityInformation, KeyAccess, KeyAccessType,
    Payload, Policy, RootSignature, Segment, TdfManifest,
};
use std::io::{ErrorKind, Read, Write};
use tracing::{debug, info};

/// IV plus GCM tag added to every segment
pub const SEGMENT_OVERHEAD: u64 = (GCM_IV_SIZE + 16) as u64;

/// Options for one TDF3 encryption
#[derive(Clone)]
pub struct Tdf3EncryptBuilder {
    policy: Policy,
    targets: Vec<KeyAccessTarget>,
    segment_size: u64,
    integrity_algorithm: IntegrityAlgorithm,
    segment_integrity_algorithm: IntegrityAlgorithm,
    byte_limit: Option<u64>,
    mime_type: Option<String>,
    rng: SharedRandom,
}

impl Tdf3EncryptBuilder {
    pub fn new(policy: Policy, rng: SharedRandom) -> Self {
        let defaults = ClientConfig::default();
        Self {
            policy,
            targets: Vec::new(),
            segment_size: defaults.segment_size,
            integrity_algorithm: defaults.integrity_algorithm,
            segment_integrity_algorithm: defaults.segment_integrity_algorithm,
            byte_limit: None,
            mime_type: None,
            rng,
        }
    }

    /// Options from configuration, without key-access targets
    pub fn from_config(config: &ClientConfig, policy: Policy, rng: SharedRandom) -> Self {
        Self {
            segment_size: config.segment_size,
            integrity_algorithm: config.integrity_algorithm,
            segment_integrity_algorithm: config.segment_integrity_algorithm,
            byte_limit: config.byte_limit,
            mime_type: config.mime_type.clone(),
            ..Self::new(policy, rng)
        }
    }

    /// Add a KAS that receives one share of the key
    #[must_use]
    pub fn key_access(mut self, target: KeyAccessTarget) -> Self {
        self.targets.push(target);
        self
    }

    #[must_use]
    pub fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    #[must_use]
    pub fn integrity_algorithm(mut self, alg: IntegrityAlgorithm) -> Self {
        self.integrity_algorithm = alg;
        self
    }

    #[must_use]
    pub fn segment_integrity_algorithm(mut self, alg: IntegrityAlgorithm) -> Self {
        self.segment_integrity_algorithm = alg;
        self
    }

    /// Fail once more than `limit` archive bytes would be emitted
    #[must_use]
    pub fn byte_limit(mut self, limit: u64) -> Self {
        self.byte_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Negotiate keys and return the lazy ciphertext stream over `source`
    pub async fn prepare<R: Read>(
        self,
        source: R,
        kas: &KasClient,
    ) -> Result<EncryptStream<R>, TdfError> {
        if self.targets.is_empty() {
            return Err(TdfError::key_access("no key access targets configured"));
        }
        if self.segment_size == 0 || self.segment_size > u64::from(u32::MAX) - SEGMENT_OVERHEAD {
            return Err(TdfError::Config(format!(
                "segment size {} out of range",
                self.segment_size
            )));
        }
        let warnings = check_policy(&self.policy)?;
        let segment_len = usize::try_from(self.segment_size)
            .map_err(|_| TdfError::Config("segment size exceeds address space".to_string()))?;

        let public_keys = resolve_public_keys(&self.targets, kas).await?;

        let key = SymmetricKey::generate(self.rng.as_ref());
        let shares = key.split(self.targets.len(), self.rng.as_ref())?;
        let policy_json = self.policy.to_json()?;
        let policy_b64 = self.policy.to_base64()?;
        let kem = EcdhKem::new(EcCurve::P256, self.rng.clone());

        let mut key_access = self
            .targets
            .iter()
            .zip(&public_keys)
            .zip(&shares)
            .map(|((target, pem), share)| wrap_share(target, pem, share, &policy_json, &kem))
            .collect::<Result<Vec<KeyAccess>, TdfError>>()?;

        let has_remote = key_access
            .iter()
            .any(|access| access.access_type == KeyAccessType::Remote);
        let manifest_policy = if has_remote {
            let remotes = key_access
                .iter()
                .filter(|access| access.access_type == KeyAccessType::Remote);
            upsert_all(kas, remotes, &policy_b64).await?;
            for access in key_access
                .iter_mut()
                .filter(|access| access.access_type == KeyAccessType::Remote)
            {
                access.strip_wrap_fields();
            }
            self.policy.compact().to_base64()?
        } else {
            policy_b64
        };

        debug!(
            shares = key_access.len(),
            segment_size = self.segment_size,
            remote = has_remote,
            "TDF3 key access prepared"
        );

        Ok(EncryptStream {
            source,
            key,
            rng: self.rng,
            segment_len,
            segment_size: self.segment_size,
            integrity_algorithm: self.integrity_algorithm,
            segment_integrity_algorithm: self.segment_integrity_algorithm,
            byte_limit: self.byte_limit,
            mime_type: self.mime_type,
            key_access,
            policy_b64: manifest_policy,
            warnings,
            stage: Stage::PayloadHeader,
            zip: ZipStream::new(chrono::Utc::now().naive_utc()),
            segment_signatures: Vec::new(),
            segments: Vec::new(),
            plaintext_len: 0,
            manifest: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PayloadHeader,
    Segments,
    PayloadDescriptor,
    Manifest,
    CentralDirectory,
    Done,
}

/// Lazy, finite, non-restartable sequence of archive chunks
///
/// Yields the payload local header, one chunk per encrypted segment, the
/// payload descriptor, the manifest entry and the central directory. After
/// an error the stream is fused.
pub struct EncryptStream<R> {
    source: R,
    key: SymmetricKey,
    rng: SharedRandom,
    segment_len: usize,
    segment_size: u64,
    integrity_algorithm: IntegrityAlgorithm,
    segment_integrity_algorithm: IntegrityAlgorithm,
    byte_limit: Option<u64>,
    mime_type: Option<String>,
    key_access: Vec<KeyAccess>,
    policy_b64: String,
    warnings: Vec<PolicyWarning>,
    stage: Stage,
    zip: ZipStream,
    segment_signatures: Vec<String>,
    segments: Vec<Segment>,
    plaintext_len: u64,
    manifest: Option<TdfManifest>,
}

impl<R: Read> EncryptStream<R> {
    /// The manifest, available once the stream is exhausted
    pub fn manifest(&self) -> Option<&TdfManifest> {
        self.manifest.as_ref()
    }

    pub fn warnings(&self) -> &[PolicyWarning] {
        &self.warnings
    }

    /// Archive bytes produced so far
    pub fn bytes_emitted(&self) -> u64 {
        self.zip.offset()
    }

    /// Drain the stream into `sink`, returning the archive length
    pub fn write_to<W: Write>(&mut self, sink: &mut W) -> Result<u64, TdfError> {
        let mut written = 0u64;
        while let Some(chunk) = self.next() {
            let chunk = chunk?;
            sink.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        sink.flush()?;
        Ok(written)
    }

    fn step(&mut self) -> Result<Option<Vec<u8>>, TdfError> {
        loop {
            match self.stage {
                Stage::Done => return Ok(None),
                Stage::PayloadHeader => {
                    self.stage = Stage::Segments;
                    return self.zip.start_entry(PAYLOAD_ENTRY).map(Some);
                }
                Stage::Segments => match self.next_segment()? {
                    Some(chunk) => return Ok(Some(chunk)),
                    None => self.stage = Stage::PayloadDescriptor,
                },
                Stage::PayloadDescriptor => {
                    self.stage = Stage::Manifest;
                    return self.zip.finish_entry().map(Some);
                }
                Stage::Manifest => {
                    self.stage = Stage::CentralDirectory;
                    return self.manifest_entry().map(Some);
                }
                Stage::CentralDirectory => {
                    self.stage = Stage::Done;
                    let trailer = self.zip.finish()?;
                    info!(
                        segments = self.segments.len(),
                        plaintext_len = self.plaintext_len,
                        archive_len = self.zip.offset(),
                        "TDF3 archive complete"
                    );
                    return Ok(Some(trailer));
                }
            }
        }
    }

    /// Read, encrypt and sign one segment; `None` at end of input
    fn next_segment(&mut self) -> Result<Option<Vec<u8>>, TdfError> {
        let mut buf = vec![0u8; self.segment_len];
        let mut filled = 0;
        while filled < buf.len() {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);

        let iv = random_bytes(self.rng.as_ref(), GCM_IV_SIZE);
        let encrypted = AesGcmCipher::default()
            .encrypt(&buf, &self.key, &iv)
            .map_err(|e| TdfError::Crypto(e.into()))?
            .to_bytes();
        let signature = self
            .segment_integrity_algorithm
            .sign_hex(&self.key, &encrypted)?;

        let plaintext_size = filled as u64;
        let encrypted_size = encrypted.len() as u64;
        self.segments.push(Segment {
            hash: encode_signature(&signature),
            segment_size: (plaintext_size != self.segment_size).then_some(plaintext_size),
            encrypted_segment_size: (encrypted_size != self.segment_size + SEGMENT_OVERHEAD)
                .then_some(encrypted_size),
        });
        self.segment_signatures.push(signature);
        self.plaintext_len += plaintext_size;

        self.zip.write_data(&encrypted)?;
        Ok(Some(encrypted))
    }

    fn manifest_entry(&mut self) -> Result<Vec<u8>, TdfError> {
        let root_signature = calculate_root_signature(
            self.integrity_algorithm,
            &self.key,
            &self.segment_signatures,
        )?;
        let manifest = TdfManifest {
            payload: Payload {
                mime_type: self.mime_type.clone(),
                ..Payload::default()
            },
            encryption_information: EncryptionInformation {
                encryption_type: "split".to_string(),
                key_access: self.key_access.clone(),
                method: EncryptionMethod::default(),
                integrity_information: IntegrityInformation {
                    root_signature: RootSignature {
                        alg: self.integrity_algorithm.as_str().to_string(),
                        sig: root_signature,
                    },
                    segment_size_default: self.segment_size,
                    encrypted_segment_size_default: self.segment_size + SEGMENT_OVERHEAD,
                    segment_hash_alg: self.segment_integrity_algorithm.as_str().to_string(),
                    segments: self.segments.clone(),
                },
                policy: self.policy_b64.clone(),
            },
        };
        let json = manifest
            .to_json()
            .map_err(|e| TdfError::extraction_from("manifest serialization failed", e))?;

        let mut entry = self.zip.start_entry(MANIFEST_ENTRY)?;
        self.zip.write_data(json.as_bytes())?;
        entry.extend_from_slice(json.as_bytes());
        entry.extend(self.zip.finish_entry()?);
        self.manifest = Some(manifest);
        Ok(entry)
    }
}

impl<R: Read> Iterator for EncryptStream<R> {
    type Item = Result<Vec<u8>, TdfError>;

    fn next(&mut self) -> Option<Self::Item> {
        let before = self.zip.offset();
        match self.step() {
            Ok(Some(chunk)) => {
                if let Some(limit) = self.byte_limit {
                    if before + chunk.len() as u64 > limit {
                        self.stage = Stage::Done;
                        return Some(Err(TdfError::ResourceLimit(format!(
                            "archive would exceed the byte limit of {limit}"
                        ))));
                    }
                }
                Some(Ok(chunk))
            }
            Ok(None) => None,
            Err(e) => {
                self.stage = Stage::Done;
                Some(Err(e))
            }
        }
    }
}
