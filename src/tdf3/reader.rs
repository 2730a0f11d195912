//! TDF3 verifying reader
//!
//! Opening an archive parses the manifest, rewraps every key share
//! concurrently, merges the shares and checks the root signature. Only then
//! are segments handed out, one at a time: each is read from its declared
//! byte range, checked against its manifest hash and decrypted.

use crate::error::TdfError;
use crate::kas::KasClient;
use futures::future::join_all;
use opentdf_crypto::{
    decode_signature, merge_shares, verify_root_signature, verify_segment_signature,
    AesGcmCipher, IntegrityAlgorithm, KeyShare, SymmetricCipher as _, SymmetricKey,
};
use opentdf_protocol::manifest::{MANIFEST_ENTRY, PAYLOAD_ENTRY};
use opentdf_protocol::TdfManifest;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;
use zip::{CompressionMethod, ZipArchive};

/// Byte range of the stored payload entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLocation {
    pub offset: u64,
    pub len: u64,
}

pub struct Tdf3Reader<R> {
    pub(super) source: R,
    manifest: TdfManifest,
    payload: PayloadLocation,
    key: SymmetricKey,
    segment_alg: IntegrityAlgorithm,
}

impl<R: Read + Seek> Tdf3Reader<R> {
    /// Parse the manifest and locate the payload without contacting a KAS
    pub fn read_manifest(source: R) -> Result<(TdfManifest, PayloadLocation, R), TdfError> {
        let mut archive = ZipArchive::new(source)?;

        let manifest_json = {
            let mut entry = archive.by_name(MANIFEST_ENTRY).map_err(|e| {
                TdfError::extraction_from(format!("archive has no {MANIFEST_ENTRY}"), e)
            })?;
            let mut json = String::new();
            entry
                .read_to_string(&mut json)
                .map_err(|e| TdfError::extraction_from("manifest entry is unreadable", e))?;
            json
        };
        let manifest = TdfManifest::from_json(&manifest_json)
            .map_err(|e| TdfError::extraction_from("manifest is not valid JSON", e))?;

        let location = {
            let entry = archive.by_name(PAYLOAD_ENTRY).map_err(|e| {
                TdfError::extraction_from(format!("archive has no {PAYLOAD_ENTRY}"), e)
            })?;
            if entry.compression() != CompressionMethod::Stored {
                return Err(TdfError::extraction(format!(
                    "payload entry is compressed with {:?}",
                    entry.compression()
                )));
            }
            PayloadLocation {
                offset: entry.data_start(),
                len: entry.size(),
            }
        };
        Ok((manifest, location, archive.into_inner()))
    }

    /// Open an archive: rewrap all shares and verify the root signature
    pub async fn open(source: R, kas: &KasClient) -> Result<Self, TdfError> {
        let (manifest, payload, source) = Self::read_manifest(source)?;
        if manifest.key_access().is_empty() {
            return Err(TdfError::key_access("manifest has no key access objects"));
        }

        let policy = &manifest.encryption_information.policy;
        let rewraps = manifest.key_access().iter().map(|access| async move {
            kas.rewrap_key_access(access, policy)
                .await
                .map_err(|source| TdfError::KasDecrypt {
                    url: access.url.clone(),
                    source,
                })
        });
        let shares = join_all(rewraps)
            .await
            .into_iter()
            .collect::<Result<Vec<KeyShare>, TdfError>>()?;
        let key = merge_shares(&shares)?;
        debug!(shares = shares.len(), "TDF3 key shares merged");

        let segment_alg = verify_integrity(&manifest, &key, payload.len)?;
        Ok(Self {
            source,
            manifest,
            payload,
            key,
            segment_alg,
        })
    }

    pub fn manifest(&self) -> &TdfManifest {
        &self.manifest
    }

    pub fn payload_location(&self) -> PayloadLocation {
        self.payload
    }

    /// Lazily verified plaintext segments, in order
    pub fn segments(&mut self) -> Segments<'_, R> {
        Segments {
            reader: self,
            index: 0,
            offset: 0,
            done: false,
        }
    }

    /// Decrypt every segment into one buffer
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, TdfError> {
        let mut plaintext = Vec::new();
        for segment in self.segments() {
            plaintext.extend_from_slice(&segment?);
        }
        Ok(plaintext)
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn read_segment(&mut self, index: usize, offset: u64) -> Result<(Vec<u8>, u64), TdfError> {
        let integrity = self.manifest.integrity();
        let (Some(encrypted_size), Some(plaintext_size)) =
            (integrity.encrypted_size(index), integrity.plaintext_size(index))
        else {
            return Err(TdfError::ManifestIntegrity(format!("segment {index} not in manifest")));
        };
        let expected_hash = integrity.segments[index].hash.clone();

        let len = usize::try_from(encrypted_size)
            .map_err(|_| TdfError::ResourceLimit(format!("segment {index} too large")))?;
        let mut encrypted = vec![0u8; len];
        self.source
            .seek(SeekFrom::Start(self.payload.offset + offset))?;
        self.source.read_exact(&mut encrypted).map_err(|e| {
            TdfError::extraction_from(format!("segment {index} is truncated"), e)
        })?;

        verify_segment_signature(self.segment_alg, &self.key, &encrypted, &expected_hash)
            .map_err(|_| TdfError::ManifestIntegrity(format!("segment {index} hash mismatch")))?;

        let plaintext = AesGcmCipher::default()
            .decrypt(&encrypted, &self.key)
            .map_err(TdfError::TdfDecrypt)?;
        if plaintext.len() as u64 != plaintext_size {
            return Err(TdfError::ManifestIntegrity(format!(
                "segment {index} is {} bytes, manifest declares {plaintext_size}",
                plaintext.len()
            )));
        }
        Ok((plaintext, encrypted_size))
    }
}

/// Check the root signature and that the segments tile the payload
fn verify_integrity(
    manifest: &TdfManifest,
    key: &SymmetricKey,
    payload_len: u64,
) -> Result<IntegrityAlgorithm, TdfError> {
    let integrity = manifest.integrity();
    let root_alg: IntegrityAlgorithm = integrity.root_signature.alg.parse().map_err(|_| {
        TdfError::ManifestIntegrity(format!(
            "unknown root signature algorithm {}",
            integrity.root_signature.alg
        ))
    })?;
    let segment_alg: IntegrityAlgorithm = integrity.segment_hash_alg.parse().map_err(|_| {
        TdfError::ManifestIntegrity(format!(
            "unknown segment hash algorithm {}",
            integrity.segment_hash_alg
        ))
    })?;

    let signatures = integrity
        .segments
        .iter()
        .map(|segment| decode_signature(&segment.hash))
        .collect::<Result<Vec<String>, _>>()
        .map_err(|_| TdfError::ManifestIntegrity("segment hash is not base64 hex".to_string()))?;
    verify_root_signature(root_alg, key, &signatures, &integrity.root_signature.sig)
        .map_err(|_| TdfError::ManifestIntegrity("root signature mismatch".to_string()))?;

    let declared: u64 = (0..integrity.segments.len())
        .filter_map(|index| integrity.encrypted_size(index))
        .sum();
    if declared != payload_len {
        return Err(TdfError::ManifestIntegrity(format!(
            "segments declare {declared} bytes, payload holds {payload_len}"
        )));
    }
    Ok(segment_alg)
}

/// Iterator over verified plaintext segments; fused after the first error
pub struct Segments<'a, R> {
    reader: &'a mut Tdf3Reader<R>,
    index: usize,
    offset: u64,
    done: bool,
}

impl<R: Read + Seek> Iterator for Segments<'_, R> {
    type Item = Result<Vec<u8>, TdfError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= self.reader.manifest.integrity().segments.len() {
            return None;
        }
        match self.reader.read_segment(self.index, self.offset) {
            Ok((plaintext, encrypted_size)) => {
                self.index += 1;
                self.offset += encrypted_size;
                Some(Ok(plaintext))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
