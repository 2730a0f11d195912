//! TDF3 archives against simulated KAS instances
//!
//! - segmenting, streaming reads and mime type
//! - segment and root-signature tampering
//! - byte limits
//! - multi-KAS key splitting, remote upsert and sync

mod common;

use common::{auth, restricted_policy, rng, SimulatedKas, TEST_PLAINTEXT};
use opentdf_client::opentdf_crypto::IntegrityAlgorithm;
use opentdf_client::opentdf_protocol::manifest::{MANIFEST_ENTRY, PAYLOAD_ENTRY};
use opentdf_client::opentdf_protocol::KeyAccessType;
use opentdf_client::{
    KeyAccessTarget, Policy, Tdf3Client, Tdf3Reader, TdfClient, TdfError, TdfManifest,
};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

const MIB: usize = 1024 * 1024;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn client(kas: &SimulatedKas, seed: u64) -> Tdf3Client {
    Tdf3Client::new(&kas.config(), restricted_policy("tdf3-policy"), auth(), rng(seed)).unwrap()
}

/// Rebuild an archive with the manifest passed through `edit`
fn rewrite_manifest(container: &[u8], edit: impl FnOnce(&mut TdfManifest)) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(Cursor::new(container)).unwrap();
    let mut payload = Vec::new();
    archive
        .by_name(PAYLOAD_ENTRY)
        .unwrap()
        .read_to_end(&mut payload)
        .unwrap();
    let mut json = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .unwrap()
        .read_to_string(&mut json)
        .unwrap();
    let mut manifest = TdfManifest::from_json(&json).unwrap();
    edit(&mut manifest);

    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(PAYLOAD_ENTRY, options).unwrap();
    writer.write_all(&payload).unwrap();
    writer.start_file(MANIFEST_ENTRY, options).unwrap();
    writer
        .write_all(manifest.to_json().unwrap().as_bytes())
        .unwrap();
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn test_three_full_segments() {
    common::init_tracing();
    let kas = SimulatedKas::with_endpoints(41).await;
    let mut client = client(&kas, 51);
    let plaintext = patterned(3 * MIB);

    let sealed = client.encrypt(&plaintext).await.unwrap();
    assert!(sealed.warnings.is_empty());
    assert_eq!(&sealed.container[..4], b"PK\x03\x04");

    let manifest = client.manifest().unwrap();
    let integrity = manifest.integrity();
    assert_eq!(integrity.segments.len(), 3);
    assert!(integrity.segments.iter().all(|s| s.segment_size.is_none()));
    assert_eq!(integrity.segment_size_default, MIB as u64);
    assert_eq!(integrity.encrypted_segment_size_default, MIB as u64 + 28);
    assert_eq!(manifest.encryption_information.encryption_type, "split");

    assert_eq!(client.decrypt(&sealed.container).await.unwrap(), plaintext);
}

#[tokio::test]
async fn test_partial_final_segment() {
    let kas = SimulatedKas::with_endpoints(42).await;
    let mut client = client(&kas, 52);
    let plaintext = patterned(2 * MIB + MIB / 2);

    let sealed = client.encrypt(&plaintext).await.unwrap();
    let segments = &client.manifest().unwrap().integrity().segments;
    assert_eq!(segments.len(), 3);
    assert!(segments[..2].iter().all(|s| s.segment_size.is_none()));
    assert_eq!(segments[2].segment_size, Some((MIB / 2) as u64));
    assert_eq!(segments[2].encrypted_segment_size, Some((MIB / 2) as u64 + 28));

    assert_eq!(client.decrypt(&sealed.container).await.unwrap(), plaintext);
}

#[tokio::test]
async fn test_empty_plaintext_has_no_segments() {
    let kas = SimulatedKas::with_endpoints(43).await;
    let mut client = client(&kas, 53);

    let sealed = client.encrypt(b"").await.unwrap();
    assert!(client.manifest().unwrap().integrity().segments.is_empty());
    assert!(client.decrypt(&sealed.container).await.unwrap().is_empty());
}

fn gmac_client(kas: &SimulatedKas, seed: u64) -> Tdf3Client {
    let mut config = kas.config();
    config.segment_size = 16;
    config.integrity_algorithm = IntegrityAlgorithm::Gmac;
    config.segment_integrity_algorithm = IntegrityAlgorithm::Gmac;
    Tdf3Client::new(&config, restricted_policy("gmac-root"), auth(), rng(seed)).unwrap()
}

#[tokio::test]
async fn test_gmac_root_round_trip() {
    let kas = SimulatedKas::with_endpoints(91).await;
    let mut client = gmac_client(&kas, 92);
    let plaintext = patterned(48);

    let sealed = client.encrypt(&plaintext).await.unwrap();
    let integrity = client.manifest().unwrap().integrity();
    assert_eq!(integrity.root_signature.alg, "GMAC");
    assert_eq!(integrity.segment_hash_alg, "GMAC");
    assert_eq!(integrity.segments.len(), 3);

    assert_eq!(client.decrypt(&sealed.container).await.unwrap(), plaintext);
}

#[tokio::test]
async fn test_gmac_root_over_empty_plaintext() {
    let kas = SimulatedKas::with_endpoints(93).await;
    let mut client = gmac_client(&kas, 94);

    let sealed = client.encrypt(b"").await.unwrap();
    let integrity = client.manifest().unwrap().integrity();
    assert!(integrity.segments.is_empty());
    assert_eq!(integrity.root_signature.alg, "GMAC");
    assert!(client.decrypt(&sealed.container).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gmac_root_rejects_copied_segment_hash() {
    let kas = SimulatedKas::with_endpoints(95).await;
    let mut client = gmac_client(&kas, 96);
    let container = client.encrypt(&patterned(48)).await.unwrap().into_bytes();

    let forged = rewrite_manifest(&container, |manifest| {
        let segments = &mut manifest.encryption_information.integrity_information.segments;
        segments[1].hash = segments[0].hash.clone();
    });
    let err = client.decrypt(&forged).await.unwrap_err();
    assert!(
        matches!(err, TdfError::ManifestIntegrity(ref reason) if reason.contains("root")),
        "got {err:?}"
    );

    let err = Tdf3Reader::open(Cursor::new(forged.as_slice()), client.kas_client())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TdfError::ManifestIntegrity(_)), "got {err:?}");
}

#[tokio::test]
async fn test_stream_to_file_and_read_segments_lazily() {
    let kas = SimulatedKas::with_endpoints(44).await;
    let client = client(&kas, 54);
    let plaintext = patterned(10_000);

    let mut stream = client
        .builder()
        .segment_size(4096)
        .segment_integrity_algorithm(IntegrityAlgorithm::Gmac)
        .mime_type("application/octet-stream")
        .prepare(plaintext.as_slice(), client.kas_client())
        .await
        .unwrap();
    let mut file = tempfile::tempfile().unwrap();
    let written = stream.write_to(&mut file).unwrap();
    assert_eq!(written, stream.bytes_emitted());
    assert_eq!(written, file.metadata().unwrap().len());
    file.seek(SeekFrom::Start(0)).unwrap();

    let mut reader = Tdf3Reader::open(file, client.kas_client()).await.unwrap();
    let manifest = reader.manifest();
    assert_eq!(manifest.integrity().segment_hash_alg, "GMAC");
    assert_eq!(
        manifest.payload.mime_type.as_deref(),
        Some("application/octet-stream")
    );
    assert_eq!(reader.payload_location().len, 10_000 + 3 * 28);

    let segments: Vec<Vec<u8>> = reader.segments().map(Result::unwrap).collect();
    assert_eq!(
        segments.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![4096, 4096, 1808]
    );
    assert_eq!(segments.concat(), plaintext);
}

#[tokio::test]
async fn test_tampered_segment_is_rejected() {
    let kas = SimulatedKas::with_endpoints(45).await;
    let mut client = client(&kas, 55);
    let mut container = client.encrypt(&patterned(5000)).await.unwrap().into_bytes();

    let (_, location, _) = Tdf3Reader::read_manifest(Cursor::new(container.as_slice())).unwrap();
    container[location.offset as usize + 20] ^= 0x01;

    let err = client.decrypt(&container).await.unwrap_err();
    assert!(matches!(err, TdfError::ManifestIntegrity(_)), "got {err:?}");
}

#[tokio::test]
async fn test_tampered_root_signature_is_rejected() {
    let kas = SimulatedKas::with_endpoints(46).await;
    let mut client = client(&kas, 56);
    let container = client.encrypt(TEST_PLAINTEXT).await.unwrap().into_bytes();

    let forged = rewrite_manifest(&container, |manifest| {
        let root = &mut manifest.encryption_information.integrity_information.root_signature;
        root.sig = "AAAAAAAAAAAAAAAAAAAAAA==".to_string();
    });
    let err = client.decrypt(&forged).await.unwrap_err();
    assert!(
        matches!(err, TdfError::ManifestIntegrity(ref reason) if reason.contains("root")),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_dropped_segment_is_rejected() {
    let kas = SimulatedKas::with_endpoints(47).await;
    let mut client = client(&kas, 57);
    let container = client.encrypt(&patterned(3 * MIB)).await.unwrap().into_bytes();

    let forged = rewrite_manifest(&container, |manifest| {
        manifest
            .encryption_information
            .integrity_information
            .segments
            .pop();
    });
    let err = client.decrypt(&forged).await.unwrap_err();
    assert!(err.is_integrity_error(), "got {err:?}");
}

#[tokio::test]
async fn test_byte_limit_stops_the_stream() {
    let kas = SimulatedKas::with_endpoints(48).await;
    let mut config = kas.config();
    config.byte_limit = Some(1000);
    let mut client =
        Tdf3Client::new(&config, restricted_policy("limited"), auth(), rng(58)).unwrap();

    let err = client.encrypt(&patterned(MIB)).await.unwrap_err();
    assert!(matches!(err, TdfError::ResourceLimit(_)), "got {err:?}");

    let plaintext = patterned(MIB);
    let mut stream = client
        .builder()
        .byte_limit(1000)
        .prepare(plaintext.as_slice(), client.kas_client())
        .await
        .unwrap();
    assert!(matches!(stream.next(), Some(Ok(_))));
    assert!(matches!(stream.next(), Some(Err(TdfError::ResourceLimit(_)))));
    assert!(stream.next().is_none());
}

#[tokio::test]
async fn test_key_split_across_three_kas() {
    let kas_a = SimulatedKas::with_endpoints(61).await;
    let kas_b = SimulatedKas::with_endpoints(62).await;
    let kas_c = SimulatedKas::with_endpoints(63).await;

    let mut client = client(&kas_a, 64)
        .with_key_access(KeyAccessTarget::wrapped(kas_a.url()).with_kid("a1"))
        .with_key_access(KeyAccessTarget::wrapped(kas_b.url()))
        .with_key_access(
            KeyAccessTarget::wrapped(kas_c.url()).with_public_key(kas_c.public_key_pem()),
        );
    let sealed = client.encrypt(TEST_PLAINTEXT).await.unwrap();

    let key_access = client.manifest().unwrap().key_access();
    let urls: Vec<&str> = key_access.iter().map(|kao| kao.url.as_str()).collect();
    assert_eq!(urls, vec![kas_a.url(), kas_b.url(), kas_c.url()]);
    assert!(key_access.iter().all(|kao| kao.wrapped_key.is_some()));
    assert_eq!(key_access[0].kid.as_deref(), Some("a1"));

    assert_eq!(client.decrypt(&sealed.container).await.unwrap(), TEST_PLAINTEXT);
}

#[tokio::test]
async fn test_missing_share_fails_decrypt() {
    let kas_a = SimulatedKas::with_endpoints(65).await;
    let mut kas_b = SimulatedKas::start(66).await;
    let _public_key = kas_b.mock_public_key().await;
    let _denied = kas_b
        .server
        .mock("POST", "/v2/rewrap")
        .with_status(403)
        .with_body("attribute mismatch")
        .create_async()
        .await;

    let mut client = client(&kas_a, 67)
        .with_key_access(KeyAccessTarget::wrapped(kas_a.url()))
        .with_key_access(KeyAccessTarget::wrapped(kas_b.url()));
    let sealed = client.encrypt(TEST_PLAINTEXT).await.unwrap();

    let err = client.decrypt(&sealed.container).await.unwrap_err();
    match err {
        TdfError::KasDecrypt { url, .. } => assert_eq!(url, kas_b.url()),
        other => panic!("expected KasDecrypt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_key_access_is_upserted_and_stripped() {
    let mut kas = SimulatedKas::with_endpoints(71).await;
    let _upsert = kas.mock_upsert().await;

    let mut client = client(&kas, 72).with_key_access(KeyAccessTarget::remote(kas.url()));
    let sealed = client.encrypt(TEST_PLAINTEXT).await.unwrap();
    assert_eq!(kas.remote_share_count(), 1);

    let manifest = client.manifest().unwrap();
    let kao = &manifest.key_access()[0];
    assert_eq!(kao.access_type, KeyAccessType::Remote);
    assert!(kao.wrapped_key.is_none());
    assert!(kao.policy_binding.is_none());
    let policy = Policy::from_base64(&manifest.encryption_information.policy).unwrap();
    assert_eq!(policy.uuid, "tdf3-policy");
    assert!(policy.body.is_none());

    assert_eq!(client.decrypt(&sealed.container).await.unwrap(), TEST_PLAINTEXT);
}

#[tokio::test]
async fn test_upsert_failure_names_the_kas() {
    let mut kas = SimulatedKas::with_endpoints(73).await;
    let _broken = kas
        .server
        .mock("POST", "/v2/upsert")
        .with_status(500)
        .with_body("storage offline")
        .create_async()
        .await;

    let mut client = client(&kas, 74).with_key_access(KeyAccessTarget::remote(kas.url()));
    let err = client.encrypt(TEST_PLAINTEXT).await.unwrap_err();
    match err {
        TdfError::KasUpsert { ref url, .. } => assert_eq!(url, &kas.url()),
        ref other => panic!("expected KasUpsert, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_sync_loaded_manifest() {
    let mut kas = SimulatedKas::with_endpoints(75).await;
    let _upsert = kas.mock_upsert().await;

    let mut writer = client(&kas, 76).with_key_access(KeyAccessTarget::remote(kas.url()));
    let sealed = writer.encrypt(TEST_PLAINTEXT).await.unwrap();
    writer.sync().await.unwrap();

    let mut other = client(&kas, 77);
    assert!(matches!(other.sync().await, Err(TdfError::KeySync(_))));

    let loaded = other.load(&sealed.container).unwrap();
    assert_eq!(loaded.key_access().len(), 1);
    other.sync().await.unwrap();
    assert_eq!(kas.remote_share_count(), 1);
}

#[tokio::test]
async fn test_unrestricted_policy_warns() {
    let kas = SimulatedKas::with_endpoints(78).await;
    let mut client =
        Tdf3Client::new(&kas.config(), Policy::with_uuid("open-tdf3"), auth(), rng(79)).unwrap();

    let sealed = client.encrypt(TEST_PLAINTEXT).await.unwrap();
    assert_eq!(sealed.warnings.len(), 1);
    assert!(sealed.warnings[0].to_string().contains("open-tdf3"));
}

#[tokio::test]
async fn test_not_a_zip_is_extraction_error() {
    let kas = SimulatedKas::start(80).await;
    let mut client = client(&kas, 81);

    let err = client.decrypt(b"L1L definitely not a zip").await.unwrap_err();
    assert!(
        matches!(err, TdfError::TdfPayloadExtraction { .. }),
        "got {err:?}"
    );
}
