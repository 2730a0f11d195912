//! NanoTDF client against a simulated KAS
//!
//! - encrypt → rewrap → decrypt roundtrips across binding and policy modes
//! - tamper detection on payload and policy binding
//! - policy warnings and KAS public key caching

mod common;

use common::{auth, restricted_policy, rng, SimulatedKas, TEST_PLAINTEXT};
use opentdf_client::opentdf_protocol::nanotdf::{NanoTdf, NanoTdfVersion, PolicyBindingMode};
use opentdf_client::{NanoTdfClient, Policy, PolicyEncoding, PolicyWarning, TdfClient, TdfError};

fn client(kas: &SimulatedKas, policy: Policy, seed: u64) -> NanoTdfClient {
    NanoTdfClient::new(&kas.config(), policy, auth(), rng(seed)).unwrap()
}

#[tokio::test]
async fn test_roundtrip_with_fetched_public_key() {
    common::init_tracing();
    let mut kas = SimulatedKas::start(1).await;
    let public_key = kas.mock_public_key().await;
    let rewrap = kas.mock_rewrap().await;

    let mut client = client(&kas, restricted_policy("nano-1"), 11);
    let sealed = client.encrypt(TEST_PLAINTEXT).await.unwrap();
    assert!(sealed.warnings.is_empty());
    assert_eq!(&sealed.container[..3], b"L1L");

    let tdf = NanoTdf::from_bytes(&sealed.container).unwrap();
    assert_eq!(tdf.payload.iv(), [0, 0, 1]);
    assert_eq!(tdf.header.kas_url().unwrap(), kas.url());

    let plaintext = client.decrypt(&sealed.container).await.unwrap();
    assert_eq!(plaintext, TEST_PLAINTEXT);

    public_key.assert_async().await;
    rewrap.assert_async().await;
}

#[tokio::test]
async fn test_public_key_fetched_once_per_client() {
    let mut kas = SimulatedKas::start(2).await;
    let public_key = kas.mock_public_key().await;

    let mut client = client(&kas, restricted_policy("nano-2"), 12);
    let first = client.encrypt(b"one").await.unwrap();
    let second = client.encrypt(b"two").await.unwrap();

    // Every encrypt negotiates a fresh ephemeral key
    let first = NanoTdf::from_bytes(&first.container).unwrap();
    let second = NanoTdf::from_bytes(&second.container).unwrap();
    assert_ne!(
        first.header.ephemeral_public_key(),
        second.header.ephemeral_public_key()
    );
    public_key.assert_async().await;
}

#[tokio::test]
async fn test_encrypted_policy_with_ecdsa_binding() {
    let mut kas = SimulatedKas::start(3).await;
    let _rewrap = kas.mock_rewrap().await;

    let mut client = client(&kas, restricted_policy("nano-3"), 13)
        .with_kas_public_key(kas.public_key_pem())
        .with_binding_mode(PolicyBindingMode::Ecdsa)
        .with_policy_encoding(PolicyEncoding::Encrypted)
        .with_version(NanoTdfVersion::V13)
        .with_eager_binding_check(true);

    let sealed = client.encrypt(TEST_PLAINTEXT).await.unwrap();
    assert_eq!(&sealed.container[..3], b"L1M");
    let tdf = NanoTdf::from_bytes(&sealed.container).unwrap();
    assert_eq!(tdf.header.policy().binding().len(), 64);

    assert_eq!(client.decrypt(&sealed.container).await.unwrap(), TEST_PLAINTEXT);
}

#[tokio::test]
async fn test_tampered_payload_fails_decrypt() {
    let mut kas = SimulatedKas::start(4).await;
    let _rewrap = kas.mock_rewrap().await;

    let mut client =
        client(&kas, restricted_policy("nano-4"), 14).with_kas_public_key(kas.public_key_pem());
    let mut container = client.encrypt(TEST_PLAINTEXT).await.unwrap().into_bytes();
    let last = container.len() - 1;
    container[last] ^= 0x01;

    let err = client.decrypt(&container).await.unwrap_err();
    assert!(matches!(err, TdfError::TdfDecrypt(_)), "got {err:?}");
    assert!(err.is_integrity_error());
}

#[tokio::test]
async fn test_tampered_binding_caught_by_eager_check() {
    let mut kas = SimulatedKas::start(5).await;
    let _rewrap = kas.mock_rewrap().await;

    let mut client = client(&kas, restricted_policy("nano-5"), 15)
        .with_kas_public_key(kas.public_key_pem())
        .with_eager_binding_check(true);
    let sealed = client.encrypt(TEST_PLAINTEXT).await.unwrap();

    // The GMAC binding is the 8 bytes in front of the 33-byte ephemeral key;
    // the payload section is a u24 length, a 3-byte IV and ciphertext ‖ tag
    let mut container = sealed.container.clone();
    let tdf = NanoTdf::from_bytes(&container).unwrap();
    let header_len = container.len() - 6 - tdf.payload.ciphertext_and_tag().len();
    let binding_at = header_len - 33 - 8;
    container[binding_at] ^= 0xFF;

    let err = client.decrypt(&container).await.unwrap_err();
    assert!(err.is_integrity_error(), "got {err:?}");
}

#[tokio::test]
async fn test_unrestricted_policy_warns_but_encrypts() {
    let kas = SimulatedKas::start(6).await;
    let mut client = client(&kas, Policy::with_uuid("open"), 16)
        .with_kas_public_key(kas.public_key_pem());

    let sealed = client.encrypt(TEST_PLAINTEXT).await.unwrap();
    assert_eq!(
        sealed.warnings,
        vec![PolicyWarning::Unrestricted {
            uuid: "open".to_string()
        }]
    );
}

#[tokio::test]
async fn test_invalid_policy_is_rejected() {
    let kas = SimulatedKas::start(7).await;
    let mut client = client(&kas, Policy::with_uuid(""), 17)
        .with_kas_public_key(kas.public_key_pem());

    let err = client.encrypt(TEST_PLAINTEXT).await.unwrap_err();
    assert!(matches!(err, TdfError::PolicyIntegrity(_)), "got {err:?}");
}

#[tokio::test]
async fn test_garbage_container_is_extraction_error() {
    let kas = SimulatedKas::start(8).await;
    let mut client = client(&kas, restricted_policy("nano-8"), 18);

    let err = client.decrypt(b"PK\x03\x04 not a nanotdf").await.unwrap_err();
    assert!(
        matches!(err, TdfError::TdfPayloadExtraction { .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_public_key_outage_is_key_access_error() {
    let mut kas = SimulatedKas::start(9).await;
    let _down = kas
        .server
        .mock("GET", "/kas_public_key")
        .match_query(mockito::Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let mut client = client(&kas, restricted_policy("nano-9"), 19);
    let err = client.encrypt(TEST_PLAINTEXT).await.unwrap_err();
    assert!(matches!(err, TdfError::KeyAccess { .. }), "got {err:?}");
    assert!(err.is_retryable());
}
