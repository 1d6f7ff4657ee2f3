// Pairing Tests
// Tests for pairing payload parsing and the pairing lifecycle

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mirrorlink::crypto::{derive_shared_secret, KeyPair};
use mirrorlink::pairing::{Pairing, PairingAnnouncement, PairingError};
use mirrorlink::storage::{keys, MemorySecretStore, SecretStore, SledSecretStore};
use std::sync::Arc;
use tempfile::TempDir;

fn announcement_json(machine: &KeyPair, token: &str) -> String {
    format!(
        r#"{{"publicKey":"{}","token":"{}","peerId":"machine-1","displayName":"build box"}}"#,
        machine.public_key().to_base64(),
        token
    )
}

// ============================================================================
// ANNOUNCEMENT PARSING
// ============================================================================

#[test]
fn test_parse_raw_json() {
    let machine = KeyPair::generate();
    let announcement = PairingAnnouncement::parse(&announcement_json(&machine, "tok")).unwrap();

    assert_eq!(announcement.public_key, machine.public_key());
    assert_eq!(announcement.token, "tok");
    assert_eq!(announcement.peer_id, "machine-1");
    assert_eq!(announcement.display_name.as_deref(), Some("build box"));
}

#[test]
fn test_parse_base64_payload() {
    let machine = KeyPair::generate();
    let encoded = URL_SAFE_NO_PAD.encode(announcement_json(&machine, "tok"));

    let announcement = PairingAnnouncement::parse(&encoded).unwrap();
    assert_eq!(announcement.public_key, machine.public_key());
}

#[test]
fn test_encode_parses_back() {
    let machine = KeyPair::generate();
    let announcement = PairingAnnouncement::parse(&announcement_json(&machine, "tok")).unwrap();

    let reparsed = PairingAnnouncement::parse(&announcement.encode().unwrap()).unwrap();
    assert_eq!(reparsed.peer_id, announcement.peer_id);
    assert_eq!(reparsed.public_key, announcement.public_key);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(matches!(
        PairingAnnouncement::parse("%%% not a code %%%"),
        Err(PairingError::InvalidPayload(_))
    ));
}

#[test]
fn test_parse_rejects_empty_token() {
    let machine = KeyPair::generate();

    assert!(matches!(
        PairingAnnouncement::parse(&announcement_json(&machine, "")),
        Err(PairingError::MissingField(_))
    ));
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_complete_pairing() {
    let store = Arc::new(MemorySecretStore::new());
    let pairing = Pairing::new(store.clone());
    let machine = KeyPair::generate();
    assert!(!pairing.is_paired().unwrap());

    let announcement = PairingAnnouncement::parse(&announcement_json(&machine, "tok")).unwrap();
    let own_key = pairing.complete(announcement).unwrap();

    assert!(pairing.is_paired().unwrap());
    assert_eq!(pairing.auth_token().unwrap().as_deref(), Some("tok"));
    assert_eq!(store.read(keys::PEER_ID).unwrap(), Some(b"machine-1".to_vec()));

    // The machine derives the same key from the returned public key
    let on_machine = derive_shared_secret(machine.private_key(), &own_key).unwrap();
    assert_eq!(pairing.shared_secret().unwrap(), on_machine);
}

#[test]
fn test_credentials_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let machine = KeyPair::generate();

    let expected = {
        let pairing = Pairing::new(Arc::new(SledSecretStore::open(temp_dir.path()).unwrap()));
        let announcement = PairingAnnouncement::parse(&announcement_json(&machine, "tok")).unwrap();
        pairing.complete(announcement).unwrap();
        pairing.shared_secret().unwrap()
    };

    let pairing = Pairing::new(Arc::new(SledSecretStore::open(temp_dir.path()).unwrap()));
    let credentials = pairing.credentials().unwrap().unwrap();

    assert_eq!(credentials.auth_token, "tok");
    assert_eq!(credentials.peer_id, "machine-1");
    assert_eq!(credentials.peer_display_name.as_deref(), Some("build box"));
    assert_eq!(pairing.shared_secret().unwrap(), expected);
}

#[test]
fn test_repairing_replaces_credentials() {
    let pairing = Pairing::new(Arc::new(MemorySecretStore::new()));
    let first = KeyPair::generate();
    let second = KeyPair::generate();

    pairing
        .complete(PairingAnnouncement::parse(&announcement_json(&first, "one")).unwrap())
        .unwrap();
    let before = pairing.shared_secret().unwrap();

    pairing
        .complete(PairingAnnouncement::parse(&announcement_json(&second, "two")).unwrap())
        .unwrap();

    assert_eq!(pairing.auth_token().unwrap().as_deref(), Some("two"));
    assert_ne!(pairing.shared_secret().unwrap(), before);
}

#[test]
fn test_low_order_peer_key_rejected() {
    let store = Arc::new(MemorySecretStore::new());
    let pairing = Pairing::new(store.clone());
    let payload = format!(
        r#"{{"publicKey":"{}","token":"tok","peerId":"machine-1"}}"#,
        base64::engine::general_purpose::STANDARD.encode([0u8; 32])
    );

    let result = pairing.complete(PairingAnnouncement::parse(&payload).unwrap());

    assert!(matches!(result, Err(PairingError::InvalidPeerKey)));
    assert!(!pairing.is_paired().unwrap());
    assert!(store.is_empty());
}

#[test]
fn test_logout_wipes_everything() {
    let store = Arc::new(MemorySecretStore::new());
    let pairing = Pairing::new(store.clone());
    pairing
        .complete(PairingAnnouncement::parse(&announcement_json(&KeyPair::generate(), "tok")).unwrap())
        .unwrap();

    pairing.logout().unwrap();

    assert!(store.is_empty());
    assert!(!pairing.is_paired().unwrap());
    assert!(pairing.credentials().unwrap().is_none());
    assert!(pairing.shared_secret().is_err());
}
