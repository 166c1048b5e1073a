//! End-to-end build/decrypt integration tests.

use capsa_core::{
    build, fingerprint, generate_keypair, verify_and_unwrap, BuildError, BuildInputs, DecryptError,
    DecryptInputs, FileInput, InMemoryDirectory, KeyCache, Limits, PartyKey, PayloadInput,
};
use rsa::pkcs8::DecodePrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};

struct Identity {
    party_id: String,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_key_pem: String,
}

fn make_identity(party_id: &str) -> Identity {
    let (pub_pem, priv_pem, _fp) = generate_keypair(4096).expect("keypair generation");
    let private_key = RsaPrivateKey::from_pkcs8_pem(&priv_pem).unwrap();
    let public_key = RsaPublicKey::from_public_key_pem(&pub_pem).unwrap();
    Identity {
        party_id: party_id.to_string(),
        private_key,
        public_key,
        public_key_pem: pub_pem,
    }
}

fn party_key(identity: &Identity) -> PartyKey {
    PartyKey {
        party_id: identity.party_id.clone(),
        public_key_pem: identity.public_key_pem.clone(),
        fingerprint: fingerprint(&identity.public_key).unwrap(),
        acting_for: Vec::new(),
    }
}

fn simple_payload() -> PayloadInput {
    PayloadInput {
        subject: Some("quarterly results".to_string()),
        body: Some("see attached files for details".to_string()),
        files: vec![FileInput {
            filename: "report.pdf".to_string(),
            mimetype: "application/pdf".to_string(),
            plaintext: b"%PDF-1.4 fake contents".to_vec(),
        }],
        ..Default::default()
    }
}

#[test]
fn full_round_trip_creator_can_open_own_capsa() {
    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .expect("build should succeed");

    let decrypted = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &alice.private_key,
        party_id: Some("alice"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    })
    .expect("decrypt should succeed");

    assert_eq!(decrypted.subject.as_deref(), Some("quarterly results"));
    assert_eq!(decrypted.body.as_deref(), Some("see attached files for details"));
    assert_eq!(built.record.files.len(), 1);
}

#[test]
fn second_recipient_can_open_with_own_key() {
    let alice = make_identity("alice");
    let bob = make_identity("bob");
    let directory = InMemoryDirectory::new().with(party_key(&bob));

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec!["bob".to_string()],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .expect("build should succeed");

    assert_eq!(built.record.keychain.keys.len(), 2);

    let decrypted = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &bob.private_key,
        party_id: Some("bob"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    })
    .expect("bob should be able to decrypt");

    assert_eq!(decrypted.body.as_deref(), Some("see attached files for details"));
}

#[test]
fn wrong_private_key_fails_to_unwrap() {
    let alice = make_identity("alice");
    let bob = make_identity("bob");
    let mallory = make_identity("mallory");
    let directory = InMemoryDirectory::new().with(party_key(&bob));

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec!["bob".to_string()],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    // Mallory isn't a keychain entry at all, so she must be rejected before
    // any unwrap attempt.
    let result = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &mallory.private_key,
        party_id: Some("mallory"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    });
    assert!(matches!(result, Err(DecryptError::NotARecipient)));
}

#[test]
fn delegated_recipient_without_direct_key_is_reported() {
    let alice = make_identity("alice");
    let mut delegate = party_key(&make_identity("delegate"));
    delegate.acting_for = vec!["ghost".to_string()];
    let directory = InMemoryDirectory::new().with(delegate);

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec!["ghost".to_string()],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    let entry = built
        .record
        .keychain
        .keys
        .iter()
        .find(|e| e.acting_for.iter().any(|p| p == "ghost"))
        .expect("delegate entry must exist");
    assert!(entry.is_delegated_without_access());

    // Even the delegating party's own key cannot unwrap an empty entry.
    let delegate_identity = make_identity("delegate");
    let result = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &delegate_identity.private_key,
        party_id: Some("ghost"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    });
    assert!(matches!(result, Err(DecryptError::DelegatedWithoutAccess)));
}

#[test]
fn unresolvable_recipient_rejected_at_build_time() {
    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();

    let result = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec!["nobody".to_string()],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    });
    assert!(matches!(
        result,
        Err(BuildError::KeyMaterial(capsa_core::KeyMaterialError::UnresolvableRecipient(_)))
    ));
}

#[test]
fn tampered_signature_payload_fails_verification() {
    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();

    let mut built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    // Mutate a canonicalized field (the file hash) so the reconstructed
    // canonical string no longer matches the signed payload, even though
    // every AEAD-protected field is untouched.
    built.record.files[0].hash = "0".repeat(64);

    let result = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &alice.private_key,
        party_id: Some("alice"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    });
    assert!(matches!(result, Err(DecryptError::SignatureInvalid)));
}

#[test]
fn reordered_files_break_signature() {
    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();
    let payload = PayloadInput {
        files: vec![
            FileInput {
                filename: "a.txt".to_string(),
                mimetype: "text/plain".to_string(),
                plaintext: b"first".to_vec(),
            },
            FileInput {
                filename: "z.txt".to_string(),
                mimetype: "text/plain".to_string(),
                plaintext: b"second".to_vec(),
            },
        ],
        ..Default::default()
    };

    let mut built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload,
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    built.record.files.reverse();

    let result = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &alice.private_key,
        party_id: Some("alice"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    });
    assert!(matches!(result, Err(DecryptError::SignatureInvalid)));
}

#[test]
fn wrong_signer_key_fails_verification() {
    let alice = make_identity("alice");
    let eve = make_identity("eve");
    let directory = InMemoryDirectory::new();

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    let result = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &alice.private_key,
        party_id: Some("alice"),
        creator_public_key: Some(&eve.public_key),
        verify: true,
        cancellation: None,
    });
    assert!(matches!(result, Err(DecryptError::SignatureInvalid)));
}

#[test]
fn skipping_verification_still_requires_membership() {
    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    let decrypted = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &alice.private_key,
        party_id: Some("alice"),
        creator_public_key: None,
        verify: false,
        cancellation: None,
    })
    .expect("skipping verification should still decrypt for a real recipient");
    assert!(decrypted.subject.is_some());
}

#[test]
fn file_and_filename_decrypt_round_trip_and_detect_tampering() {
    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();
    let payload = PayloadInput {
        files: vec![FileInput {
            filename: "notes.txt".to_string(),
            mimetype: "text/plain".to_string(),
            plaintext: b"line one\nline two\n".to_vec(),
        }],
        ..Default::default()
    };

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload,
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    let decrypted = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &alice.private_key,
        party_id: Some("alice"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    })
    .unwrap();

    let file = &built.record.files[0];
    let (_, ciphertext) = built
        .file_payloads
        .iter()
        .find(|(id, _)| id == &file.file_id)
        .unwrap();

    let plaintext = decrypted.decrypt_file(file, ciphertext).unwrap();
    assert_eq!(plaintext, b"line one\nline two\n");

    let filename = decrypted.decrypt_filename(file).unwrap();
    assert_eq!(filename, "notes.txt");

    // Tamper with the ciphertext and confirm the tag catches it.
    let mut bad_ciphertext = ciphertext.clone();
    bad_ciphertext[0] ^= 0x01;
    let result = decrypted.decrypt_file(file, &bad_ciphertext);
    assert!(result.is_err());
}

#[test]
fn content_key_is_unreadable_after_clear() {
    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();
    let payload = PayloadInput {
        files: vec![FileInput {
            filename: "notes.txt".to_string(),
            mimetype: "text/plain".to_string(),
            plaintext: b"some bytes".to_vec(),
        }],
        ..Default::default()
    };

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload,
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    let mut decrypted = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &alice.private_key,
        party_id: Some("alice"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    })
    .unwrap();

    assert!(!decrypted.is_cleared());
    decrypted.clear();
    assert!(decrypted.is_cleared());

    let file = &built.record.files[0];
    let (_, ciphertext) = &built.file_payloads[0];
    let result = decrypted.decrypt_file(file, ciphertext);
    assert!(matches!(result, Err(DecryptError::UseAfterClear)));
}

#[test]
fn key_cache_is_shared_across_recipient_resolution() {
    let alice = make_identity("alice");
    let bob = make_identity("bob");
    let directory = InMemoryDirectory::new().with(party_key(&bob));
    let cache = KeyCache::default();

    assert!(cache.is_empty());

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec!["bob".to_string()],
        directory: &directory,
        limits: Limits::default(),
        key_cache: Some(&cache),
        cancellation: None,
    })
    .unwrap();

    assert_eq!(built.record.keychain.keys.len(), 2);
    assert_eq!(cache.len(), 1);
}

#[test]
fn unwrapping_a_recipients_slot_with_a_different_private_key_fails() {
    // Bob is a genuine keychain entry (his public key wrapped the content
    // key), but decrypting with a private key that doesn't match that
    // public key must fail the RSA-OAEP unwrap itself, not recipient
    // selection.
    let alice = make_identity("alice");
    let bob = make_identity("bob");
    let not_bob = make_identity("not-bob");
    let directory = InMemoryDirectory::new().with(party_key(&bob));

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec!["bob".to_string()],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    let result = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &not_bob.private_key,
        party_id: Some("bob"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: None,
    });
    assert!(matches!(
        result,
        Err(DecryptError::Crypto(capsa_core::CryptoError::UnwrapFailed))
    ));
}

#[test]
fn every_nonce_in_a_built_capsa_is_globally_unique() {
    use std::collections::HashSet;

    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();
    let payload = PayloadInput {
        subject: Some("quarterly results".to_string()),
        body: Some("see attached files for details".to_string()),
        structured: Some(serde_json::json!({"priority": "high"})),
        files: vec![
            FileInput {
                filename: "a.txt".to_string(),
                mimetype: "text/plain".to_string(),
                plaintext: b"first file".to_vec(),
            },
            FileInput {
                filename: "b.txt".to_string(),
                mimetype: "text/plain".to_string(),
                plaintext: b"second file".to_vec(),
            },
        ],
        ..Default::default()
    };

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload,
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    let record = &built.record;
    let mut ivs: Vec<&str> = Vec::new();
    ivs.push(record.subject_iv_b64.as_deref().unwrap());
    ivs.push(record.body_iv_b64.as_deref().unwrap());
    ivs.push(record.structured_iv_b64.as_deref().unwrap());
    for file in &record.files {
        ivs.push(&file.iv_b64);
        ivs.push(&file.filename_iv_b64);
    }
    for entry in &record.keychain.keys {
        if let Some(iv) = entry.iv.as_deref() {
            ivs.push(iv);
        }
    }

    let unique: HashSet<&str> = ivs.iter().copied().collect();
    assert_eq!(unique.len(), ivs.len(), "nonce ledger issued a duplicate IV");
}

#[test]
fn cancelling_before_build_produces_no_capsa() {
    use capsa_core::CancellationToken;

    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();
    let token = CancellationToken::new();
    token.handle().cancel();

    let result = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: Some(&token),
    });

    assert!(matches!(result, Err(BuildError::Cancelled)));
}

#[test]
fn cancelling_before_decrypt_is_reported() {
    use capsa_core::CancellationToken;

    let alice = make_identity("alice");
    let directory = InMemoryDirectory::new();

    let built = build(BuildInputs {
        creator_party_id: alice.party_id.clone(),
        creator_private_key: &alice.private_key,
        payload: simple_payload(),
        recipients: vec![],
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .unwrap();

    let token = CancellationToken::new();
    token.handle().cancel();

    let result = verify_and_unwrap(DecryptInputs {
        capsa: &built.record,
        private_key: &alice.private_key,
        party_id: Some("alice"),
        creator_public_key: Some(&alice.public_key),
        verify: true,
        cancellation: Some(&token),
    });

    assert!(matches!(result, Err(DecryptError::Cancelled)));
}
