//! Builder pipeline: fan a content key out to recipients, encrypt, sign.
//!
//! A sequential shape: generate a content key, wrap it per recipient,
//! assemble a record, sign, hand back the result. Each field and file is
//! sealed with a single whole-buffer AEAD call rather than a chunked
//! stream cipher — this format has no chunking requirement.

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::cancellation::CancellationToken;
use crate::canonical::{sign_canonical, CanonicalFields, Canonicalizer};
use crate::compress::maybe_compress;
use crate::directory::PartyKeyDirectory;
use crate::error::{BuildError, KeyMaterialError, ValidationError};
use crate::fingerprint::KeyCache;
use crate::model::{
    AccessControl, AeadSegment, BuiltCapsa, Capsa, CapsaStatus, ContentKey, FileRecord, Keychain,
    KeychainEntry, PayloadInput, SignatureBlock,
};
use crate::nonce_ledger::NonceLedger;
use crate::primitives::{
    aead_encrypt, b64url_encode, key_bits, rsa_wrap, sha256_hex, validate_key_size, CONTENT_KEY_LEN,
};
use crate::validate::{validate, Limits, RecipientPlan};

pub const KEYCHAIN_ALGORITHM: &str = "RSA-OAEP-SHA256";

const NANOID_ALPHABET: [char; 64] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l',
    'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4',
    '5', '6', '7', '8', '9', '_', '-',
];

fn nanoid21() -> String {
    nanoid::nanoid!(21, &NANOID_ALPHABET)
}

/// Everything the builder needs beyond the payload itself.
pub struct BuildInputs<'a> {
    pub creator_party_id: String,
    pub creator_private_key: &'a RsaPrivateKey,
    pub payload: PayloadInput,
    /// Recipient party ids requested in addition to the creator.
    pub recipients: Vec<String>,
    pub directory: &'a dyn PartyKeyDirectory,
    pub limits: Limits,
    pub key_cache: Option<&'a KeyCache>,
    /// Checked at every suspension point; cancellation mid-build produces
    /// no capsa and zeroizes the content key before returning.
    pub cancellation: Option<&'a CancellationToken>,
}

fn check_cancelled(token: Option<&CancellationToken>) -> Result<(), BuildError> {
    if token.is_some_and(CancellationToken::is_cancelled) {
        return Err(BuildError::Cancelled);
    }
    Ok(())
}

/// Build a [`BuiltCapsa`] from `inputs`. Failures are non-retryable and
/// carry a specific error kind.
pub fn build(inputs: BuildInputs<'_>) -> Result<BuiltCapsa, BuildError> {
    tracing::debug!(
        creator = %inputs.creator_party_id,
        recipients = inputs.recipients.len(),
        files = inputs.payload.files.len(),
        "build starting"
    );

    // 1) Pre-flight.
    check_cancelled(inputs.cancellation)?;
    let resolved = inputs.directory.resolve(&inputs.recipients);
    let acting_for_by_party: Vec<(String, Vec<String>)> = resolved
        .iter()
        .map(|pk| (pk.party_id.clone(), pk.acting_for.clone()))
        .collect();
    let plan = RecipientPlan {
        creator_party_id: &inputs.creator_party_id,
        recipient_party_ids: &inputs.recipients,
        acting_for_by_party: &acting_for_by_party,
    };
    validate(&inputs.payload, &plan, &inputs.limits)?;

    // 2) Emit content key K.
    let content_key = ContentKey::generate();
    let key_bytes = *content_key.expose();

    // `content_key` is a live local from here on; any `?` early-return
    // below drops it in place (zeroizing via `ZeroizeOnDrop`) before
    // unwinding to the caller.
    check_cancelled(inputs.cancellation)?;

    // 3) Emit package id.
    let package_id = format!("capsa_{}", nanoid21());

    let mut ledger = NonceLedger::new();

    // 4) Encrypt optional fields.
    let subject_segment =
        encrypt_optional_field(inputs.payload.subject.as_deref().map(|s| s.as_bytes().to_vec()), &key_bytes, &mut ledger)?;
    let body_segment =
        encrypt_optional_field(inputs.payload.body.as_deref().map(|s| s.as_bytes().to_vec()), &key_bytes, &mut ledger)?;
    let structured_bytes = inputs
        .payload
        .structured
        .as_ref()
        .map(|v| serde_json::to_vec(v).map_err(|e| ValidationError::Malformed {
            field: "structured",
            reason: e.to_string(),
        }))
        .transpose()?;
    let structured_segment = encrypt_optional_field(structured_bytes, &key_bytes, &mut ledger)?;

    let (encrypted_subject, subject_iv, subject_tag) = flatten_segment(subject_segment);
    let (encrypted_body, body_iv, body_tag) = flatten_segment(body_segment);
    let (encrypted_structured, structured_iv, structured_tag) = flatten_segment(structured_segment);

    // 5) Encrypt files, in caller-supplied order.
    let mut files = Vec::with_capacity(inputs.payload.files.len());
    let mut file_payloads = Vec::with_capacity(inputs.payload.files.len());
    for file in &inputs.payload.files {
        check_cancelled(inputs.cancellation)?;
        let hash = sha256_hex(&file.plaintext);
        let (to_encrypt, compressed) = maybe_compress(&file.plaintext);

        let content_iv = ledger.draw();
        let (ciphertext, content_tag) = aead_encrypt(&to_encrypt, &key_bytes, &content_iv)?;

        let filename_iv = ledger.draw();
        let (encrypted_filename, filename_tag) =
            aead_encrypt(file.filename.as_bytes(), &key_bytes, &filename_iv)?;

        let file_id = nanoid21();
        files.push(FileRecord {
            file_id: file_id.clone(),
            encrypted_filename_b64: b64url_encode(&encrypted_filename),
            filename_iv_b64: b64url_encode(&filename_iv),
            filename_tag_b64: b64url_encode(&filename_tag),
            iv_b64: b64url_encode(&content_iv),
            tag_b64: b64url_encode(&content_tag),
            hash,
            hash_algorithm: "SHA-256".to_string(),
            size: ciphertext.len() as u64,
            original_size: Some(file.plaintext.len() as u64),
            mimetype: file.mimetype.clone(),
            compressed,
        });
        file_payloads.push((file_id, ciphertext));
    }

    // 6) Wrap K for the creator and each requested recipient.
    let creator_public_key = RsaPublicKey::from(inputs.creator_private_key);
    let mut keychain_keys = vec![wrap_for_recipient(
        &inputs.creator_party_id,
        &creator_public_key,
        &key_bytes,
    )?];

    for recipient_id in &inputs.recipients {
        check_cancelled(inputs.cancellation)?;
        if recipient_id == &inputs.creator_party_id {
            continue;
        }
        if let Some(direct) = resolved.iter().find(|pk| &pk.party_id == recipient_id) {
            let (pub_key, _fp) = resolve_public_key(direct, inputs.key_cache)?;
            if !validate_key_size(&pub_key) {
                return Err(KeyMaterialError::ModulusTooSmall {
                    bits: key_bits(&pub_key) as usize,
                    minimum: crate::primitives::MIN_RSA_MODULUS_BITS,
                }
                .into());
            }
            keychain_keys.push(wrap_for_recipient(recipient_id, &pub_key, &key_bytes)?);
            continue;
        }

        let delegate = resolved
            .iter()
            .find(|pk| pk.acting_for.iter().any(|p| p == recipient_id));
        match delegate {
            Some(delegate) => {
                tracing::debug!(recipient = %recipient_id, delegate = %delegate.party_id, "recipient resolved via delegation");
                if let Some(existing) = keychain_keys.iter_mut().find(|e| e.party == delegate.party_id) {
                    if !existing.acting_for.contains(recipient_id) {
                        existing.acting_for.push(recipient_id.clone());
                    }
                } else {
                    keychain_keys.push(KeychainEntry {
                        party: delegate.party_id.clone(),
                        wrapped_content_key_b64: String::new(),
                        iv: None,
                        acting_for: vec![recipient_id.clone()],
                    });
                }
            }
            None => {
                return Err(KeyMaterialError::UnresolvableRecipient(recipient_id.clone()).into());
            }
        }
    }

    let total_size: u64 = file_payloads.iter().map(|(_, ct)| ct.len() as u64).sum();

    check_cancelled(inputs.cancellation)?;

    // 7) Canonicalize and sign.
    let file_triples: Vec<(String, String, String)> = files
        .iter()
        .map(|f| (f.hash.clone(), f.iv_b64.clone(), f.filename_iv_b64.clone()))
        .collect();
    let canonical_fields = CanonicalFields {
        package_id: &package_id,
        total_size,
        algorithm: KEYCHAIN_ALGORITHM,
        files: &file_triples,
        structured_iv: structured_iv.as_deref(),
        subject_iv: subject_iv.as_deref(),
        body_iv: body_iv.as_deref(),
    };
    let canonical_string = Canonicalizer::serialize(&canonical_fields);
    let jws = sign_canonical(&canonical_string, inputs.creator_private_key)?;

    let now = crate::time::now_iso8601();
    let record = Capsa {
        id: package_id,
        creator: inputs.creator_party_id.clone(),
        created_at: now.clone(),
        updated_at: now,
        status: CapsaStatus::Active,
        total_size,
        encrypted_subject_b64: encrypted_subject,
        subject_iv_b64: subject_iv,
        subject_tag_b64: subject_tag,
        encrypted_body_b64: encrypted_body,
        body_iv_b64: body_iv,
        body_tag_b64: body_tag,
        encrypted_structured_b64: encrypted_structured,
        structured_iv_b64: structured_iv,
        structured_tag_b64: structured_tag,
        files,
        access_control: AccessControl {
            expires_at: inputs.payload.expires_at.clone(),
        },
        keychain: Keychain {
            algorithm: KEYCHAIN_ALGORITHM.to_string(),
            keys: keychain_keys,
        },
        signature: SignatureBlock {
            algorithm: "RS256".to_string(),
            protected: jws.protected,
            payload: jws.payload,
            signature: jws.signature_b64,
        },
        metadata: inputs.payload.metadata,
    };

    // 8) Assemble. `content_key` is zeroized here, on scope exit.
    drop(content_key);

    tracing::debug!(
        id = %record.id,
        keychain_entries = record.keychain.keys.len(),
        total_size,
        "build complete"
    );

    Ok(BuiltCapsa {
        record,
        file_payloads,
    })
}

fn resolve_public_key(
    party: &crate::model::PartyKey,
    cache: Option<&KeyCache>,
) -> Result<(RsaPublicKey, String), KeyMaterialError> {
    match cache {
        Some(cache) => cache.resolve_pem(&party.public_key_pem),
        None => {
            let key = crate::primitives::import_public_key_pem(&party.public_key_pem)?;
            let fp = crate::fingerprint::fingerprint(&key)?;
            Ok((key, fp))
        }
    }
}

fn wrap_for_recipient(
    party_id: &str,
    pub_key: &RsaPublicKey,
    key_bytes: &[u8; CONTENT_KEY_LEN],
) -> Result<KeychainEntry, BuildError> {
    let wrapped = rsa_wrap(key_bytes, pub_key)?;
    Ok(KeychainEntry {
        party: party_id.to_string(),
        wrapped_content_key_b64: b64url_encode(&wrapped),
        iv: None,
        acting_for: Vec::new(),
    })
}

/// Encrypt an optional subject/body/structured field into an
/// [`AeadSegment`], or `None` if the field was absent — the triple is
/// always fully present or fully absent on the wire.
fn encrypt_optional_field(
    plaintext: Option<Vec<u8>>,
    key: &[u8; CONTENT_KEY_LEN],
    ledger: &mut NonceLedger,
) -> Result<Option<AeadSegment>, BuildError> {
    let Some(plaintext) = plaintext else {
        return Ok(None);
    };
    let iv = ledger.draw();
    let (ciphertext, tag) = aead_encrypt(&plaintext, key, &iv)?;
    Ok(Some(AeadSegment {
        ciphertext_b64: Some(b64url_encode(&ciphertext)),
        iv_b64: b64url_encode(&iv),
        tag_b64: b64url_encode(&tag),
    }))
}

/// Flatten an optional [`AeadSegment`] into the wire's three-field shape.
fn flatten_segment(segment: Option<AeadSegment>) -> (Option<String>, Option<String>, Option<String>) {
    match segment {
        Some(seg) => (seg.ciphertext_b64, Some(seg.iv_b64), Some(seg.tag_b64)),
        None => (None, None, None),
    }
}
