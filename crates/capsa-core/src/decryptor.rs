//! Decryptor pipeline: verify signature first, then locate the caller's
//! recipient entry, then unwrap, then decrypt the payload. Recipient
//! selection is identity-directed (look up the caller's own entry) rather
//! than trial-directed (try every recipient's ciphertext until one
//! validates), since RSA-OAEP failures are not cheaply distinguishable
//! from "wrong key".

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::cancellation::CancellationToken;
use crate::canonical::verify_capsa_signature;
use crate::compress::gunzip;
use crate::error::{CryptoError, DecryptError};
use crate::model::{Capsa, ClearableContentKey, DecryptedCapsa, FileRecord, KeychainEntry};
use crate::primitives::{aead_decrypt, b64url_decode, rsa_unwrap, CONTENT_KEY_LEN, NONCE_LEN};

/// Everything the decryptor needs beyond the capsa record itself.
pub struct DecryptInputs<'a> {
    pub capsa: &'a Capsa,
    pub private_key: &'a RsaPrivateKey,
    pub party_id: Option<&'a str>,
    /// Required unless `verify` is `false`.
    pub creator_public_key: Option<&'a RsaPublicKey>,
    pub verify: bool,
    /// Checked at every suspension point.
    pub cancellation: Option<&'a CancellationToken>,
}

fn check_cancelled(token: Option<&CancellationToken>) -> Result<(), DecryptError> {
    if token.is_some_and(CancellationToken::is_cancelled) {
        return Err(DecryptError::Cancelled);
    }
    Ok(())
}

/// Run the full receive pipeline: verify, select, unwrap, decrypt fields.
pub fn verify_and_unwrap(inputs: DecryptInputs<'_>) -> Result<DecryptedCapsa, DecryptError> {
    tracing::debug!(id = %inputs.capsa.id, party_id = ?inputs.party_id, verify = inputs.verify, "decrypt starting");

    check_cancelled(inputs.cancellation)?;

    // 1) Signature check, unless explicitly skipped.
    if inputs.verify {
        let signer_key = inputs
            .creator_public_key
            .ok_or(DecryptError::SignatureInvalid)?;
        verify_capsa_signature(inputs.capsa, signer_key)?;
    } else {
        tracing::warn!(id = %inputs.capsa.id, "signature verification skipped by caller");
    }

    check_cancelled(inputs.cancellation)?;

    // 2) Select keychain entry.
    let entry = select_entry(&inputs.capsa.keychain.keys, inputs.party_id)?;

    // 3) Reject empty wrapped key.
    if entry.is_delegated_without_access() {
        tracing::warn!(party = %entry.party, "delegated keychain entry has no direct access");
        return Err(DecryptError::DelegatedWithoutAccess);
    }

    check_cancelled(inputs.cancellation)?;

    // 4) Unwrap K.
    let wrapped = b64url_decode(&entry.wrapped_content_key_b64)?;
    let key_bytes = rsa_unwrap(&wrapped, inputs.private_key)?;
    if key_bytes.len() != CONTENT_KEY_LEN {
        return Err(DecryptError::MasterKeySizeInvalid { got: key_bytes.len() });
    }

    check_cancelled(inputs.cancellation)?;

    // 5) Decrypt optional fields.
    let subject = decrypt_optional_field(
        &key_bytes,
        &inputs.capsa.encrypted_subject_b64,
        &inputs.capsa.subject_iv_b64,
        &inputs.capsa.subject_tag_b64,
    )?
    .map(|bytes| String::from_utf8(bytes).map_err(|e| DecryptError::Malformed(e.to_string())))
    .transpose()?;

    let body = decrypt_optional_field(
        &key_bytes,
        &inputs.capsa.encrypted_body_b64,
        &inputs.capsa.body_iv_b64,
        &inputs.capsa.body_tag_b64,
    )?
    .map(|bytes| String::from_utf8(bytes).map_err(|e| DecryptError::Malformed(e.to_string())))
    .transpose()?;

    let structured = decrypt_optional_field(
        &key_bytes,
        &inputs.capsa.encrypted_structured_b64,
        &inputs.capsa.structured_iv_b64,
        &inputs.capsa.structured_tag_b64,
    )?
    .map(|bytes| {
        serde_json::from_slice(&bytes).map_err(|e| DecryptError::Malformed(e.to_string()))
    })
    .transpose()?;

    tracing::debug!(id = %inputs.capsa.id, "decrypt complete");

    Ok(DecryptedCapsa {
        record: inputs.capsa.clone(),
        subject,
        body,
        structured,
        content_key: ClearableContentKey::new(key_bytes),
    })
}

impl DecryptedCapsa {
    /// Decrypt one file's ciphertext using this capsa's content key,
    /// without ever exposing the raw key bytes to the caller.
    pub fn decrypt_file(&self, file: &FileRecord, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let key = self.content_key()?;
        let iv = decode_iv(&file.iv_b64)?;
        let tag = b64url_decode(&file.tag_b64)?;
        decrypt_file(ciphertext, key, &iv, &tag, file.compressed)
    }

    /// Decrypt one file's filename using this capsa's content key.
    pub fn decrypt_filename(&self, file: &FileRecord) -> Result<String, DecryptError> {
        let key = self.content_key()?;
        let iv = decode_iv(&file.filename_iv_b64)?;
        let tag = b64url_decode(&file.filename_tag_b64)?;
        decrypt_filename(&file.encrypted_filename_b64, key, &iv, &tag)
    }
}

fn decode_iv(iv_b64: &str) -> Result<[u8; NONCE_LEN], DecryptError> {
    let bytes = b64url_decode(iv_b64)?;
    bytes
        .try_into()
        .map_err(|_| DecryptError::Malformed("bad iv length".to_string()))
}

fn select_entry<'a>(
    keys: &'a [KeychainEntry],
    party_id: Option<&str>,
) -> Result<&'a KeychainEntry, DecryptError> {
    match party_id {
        Some(id) => keys
            .iter()
            .find(|e| e.party == id)
            .or_else(|| keys.iter().find(|e| e.acting_for.iter().any(|p| p == id)))
            .ok_or(DecryptError::NotARecipient),
        None => keys.first().ok_or(DecryptError::NotARecipient),
    }
}

fn decrypt_optional_field(
    key: &[u8; CONTENT_KEY_LEN],
    ciphertext_b64: &Option<String>,
    iv_b64: &Option<String>,
    tag_b64: &Option<String>,
) -> Result<Option<Vec<u8>>, DecryptError> {
    let (Some(ct), Some(iv), Some(tag)) = (ciphertext_b64, iv_b64, tag_b64) else {
        return Ok(None);
    };
    let ct = b64url_decode(ct)?;
    let iv_bytes = b64url_decode(iv)?;
    let tag_bytes = b64url_decode(tag)?;
    let iv: [u8; crate::primitives::NONCE_LEN] = iv_bytes
        .try_into()
        .map_err(|_| DecryptError::Malformed("bad iv length".to_string()))?;
    let tag: [u8; crate::primitives::AEAD_TAG_LEN] = tag_bytes
        .try_into()
        .map_err(|_| DecryptError::Malformed("bad tag length".to_string()))?;
    let pt = aead_decrypt(&ct, key, &iv, &tag)?;
    Ok(Some(pt))
}

/// Per-file decrypt, exposed standalone. A missing or empty tag is
/// treated as tampering and rejected without attempting decryption.
pub fn decrypt_file(
    ciphertext: &[u8],
    content_key: &[u8; CONTENT_KEY_LEN],
    iv: &[u8; crate::primitives::NONCE_LEN],
    tag: &[u8],
    compressed: bool,
) -> Result<Vec<u8>, DecryptError> {
    if tag.is_empty() {
        return Err(DecryptError::AuthTagRequired);
    }
    let tag: [u8; crate::primitives::AEAD_TAG_LEN] = tag
        .try_into()
        .map_err(|_| DecryptError::Crypto(CryptoError::AuthFailed))?;
    let plaintext = aead_decrypt(ciphertext, content_key, iv, &tag)?;
    if compressed {
        gunzip(&plaintext).map_err(|e| DecryptError::Malformed(e.to_string()))
    } else {
        Ok(plaintext)
    }
}

/// Filename decrypt, exposed standalone, with identical tampering
/// semantics to [`decrypt_file`].
pub fn decrypt_filename(
    encrypted_filename_b64: &str,
    content_key: &[u8; CONTENT_KEY_LEN],
    iv: &[u8; crate::primitives::NONCE_LEN],
    tag: &[u8],
) -> Result<String, DecryptError> {
    if tag.is_empty() {
        return Err(DecryptError::AuthTagRequired);
    }
    let ciphertext = b64url_decode(encrypted_filename_b64)?;
    let tag: [u8; crate::primitives::AEAD_TAG_LEN] = tag
        .try_into()
        .map_err(|_| DecryptError::Crypto(CryptoError::AuthFailed))?;
    let plaintext = aead_decrypt(&ciphertext, content_key, iv, &tag)?;
    String::from_utf8(plaintext).map_err(|e| DecryptError::Malformed(e.to_string()))
}
