//! Raw cryptographic primitives.
//!
//! This module is the only place in the crate that touches `aes-gcm` or
//! `rsa` directly. Everything above it (builder, decryptor) goes through
//! these functions so the primitive choice stays swappable behind one seam.

use aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as GcmNonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand_core::{OsRng, RngCore};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{oaep::Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CryptoError, KeyMaterialError};

pub const CONTENT_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const AEAD_TAG_LEN: usize = 16;
pub const RSA_WRAP_LEN: usize = 512; // 4096-bit modulus
pub const RSA_SIGNATURE_LEN: usize = 512;
pub const MIN_RSA_MODULUS_BITS: usize = 4096;

/// AES-256-GCM encrypt. Returns `(ciphertext, tag)`; ciphertext length
/// equals plaintext length, tag is always 16 bytes.
pub fn aead_encrypt(
    plaintext: &[u8],
    key: &[u8; CONTENT_KEY_LEN],
    iv: &[u8; NONCE_LEN],
) -> Result<(Vec<u8>, [u8; AEAD_TAG_LEN]), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthFailed)?;
    let nonce = GcmNonce::from_slice(iv);
    let mut out = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: b"" })
        .map_err(|_| CryptoError::AuthFailed)?;
    let tag_start = out.len() - AEAD_TAG_LEN;
    let mut tag = [0u8; AEAD_TAG_LEN];
    tag.copy_from_slice(&out[tag_start..]);
    out.truncate(tag_start);
    Ok((out, tag))
}

/// AES-256-GCM decrypt. Fails with `CryptoError::AuthFailed` on any tag
/// mismatch, key mismatch, or ciphertext/tag/iv mutation.
pub fn aead_decrypt(
    ciphertext: &[u8],
    key: &[u8; CONTENT_KEY_LEN],
    iv: &[u8; NONCE_LEN],
    tag: &[u8; AEAD_TAG_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthFailed)?;
    let nonce = GcmNonce::from_slice(iv);
    let mut combined = Vec::with_capacity(ciphertext.len() + AEAD_TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    let pt = cipher
        .decrypt(nonce, Payload { msg: &combined, aad: b"" })
        .map_err(|_| CryptoError::AuthFailed)?;
    Ok(pt)
}

/// Draw a fresh CSPRNG nonce. Freshness, not a counter, is the
/// uniqueness mechanism for this crate's single-shot (non-streaming)
/// AEAD usage — freshness is the uniqueness mechanism, backed by the
/// construction-level ledger the builder maintains per scope.
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut n = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut n);
    n
}

/// Draw a fresh 32-byte content key from the OS CSPRNG.
pub fn random_content_key() -> [u8; CONTENT_KEY_LEN] {
    let mut k = [0u8; CONTENT_KEY_LEN];
    OsRng.fill_bytes(&mut k);
    k
}

/// RSA-OAEP-SHA256 wrap of a 32-byte content key. Produces a 512-byte
/// ciphertext for a 4096-bit modulus.
pub fn rsa_wrap(content_key: &[u8; CONTENT_KEY_LEN], pub_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    let padding = Oaep::new::<Sha256>();
    pub_key
        .encrypt(&mut OsRng, padding, content_key)
        .map_err(|_| CryptoError::UnwrapFailed)
}

/// RSA-OAEP-SHA256 unwrap. Any length or decryption error maps to
/// `CryptoError::UnwrapFailed` without distinguishing which step failed.
pub fn rsa_unwrap(wrapped: &[u8], priv_key: &RsaPrivateKey) -> Result<[u8; CONTENT_KEY_LEN], CryptoError> {
    let padding = Oaep::new::<Sha256>();
    let mut pt = priv_key
        .decrypt(padding, wrapped)
        .map_err(|_| CryptoError::UnwrapFailed)?;
    if pt.len() != CONTENT_KEY_LEN {
        pt.zeroize();
        return Err(CryptoError::UnwrapFailed);
    }
    let mut out = [0u8; CONTENT_KEY_LEN];
    out.copy_from_slice(&pt);
    pt.zeroize();
    Ok(out)
}

/// The fixed JWS protected header. Never built through a generic JSON
/// serializer — the byte sequence must stay pinned for interop.
pub const JWS_PROTECTED_HEADER: &str = r#"{"alg":"RS256","typ":"JWT"}"#;

/// Sign `protected || "." || payload` with RSA-PKCS1v15-SHA256.
pub fn rsa_sign(protected_b64: &str, payload_b64: &str, priv_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let signing_input = format!("{protected_b64}.{payload_b64}");
    let digest = Sha256::digest(signing_input.as_bytes());
    priv_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|_| CryptoError::SignFailed)
}

/// Verify an RSA-PKCS1v15-SHA256 signature over `protected || "." || payload`.
pub fn rsa_verify(
    protected_b64: &str,
    payload_b64: &str,
    signature: &[u8],
    pub_key: &RsaPublicKey,
) -> bool {
    let signing_input = format!("{protected_b64}.{payload_b64}");
    let digest = Sha256::digest(signing_input.as_bytes());
    pub_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .is_ok()
}

/// SHA-256, rendered as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256, raw 32 bytes.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// base64url without padding, per RFC 4648 §5.
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// base64url decode. Accepts padded or unpadded input.
pub fn b64url_decode(s: &str) -> Result<Vec<u8>, KeyMaterialError> {
    let trimmed = s.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| KeyMaterialError::MalformedPem(e.to_string()))
}

/// Constant-time byte comparison for any comparison of secret-derived
/// bytes (tags, hashes, payloads during signature check).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Import a public key PEM in either SPKI (`BEGIN PUBLIC KEY`) or
/// PKCS#1 (`BEGIN RSA PUBLIC KEY`) form.
pub fn import_public_key_pem(pem: &str) -> Result<RsaPublicKey, KeyMaterialError> {
    if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
        return Ok(key);
    }
    RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| KeyMaterialError::MalformedPem(e.to_string()))
}

/// Import a private key PEM in either PKCS#8 (`BEGIN PRIVATE KEY`) or
/// PKCS#1 (`BEGIN RSA PRIVATE KEY`) form.
pub fn import_private_key_pem(pem: &str) -> Result<RsaPrivateKey, KeyMaterialError> {
    if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(key);
    }
    use rsa::pkcs1::DecodeRsaPrivateKey;
    RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| KeyMaterialError::MalformedPem(e.to_string()))
}

/// Export a public key as SPKI PEM (the default export form).
pub fn export_public_key_pem(key: &RsaPublicKey) -> Result<String, KeyMaterialError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeyMaterialError::MalformedPem(e.to_string()))
}

/// Export a private key as PKCS#8 PEM (the default export form).
pub fn export_private_key_pem(key: &RsaPrivateKey) -> Result<String, KeyMaterialError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|zstr| zstr.to_string())
        .map_err(|e| KeyMaterialError::MalformedPem(e.to_string()))
}

/// The DER SubjectPublicKeyInfo encoding of a public key — the input to
/// fingerprinting.
pub fn public_key_der_spki(key: &RsaPublicKey) -> Result<Vec<u8>, KeyMaterialError> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| KeyMaterialError::MalformedPem(e.to_string()))
}

/// `true` iff the key's modulus is at least 4096 bits.
pub fn validate_key_size(key: &RsaPublicKey) -> bool {
    key_bits(key) >= MIN_RSA_MODULUS_BITS as u64
}

/// The key's modulus size in bits.
pub fn key_bits(key: &RsaPublicKey) -> u64 {
    use rsa::traits::PublicKeyParts;
    key.n().bits()
}

/// Generate a fresh RSA keypair of the given modulus size (default 4096).
pub fn generate_rsa_keypair(bits: usize) -> Result<(RsaPrivateKey, RsaPublicKey), KeyMaterialError> {
    let priv_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| KeyMaterialError::MalformedPem(e.to_string()))?;
    let pub_key = RsaPublicKey::from(&priv_key);
    Ok((priv_key, pub_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_sha256() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hello_sha256() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn aead_round_trip() {
        let key = random_content_key();
        let iv = random_nonce();
        let (ct, tag) = aead_encrypt(b"Secret data", &key, &iv).unwrap();
        assert_eq!(ct.len(), b"Secret data".len());
        let pt = aead_decrypt(&ct, &key, &iv, &tag).unwrap();
        assert_eq!(pt, b"Secret data");
    }

    #[test]
    fn aead_tampered_tag_fails() {
        let key = random_content_key();
        let iv = random_nonce();
        let (ct, mut tag) = aead_encrypt(b"Secret data", &key, &iv).unwrap();
        tag[0] ^= 0x80;
        let result = aead_decrypt(&ct, &key, &iv, &tag);
        assert!(matches!(result, Err(CryptoError::AuthFailed)));
    }

    #[test]
    fn aead_tampered_ciphertext_fails() {
        let key = random_content_key();
        let iv = random_nonce();
        let (mut ct, tag) = aead_encrypt(b"Secret data", &key, &iv).unwrap();
        ct[0] ^= 0x01;
        let result = aead_decrypt(&ct, &key, &iv, &tag);
        assert!(matches!(result, Err(CryptoError::AuthFailed)));
    }

    #[test]
    fn b64url_has_no_padding() {
        let encoded = b64url_encode(b"any carnal pleasure.");
        assert!(!encoded.contains('='));
        let decoded = b64url_decode(&encoded).unwrap();
        assert_eq!(decoded, b"any carnal pleasure.");
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
    }
}
