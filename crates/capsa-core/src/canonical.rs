//! The canonicalizer — the only component that must be byte-identical
//! across all implementations.
//!
//! A dedicated zero-sized type with an associated `serialize` function and
//! a `verify_deterministic` helper, kept as its own module so the signable
//! grammar never leaks into call sites.

use crate::model::Capsa;
use crate::primitives::{b64url_encode, rsa_sign, rsa_verify, JWS_PROTECTED_HEADER};

pub const CANONICAL_VERSION: &str = "1.0.0";

/// The one piece of input the canonicalizer needs beyond a `Capsa`: the
/// algorithm identifier the canonical producer is using. On the build
/// side this is always `"RSA-OAEP-SHA256"`; on the receive side it is
/// read back from the record's keychain.
pub struct CanonicalFields<'a> {
    pub package_id: &'a str,
    pub total_size: u64,
    pub algorithm: &'a str,
    /// file hash, content iv, filename iv — in file insertion order, never sorted.
    pub files: &'a [(String, String, String)],
    pub structured_iv: Option<&'a str>,
    pub subject_iv: Option<&'a str>,
    pub body_iv: Option<&'a str>,
}

/// Zero-sized canonicalizer type — the grammar lives in `serialize`, never inline at call sites.
pub struct Canonicalizer;

impl Canonicalizer {
    /// Build the canonical string `C(P)`.
    pub fn serialize(fields: &CanonicalFields<'_>) -> String {
        let mut parts: Vec<String> = vec![
            fields.package_id.to_string(),
            CANONICAL_VERSION.to_string(),
            fields.total_size.to_string(),
            fields.algorithm.to_string(),
        ];

        if !fields.files.is_empty() {
            for (hash, _, _) in fields.files {
                parts.push(hash.clone());
            }
            for (_, iv, _) in fields.files {
                parts.push(iv.clone());
            }
            for (_, _, fn_iv) in fields.files {
                parts.push(fn_iv.clone());
            }
        }

        for optional in [fields.structured_iv, fields.subject_iv, fields.body_iv] {
            if let Some(iv) = optional {
                if !iv.is_empty() {
                    parts.push(iv.to_string());
                }
            }
        }

        parts.join("|")
    }

    /// Reconstruct the expected canonical string from a received record,
    /// recomputing `total_size` from `files[*].size` rather than trusting
    /// the wire-carried field — the safer of the two choices.
    pub fn reconstruct(capsa: &Capsa) -> String {
        let files: Vec<(String, String, String)> = capsa
            .files
            .iter()
            .map(|f| (f.hash.clone(), f.iv_b64.clone(), f.filename_iv_b64.clone()))
            .collect();
        let fields = CanonicalFields {
            package_id: &capsa.id,
            total_size: capsa.recomputed_total_size(),
            algorithm: &capsa.keychain.algorithm,
            files: &files,
            structured_iv: capsa.structured_iv_b64.as_deref(),
            subject_iv: capsa.subject_iv_b64.as_deref(),
            body_iv: capsa.body_iv_b64.as_deref(),
        };
        Self::serialize(&fields)
    }

    pub fn verify_deterministic(fields: &CanonicalFields<'_>) -> bool {
        Self::serialize(fields) == Self::serialize(fields)
    }
}

/// The detached JWS triple produced by signing a canonical string.
pub struct Jws {
    pub protected: String,
    pub payload: String,
    pub signature_b64: String,
}

/// Build the JWS signing input (`protected`, `payload`) from a canonical
/// string and sign it with the creator's private key.
pub fn sign_canonical(canonical: &str, priv_key: &rsa::RsaPrivateKey) -> Result<Jws, crate::error::CryptoError> {
    let protected = b64url_encode(JWS_PROTECTED_HEADER.as_bytes());
    let payload = b64url_encode(canonical.as_bytes());
    let signature = rsa_sign(&protected, &payload, priv_key)?;
    Ok(Jws {
        protected,
        payload,
        signature_b64: b64url_encode(&signature),
    })
}

/// Verify a capsa's signature: reconstruct the expected payload,
/// constant-time-compare it against the carried one, then verify the RSA
/// signature over `protected || "." || payload`.
pub fn verify_capsa_signature(
    capsa: &Capsa,
    signer_pub_key: &rsa::RsaPublicKey,
) -> Result<(), crate::error::DecryptError> {
    use crate::error::DecryptError;
    use crate::primitives::{b64url_decode, constant_time_eq};

    let signature_bytes = b64url_decode(&capsa.signature.signature)
        .map_err(|_| DecryptError::SignatureInvalid)?;
    if signature_bytes.len() != crate::primitives::RSA_SIGNATURE_LEN {
        return Err(DecryptError::SignatureInvalid);
    }

    let expected_canonical = Canonicalizer::reconstruct(capsa);
    let expected_payload = b64url_encode(expected_canonical.as_bytes());

    if !constant_time_eq(expected_payload.as_bytes(), capsa.signature.payload.as_bytes()) {
        return Err(DecryptError::SignatureInvalid);
    }

    if !rsa_verify(&capsa.signature.protected, &capsa.signature.payload, &signature_bytes, signer_pub_key) {
        return Err(DecryptError::SignatureInvalid);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str, &str)]) -> Vec<(String, String, String)> {
        entries
            .iter()
            .map(|(h, i, f)| (h.to_string(), i.to_string(), f.to_string()))
            .collect()
    }

    #[test]
    fn canonical_single_file() {
        let files = files(&[("hash1", "iv1", "fnIV1")]);
        let fields = CanonicalFields {
            package_id: "pkg_123",
            total_size: 1024,
            algorithm: "AES-256-GCM",
            files: &files,
            structured_iv: None,
            subject_iv: None,
            body_iv: None,
        };
        assert_eq!(
            Canonicalizer::serialize(&fields),
            "pkg_123|1.0.0|1024|AES-256-GCM|hash1|iv1|fnIV1"
        );
    }

    #[test]
    fn canonical_order_preservation() {
        let files = files(&[("z_hash", "z_iv", "z_fnIV"), ("a_hash", "a_iv", "a_fnIV"), ("m_hash", "m_iv", "m_fnIV")]);
        let fields = CanonicalFields {
            package_id: "pkg",
            total_size: 1,
            algorithm: "RSA-OAEP-SHA256",
            files: &files,
            structured_iv: None,
            subject_iv: None,
            body_iv: None,
        };
        let out = Canonicalizer::serialize(&fields);
        let expected_tail = "z_hash|a_hash|m_hash|z_iv|a_iv|m_iv|z_fnIV|a_fnIV|m_fnIV";
        assert!(out.ends_with(expected_tail), "got: {out}");
    }

    #[test]
    fn canonical_omits_empty_optionals() {
        let fields = CanonicalFields {
            package_id: "pkg",
            total_size: 0,
            algorithm: "RSA-OAEP-SHA256",
            files: &[],
            structured_iv: Some(""),
            subject_iv: Some("subjIV"),
            body_iv: Some(""),
        };
        let out = Canonicalizer::serialize(&fields);
        assert_eq!(out, "pkg|1.0.0|0|RSA-OAEP-SHA256|subjIV");
    }

    #[test]
    fn canonical_zero_files_omits_file_blocks() {
        let fields = CanonicalFields {
            package_id: "pkg",
            total_size: 0,
            algorithm: "RSA-OAEP-SHA256",
            files: &[],
            structured_iv: None,
            subject_iv: None,
            body_iv: None,
        };
        assert_eq!(Canonicalizer::serialize(&fields), "pkg|1.0.0|0|RSA-OAEP-SHA256");
    }

    #[test]
    fn canonical_is_deterministic() {
        let files = files(&[("h", "i", "f")]);
        let fields = CanonicalFields {
            package_id: "pkg",
            total_size: 5,
            algorithm: "RSA-OAEP-SHA256",
            files: &files,
            structured_iv: None,
            subject_iv: Some("s"),
            body_iv: None,
        };
        assert!(Canonicalizer::verify_deterministic(&fields));
    }
}
