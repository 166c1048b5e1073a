//! Standalone known-answer-test runner for the capsa envelope format.
//!
//! An independent, minimal reimplementation of the primitives under test,
//! driven from a JSON fixture, so a KAT failure here can never be masked
//! by a bug shared with `capsa-core` itself.

use aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as GcmNonce};
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Deserialize)]
struct Kat {
    sha256: Vec<Sha256Kat>,
    canonical: Vec<CanonicalKat>,
    aead_round_trip: Vec<AeadKat>,
}

#[derive(Deserialize)]
struct Sha256Kat {
    input_utf8: String,
    expected_hex: String,
}

#[derive(Deserialize)]
struct CanonicalKat {
    package_id: String,
    total_size: u64,
    algorithm: String,
    files: Vec<[String; 3]>,
    structured_iv: Option<String>,
    subject_iv: Option<String>,
    body_iv: Option<String>,
    expected: String,
}

#[derive(Deserialize)]
struct AeadKat {
    key_hex: String,
    iv_hex: String,
    plaintext_utf8: String,
}

/// Reimplements the canonical string independently of
/// `capsa_core::canonical::Canonicalizer`.
fn canonicalize(kat: &CanonicalKat) -> String {
    let mut parts = vec![
        kat.package_id.clone(),
        "1.0.0".to_string(),
        kat.total_size.to_string(),
        kat.algorithm.clone(),
    ];
    if !kat.files.is_empty() {
        for [hash, _, _] in &kat.files {
            parts.push(hash.clone());
        }
        for [_, iv, _] in &kat.files {
            parts.push(iv.clone());
        }
        for [_, _, fn_iv] in &kat.files {
            parts.push(fn_iv.clone());
        }
    }
    for optional in [&kat.structured_iv, &kat.subject_iv, &kat.body_iv] {
        if let Some(iv) = optional {
            if !iv.is_empty() {
                parts.push(iv.clone());
            }
        }
    }
    parts.join("|")
}

fn hex_to<const N: usize>(s: &str) -> [u8; N] {
    let v = hex::decode(s).expect("hex");
    assert_eq!(v.len(), N);
    let mut out = [0u8; N];
    out.copy_from_slice(&v);
    out
}

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tools/capsa-kat/vectors/capsa_kat_v1.json".to_string());
    let data = std::fs::read_to_string(&path)?;
    let kat: Kat = serde_json::from_str(&data)?;

    for case in &kat.sha256 {
        let got = hex::encode(Sha256::digest(case.input_utf8.as_bytes()));
        if got != case.expected_hex {
            anyhow::bail!(
                "SHA-256 KAT mismatch for input {:?}: got {got}, expected {}",
                case.input_utf8,
                case.expected_hex
            );
        }
    }
    println!("SHA-256 KATs OK ({} vectors)", kat.sha256.len());

    for case in &kat.canonical {
        let got = canonicalize(case);
        if got != case.expected {
            anyhow::bail!("canonical KAT mismatch: got {got:?}, expected {:?}", case.expected);
        }
    }
    println!("canonical-string KATs OK ({} vectors)", kat.canonical.len());

    for case in &kat.aead_round_trip {
        let key = hex_to::<32>(&case.key_hex);
        let iv = hex_to::<12>(&case.iv_hex);
        let cipher = Aes256Gcm::new_from_slice(&key).expect("valid key length");
        let nonce = GcmNonce::from_slice(&iv);
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: case.plaintext_utf8.as_bytes(),
                    aad: b"",
                },
            )
            .expect("encrypt");
        let recovered = cipher
            .decrypt(nonce, Payload { msg: &ciphertext, aad: b"" })
            .expect("decrypt");
        if recovered != case.plaintext_utf8.as_bytes() {
            anyhow::bail!("AEAD round-trip KAT mismatch");
        }
    }
    println!("AEAD round-trip KATs OK ({} vectors)", kat.aead_round_trip.len());

    println!("KAT OK");
    Ok(())
}
