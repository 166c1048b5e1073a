//! Fingerprint & key identity.
//!
//! A fingerprint is the sole stable name of a key across the system:
//! `lowercase_hex(SHA-256(DER SubjectPublicKeyInfo(pub_key)))`.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rsa::RsaPublicKey;

use crate::error::KeyMaterialError;
use crate::primitives::{public_key_der_spki, sha256_hex, validate_key_size};

/// Compute the fingerprint of a public key: lowercase-hex SHA-256 over its
/// DER SubjectPublicKeyInfo encoding.
pub fn fingerprint(pub_key: &RsaPublicKey) -> Result<String, KeyMaterialError> {
    let der = public_key_der_spki(pub_key)?;
    Ok(sha256_hex(&der))
}

/// Compute the fingerprint directly from a PEM string (SPKI or PKCS#1).
pub fn fingerprint_pem(pub_key_pem: &str) -> Result<String, KeyMaterialError> {
    let key = crate::primitives::import_public_key_pem(pub_key_pem)?;
    fingerprint(&key)
}

/// `true` iff `pub_key`'s modulus is at least 4096 bits.
pub fn validate_key_size_ok(pub_key: &RsaPublicKey) -> bool {
    validate_key_size(pub_key)
}

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

struct CacheEntry {
    params: RsaPublicKey,
    cached_at: Instant,
}

/// A thread-safe, fingerprint-keyed cache of parsed public-key parameters.
///
/// Entries have a TTL (default 30 minutes); expired entries are re-parsed
/// by the reader rather than evicted eagerly — a background sweep is not
/// required for correctness. Writers may race; last-write-wins is
/// acceptable because parsed outputs for the same fingerprint are
/// semantically identical. This cache stores only public-key parameters;
/// it must never be used to hold private key material.
pub struct KeyCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl KeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch the cached key for `fingerprint`, if present and unexpired.
    pub fn get(&self, fingerprint: &str) -> Option<RsaPublicKey> {
        let entries = self.entries.read().expect("key cache lock poisoned");
        let entry = entries.get(fingerprint)?;
        if entry.cached_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.params.clone())
    }

    /// Insert or refresh a parsed key under its fingerprint.
    pub fn put(&self, fingerprint: String, params: RsaPublicKey) {
        let mut entries = self.entries.write().expect("key cache lock poisoned");
        entries.insert(
            fingerprint,
            CacheEntry {
                params,
                cached_at: Instant::now(),
            },
        );
    }

    /// Parse `pem` (or reuse the cached parse) and return `(key, fingerprint)`.
    pub fn resolve_pem(&self, pem: &str) -> Result<(RsaPublicKey, String), KeyMaterialError> {
        let key = crate::primitives::import_public_key_pem(pem)?;
        let fp = fingerprint(&key)?;
        if self.get(&fp).is_none() {
            self.put(fp.clone(), key.clone());
        }
        Ok((key, fp))
    }

    /// Drop every cached entry, expired or not.
    pub fn clear(&self) {
        self.entries.write().expect("key cache lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("key cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide singleton wrapping a default-TTL [`KeyCache`], gated behind
/// the `global-cache` feature. An explicit, host-owned cache value passed
/// by reference (see [`KeyCache`]) remains the default; this is optional
/// sugar above that for hosts that would rather not thread a `&KeyCache`
/// through every call site.
#[cfg(feature = "global-cache")]
pub fn global_key_cache() -> &'static KeyCache {
    static CACHE: std::sync::OnceLock<KeyCache> = std::sync::OnceLock::new();
    CACHE.get_or_init(KeyCache::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::generate_rsa_keypair;

    #[test]
    fn fingerprint_is_64_char_lowercase_hex() {
        let (_priv, pub_key) = generate_rsa_keypair(4096).unwrap();
        let fp = fingerprint(&pub_key).unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_is_deterministic_across_export_import() {
        let (_priv, pub_key) = generate_rsa_keypair(4096).unwrap();
        let fp1 = fingerprint(&pub_key).unwrap();
        let pem = crate::primitives::export_public_key_pem(&pub_key).unwrap();
        let reimported = crate::primitives::import_public_key_pem(&pem).unwrap();
        let fp2 = fingerprint(&reimported).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn cache_expires_entries() {
        let cache = KeyCache::new(Duration::from_millis(1));
        let (_priv, pub_key) = generate_rsa_keypair(4096).unwrap();
        let fp = fingerprint(&pub_key).unwrap();
        cache.put(fp.clone(), pub_key);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&fp).is_none());
    }

    #[test]
    fn cache_never_shrinks_on_read() {
        let cache = KeyCache::new(Duration::from_millis(1));
        let (_priv, pub_key) = generate_rsa_keypair(4096).unwrap();
        let fp = fingerprint(&pub_key).unwrap();
        cache.put(fp.clone(), pub_key);
        std::thread::sleep(Duration::from_millis(5));
        let _ = cache.get(&fp);
        assert_eq!(cache.len(), 1);
    }

    #[cfg(feature = "global-cache")]
    #[test]
    fn global_cache_is_a_stable_singleton() {
        let (_priv, pub_key) = generate_rsa_keypair(4096).unwrap();
        let fp = fingerprint(&pub_key).unwrap();
        global_key_cache().put(fp.clone(), pub_key);
        assert!(global_key_cache().get(&fp).is_some());
    }
}
