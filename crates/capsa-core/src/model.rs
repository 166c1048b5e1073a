//! The capsa data model.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::DecryptError;

/// A 32-byte AES-256 content key, generated fresh per build or decrypt
/// scope. Owns its buffer exclusively and wipes it on drop.
#[derive(ZeroizeOnDrop)]
pub struct ContentKey(pub(crate) [u8; crate::primitives::CONTENT_KEY_LEN]);

impl ContentKey {
    pub fn generate() -> Self {
        Self(crate::primitives::random_content_key())
    }

    pub fn from_bytes(bytes: [u8; crate::primitives::CONTENT_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8; crate::primitives::CONTENT_KEY_LEN] {
        &self.0
    }
}

/// A handle over a content key unwrapped on the receive side. Zeros the
/// key on drop or on an explicit [`ClearableContentKey::clear`] call;
/// any read after clearing surfaces [`DecryptError::UseAfterClear`].
pub struct ClearableContentKey {
    key: [u8; crate::primitives::CONTENT_KEY_LEN],
    cleared: bool,
}

impl ClearableContentKey {
    pub fn new(key: [u8; crate::primitives::CONTENT_KEY_LEN]) -> Self {
        Self { key, cleared: false }
    }

    /// Borrow the key bytes, failing if the handle was already cleared.
    pub fn expose(&self) -> Result<&[u8; crate::primitives::CONTENT_KEY_LEN], DecryptError> {
        if self.cleared {
            Err(DecryptError::UseAfterClear)
        } else {
            Ok(&self.key)
        }
    }

    /// Explicitly zero the key now, ahead of scope exit.
    pub fn clear(&mut self) {
        if !self.cleared {
            self.key.zeroize();
            self.cleared = true;
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared
    }
}

impl Drop for ClearableContentKey {
    fn drop(&mut self) {
        self.clear();
    }
}

/// A public key known to the system, named by party id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyKey {
    pub party_id: String,
    pub public_key_pem: String,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acting_for: Vec<String>,
}

/// One AEAD-protected field or file artifact: ciphertext plus its IV and
/// tag, all base64url on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AeadSegment {
    #[serde(rename = "ciphertext", skip_serializing_if = "Option::is_none")]
    pub ciphertext_b64: Option<String>,
    #[serde(rename = "iv")]
    pub iv_b64: String,
    #[serde(rename = "authTag")]
    pub tag_b64: String,
}

/// One recipient's wrapped copy of the content key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeychainEntry {
    pub party: String,
    #[serde(rename = "encryptedKey")]
    pub wrapped_content_key_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "acting_for")]
    pub acting_for: Vec<String>,
}

impl KeychainEntry {
    pub fn is_delegated_without_access(&self) -> bool {
        self.wrapped_content_key_b64.is_empty()
    }

    pub fn covers(&self, party_id: &str) -> bool {
        self.party == party_id || self.acting_for.iter().any(|p| p == party_id)
    }
}

/// One encrypted file plus its plaintext metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "fileId")]
    pub file_id: String,
    #[serde(rename = "encryptedFilename")]
    pub encrypted_filename_b64: String,
    #[serde(rename = "filenameIV")]
    pub filename_iv_b64: String,
    #[serde(rename = "filenameAuthTag")]
    pub filename_tag_b64: String,
    #[serde(rename = "iv")]
    pub iv_b64: String,
    #[serde(rename = "authTag")]
    pub tag_b64: String,
    pub hash: String,
    #[serde(rename = "hashAlgorithm")]
    pub hash_algorithm: String,
    pub size: u64,
    #[serde(rename = "originalSize", skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
    pub mimetype: String,
    #[serde(default)]
    pub compressed: bool,
}

/// The keychain block: algorithm identifier plus per-recipient entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keychain {
    pub algorithm: String,
    pub keys: Vec<KeychainEntry>,
}

/// The detached JWS signature triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub algorithm: String,
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub related_packages: Vec<String>,
}

/// Capsa status on the wire (server-managed; opaque to the core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapsaStatus {
    Active,
    Expired,
    Deleted,
}

/// The full capsa wire record. Immutable once built — any change
/// invalidates the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capsa {
    pub id: String,
    pub creator: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    pub status: CapsaStatus,
    #[serde(rename = "totalSize")]
    pub total_size: u64,

    #[serde(rename = "encryptedSubject", skip_serializing_if = "Option::is_none")]
    pub encrypted_subject_b64: Option<String>,
    #[serde(rename = "subjectIV", skip_serializing_if = "Option::is_none")]
    pub subject_iv_b64: Option<String>,
    #[serde(rename = "subjectAuthTag", skip_serializing_if = "Option::is_none")]
    pub subject_tag_b64: Option<String>,

    #[serde(rename = "encryptedBody", skip_serializing_if = "Option::is_none")]
    pub encrypted_body_b64: Option<String>,
    #[serde(rename = "bodyIV", skip_serializing_if = "Option::is_none")]
    pub body_iv_b64: Option<String>,
    #[serde(rename = "bodyAuthTag", skip_serializing_if = "Option::is_none")]
    pub body_tag_b64: Option<String>,

    #[serde(rename = "encryptedStructured", skip_serializing_if = "Option::is_none")]
    pub encrypted_structured_b64: Option<String>,
    #[serde(rename = "structuredIV", skip_serializing_if = "Option::is_none")]
    pub structured_iv_b64: Option<String>,
    #[serde(rename = "structuredAuthTag", skip_serializing_if = "Option::is_none")]
    pub structured_tag_b64: Option<String>,

    pub files: Vec<FileRecord>,

    #[serde(rename = "accessControl", default)]
    pub access_control: AccessControl,
    pub keychain: Keychain,
    pub signature: SignatureBlock,
    #[serde(default)]
    pub metadata: PublicMetadata,
}

impl Capsa {
    /// Whether all three subject fields are present together (they must
    /// be fully present or fully absent).
    pub fn subject_triple_consistent(&self) -> bool {
        triple_consistent(&self.encrypted_subject_b64, &self.subject_iv_b64, &self.subject_tag_b64)
    }

    pub fn body_triple_consistent(&self) -> bool {
        triple_consistent(&self.encrypted_body_b64, &self.body_iv_b64, &self.body_tag_b64)
    }

    pub fn structured_triple_consistent(&self) -> bool {
        triple_consistent(
            &self.encrypted_structured_b64,
            &self.structured_iv_b64,
            &self.structured_tag_b64,
        )
    }

    /// Sum of per-file ciphertext sizes, recomputed from `files[*].size`
    /// rather than trusted from the wire `total_size` field — the safer
    /// of the two choices.
    pub fn recomputed_total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

fn triple_consistent(a: &Option<String>, b: &Option<String>, c: &Option<String>) -> bool {
    matches!(
        (a.is_some(), b.is_some(), c.is_some()),
        (true, true, true) | (false, false, false)
    )
}

/// A built capsa plus the side channel of file ciphertext bytes. File
/// payload is never embedded in the record itself.
pub struct BuiltCapsa {
    pub record: Capsa,
    pub file_payloads: Vec<(String, Vec<u8>)>,
}

/// The caller-supplied payload handed to the builder.
#[derive(Debug, Clone, Default)]
pub struct PayloadInput {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub structured: Option<serde_json::Value>,
    pub files: Vec<FileInput>,
    pub expires_at: Option<String>,
    pub metadata: PublicMetadata,
}

#[derive(Debug, Clone)]
pub struct FileInput {
    pub filename: String,
    pub mimetype: String,
    pub plaintext: Vec<u8>,
}

/// The result of a successful decrypt pipeline run.
pub struct DecryptedCapsa {
    pub record: Capsa,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub structured: Option<serde_json::Value>,
    pub(crate) content_key: ClearableContentKey,
}

impl DecryptedCapsa {
    /// Explicitly zero the content key ahead of scope exit.
    pub fn clear(&mut self) {
        self.content_key.clear();
    }

    pub fn is_cleared(&self) -> bool {
        self.content_key.is_cleared()
    }

    pub(crate) fn content_key(&self) -> Result<&[u8; crate::primitives::CONTENT_KEY_LEN], DecryptError> {
        self.content_key.expose()
    }
}
