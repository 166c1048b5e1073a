//! Structured error taxonomy for the capsa engine.
//!
//! Every variant is a machine-readable kind with a human-readable message.
//! No message ever carries key material, plaintext, or unwrapped key bytes.

use thiserror::Error;

/// Errors surfaced by the pre-flight validator (§4.6).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} exceeds limit: {actual} > {limit}")]
    LimitExceeded {
        field: &'static str,
        actual: usize,
        limit: usize,
    },
    #[error("{field} must be non-empty")]
    Empty { field: &'static str },
    #[error("capsa has no files, no subject, and no body")]
    EmptyCapsa,
    #[error("{field}: {reason}")]
    Malformed {
        field: &'static str,
        reason: String,
    },
}

/// Errors from key material handling: parsing, size checks, algorithm mismatch.
#[derive(Debug, Error)]
pub enum KeyMaterialError {
    #[error("key modulus too small: {bits} bits (minimum {minimum})")]
    ModulusTooSmall { bits: usize, minimum: usize },
    #[error("malformed PEM: {0}")]
    MalformedPem(String),
    #[error("unsupported key algorithm")]
    UnsupportedAlgorithm,
    #[error("wrong key length: got {got}, expected {expected}")]
    WrongLength { got: usize, expected: usize },
    #[error("recipient '{0}' has no direct key and is not covered by any delegate's acting_for list")]
    UnresolvableRecipient(String),
}

/// Errors from the raw cryptographic primitives (§4.1).
///
/// Deliberately coarse: an AEAD failure never distinguishes "bad tag" from
/// "bad key" and an RSA-OAEP failure never distinguishes padding errors from
/// length errors, so that error messages cannot be used as an oracle.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD authentication failed")]
    AuthFailed,
    #[error("RSA-OAEP unwrap failed")]
    UnwrapFailed,
    #[error("signature operation failed")]
    SignFailed,
}

/// Top-level error returned by the builder pipeline (§4.4).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    KeyMaterial(#[from] KeyMaterialError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("operation was cancelled")]
    Cancelled,
}

/// Top-level error returned by the decryptor pipeline (§4.5).
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error(transparent)]
    KeyMaterial(#[from] KeyMaterialError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("caller's party id is not a recipient of this capsa")]
    NotARecipient,
    #[error("keychain entry exists but grants no direct access (delegated without access)")]
    DelegatedWithoutAccess,
    #[error("authentication tag missing or empty; refusing to decrypt")]
    AuthTagRequired,
    #[error("content key accessed after it was cleared")]
    UseAfterClear,
    #[error("master key has invalid size after unwrap: {got} bytes (expected 32)")]
    MasterKeySizeInvalid { got: usize },
    #[error("malformed capsa record: {0}")]
    Malformed(String),
    #[error("operation was cancelled")]
    Cancelled,
}
