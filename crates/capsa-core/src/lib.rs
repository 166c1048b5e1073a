//! Client-side cryptographic core of the capsa secure content-delivery
//! envelope format.
//!
//! This crate implements the build pipeline (fan a content key out to
//! recipient public keys, encrypt, canonicalize, sign), the receive
//! pipeline (verify, select, unwrap, decrypt), and the canonicalization
//! contract shared by both. The remote storage/routing service, the wire
//! JSON layer, upload/download transports, and credential management are
//! external collaborators consumed only through the traits and plain
//! structs in [`directory`] and [`model`].

pub mod builder;
pub mod cancellation;
pub mod canonical;
pub mod compress;
pub mod decryptor;
pub mod directory;
pub mod error;
pub mod fingerprint;
pub mod model;
mod nonce_ledger;
pub mod primitives;
mod time;
pub mod validate;

pub use builder::{build, BuildInputs, KEYCHAIN_ALGORITHM};
pub use cancellation::{CancellationHandle, CancellationToken};
pub use decryptor::{decrypt_file, decrypt_filename, verify_and_unwrap, DecryptInputs};
pub use directory::{InMemoryDirectory, PartyKeyDirectory};
pub use error::{BuildError, CryptoError, DecryptError, KeyMaterialError, ValidationError};
pub use fingerprint::{fingerprint, fingerprint_pem, KeyCache};
#[cfg(feature = "global-cache")]
pub use fingerprint::global_key_cache;
pub use model::{
    AccessControl, AeadSegment, BuiltCapsa, Capsa, CapsaStatus, ClearableContentKey, ContentKey,
    DecryptedCapsa, FileInput, FileRecord, Keychain, KeychainEntry, PartyKey, PayloadInput,
    PublicMetadata, SignatureBlock,
};
pub use validate::{Limits, RecipientPlan};

use primitives::{export_private_key_pem, export_public_key_pem, generate_rsa_keypair};

/// Generate a fresh RSA keypair, returning `(public_key_pem, private_key_pem, fingerprint)`.
/// `size_bits` defaults to 4096 and must not be set below
/// [`primitives::MIN_RSA_MODULUS_BITS`] for the keypair to be usable
/// with this crate's wrap/sign operations.
pub fn generate_keypair(size_bits: usize) -> Result<(String, String, String), KeyMaterialError> {
    let (priv_key, pub_key) = generate_rsa_keypair(size_bits)?;
    let pub_pem = export_public_key_pem(&pub_key)?;
    let priv_pem = export_private_key_pem(&priv_key)?;
    let fp = fingerprint::fingerprint(&pub_key)?;
    Ok((pub_pem, priv_pem, fp))
}
