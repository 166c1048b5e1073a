//! Pre-flight validator.
//!
//! Applied during build before any encryption runs. Every limit here is a
//! hard cap matched to the server wire format, validated early so a typed
//! error comes back before any cryptography touches the payload — the
//! same "give the concern its own module" layout `canonical.rs` uses.

use crate::error::ValidationError;
use crate::model::PayloadInput;

/// Hard caps enforced before any cryptography runs. All defaults match
/// this crate's default limits table; `max_files`, `max_file_size`, and `max_total_size`
/// are caller-supplied because they track server-side limits that can
/// change independently of this crate's release cadence.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_keychain_entries: usize,
    pub max_party_id_len: usize,
    pub max_acting_for: usize,
    pub max_subject_b64_chars: usize,
    pub max_body_b64_chars: usize,
    pub max_structured_b64_chars: usize,
    pub max_metadata_label_chars: usize,
    pub max_metadata_tags: usize,
    pub max_metadata_tag_chars: usize,
    pub max_metadata_notes_chars: usize,
    pub max_related_packages: usize,
    pub max_filename_b64_chars: usize,
    pub max_signature_payload_b64_chars: usize,
    pub max_files: usize,
    pub max_file_size: u64,
    pub max_total_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_keychain_entries: 100,
            max_party_id_len: 100,
            max_acting_for: 10,
            max_subject_b64_chars: 65_536,
            max_body_b64_chars: 1_048_576,
            max_structured_b64_chars: 1_048_576,
            max_metadata_label_chars: 512,
            max_metadata_tags: 100,
            max_metadata_tag_chars: 100,
            max_metadata_notes_chars: 10_240,
            max_related_packages: 50,
            max_filename_b64_chars: 2_048,
            max_signature_payload_b64_chars: 65_536,
            max_files: 100,
            max_file_size: 1 << 30,       // 1 GiB
            max_total_size: 10 * (1 << 30), // 10 GiB
        }
    }
}

/// Recipients requested for a build, used only to bound `keychain entries`
/// and `acting_for` ahead of any crypto.
pub struct RecipientPlan<'a> {
    pub creator_party_id: &'a str,
    pub recipient_party_ids: &'a [String],
    pub acting_for_by_party: &'a [(String, Vec<String>)],
}

/// Validate a payload and recipient plan against `limits`. Every failure
/// names the field and limit it breached.
pub fn validate(
    payload: &PayloadInput,
    recipients: &RecipientPlan<'_>,
    limits: &Limits,
) -> Result<(), ValidationError> {
    validate_party_id(recipients.creator_party_id, limits)?;
    for party_id in recipients.recipient_party_ids {
        validate_party_id(party_id, limits)?;
    }

    let total_entries = 1 + recipients.recipient_party_ids.len();
    if total_entries > limits.max_keychain_entries {
        return Err(ValidationError::LimitExceeded {
            field: "keychain entries",
            actual: total_entries,
            limit: limits.max_keychain_entries,
        });
    }

    for (_party, acting_for) in recipients.acting_for_by_party {
        if acting_for.len() > limits.max_acting_for {
            return Err(ValidationError::LimitExceeded {
                field: "acting_for",
                actual: acting_for.len(),
                limit: limits.max_acting_for,
            });
        }
    }

    if payload.files.is_empty() && payload.subject.is_none() && payload.body.is_none() {
        return Err(ValidationError::EmptyCapsa);
    }

    if payload.files.len() > limits.max_files {
        return Err(ValidationError::LimitExceeded {
            field: "files per capsa",
            actual: payload.files.len(),
            limit: limits.max_files,
        });
    }

    let mut total_size: u128 = 0;
    for file in &payload.files {
        let size = file.plaintext.len() as u64;
        if size > limits.max_file_size {
            return Err(ValidationError::LimitExceeded {
                field: "per-file size",
                actual: size as usize,
                limit: limits.max_file_size as usize,
            });
        }
        total_size += size as u128;

        if filename_b64_upper_bound(&file.filename) > limits.max_filename_b64_chars {
            return Err(ValidationError::LimitExceeded {
                field: "encrypted filename",
                actual: filename_b64_upper_bound(&file.filename),
                limit: limits.max_filename_b64_chars,
            });
        }
    }
    if total_size > limits.max_total_size as u128 {
        return Err(ValidationError::LimitExceeded {
            field: "total size",
            actual: total_size as usize,
            limit: limits.max_total_size as usize,
        });
    }

    if let Some(subject) = &payload.subject {
        if b64_upper_bound(subject.len()) > limits.max_subject_b64_chars {
            return Err(ValidationError::LimitExceeded {
                field: "encrypted subject",
                actual: b64_upper_bound(subject.len()),
                limit: limits.max_subject_b64_chars,
            });
        }
    }
    if let Some(body) = &payload.body {
        if b64_upper_bound(body.len()) > limits.max_body_b64_chars {
            return Err(ValidationError::LimitExceeded {
                field: "encrypted body",
                actual: b64_upper_bound(body.len()),
                limit: limits.max_body_b64_chars,
            });
        }
    }
    if let Some(structured) = &payload.structured {
        let json_len = serde_json::to_vec(structured).map(|v| v.len()).unwrap_or(0);
        if b64_upper_bound(json_len) > limits.max_structured_b64_chars {
            return Err(ValidationError::LimitExceeded {
                field: "encrypted structured",
                actual: b64_upper_bound(json_len),
                limit: limits.max_structured_b64_chars,
            });
        }
    }

    if let Some(label) = &payload.metadata.label {
        if label.chars().count() > limits.max_metadata_label_chars {
            return Err(ValidationError::LimitExceeded {
                field: "metadata label",
                actual: label.chars().count(),
                limit: limits.max_metadata_label_chars,
            });
        }
    }
    if payload.metadata.tags.len() > limits.max_metadata_tags {
        return Err(ValidationError::LimitExceeded {
            field: "metadata tags",
            actual: payload.metadata.tags.len(),
            limit: limits.max_metadata_tags,
        });
    }
    for tag in &payload.metadata.tags {
        if tag.chars().count() > limits.max_metadata_tag_chars {
            return Err(ValidationError::LimitExceeded {
                field: "metadata tag",
                actual: tag.chars().count(),
                limit: limits.max_metadata_tag_chars,
            });
        }
    }
    if let Some(notes) = &payload.metadata.notes {
        if notes.chars().count() > limits.max_metadata_notes_chars {
            return Err(ValidationError::LimitExceeded {
                field: "metadata notes",
                actual: notes.chars().count(),
                limit: limits.max_metadata_notes_chars,
            });
        }
    }
    if payload.metadata.related_packages.len() > limits.max_related_packages {
        return Err(ValidationError::LimitExceeded {
            field: "related packages",
            actual: payload.metadata.related_packages.len(),
            limit: limits.max_related_packages,
        });
    }

    Ok(())
}

fn validate_party_id(party_id: &str, limits: &Limits) -> Result<(), ValidationError> {
    if party_id.is_empty() {
        return Err(ValidationError::Empty { field: "party id" });
    }
    if party_id.chars().count() > limits.max_party_id_len {
        return Err(ValidationError::LimitExceeded {
            field: "party id length",
            actual: party_id.chars().count(),
            limit: limits.max_party_id_len,
        });
    }
    Ok(())
}

/// Upper bound on base64url character count for `n` raw bytes (no padding).
fn b64_upper_bound(n: usize) -> usize {
    n.div_ceil(3) * 4
}

fn filename_b64_upper_bound(filename: &str) -> usize {
    // +16 for the AEAD tag that travels alongside, +12 for an IV-sized
    // margin is not part of the ciphertext itself; only the filename
    // ciphertext length matters for the wire base64 budget.
    b64_upper_bound(filename.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileInput, PayloadInput};

    fn empty_plan<'a>(creator: &'a str, recipients: &'a [String]) -> RecipientPlan<'a> {
        RecipientPlan {
            creator_party_id: creator,
            recipient_party_ids: recipients,
            acting_for_by_party: &[],
        }
    }

    #[test]
    fn rejects_empty_capsa() {
        let payload = PayloadInput::default();
        let recipients: Vec<String> = vec![];
        let plan = empty_plan("alice", &recipients);
        let result = validate(&payload, &plan, &Limits::default());
        assert!(matches!(result, Err(ValidationError::EmptyCapsa)));
    }

    #[test]
    fn accepts_subject_only_payload() {
        let mut payload = PayloadInput::default();
        payload.subject = Some("hello".to_string());
        let recipients: Vec<String> = vec![];
        let plan = empty_plan("alice", &recipients);
        assert!(validate(&payload, &plan, &Limits::default()).is_ok());
    }

    #[test]
    fn rejects_oversized_party_id() {
        let mut payload = PayloadInput::default();
        payload.subject = Some("x".to_string());
        let long_id = "p".repeat(101);
        let recipients: Vec<String> = vec![];
        let plan = empty_plan(&long_id, &recipients);
        let result = validate(&payload, &plan, &Limits::default());
        assert!(matches!(result, Err(ValidationError::LimitExceeded { field: "party id length", .. })));
    }

    #[test]
    fn rejects_too_many_files() {
        let mut payload = PayloadInput::default();
        payload.files = (0..101)
            .map(|i| FileInput {
                filename: format!("f{i}.txt"),
                mimetype: "text/plain".to_string(),
                plaintext: vec![0u8; 1],
            })
            .collect();
        let recipients: Vec<String> = vec![];
        let plan = empty_plan("alice", &recipients);
        let result = validate(&payload, &plan, &Limits::default());
        assert!(matches!(result, Err(ValidationError::LimitExceeded { field: "files per capsa", .. })));
    }

    #[test]
    fn rejects_oversized_file() {
        let mut payload = PayloadInput::default();
        let mut limits = Limits::default();
        limits.max_file_size = 10;
        payload.files.push(FileInput {
            filename: "big.bin".to_string(),
            mimetype: "application/octet-stream".to_string(),
            plaintext: vec![0u8; 11],
        });
        let recipients: Vec<String> = vec![];
        let plan = empty_plan("alice", &recipients);
        let result = validate(&payload, &plan, &limits);
        assert!(matches!(result, Err(ValidationError::LimitExceeded { field: "per-file size", .. })));
    }
}
