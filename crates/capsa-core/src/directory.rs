//! The party-key directory external collaborator.
//!
//! The core only ever consumes a directory through this trait; how it is
//! populated (an HTTP call, a local keystore, a test fixture) is entirely
//! up to the host SDK.

use crate::model::PartyKey;

/// Resolves party ids to their public-key records. May return fewer
/// entries than requested; may include delegate entries whose
/// `acting_for` covers ids that were requested but have no direct key.
pub trait PartyKeyDirectory {
    fn resolve(&self, party_ids: &[String]) -> Vec<PartyKey>;
}

/// A simple in-memory directory, useful for tests and for small embedding
/// hosts that keep their whole roster resident.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    entries: Vec<PartyKey>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: PartyKey) -> &mut Self {
        self.entries.push(key);
        self
    }

    pub fn with(mut self, key: PartyKey) -> Self {
        self.insert(key);
        self
    }
}

impl PartyKeyDirectory for InMemoryDirectory {
    fn resolve(&self, party_ids: &[String]) -> Vec<PartyKey> {
        self.entries
            .iter()
            .filter(|pk| {
                party_ids.iter().any(|id| id == &pk.party_id)
                    || party_ids.iter().any(|id| pk.acting_for.contains(id))
            })
            .cloned()
            .collect()
    }
}
