use std::collections::HashMap;

use p256::ecdsa::SigningKey;

use crate::config::CREDENTIAL_ID_LEN;

pub type CredentialId = [u8; CREDENTIAL_ID_LEN];

/// A simulated passkey. The signing key never leaves the registry.
pub(crate) struct Credential {
    pub credential_id: CredentialId,
    pub rp_id:         String,
    /// Returned as the assertion's user handle.
    pub user_id:       Vec<u8>,
    pub signing_key:   SigningKey,
    pub sign_count:    u32,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("credential_id", &alloy_primitives::hex::encode(self.credential_id))
            .field("rp_id", &self.rp_id)
            .field("sign_count", &self.sign_count)
            .finish_non_exhaustive()
    }
}

/// In-memory credential index keyed by id.
#[derive(Debug, Default)]
pub struct CredentialRegistry {
    by_id: HashMap<CredentialId, Credential>,
}

impl CredentialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, id: &CredentialId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Index a new credential. Returns false, leaving the registry untouched, if the id is taken.
    pub(crate) fn add(&mut self, credential: Credential) -> bool {
        let id = credential.credential_id;
        if self.by_id.contains_key(&id) {
            return false;
        }
        self.by_id.insert(id, credential);
        true
    }

    /// Look up by credential id (allowList-based assertion).
    pub(crate) fn get_by_id(&self, id: &[u8]) -> Option<&Credential> {
        let id: CredentialId = id.try_into().ok()?;
        self.by_id.get(&id)
    }

    pub(crate) fn get_by_id_mut(&mut self, id: &[u8]) -> Option<&mut Credential> {
        let id: CredentialId = id.try_into().ok()?;
        self.by_id.get_mut(&id)
    }

    pub fn sign_count(&self, id: &[u8]) -> Option<u32> {
        self.get_by_id(id).map(|c| c.sign_count)
    }

    pub fn credential_count(&self) -> usize {
        self.by_id.len()
    }
}
