//! Client identity.

use crate::collection::Collection;
use crate::error::CoreResult;
use crate::store::LocalStore;
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Stable id of this installation.
///
/// Generated once and persisted under the `client_id` key; every push and
/// pull identifies the device with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    client_id: String,
}

impl ClientIdentity {
    /// Loads the persisted identity, generating and storing one if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a new identity cannot be persisted.
    pub fn load_or_create(store: &LocalStore) -> CoreResult<Self> {
        store.transaction(|txn| {
            let existing = txn
                .get_scalar::<String>(Collection::ClientId)
                .filter(|id| !id.is_empty());
            if let Some(client_id) = existing {
                return Ok(Self { client_id });
            }
            let client_id = Uuid::new_v4().to_string();
            txn.put_scalar(Collection::ClientId, &client_id)?;
            info!(%client_id, "generated client id");
            Ok(Self { client_id })
        })
    }

    /// Returns the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.client_id
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_generated_once() {
        let store = LocalStore::open_in_memory();
        let first = ClientIdentity::load_or_create(&store).unwrap();
        let second = ClientIdentity::load_or_create(&store).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            store.get_scalar::<String>(Collection::ClientId).as_deref(),
            Some(first.as_str())
        );
    }

    #[test]
    fn identity_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = LocalStore::open(dir.path()).unwrap();
            ClientIdentity::load_or_create(&store).unwrap()
        };
        let store = LocalStore::open(dir.path()).unwrap();
        assert_eq!(ClientIdentity::load_or_create(&store).unwrap(), id);
    }

    #[test]
    fn empty_identity_is_replaced() {
        let store = LocalStore::open_in_memory();
        store
            .transaction(|txn| txn.put_scalar(Collection::ClientId, &""))
            .unwrap();
        let identity = ClientIdentity::load_or_create(&store).unwrap();
        assert!(!identity.as_str().is_empty());
    }
}
