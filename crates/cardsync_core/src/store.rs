//! The local store.
//!
//! The store is a typed layer over a [`StorageBackend`]. Each [`Collection`]
//! is one JSON document under its storage key. Reads never fail: a missing
//! or undecodable collection reads as empty, and individual elements that no
//! longer decode are skipped with a warning.
//!
//! Writes go through [`LocalStore::transaction`], which serializes writers
//! and commits every collection touched by the closure as one atomic batch.

use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::error::CoreResult;
use cardsync_storage::{BatchOp, FileBackend, InMemoryBackend, StorageBackend};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Durable, collection-addressable storage for one device.
///
/// # Example
///
/// ```rust
/// use cardsync_core::{Collection, LocalStore};
///
/// let store = LocalStore::open_in_memory();
/// store.save(Collection::Cards, &[serde_json::json!({"id": "c1"})]).unwrap();
/// assert_eq!(store.get_values(Collection::Cards).len(), 1);
/// ```
pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
    config: StoreConfig,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Creates a store over an existing backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    /// Creates a store over an existing backend with custom configuration.
    pub fn with_config(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Opens a file-backed store in `path`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or recovered.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a file-backed store with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or recovered.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let backend = FileBackend::open_with_sync(path, config.sync_on_commit)?;
        Ok(Self::with_config(Arc::new(backend), config))
    }

    /// Creates an empty store that lives only in memory.
    #[must_use]
    pub fn open_in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Reads every decodable element of an array collection.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, collection: Collection) -> Vec<T> {
        decode_items(collection, self.read_value(collection))
    }

    /// Reads an array collection as raw JSON values.
    #[must_use]
    pub fn get_values(&self, collection: Collection) -> Vec<Value> {
        self.get(collection)
    }

    /// Reads a scalar collection.
    #[must_use]
    pub fn get_scalar<T: DeserializeOwned>(&self, collection: Collection) -> Option<T> {
        decode_scalar(collection, self.read_value(collection))
    }

    /// Replaces an array collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the items cannot be encoded or the write fails.
    pub fn save<T: Serialize>(&self, collection: Collection, items: &[T]) -> CoreResult<()> {
        self.transaction(|txn| txn.put(collection, items))
    }

    /// Deletes a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn remove(&self, collection: Collection) -> CoreResult<()> {
        self.transaction(|txn| {
            txn.remove(collection);
            Ok(())
        })
    }

    /// Returns the time of the last successful sync, if any.
    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.get_scalar(Collection::LastSyncTime)
    }

    /// Runs `f` in a transaction.
    ///
    /// Transactions are serialized. Reads inside the closure see the
    /// closure's own staged writes. If `f` returns `Ok`, every staged write is
    /// committed in one atomic batch; if it returns `Err`, nothing is written.
    ///
    /// Calling `transaction` again from inside `f` deadlocks.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or an error if the commit fails.
    pub fn transaction<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> CoreResult<R>,
    {
        let _guard = self.write_lock.lock();
        let mut txn = StoreTxn {
            store: self,
            staged: BTreeMap::new(),
        };
        let result = f(&mut txn)?;
        let ops = txn.into_batch()?;
        if !ops.is_empty() {
            self.backend.write_batch(&ops)?;
            debug!(collections = ops.len(), "committed local store transaction");
        }
        Ok(result)
    }

    pub(crate) fn warn_if_pending_backlog(&self, len: usize) {
        if len > self.config.pending_warn_threshold {
            warn!(
                pending = len,
                threshold = self.config.pending_warn_threshold,
                "pending change log is growing without sync"
            );
        }
    }

    fn read_value(&self, collection: Collection) -> Option<Value> {
        let bytes = match self.backend.read(collection.key()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(%collection, error = %err, "failed to read collection, treating as empty");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%collection, error = %err, "collection is not valid JSON, treating as empty");
                None
            }
        }
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Staged writes of one [`LocalStore::transaction`].
pub struct StoreTxn<'a> {
    store: &'a LocalStore,
    staged: BTreeMap<Collection, Option<Value>>,
}

impl StoreTxn<'_> {
    /// Reads every decodable element of an array collection.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, collection: Collection) -> Vec<T> {
        decode_items(collection, self.current(collection))
    }

    /// Reads an array collection as raw JSON values.
    #[must_use]
    pub fn get_values(&self, collection: Collection) -> Vec<Value> {
        self.get(collection)
    }

    /// Reads a scalar collection.
    #[must_use]
    pub fn get_scalar<T: DeserializeOwned>(&self, collection: Collection) -> Option<T> {
        decode_scalar(collection, self.current(collection))
    }

    /// Stages a replacement of an array collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the items cannot be encoded.
    pub fn put<T: Serialize>(&mut self, collection: Collection, items: &[T]) -> CoreResult<()> {
        let value = serde_json::to_value(items)?;
        self.staged.insert(collection, Some(value));
        Ok(())
    }

    /// Stages a scalar value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    pub fn put_scalar<T: Serialize>(&mut self, collection: Collection, value: &T) -> CoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.staged.insert(collection, Some(value));
        Ok(())
    }

    /// Stages removal of a collection.
    pub fn remove(&mut self, collection: Collection) {
        self.staged.insert(collection, None);
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.store.config
    }

    fn current(&self, collection: Collection) -> Option<Value> {
        match self.staged.get(&collection) {
            Some(staged) => staged.clone(),
            None => self.store.read_value(collection),
        }
    }

    fn into_batch(self) -> CoreResult<Vec<BatchOp>> {
        self.staged
            .into_iter()
            .map(|(collection, value)| match value {
                Some(value) => Ok(BatchOp::put(collection.key(), serde_json::to_vec(&value)?)),
                None => Ok(BatchOp::delete(collection.key())),
            })
            .collect()
    }
}

fn decode_items<T: DeserializeOwned>(collection: Collection, value: Option<Value>) -> Vec<T> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    warn!(%collection, error = %err, "skipping undecodable element");
                    None
                }
            })
            .collect(),
        Some(_) => {
            warn!(%collection, "collection is not an array, treating as empty");
            Vec::new()
        }
    }
}

fn decode_scalar<T: DeserializeOwned>(collection: Collection, value: Option<Value>) -> Option<T> {
    match serde_json::from_value(value?) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(%collection, error = %err, "undecodable scalar, treating as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::{Card, CardType};
    use serde_json::json;

    fn card(id: &str) -> Card {
        Card {
            id: id.into(),
            document_id: None,
            card_type: CardType::Qa,
            front: format!("front {id}"),
            back: format!("back {id}"),
            difficulty: 0.0,
            due_date: None,
            metadata: Value::Null,
        }
    }

    #[test]
    fn absent_collection_reads_empty() {
        let store = LocalStore::open_in_memory();
        assert!(store.get::<Card>(Collection::Cards).is_empty());
        assert_eq!(store.last_sync_time(), None);
    }

    #[test]
    fn save_and_get() {
        let store = LocalStore::open_in_memory();
        store.save(Collection::Cards, &[card("a"), card("b")]).unwrap();

        let cards: Vec<Card> = store.get(Collection::Cards);
        assert_eq!(cards, vec![card("a"), card("b")]);
    }

    #[test]
    fn save_replaces_whole_collection() {
        let store = LocalStore::open_in_memory();
        store.save(Collection::Cards, &[card("a"), card("b")]).unwrap();
        store.save(Collection::Cards, &[card("c")]).unwrap();

        let cards: Vec<Card> = store.get(Collection::Cards);
        assert_eq!(cards, vec![card("c")]);
    }

    #[test]
    fn remove_collection() {
        let store = LocalStore::open_in_memory();
        store.save(Collection::Cards, &[card("a")]).unwrap();
        store.remove(Collection::Cards).unwrap();
        assert!(store.get_values(Collection::Cards).is_empty());
    }

    #[test]
    fn corrupt_collection_reads_empty() {
        let backend = Arc::new(InMemoryBackend::with_entries([
            ("cards", b"{not json".to_vec()),
            ("documents", b"{\"id\": \"x\"}".to_vec()),
        ]));
        let store = LocalStore::new(backend);
        assert!(store.get_values(Collection::Cards).is_empty());
        assert!(store.get_values(Collection::Documents).is_empty());
    }

    #[test]
    fn undecodable_elements_are_skipped() {
        let store = LocalStore::open_in_memory();
        store
            .save(
                Collection::Cards,
                &[serde_json::to_value(card("a")).unwrap(), json!({"id": "broken"})],
            )
            .unwrap();

        let cards: Vec<Card> = store.get(Collection::Cards);
        assert_eq!(cards, vec![card("a")]);
        assert_eq!(store.get_values(Collection::Cards).len(), 2);
    }

    #[test]
    fn transaction_reads_own_writes() {
        let store = LocalStore::open_in_memory();
        store
            .transaction(|txn| {
                txn.put(Collection::Cards, &[card("a")])?;
                assert_eq!(txn.get::<Card>(Collection::Cards).len(), 1);
                txn.remove(Collection::Cards);
                assert!(txn.get_values(Collection::Cards).is_empty());
                txn.put(Collection::Cards, &[card("b")])?;
                Ok(())
            })
            .unwrap();

        let cards: Vec<Card> = store.get(Collection::Cards);
        assert_eq!(cards, vec![card("b")]);
    }

    #[test]
    fn failed_closure_writes_nothing() {
        let store = LocalStore::open_in_memory();
        store.save(Collection::Cards, &[card("a")]).unwrap();

        let result: CoreResult<()> = store.transaction(|txn| {
            txn.put(Collection::Cards, &[card("b")])?;
            txn.put_scalar(Collection::LastSyncTime, &Utc::now())?;
            Err(CoreError::CardNotFound("zzz".into()))
        });
        assert!(result.is_err());

        let cards: Vec<Card> = store.get(Collection::Cards);
        assert_eq!(cards, vec![card("a")]);
        assert_eq!(store.last_sync_time(), None);
    }

    #[test]
    fn failed_commit_leaves_all_collections_unchanged() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = LocalStore::new(backend.clone());
        store.save(Collection::Cards, &[card("a")]).unwrap();

        backend.set_fail_writes(true);
        let result = store.transaction(|txn| {
            txn.put(Collection::Cards, &[card("b")])?;
            txn.put_scalar(Collection::ClientId, &"device")
        });
        assert!(matches!(result, Err(CoreError::Storage(_))));

        backend.set_fail_writes(false);
        let cards: Vec<Card> = store.get(Collection::Cards);
        assert_eq!(cards, vec![card("a")]);
        assert_eq!(store.get_scalar::<String>(Collection::ClientId), None);
    }

    #[test]
    fn scalar_round_trip() {
        let store = LocalStore::open_in_memory();
        let now = Utc::now();
        store
            .transaction(|txn| txn.put_scalar(Collection::LastSyncTime, &now))
            .unwrap();
        assert_eq!(store.last_sync_time(), Some(now));
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.save(Collection::Cards, &[card("a")]).unwrap();
        }
        let store = LocalStore::open(dir.path()).unwrap();
        let cards: Vec<Card> = store.get(Collection::Cards);
        assert_eq!(cards, vec![card("a")]);
    }
}
