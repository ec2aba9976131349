//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Store `value` under `key`, replacing any previous value.
    Put {
        /// Target key.
        key: String,
        /// New value bytes.
        value: Vec<u8>,
    },
    /// Remove `key`. Removing an absent key is not an error.
    Delete {
        /// Target key.
        key: String,
    },
}

impl BatchOp {
    /// Creates a put operation.
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        BatchOp::Put {
            key: key.into(),
            value,
        }
    }

    /// Creates a delete operation.
    pub fn delete(key: impl Into<String>) -> Self {
        BatchOp::Delete { key: key.into() }
    }

    /// Returns the key this operation targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// A low-level key/value storage backend.
///
/// Storage backends are **opaque byte stores**. The local store decides what
/// the bytes mean; backends only guarantee durability and atomicity.
///
/// # Invariants
///
/// - `read` returns exactly the bytes of the last committed put for a key
/// - `write_batch` applies all of its operations or none of them
/// - Concurrent readers never observe a partially applied batch
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key has never been written or was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Applies a batch of puts and deletes atomically.
    ///
    /// If a key appears more than once, the last operation wins.
    ///
    /// # Errors
    ///
    /// Returns an error if any key is invalid or the batch cannot be made
    /// durable. On error no operation of the batch is visible.
    fn write_batch(&self, ops: &[BatchOp]) -> StorageResult<()>;

    /// Lists every key currently holding a value, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the key listing cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Writes a single key.
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::write_batch`].
    fn write(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.write_batch(&[BatchOp::put(key, value)])
    }

    /// Deletes a single key.
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::write_batch`].
    fn delete(&self, key: &str) -> StorageResult<()> {
        self.write_batch(&[BatchOp::delete(key)])
    }
}

/// Checks that `key` is usable by every backend.
///
/// Keys are non-empty, at most 64 bytes, and limited to ASCII lowercase
/// letters, digits, `_` and `-` so they map directly onto file names.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] if the key is rejected.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 64
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_collection_keys() {
        for key in ["documents", "srs_states", "last_sync_time", "client-id", "v2"] {
            assert!(validate_key(key).is_ok(), "{key}");
        }
    }

    #[test]
    fn rejects_unsafe_keys() {
        for key in ["", "../etc", "Cards", "a/b", "x.json", &"k".repeat(65)] {
            assert!(matches!(
                validate_key(key),
                Err(StorageError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn batch_op_key() {
        assert_eq!(BatchOp::put("cards", vec![]).key(), "cards");
        assert_eq!(BatchOp::delete("documents").key(), "documents");
    }
}
