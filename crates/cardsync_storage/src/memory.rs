//! In-memory storage backend for testing.

use crate::backend::{validate_key, BatchOp, StorageBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory storage backend.
///
/// This backend keeps every key in a sorted map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// Writes can be made to fail on demand with [`InMemoryBackend::set_fail_writes`],
/// which is how tests exercise storage error paths.
///
/// # Example
///
/// ```rust
/// use cardsync_storage::{InMemoryBackend, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write("client_id", b"\"abc\"".to_vec()).unwrap();
/// assert_eq!(backend.keys().unwrap(), vec!["client_id".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with entries.
    #[must_use]
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        let data = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            data: RwLock::new(data),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Returns a copy of every stored entry.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.data.read().clone()
    }

    /// Makes every subsequent batch fail with an I/O error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl StorageBackend for InMemoryBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.data.read().get(key).cloned())
    }

    fn write_batch(&self, ops: &[BatchOp]) -> StorageResult<()> {
        for op in ops {
            validate_key(op.key())?;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected write failure").into());
        }

        let mut data = self.data.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    data.remove(key);
                }
            }
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}
