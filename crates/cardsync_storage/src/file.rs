//! File-based storage backend for persistent storage.

use crate::backend::{validate_key, BatchOp, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const VALUE_SUFFIX: &str = ".json";
const STAGED_SUFFIX: &str = ".json.tmp";
const COMMIT_MARKER: &str = "COMMIT";
const COMMIT_MARKER_STAGED: &str = "COMMIT.tmp";

/// Keys touched by a batch, recorded durably before the batch is applied.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CommitMarker {
    puts: Vec<String>,
    deletes: Vec<String>,
}

/// A directory-based storage backend.
///
/// Each key is stored as `<dir>/<key>.json`. A batch is committed in three
/// steps:
///
/// 1. every new value is written to `<key>.json.tmp`
/// 2. a `COMMIT` marker listing the batch's keys is made durable
/// 3. staged files are renamed over their targets, deletes are applied and the
///    marker is removed
///
/// A crash before step 2 leaves only staged files, which are discarded on the
/// next [`FileBackend::open`]. A crash after step 2 is rolled forward on open.
/// Either way a batch is observed completely or not at all.
///
/// # Thread Safety
///
/// Reads share a lock; batches take it exclusively, so in-process readers
/// never see a half-applied batch. If applying a durable batch fails, the
/// next access finishes it before reading, or reports the error.
///
/// # Example
///
/// ```no_run
/// use cardsync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("store")).unwrap();
/// backend.write("documents", b"[]".to_vec()).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    sync_on_commit: bool,
    /// Set while a durable batch is only partly applied.
    lock: RwLock<bool>,
}

impl FileBackend {
    /// Opens or creates a store directory, recovering any interrupted batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a commit
    /// marker cannot be interpreted.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        Self::open_with_sync(dir, true)
    }

    /// Opens a store directory, choosing whether commits call `fsync`.
    ///
    /// Disabling sync is only appropriate for tests and throwaway stores.
    ///
    /// # Errors
    ///
    /// See [`FileBackend::open`].
    pub fn open_with_sync(dir: &Path, sync_on_commit: bool) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let backend = Self {
            dir: dir.to_path_buf(),
            sync_on_commit,
            lock: RwLock::new(false),
        };
        backend.recover()?;
        Ok(backend)
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{VALUE_SUFFIX}"))
    }

    fn staged_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{STAGED_SUFFIX}"))
    }

    fn recover(&self) -> StorageResult<()> {
        let mut interrupted = self.lock.write();
        self.roll_forward()?;
        *interrupted = false;
        Ok(())
    }

    /// Read access to a fully applied directory.
    fn settled(&self) -> StorageResult<RwLockReadGuard<'_, bool>> {
        let guard = self.lock.read();
        if !*guard {
            return Ok(guard);
        }
        drop(guard);

        let mut interrupted = self.lock.write();
        self.resume(&mut interrupted)?;
        Ok(RwLockWriteGuard::downgrade(interrupted))
    }

    fn resume(&self, interrupted: &mut RwLockWriteGuard<'_, bool>) -> StorageResult<()> {
        if **interrupted {
            info!("finishing interrupted batch");
            self.roll_forward()?;
            **interrupted = false;
        }
        Ok(())
    }

    /// Applies a committed marker and discards anything staged without one.
    /// The caller holds the write lock.
    fn roll_forward(&self) -> StorageResult<()> {
        let marker_path = self.dir.join(COMMIT_MARKER);
        if marker_path.exists() {
            let bytes = fs::read(&marker_path)?;
            let marker: CommitMarker = serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Corrupted(format!("unreadable commit marker: {e}")))?;
            info!(
                puts = marker.puts.len(),
                deletes = marker.deletes.len(),
                "rolling forward interrupted batch"
            );
            self.apply_marker(&marker)?;
            fs::remove_file(&marker_path)?;
            self.sync_dir()?;
        }

        let staged_marker = self.dir.join(COMMIT_MARKER_STAGED);
        if staged_marker.exists() {
            fs::remove_file(&staged_marker)?;
        }

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(STAGED_SUFFIX) {
                warn!(file = %name, "discarding uncommitted staged value");
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn apply_marker(&self, marker: &CommitMarker) -> StorageResult<()> {
        for key in &marker.puts {
            let staged = self.staged_path(key);
            if staged.exists() {
                fs::rename(&staged, self.value_path(key))?;
            }
        }
        for key in &marker.deletes {
            match fs::remove_file(self.value_path(key)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        if self.sync_on_commit {
            file.sync_all()?;
        }
        Ok(())
    }

    fn discard_staged(&self, keys: &[&str]) {
        for key in keys {
            let _ = fs::remove_file(self.staged_path(key));
        }
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> StorageResult<()> {
        if self.sync_on_commit {
            File::open(&self.dir)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let _guard = self.settled()?;
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_batch(&self, ops: &[BatchOp]) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        // Last operation per key wins.
        let mut latest: BTreeMap<&str, Option<&[u8]>> = BTreeMap::new();
        for op in ops {
            validate_key(op.key())?;
            match op {
                BatchOp::Put { key, value } => latest.insert(key.as_str(), Some(value.as_slice())),
                BatchOp::Delete { key } => latest.insert(key.as_str(), None),
            };
        }

        let mut interrupted = self.lock.write();
        self.resume(&mut interrupted)?;

        let mut marker = CommitMarker::default();
        let mut staged: Vec<&str> = Vec::new();
        for (key, value) in &latest {
            match value {
                Some(bytes) => {
                    if let Err(e) = self.write_file(&self.staged_path(key), bytes) {
                        self.discard_staged(&staged);
                        return Err(e);
                    }
                    staged.push(*key);
                    marker.puts.push((*key).to_string());
                }
                None => marker.deletes.push((*key).to_string()),
            }
        }

        let marker_bytes = serde_json::to_vec(&marker)
            .map_err(|e| StorageError::Corrupted(format!("cannot encode commit marker: {e}")))?;
        let staged_marker = self.dir.join(COMMIT_MARKER_STAGED);
        let marker_path = self.dir.join(COMMIT_MARKER);
        let committed = self
            .write_file(&staged_marker, &marker_bytes)
            .and_then(|()| fs::rename(&staged_marker, &marker_path).map_err(Into::into))
            .and_then(|()| self.sync_dir());
        if let Err(e) = committed {
            self.discard_staged(&staged);
            let _ = fs::remove_file(&staged_marker);
            let _ = fs::remove_file(&marker_path);
            return Err(e);
        }

        // The batch is durable from here on.
        let applied = self
            .apply_marker(&marker)
            .and_then(|()| fs::remove_file(&marker_path).map_err(Into::into))
            .and_then(|()| self.sync_dir());
        if let Err(e) = applied {
            warn!(error = %e, "durable batch not fully applied, retrying");
            if let Err(e) = self.roll_forward() {
                *interrupted = true;
                return Err(e);
            }
        }

        debug!(
            puts = marker.puts.len(),
            deletes = marker.deletes.len(),
            "committed batch"
        );
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let _guard = self.settled()?;
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(key) = name.strip_suffix(VALUE_SUFFIX) {
                if validate_key(key).is_ok() {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        let backend = FileBackend::open(&path).unwrap();
        assert!(path.is_dir());
        assert!(backend.keys().unwrap().is_empty());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn file_put_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("cards", b"[{\"id\":\"c1\"}]".to_vec()).unwrap();
        assert_eq!(
            backend.read("cards").unwrap(),
            Some(b"[{\"id\":\"c1\"}]".to_vec())
        );
        assert!(dir.path().join("cards.json").exists());
    }

    #[test]
    fn file_read_missing_key() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("documents").unwrap(), None);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend
                .write_batch(&[
                    BatchOp::put("documents", b"[]".to_vec()),
                    BatchOp::put("client_id", b"\"abc\"".to_vec()),
                ])
                .unwrap();
        }

        {
            let backend = FileBackend::open(dir.path()).unwrap();
            assert_eq!(
                backend.keys().unwrap(),
                vec!["client_id".to_string(), "documents".to_string()]
            );
            assert_eq!(backend.read("client_id").unwrap(), Some(b"\"abc\"".to_vec()));
        }
    }

    #[test]
    fn file_delete() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("cards", b"[]".to_vec()).unwrap();
        backend.delete("cards").unwrap();
        assert_eq!(backend.read("cards").unwrap(), None);
        assert!(backend.delete("cards").is_ok());
    }

    #[test]
    fn file_last_op_per_key_wins() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend
            .write_batch(&[
                BatchOp::put("cards", b"1".to_vec()),
                BatchOp::put("cards", b"2".to_vec()),
                BatchOp::put("documents", b"3".to_vec()),
                BatchOp::delete("documents"),
            ])
            .unwrap();

        assert_eq!(backend.read("cards").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.read("documents").unwrap(), None);
    }

    #[test]
    fn file_discards_uncommitted_staged_values() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.write("cards", b"old".to_vec()).unwrap();
        }

        // Simulate a crash after staging but before the marker was written.
        fs::write(dir.path().join("cards.json.tmp"), b"new").unwrap();
        fs::write(dir.path().join("COMMIT.tmp"), b"{\"puts\":[\"cards\"]").unwrap();

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("cards").unwrap(), Some(b"old".to_vec()));
        assert!(!dir.path().join("cards.json.tmp").exists());
        assert!(!dir.path().join("COMMIT.tmp").exists());
    }

    #[test]
    fn file_rolls_forward_committed_batch() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend
                .write_batch(&[
                    BatchOp::put("cards", b"old".to_vec()),
                    BatchOp::put("documents", b"doomed".to_vec()),
                ])
                .unwrap();
        }

        // Simulate a crash after the marker became durable.
        fs::write(dir.path().join("cards.json.tmp"), b"new").unwrap();
        fs::write(dir.path().join("srs_states.json.tmp"), b"[]").unwrap();
        fs::write(
            dir.path().join("COMMIT"),
            br#"{"puts":["cards","srs_states"],"deletes":["documents"]}"#,
        )
        .unwrap();

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("cards").unwrap(), Some(b"new".to_vec()));
        assert_eq!(backend.read("srs_states").unwrap(), Some(b"[]".to_vec()));
        assert_eq!(backend.read("documents").unwrap(), None);
        assert!(!dir.path().join("COMMIT").exists());
    }

    #[test]
    fn file_half_applied_batch_is_finished_before_reads() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend
            .write_batch(&[
                BatchOp::put("cards", b"old".to_vec()),
                BatchOp::put("documents", b"doomed".to_vec()),
            ])
            .unwrap();

        // Marker durable, first rename done, the rest still pending.
        fs::write(dir.path().join("cards.json"), b"new").unwrap();
        fs::write(dir.path().join("srs_states.json.tmp"), b"[]").unwrap();
        fs::write(
            dir.path().join("COMMIT"),
            br#"{"puts":["cards","srs_states"],"deletes":["documents"]}"#,
        )
        .unwrap();
        *backend.lock.write() = true;

        assert_eq!(backend.read("documents").unwrap(), None);
        assert_eq!(backend.read("srs_states").unwrap(), Some(b"[]".to_vec()));
        assert_eq!(backend.keys().unwrap(), vec!["cards", "srs_states"]);
        assert!(!dir.path().join("COMMIT").exists());
        assert!(!*backend.lock.read());

        backend.write("documents", b"again".to_vec()).unwrap();
        assert_eq!(backend.read("cards").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn file_corrupt_marker_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("COMMIT"), b"not json").unwrap();

        let result = FileBackend::open(dir.path());
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_keys_ignore_foreign_files() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open_with_sync(dir.path(), false).unwrap();
        backend.write("cards", b"[]".to_vec()).unwrap();
        fs::write(dir.path().join("README.txt"), b"hi").unwrap();
        fs::write(dir.path().join("Upper.json"), b"{}").unwrap();

        assert_eq!(backend.keys().unwrap(), vec!["cards".to_string()]);
    }

    #[test]
    fn file_invalid_key() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(matches!(
            backend.write("../escape", vec![]),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
