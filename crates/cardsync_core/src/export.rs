//! Offline export and import.
//!
//! An [`OfflineExport`] is a JSON snapshot of every collection. Importing it
//! replaces the array collections and the sync watermark in one commit.
//! The importing device keeps its own client id when it already has one, so
//! two installations never share an identity.

use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

/// Current export format version.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Snapshot of a local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineExport {
    /// Format version, see [`EXPORT_FORMAT_VERSION`].
    pub format_version: u32,
    /// When the snapshot was taken.
    pub exported_at: DateTime<Utc>,
    /// Client id of the exporting device.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Sync watermark of the exporting device.
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Array collections by storage key.
    pub collections: BTreeMap<String, Vec<Value>>,
}

impl OfflineExport {
    /// Returns the number of items across all collections.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Encodes the export as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decodes an export from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not an export.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.format_version != EXPORT_FORMAT_VERSION {
            return Err(CoreError::invalid_export(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        for key in self.collections.keys() {
            match Collection::from_key(key) {
                Some(collection) if !collection.is_scalar() => {}
                _ => {
                    return Err(CoreError::invalid_export(format!(
                        "unknown collection '{key}'"
                    )))
                }
            }
        }
        Ok(())
    }
}

impl LocalStore {
    /// Takes a snapshot of every collection.
    #[must_use]
    pub fn export(&self, now: DateTime<Utc>) -> OfflineExport {
        let collections = Collection::ALL
            .into_iter()
            .filter(|c| !c.is_scalar())
            .map(|c| (c.key().to_string(), self.get_values(c)))
            .collect();
        OfflineExport {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: now,
            client_id: self.get_scalar(Collection::ClientId),
            last_sync_time: self.last_sync_time(),
            collections,
        }
    }

    /// Restores a snapshot, replacing every array collection.
    ///
    /// Collections missing from the export are cleared.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidExport`] for unsupported exports, or an
    /// error if the commit fails. On error the store is unchanged.
    pub fn import(&self, export: &OfflineExport) -> CoreResult<usize> {
        export.validate()?;
        self.transaction(|txn| {
            for collection in Collection::ALL.into_iter().filter(|c| !c.is_scalar()) {
                match export.collections.get(collection.key()) {
                    Some(items) => txn.put(collection, items)?,
                    None => txn.remove(collection),
                }
            }
            match export.last_sync_time {
                Some(time) => txn.put_scalar(Collection::LastSyncTime, &time)?,
                None => txn.remove(Collection::LastSyncTime),
            }
            let has_identity = txn.get_scalar::<String>(Collection::ClientId).is_some();
            match &export.client_id {
                Some(client_id) if !has_identity => {
                    txn.put_scalar(Collection::ClientId, client_id)?;
                }
                _ => {}
            }
            Ok(())
        })?;
        let count = export.item_count();
        info!(items = count, exported_at = %export.exported_at, "imported offline export");
        Ok(count)
    }
}
