//! Inspect command implementation.

use super::open_existing;
use cardsync_core::{Collection, LocalStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Client id, if the device ever synced.
    pub client_id: Option<String>,
    /// Sync watermark.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Number of queued local changes.
    pub pending_changes: usize,
    /// Item count per array collection.
    pub collections: Vec<CollectionStats>,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Storage key.
    pub name: &'static str,
    /// Number of items.
    pub count: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let result = inspect(path, &store);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_text_output(&result);
    }
    Ok(())
}

fn inspect(path: &Path, store: &LocalStore) -> InspectResult {
    let collections = Collection::ALL
        .into_iter()
        .filter(|c| !c.is_scalar() && *c != Collection::PendingChanges)
        .map(|c| CollectionStats {
            name: c.key(),
            count: store.get_values(c).len(),
        })
        .collect();

    InspectResult {
        path: path.display().to_string(),
        client_id: store.get_scalar(Collection::ClientId),
        last_sync_time: store.last_sync_time(),
        pending_changes: store.pending_count(),
        collections,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("cardsync Store Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!(
        "Client id: {}",
        result.client_id.as_deref().unwrap_or("(not assigned)")
    );
    match result.last_sync_time {
        Some(time) => println!("Last sync: {}", time.to_rfc3339()),
        None => println!("Last sync: never"),
    }
    println!("Pending changes: {}", result.pending_changes);
    println!();
    println!("Collections:");
    for collection in &result.collections {
        println!("  {:<16} {}", collection.name, collection.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_collections() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store
            .save(
                Collection::Cards,
                &[json!({"id": "c1"}), json!({"id": "c2"})],
            )
            .unwrap();

        let result = inspect(dir.path(), &store);
        assert_eq!(result.pending_changes, 0);
        assert!(result.client_id.is_none());
        assert!(result.last_sync_time.is_none());
        let cards = result
            .collections
            .iter()
            .find(|c| c.name == "cards")
            .unwrap();
        assert_eq!(cards.count, 2);
        assert!(result.collections.iter().all(|c| c.name != "pending_changes"));
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_existing(&dir.path().join("absent")).is_err());
    }
}
