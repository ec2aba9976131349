//! Offline export and import commands.

use super::open_existing;
use cardsync_core::{LocalStore, OfflineExport};
use chrono::Utc;
use std::fs;
use std::path::Path;
use tracing::info;

/// Writes a snapshot of the store to `output`.
pub fn export(path: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let snapshot = store.export(Utc::now());
    fs::write(output, snapshot.to_json()?)?;
    info!(output = %output.display(), items = snapshot.item_count(), "store exported");

    println!("✓ Export created successfully");
    println!("  Path: {}", output.display());
    println!("  Items: {}", snapshot.item_count());
    println!("  Exported at: {}", snapshot.exported_at.to_rfc3339());
    Ok(())
}

/// Replaces the store's collections with the snapshot in `input`.
///
/// Creates the store if it does not exist yet.
pub fn import(path: &Path, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = OfflineExport::from_json(&fs::read_to_string(input)?)?;
    let store = LocalStore::open(path)?;
    let imported = store.import(&snapshot)?;
    info!(input = %input.display(), imported, "store imported");

    println!("✓ Store restored successfully");
    println!("  Path: {}", path.display());
    println!("  Items imported: {imported}");
    println!("  From export taken: {}", snapshot.exported_at.to_rfc3339());
    Ok(())
}
