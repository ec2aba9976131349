//! CLI command implementations.

pub mod inspect;
pub mod pending;
pub mod review;
pub mod sync;
pub mod transfer;

use cardsync_core::LocalStore;
use std::path::Path;

/// Opens the store at `path`, refusing to create a new one.
pub fn open_existing(path: &Path) -> Result<LocalStore, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    Ok(LocalStore::open(path)?)
}
