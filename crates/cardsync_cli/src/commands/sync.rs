//! Sync command implementation.

use super::open_existing;
use cardsync_core::Collection;
use cardsync_sync_engine::{HttpTransport, StoreApplier, SyncConfig, SyncEngine};
use cardsync_sync_protocol::ConflictPolicy;
use clap::ValueEnum;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Conflict policy choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Policy {
    /// Keep the server's version
    ServerWins,
    /// Re-assert the local version
    ClientWins,
    /// Record conflicts for later resolution
    Manual,
}

impl From<Policy> for ConflictPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::ServerWins => ConflictPolicy::ServerWins,
            Policy::ClientWins => ConflictPolicy::ClientWins,
            Policy::Manual => ConflictPolicy::Manual,
        }
    }
}

/// Runs one sync cycle, or a full resync, against `server`.
pub fn run(
    path: &Path,
    server: &str,
    full: bool,
    attempts: u32,
    policy: Policy,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(open_existing(path)?);
    let config = SyncConfig::new(server).with_conflict_policy(policy.into());
    let transport = HttpTransport::from_config(&config)?;
    let engine = SyncEngine::new(config, transport, StoreApplier::new(Arc::clone(&store))?);

    info!(server, full, "starting sync");
    let result = if full {
        engine.force_full_sync()?
    } else {
        engine.sync_with_retry(attempts.max(1))?
    };

    println!("✓ Sync completed in {:?}", result.duration);
    println!("  Pushed: {}", result.pushed);
    println!("  Pulled: {}", result.pulled);
    if result.deferred > 0 {
        println!("  Deferred: {}", result.deferred);
    }
    if result.full_sync_performed {
        println!("  Full sync performed");
    }
    println!("  Pending changes: {}", store.pending_count());
    if let Some(time) = store.last_sync_time() {
        println!("  Last sync: {}", time.to_rfc3339());
    }
    println!("  Cards: {}", store.get_values(Collection::Cards).len());

    let conflicts = engine.conflicts();
    if !conflicts.is_empty() {
        println!();
        println!("Conflicts:");
        for conflict in conflicts {
            let resolution = conflict
                .resolution
                .map_or_else(|| "unresolved".to_string(), |r| format!("{r:?}"));
            println!(
                "  [{}] {} {} field {}: {}",
                conflict.conflict_id,
                conflict.entity_type,
                conflict.entity_id.as_deref().unwrap_or("?"),
                conflict.field,
                resolution
            );
        }
    }
    Ok(())
}
