//! Pending log and checksum commands.

use super::open_existing;
use cardsync_core::{Collection, PendingChange, PendingChangeLog};
use cardsync_sync_protocol::EntityChecksums;
use std::path::Path;

/// Lists the pending log, optionally compacted.
pub fn run(path: &Path, compacted: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let log = PendingChangeLog::load(&store);
    let entries = select(&log, compacted);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No pending changes");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "#{:<6} {:<24} {:<15} {:<38} {}",
            entry.sequence,
            entry.timestamp.to_rfc3339(),
            format!("{:?}", entry.change_type),
            entry.entity_id,
            entry.id
        );
    }
    println!();
    println!("{} of {} entries", entries.len(), log.len());
    Ok(())
}

fn select(log: &PendingChangeLog, compacted: bool) -> Vec<PendingChange> {
    if compacted {
        log.compacted()
    } else {
        log.all().to_vec()
    }
}

/// Prints the checksums consistency validation would send.
pub fn checksum(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let checksums = EntityChecksums::compute(
        &store.get_values(Collection::Documents),
        &store.get_values(Collection::Cards),
        &store.get_values(Collection::SrsStates),
    );
    println!("document  {}", checksums.document);
    println!("card      {}", checksums.card);
    println!("srs       {}", checksums.srs);
    Ok(())
}
