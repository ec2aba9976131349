//! Review commands: listing due cards and grading.

use super::open_existing;
use cardsync_core::{Grade, Library, Reviewer};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Lists up to `limit` cards due now.
pub fn due(path: &Path, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(open_existing(path)?);
    let cards = Library::new(store).due_cards(Utc::now(), limit);

    if cards.is_empty() {
        println!("No cards due");
        return Ok(());
    }
    for card in cards {
        let due = card
            .due_date
            .map_or_else(|| "new".to_string(), |d| d.format("%Y-%m-%d %H:%M").to_string());
        println!("{:<38} {:<16} {}", card.id, due, card.front);
    }
    Ok(())
}

/// Grades a card and prints its new schedule.
pub fn grade(path: &Path, card_id: &str, value: u8) -> Result<(), Box<dyn std::error::Error>> {
    let grade = Grade::new(value)?;
    let store = Arc::new(open_existing(path)?);
    let reviewer = Reviewer::new(Arc::clone(&store));
    let state = reviewer.grade(card_id, grade, Utc::now())?;
    info!(card_id, grade = value, "card graded");

    println!("✓ Graded {card_id} with {value}");
    println!("  Interval: {} day(s)", state.interval);
    println!("  Ease factor: {:.2}", state.ease_factor);
    println!("  Repetitions: {}", state.repetitions);
    println!("  Next review: {}", state.due_date.to_rfc3339());
    println!("  Pending changes: {}", store.pending_count());
    Ok(())
}
