//! Study session tracking.

use crate::collection::Collection;
use crate::error::CoreResult;
use crate::model::StudySession;
use crate::pending::{ChangeType, PendingChangeLog};
use crate::scheduler::Grade;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Collects the grades of one study session.
#[derive(Debug, Clone)]
pub struct StudySessionTracker {
    id: String,
    started_at: DateTime<Utc>,
    grades: Vec<Grade>,
}

impl StudySessionTracker {
    /// Starts a session.
    #[must_use]
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: now,
            grades: Vec::new(),
        }
    }

    /// Records one grade.
    pub fn record(&mut self, grade: Grade) {
        self.grades.push(grade);
    }

    /// Returns the number of grades recorded so far.
    #[must_use]
    pub fn cards_reviewed(&self) -> usize {
        self.grades.len()
    }

    /// Builds the session record as of `now` without storing it.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn summarize(&self, now: DateTime<Utc>) -> StudySession {
        let count = self.grades.len();
        let (average_grade, accuracy) = if count == 0 {
            (0.0, 0.0)
        } else {
            let total: u32 = self.grades.iter().map(|g| u32::from(g.value())).sum();
            let recalled = self.grades.iter().filter(|g| g.is_recalled()).count();
            (f64::from(total) / count as f64, recalled as f64 / count as f64)
        };
        StudySession {
            id: self.id.clone(),
            start_time: self.started_at,
            end_time: now,
            cards_reviewed: u32::try_from(count).unwrap_or(u32::MAX),
            average_grade,
            accuracy,
            duration: (now - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Stores the session and queues it for sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; the tracker is consumed either way.
    pub fn finish(self, store: &LocalStore, now: DateTime<Utc>) -> CoreResult<StudySession> {
        let session = self.summarize(now);
        store.transaction(|txn| {
            let mut sessions: Vec<StudySession> = txn.get(Collection::StudySessions);
            sessions.push(session.clone());
            txn.put(Collection::StudySessions, &sessions)?;

            let mut log = PendingChangeLog::read(txn);
            log.enqueue(
                ChangeType::SessionCreate,
                session.id.clone(),
                serde_json::to_value(&session)?,
                now,
            );
            log.write(txn)
        })?;
        info!(
            session_id = %session.id,
            cards = session.cards_reviewed,
            accuracy = session.accuracy,
            "finished study session"
        );
        Ok(session)
    }
}
