//! SM-2 spaced-repetition scheduling.
//!
//! [`review`] is a pure function of the previous state, the grade and the
//! review time. Given the same inputs it always produces the same state, so
//! replaying a device's grade history reproduces its schedule exactly.
//!
//! ## Algorithm
//!
//! For a grade `q` in `0..=5`:
//!
//! - `q >= 3` (recalled): the interval becomes 1 on the first repetition, 6 on
//!   the second and `round(interval * ease_factor)` afterwards, using the ease
//!   factor from before this review. Repetitions increase by one.
//! - `q < 3` (forgotten): repetitions reset to 0 and the interval to 1.
//! - In both cases the ease factor moves by
//!   `0.1 - (5 - q) * (0.08 + (5 - q) * 0.02)` and never drops below 1.3.
//!
//! The next review is due `interval` days after the review time.

use crate::error::{CoreError, CoreResult};
use crate::model::SrsState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ease factor of a card that was never reviewed.
pub const INITIAL_EASE_FACTOR: f64 = 2.5;

/// Lower bound of the ease factor.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Lowest grade that counts as a successful recall.
pub const PASSING_GRADE: u8 = 3;

/// Upper bound of the interval in days.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// Namespace for SRS state ids, so every device derives the same id for a card.
const SRS_STATE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8b3d_4c57_9e21_d0a4_b6c8_f913);

/// A review grade between 0 (complete blackout) and 5 (perfect recall).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Grade(u8);

impl Grade {
    /// Highest grade.
    pub const MAX: Grade = Grade(5);

    /// Creates a grade.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidGrade`] if `value > 5`.
    pub fn new(value: u8) -> CoreResult<Self> {
        if value <= Self::MAX.0 {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidGrade(value))
        }
    }

    /// Returns the raw grade.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns true if the grade counts as a successful recall.
    #[must_use]
    pub const fn is_recalled(self) -> bool {
        self.0 >= PASSING_GRADE
    }
}

impl TryFrom<u8> for Grade {
    type Error = CoreError;

    fn try_from(value: u8) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<Grade> for u8 {
    fn from(grade: Grade) -> Self {
        grade.0
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the SRS state id for a card.
///
/// The id is a UUIDv5 of the card id, so two devices that schedule the same
/// card for the first time create the same entity.
#[must_use]
pub fn srs_state_id(card_id: &str) -> String {
    Uuid::new_v5(&SRS_STATE_NAMESPACE, card_id.as_bytes()).to_string()
}

impl SrsState {
    /// Creates the schedule of a card that was never reviewed.
    #[must_use]
    pub fn new(card_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: srs_state_id(card_id),
            card_id: card_id.to_string(),
            ease_factor: INITIAL_EASE_FACTOR,
            interval: 1,
            repetitions: 0,
            due_date: now,
            last_reviewed: now,
        }
    }
}

/// Computes the schedule after reviewing a card.
#[must_use]
pub fn review(state: &SrsState, grade: Grade, now: DateTime<Utc>) -> SrsState {
    let (repetitions, interval) = if grade.is_recalled() {
        let interval = match state.repetitions {
            0 => 1,
            1 => 6,
            _ => scaled_interval(state.interval, state.ease_factor),
        };
        (state.repetitions.saturating_add(1), interval)
    } else {
        (0, 1)
    };

    SrsState {
        id: state.id.clone(),
        card_id: state.card_id.clone(),
        ease_factor: next_ease_factor(state.ease_factor, grade),
        interval,
        repetitions,
        due_date: due_after(now, interval),
        last_reviewed: now,
    }
}

/// Folds a sequence of reviews through [`review`].
#[must_use]
pub fn replay(state: &SrsState, reviews: &[(Grade, DateTime<Utc>)]) -> SrsState {
    reviews
        .iter()
        .fold(state.clone(), |acc, (grade, at)| review(&acc, *grade, *at))
}

/// Returns the interval each grade would produce, indexed by grade.
#[must_use]
pub fn preview_intervals(state: &SrsState, now: DateTime<Utc>) -> [u32; 6] {
    let mut intervals = [0; 6];
    for (value, slot) in (0u8..).zip(intervals.iter_mut()) {
        *slot = review(state, Grade(value), now).interval;
    }
    intervals
}

fn next_ease_factor(ease_factor: f64, grade: Grade) -> f64 {
    let miss = f64::from(Grade::MAX.0 - grade.0);
    (ease_factor + (0.1 - miss * (0.08 + miss * 0.02))).max(MIN_EASE_FACTOR)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled_interval(interval: u32, ease_factor: f64) -> u32 {
    let scaled = (f64::from(interval) * ease_factor).round();
    (scaled as u32).clamp(1, MAX_INTERVAL_DAYS)
}

fn due_after(now: DateTime<Utc>, interval: u32) -> DateTime<Utc> {
    now.checked_add_signed(Duration::days(i64::from(interval)))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn g(value: u8) -> Grade {
        Grade::new(value).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn grade_bounds() {
        assert!(Grade::new(0).is_ok());
        assert!(Grade::new(5).is_ok());
        assert!(matches!(Grade::new(6), Err(CoreError::InvalidGrade(6))));
        assert!(g(3).is_recalled());
        assert!(!g(2).is_recalled());
    }

    #[test]
    fn grade_serde_validates() {
        assert_eq!(serde_json::to_string(&g(4)).unwrap(), "4");
        assert_eq!(serde_json::from_str::<Grade>("2").unwrap(), g(2));
        assert!(serde_json::from_str::<Grade>("9").is_err());
    }

    #[test]
    fn new_state_defaults() {
        let state = SrsState::new("card-1", t0());
        assert!(approx(state.ease_factor, 2.5));
        assert_eq!(state.interval, 1);
        assert_eq!(state.repetitions, 0);
        assert_eq!(state.id, srs_state_id("card-1"));
        assert_ne!(srs_state_id("card-1"), srs_state_id("card-2"));
    }

    #[test]
    fn first_recall() {
        let state = review(&SrsState::new("c", t0()), g(5), t0());
        assert!(approx(state.ease_factor, 2.6));
        assert_eq!(state.interval, 1);
        assert_eq!(state.repetitions, 1);
        assert_eq!(state.due_date, t0() + Duration::days(1));
        assert_eq!(state.last_reviewed, t0());
    }

    #[test]
    fn second_and_third_recall() {
        let first = review(&SrsState::new("c", t0()), g(5), t0());
        let second = review(&first, g(4), t0() + Duration::days(1));
        assert!(approx(second.ease_factor, 2.6));
        assert_eq!(second.interval, 6);
        assert_eq!(second.repetitions, 2);

        let third = review(&second, g(5), t0() + Duration::days(7));
        assert_eq!(third.interval, 16);
        assert_eq!(third.repetitions, 3);
        assert!(approx(third.ease_factor, 2.7));
        assert_eq!(third.due_date, t0() + Duration::days(23));
    }

    #[test]
    fn hard_recall_lowers_ease() {
        let state = SrsState {
            ease_factor: 2.6,
            interval: 6,
            repetitions: 2,
            ..SrsState::new("c", t0())
        };
        let next = review(&state, g(3), t0());
        assert_eq!(next.interval, 16);
        assert!(approx(next.ease_factor, 2.46));
    }

    #[test]
    fn forgetting_resets_progress() {
        let state = SrsState {
            ease_factor: 2.6,
            interval: 16,
            repetitions: 3,
            ..SrsState::new("c", t0())
        };
        let next = review(&state, g(1), t0());
        assert_eq!(next.repetitions, 0);
        assert_eq!(next.interval, 1);
        assert!(approx(next.ease_factor, 2.06));
        assert_eq!(next.due_date, t0() + Duration::days(1));
    }

    #[test]
    fn ease_factor_floor() {
        let state = SrsState {
            ease_factor: 1.35,
            ..SrsState::new("c", t0())
        };
        let next = review(&state, g(0), t0());
        assert!(approx(next.ease_factor, 1.3));
    }

    #[test]
    fn replay_matches_stepwise_review() {
        let start = SrsState::new("c", t0());
        let reviews = [
            (g(5), t0()),
            (g(4), t0() + Duration::days(1)),
            (g(2), t0() + Duration::days(7)),
            (g(3), t0() + Duration::days(8)),
        ];
        let mut expected = start.clone();
        for (grade, at) in reviews {
            expected = review(&expected, grade, at);
        }
        assert_eq!(replay(&start, &reviews), expected);
    }

    #[test]
    fn preview_lists_every_grade() {
        let state = SrsState {
            interval: 6,
            repetitions: 2,
            ..SrsState::new("c", t0())
        };
        assert_eq!(preview_intervals(&state, t0()), [1, 1, 1, 15, 15, 15]);
    }

    #[test]
    fn interval_is_capped() {
        let state = SrsState {
            ease_factor: 3.0,
            interval: MAX_INTERVAL_DAYS,
            repetitions: 10,
            ..SrsState::new("c", t0())
        };
        let next = review(&state, g(5), t0());
        assert_eq!(next.interval, MAX_INTERVAL_DAYS);
        assert!(next.due_date > t0());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn invariants_hold_for_any_history(grades in prop::collection::vec(0u8..=5, 0..60)) {
            let mut state = SrsState::new("card", t0());
            let mut now = t0();
            for value in grades {
                let grade = g(value);
                let next = review(&state, grade, now);

                prop_assert!(next.ease_factor >= MIN_EASE_FACTOR);
                prop_assert!(next.interval >= 1);
                prop_assert!(next.due_date >= next.last_reviewed);
                prop_assert_eq!(next.last_reviewed, now);
                if grade.is_recalled() {
                    prop_assert_eq!(next.repetitions, state.repetitions + 1);
                } else {
                    prop_assert_eq!(next.repetitions, 0);
                    prop_assert_eq!(next.interval, 1);
                }
                prop_assert_eq!(&next.id, &state.id);

                now = now + Duration::hours(13);
                state = next;
            }
        }

        #[test]
        fn review_is_deterministic(
            ease in 1.3f64..4.0,
            interval in 1u32..400,
            repetitions in 0u32..20,
            value in 0u8..=5,
        ) {
            let state = SrsState {
                ease_factor: ease,
                interval,
                repetitions,
                ..SrsState::new("card", t0())
            };
            prop_assert_eq!(review(&state, g(value), t0()), review(&state, g(value), t0()));
        }
    }
}
