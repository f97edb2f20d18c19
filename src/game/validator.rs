//! Guess Validator
//!
//! Pure checks of a client claim against a [`RunRecord`]. Nothing here
//! mutates state. This is a tamper deterrent, not a proof system: guesses are
//! rejected on mismatch, while end-of-run submissions only collect findings.

use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use super::run::RunRecord;

/// Average gap between guesses below which a run looks automated.
pub const MIN_PLAUSIBLE_AVG_GUESS_MS: u64 = 300;

/// Validation limits.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    /// Minimum time between two guesses on the same run.
    pub min_guess_interval: Duration,
    /// Allowed difference between claimed and recorded final streak.
    pub streak_drift_tolerance: u32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_guess_interval: Duration::from_millis(500),
            streak_drift_tolerance: 1,
        }
    }
}

/// Reasons a guess is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Claimed user does not own the run.
    #[error("run belongs to another user")]
    Unauthorized,
    /// Claimed pair does not match the stored pair.
    #[error("item pair does not match run state")]
    TokenMismatch,
    /// Guess arrived too soon after the previous one.
    #[error("too many guesses, retry in {retry_after_ms}ms")]
    RateLimited {
        /// Time until the next guess is accepted.
        retry_after_ms: u64,
    },
    /// The run was lost and has not been resumed.
    #[error("run is over")]
    RunOver,
}

/// Check a guess claim. Order: ownership, pair, run state, rate limit.
pub fn validate_guess(
    record: &RunRecord,
    claimed_user_id: &str,
    claimed_current_id: &str,
    claimed_next_id: &str,
    now_ms: u64,
    policy: &ValidationPolicy,
) -> Result<(), ValidationError> {
    if record.user_id != claimed_user_id {
        return Err(ValidationError::Unauthorized);
    }

    if record.current_item_id != claimed_current_id || record.next_item_id != claimed_next_id {
        return Err(ValidationError::TokenMismatch);
    }

    if record.is_lost() {
        return Err(ValidationError::RunOver);
    }

    check_rate_limit(record.last_guess_timestamp, now_ms, policy.min_guess_interval)
}

/// Reject guesses closer together than `min_interval`.
pub fn check_rate_limit(
    last_guess_ms: Option<u64>,
    now_ms: u64,
    min_interval: Duration,
) -> Result<(), ValidationError> {
    let Some(last) = last_guess_ms else {
        return Ok(());
    };

    let min_ms = min_interval.as_millis() as u64;
    let elapsed = now_ms.saturating_sub(last);
    if elapsed < min_ms {
        return Err(ValidationError::RateLimited { retry_after_ms: min_ms - elapsed });
    }
    Ok(())
}

/// Advisory inconsistency found in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// Claimed final streak differs from the record beyond tolerance.
    StreakDrift {
        /// Client value.
        reported: u32,
        /// Server value.
        recorded: u32,
    },
    /// `round_number` and the log length disagree.
    RoundLogMismatch {
        /// Stored round.
        round: u32,
        /// Log entries.
        logged: usize,
    },
    /// Current and next item are the same.
    DuplicatePair,
    /// More streak than rounds played.
    StreakExceedsRounds {
        /// Stored streak.
        streak: u32,
        /// Stored round.
        round: u32,
    },
    /// Guess timestamps go backwards.
    NonMonotonicLog,
    /// Guesses came faster than a human plausibly answers.
    ImplausibleSpeed {
        /// Mean gap in milliseconds.
        average_ms: u64,
    },
}

/// Result of checking a final submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionCheck {
    /// Record owned by the claimant; findings are advisory.
    Checked(Vec<Finding>),
    /// Record owned by someone else.
    Unauthorized,
}

/// Cross-check a final score claim. Never blocks on drift.
pub fn check_submission(
    record: &RunRecord,
    claimed_user_id: &str,
    claimed_streak: u32,
    policy: &ValidationPolicy,
) -> SubmissionCheck {
    if record.user_id != claimed_user_id {
        return SubmissionCheck::Unauthorized;
    }

    let mut findings = Vec::new();
    if record.current_streak.abs_diff(claimed_streak) > policy.streak_drift_tolerance {
        findings.push(Finding::StreakDrift {
            reported: claimed_streak,
            recorded: record.current_streak,
        });
    }
    findings.extend(audit_run(record));

    SubmissionCheck::Checked(findings)
}

/// Structural audit of a record.
pub fn audit_run(record: &RunRecord) -> Vec<Finding> {
    let mut findings = Vec::new();

    if record.round_number as usize != record.guess_log.len() {
        findings.push(Finding::RoundLogMismatch {
            round: record.round_number,
            logged: record.guess_log.len(),
        });
    }

    if record.current_item_id == record.next_item_id {
        findings.push(Finding::DuplicatePair);
    }

    if record.current_streak > record.round_number {
        findings.push(Finding::StreakExceedsRounds {
            streak: record.current_streak,
            round: record.round_number,
        });
    }

    let timestamps: Vec<u64> = record.guess_log.iter().map(|g| g.timestamp).collect();
    if timestamps.windows(2).any(|w| w[1] < w[0]) {
        findings.push(Finding::NonMonotonicLog);
    }

    if let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) {
        let gaps = timestamps.len() as u64;
        let average_ms = last.saturating_sub(record.started_at.min(*first)) / gaps;
        if gaps >= 3 && average_ms < MIN_PLAUSIBLE_AVG_GUESS_MS {
            findings.push(Finding::ImplausibleSpeed { average_ms });
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::test_support::item;
    use crate::game::run::Guess;

    fn record() -> RunRecord {
        RunRecord::new("run-1", "s1", "alice", 0, &item("a", 10.0), &item("b", 20.0))
    }

    fn policy() -> ValidationPolicy {
        ValidationPolicy::default()
    }

    #[test]
    fn test_valid_first_guess() {
        assert_eq!(validate_guess(&record(), "alice", "a", "b", 10_000, &policy()), Ok(()));
    }

    #[test]
    fn test_wrong_owner() {
        assert_eq!(
            validate_guess(&record(), "mallory", "a", "b", 10_000, &policy()),
            Err(ValidationError::Unauthorized)
        );
    }

    #[test]
    fn test_forged_pair() {
        assert_eq!(
            validate_guess(&record(), "alice", "a", "zzz", 10_000, &policy()),
            Err(ValidationError::TokenMismatch)
        );
        assert_eq!(
            validate_guess(&record(), "alice", "b", "a", 10_000, &policy()),
            Err(ValidationError::TokenMismatch)
        );
    }

    #[test]
    fn test_rate_limit() {
        let mut run = record();
        run.apply_correct(Guess::Up, 10_000, "c");

        assert_eq!(
            validate_guess(&run, "alice", "b", "c", 10_200, &policy()),
            Err(ValidationError::RateLimited { retry_after_ms: 300 })
        );
        assert_eq!(validate_guess(&run, "alice", "b", "c", 10_500, &policy()), Ok(()));
    }

    #[test]
    fn test_lost_run_refuses_guesses() {
        let mut run = record();
        run.apply_incorrect(Guess::Down, 10_000);
        assert_eq!(
            validate_guess(&run, "alice", "a", "b", 20_000, &policy()),
            Err(ValidationError::RunOver)
        );
    }

    #[test]
    fn test_validation_does_not_mutate() {
        let run = record();
        let before = run.clone();
        let _ = validate_guess(&run, "mallory", "x", "y", 0, &policy());
        assert_eq!(run, before);
    }

    #[test]
    fn test_submission_drift_within_tolerance() {
        let mut run = record();
        run.apply_correct(Guess::Up, 1_000, "c");
        run.apply_correct(Guess::Up, 2_000, "d");

        assert_eq!(check_submission(&run, "alice", 3, &policy()), SubmissionCheck::Checked(vec![]));
        assert_eq!(check_submission(&run, "alice", 1, &policy()), SubmissionCheck::Checked(vec![]));
    }

    #[test]
    fn test_submission_drift_is_advisory() {
        let mut run = record();
        run.apply_correct(Guess::Up, 1_000, "c");

        let check = check_submission(&run, "alice", 9, &policy());
        assert_eq!(
            check,
            SubmissionCheck::Checked(vec![Finding::StreakDrift { reported: 9, recorded: 1 }])
        );
    }

    #[test]
    fn test_submission_tolerance_is_configurable() {
        let mut run = record();
        run.apply_correct(Guess::Up, 1_000, "c");
        let strict = ValidationPolicy { streak_drift_tolerance: 0, ..policy() };

        assert!(matches!(
            check_submission(&run, "alice", 2, &strict),
            SubmissionCheck::Checked(f) if f.len() == 1
        ));
    }

    #[test]
    fn test_submission_wrong_owner() {
        assert_eq!(check_submission(&record(), "bob", 0, &policy()), SubmissionCheck::Unauthorized);
    }

    #[test]
    fn test_audit_flags_tampered_record() {
        let mut run = record();
        run.current_streak = 4;
        run.next_item_id = "a".into();

        let findings = audit_run(&run);
        assert!(findings.contains(&Finding::DuplicatePair));
        assert!(findings.contains(&Finding::StreakExceedsRounds { streak: 4, round: 0 }));
    }

    #[test]
    fn test_audit_flags_speed_and_ordering() {
        let mut run = record();
        run.apply_correct(Guess::Up, 100, "c");
        run.apply_correct(Guess::Up, 50, "d");
        run.apply_correct(Guess::Up, 200, "e");

        let findings = audit_run(&run);
        assert!(findings.contains(&Finding::NonMonotonicLog));
        assert!(findings.iter().any(|f| matches!(f, Finding::ImplausibleSpeed { .. })));
    }

    #[test]
    fn test_audit_clean_run() {
        let mut run = record();
        run.apply_correct(Guess::Up, 5_000, "c");
        run.apply_correct(Guess::Up, 11_000, "d");
        assert!(audit_run(&run).is_empty());
    }
}
