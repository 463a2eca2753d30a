//! Three-way-style reconciliation of one local and one remote copy of the
//! same per-day record.
//!
//! `resolve` is a pure function: the same two inputs under the same strategy
//! always produce the same output, because sync retries may run it
//! redundantly. No wall-clock reads happen here; when a merge newly
//! completes a day, the completion time falls back to the later of the two
//! access timestamps rather than "now".

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::{ConflictStrategy, DayProgress, QuizScore};

/// Reconciles `local` and `remote` under the given strategy.
///
/// Both records must describe the same day; reconciling records of different
/// days is a caller bug and the local day id is kept.
#[must_use]
pub fn resolve(
    local: &DayProgress,
    remote: &DayProgress,
    strategy: ConflictStrategy,
) -> DayProgress {
    match strategy {
        ConflictStrategy::RemoteWins => remote.clone(),
        ConflictStrategy::LocalWins => local_wins(local, remote),
        ConflictStrategy::Merge => merge(local, remote),
    }
}

/// Remote is the base; every locally held field overwrites it. In the typed
/// model only `completed_at` can be absent locally, so it falls back to the
/// remote value.
fn local_wins(local: &DayProgress, remote: &DayProgress) -> DayProgress {
    DayProgress::assemble(
        local.day(),
        local.completed_sections().to_vec(),
        local.completed_slides().to_vec(),
        local.quiz_scores().clone(),
        local.current_slide(),
        local.completion_percentage(),
        local.completed_at().or(remote.completed_at()),
        local.last_accessed(),
    )
}

fn merge(local: &DayProgress, remote: &DayProgress) -> DayProgress {
    // Sections and slides are monotonic: once completed on any device they
    // stay completed. Local order first, then remote-only entries, keeps the
    // result deterministic.
    let sections = union_preserving_order(local.completed_sections(), remote.completed_sections());
    let slides = union_preserving_order(local.completed_slides(), remote.completed_slides());

    // Key-wise union with local precedence: a local retake overrides the
    // remote score for the same quiz.
    let mut quiz_scores: BTreeMap<String, QuizScore> = remote.quiz_scores().clone();
    for (quiz, score) in local.quiz_scores() {
        quiz_scores.insert(quiz.clone(), *score);
    }

    // Scalar bookmark: the side touched more recently wins, local on a tie.
    let current_slide = if local.last_accessed() >= remote.last_accessed() {
        local.current_slide()
    } else {
        remote.current_slide()
    };

    let last_accessed = local.last_accessed().max(remote.last_accessed());

    // Once complete, always complete. If both sides completed, keep the
    // earliest completion time; if the merge itself completes the day, fall
    // back to the merged access time.
    let is_completed = local.is_completed() || remote.is_completed();
    let completion_percentage = if is_completed {
        100
    } else {
        local.completion_percentage().max(remote.completion_percentage())
    };
    let completed_at = if is_completed {
        earliest(local.completed_at(), remote.completed_at()).or(Some(last_accessed))
    } else {
        None
    };

    DayProgress::assemble(
        local.day(),
        sections,
        slides,
        quiz_scores,
        current_slide,
        completion_percentage,
        completed_at,
        last_accessed,
    )
}

fn union_preserving_order(first: &[String], second: &[String]) -> Vec<String> {
    let mut out = first.to_vec();
    for item in second {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DayId;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn day(n: u8) -> DayId {
        DayId::new(n).unwrap()
    }

    fn score(v: u8) -> QuizScore {
        QuizScore::new(v).unwrap()
    }

    #[test]
    fn merge_unions_completed_sections() {
        let now = fixed_now();
        let mut local = DayProgress::new(day(1), now);
        local.set_section("s1", true, 3, now);
        let mut remote = DayProgress::new(day(1), now);
        remote.set_section("s2", true, 3, now);

        let merged = resolve(&local, &remote, ConflictStrategy::Merge);
        assert_eq!(merged.completed_sections(), ["s1", "s2"]);
    }

    #[test]
    fn merge_prefers_local_quiz_scores_on_collision() {
        let now = fixed_now();
        let mut local = DayProgress::new(day(1), now);
        local.record_quiz_score("q1", score(60), now);
        let mut remote = DayProgress::new(day(1), now);
        remote.record_quiz_score("q1", score(100), now);
        remote.record_quiz_score("q2", score(80), now);

        let merged = resolve(&local, &remote, ConflictStrategy::Merge);
        assert_eq!(merged.quiz_scores()["q1"].value(), 60);
        assert_eq!(merged.quiz_scores()["q2"].value(), 80);
        assert_eq!(merged.quiz_scores().len(), 2);
    }

    #[test]
    fn merge_is_deterministic() {
        let now = fixed_now();
        let mut local = DayProgress::new(day(2), now);
        local.set_section("a", true, 4, now);
        local.record_quiz_score("q", score(40), now);
        let mut remote = DayProgress::new(day(2), now + Duration::minutes(1));
        remote.set_section("b", true, 4, now + Duration::minutes(1));

        let first = resolve(&local, &remote, ConflictStrategy::Merge);
        let second = resolve(&local, &remote, ConflictStrategy::Merge);
        assert_eq!(first, second);
    }

    #[test]
    fn merge_takes_more_recent_slide_bookmark() {
        let now = fixed_now();
        let later = now + Duration::minutes(5);

        let mut local = DayProgress::new(day(1), now);
        local.set_current_slide(3, now);
        let mut remote = DayProgress::new(day(1), later);
        remote.set_current_slide(7, later);

        let merged = resolve(&local, &remote, ConflictStrategy::Merge);
        assert_eq!(merged.current_slide(), 7);
        assert_eq!(merged.last_accessed(), later);

        // Tie goes to local.
        let mut remote_tied = DayProgress::new(day(1), now);
        remote_tied.set_current_slide(9, now);
        let merged = resolve(&local, &remote_tied, ConflictStrategy::Merge);
        assert_eq!(merged.current_slide(), 3);
    }

    #[test]
    fn merge_completion_is_sticky() {
        let now = fixed_now();
        let mut local = DayProgress::new(day(1), now);
        local.set_section("s1", true, 1, now);
        assert!(local.is_completed());

        let remote = DayProgress::new(day(1), now + Duration::hours(1));

        let merged = resolve(&local, &remote, ConflictStrategy::Merge);
        assert!(merged.is_completed());
        assert_eq!(merged.completed_at(), Some(now));

        // Symmetric: remote completed, local not.
        let merged = resolve(&remote, &local, ConflictStrategy::Merge);
        assert!(merged.is_completed());
        assert_eq!(merged.completed_at(), Some(now));
    }

    #[test]
    fn remote_wins_returns_remote_unchanged() {
        let now = fixed_now();
        let mut local = DayProgress::new(day(3), now);
        local.set_section("s1", true, 2, now);
        let mut remote = DayProgress::new(day(3), now);
        remote.set_section("s2", true, 2, now);

        let resolved = resolve(&local, &remote, ConflictStrategy::RemoteWins);
        assert_eq!(resolved, remote);
    }

    #[test]
    fn local_wins_keeps_local_fields() {
        let now = fixed_now();
        let mut local = DayProgress::new(day(3), now);
        local.set_section("s1", true, 2, now);
        local.set_current_slide(4, now);
        let mut remote = DayProgress::new(day(3), now);
        remote.set_section("s2", true, 2, now);
        remote.set_current_slide(9, now);

        let resolved = resolve(&local, &remote, ConflictStrategy::LocalWins);
        assert_eq!(resolved.completed_sections(), ["s1"]);
        assert_eq!(resolved.current_slide(), 4);
    }

    #[test]
    fn local_wins_falls_back_to_remote_completion_time() {
        let now = fixed_now();
        let mut local = DayProgress::new(day(1), now);
        local.set_section("s1", true, 1, now);
        // Strip local completion time by rebuilding below 100%.
        local.set_section("s1", false, 1, now);
        local.set_section("s1", true, 2, now);

        let mut remote = DayProgress::new(day(1), now);
        remote.set_section("s1", true, 1, now);
        assert!(remote.completed_at().is_some());

        let resolved = resolve(&local, &remote, ConflictStrategy::LocalWins);
        assert_eq!(resolved.completed_at(), remote.completed_at());
    }
}
