use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::day_progress::DayProgress;
use super::ids::DayId;

/// Aggregate statistics across all days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverallProgress {
    pub total_days_completed: u32,
    pub total_quizzes_completed: u32,
    pub last_accessed: DateTime<Utc>,
}

impl OverallProgress {
    #[must_use]
    pub fn zero(now: DateTime<Utc>) -> Self {
        Self {
            total_days_completed: 0,
            total_quizzes_completed: 0,
            last_accessed: now,
        }
    }
}

/// Per-user aggregate over all per-day records.
///
/// The overall stats are always recomputed from `days`, never maintained
/// incrementally, so the aggregate cannot drift from the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProgress {
    pub current_day: Option<DayId>,
    pub days: BTreeMap<DayId, DayProgress>,
    pub overall: OverallProgress,
}

impl UserProgress {
    /// Zero-value aggregate for a user with no stored progress.
    #[must_use]
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            current_day: None,
            days: BTreeMap::new(),
            overall: OverallProgress::zero(now),
        }
    }

    /// Builds the aggregate from per-day records, recomputing overall stats.
    #[must_use]
    pub fn from_days(
        current_day: Option<DayId>,
        days: BTreeMap<DayId, DayProgress>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut progress = Self {
            current_day,
            days,
            overall: OverallProgress::zero(now),
        };
        progress.recompute_overall();
        progress
    }

    /// Re-derives overall stats from the day records.
    pub fn recompute_overall(&mut self) {
        let total_days_completed =
            u32::try_from(self.days.values().filter(|d| d.is_completed()).count())
                .unwrap_or(u32::MAX);
        let total_quizzes_completed =
            u32::try_from(self.days.values().map(|d| d.quiz_scores().len()).sum::<usize>())
                .unwrap_or(u32::MAX);
        if let Some(latest) = self.days.values().map(DayProgress::last_accessed).max() {
            self.overall.last_accessed = latest;
        }
        self.overall.total_days_completed = total_days_completed;
        self.overall.total_quizzes_completed = total_quizzes_completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuizScore;
    use crate::time::fixed_now;

    fn day(n: u8) -> DayId {
        DayId::new(n).unwrap()
    }

    #[test]
    fn empty_aggregate_is_zero_valued() {
        let progress = UserProgress::empty(fixed_now());
        assert_eq!(progress.current_day, None);
        assert!(progress.days.is_empty());
        assert_eq!(progress.overall.total_days_completed, 0);
        assert_eq!(progress.overall.total_quizzes_completed, 0);
    }

    #[test]
    fn overall_counts_completed_days_and_quizzes() {
        let now = fixed_now();
        let mut done = DayProgress::new(day(1), now);
        done.set_section("s1", true, 1, now);
        done.record_quiz_score("q1", QuizScore::new(80).unwrap(), now);

        let mut partial = DayProgress::new(day(2), now);
        partial.set_section("s1", true, 2, now);
        partial.record_quiz_score("q2", QuizScore::new(50).unwrap(), now);
        partial.record_quiz_score("q3", QuizScore::new(70).unwrap(), now);

        let days = BTreeMap::from([(day(1), done), (day(2), partial)]);
        let progress = UserProgress::from_days(Some(day(2)), days, now);

        assert_eq!(progress.overall.total_days_completed, 1);
        assert_eq!(progress.overall.total_quizzes_completed, 3);
        assert_eq!(progress.overall.last_accessed, now);
    }
}
