use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::ids::DayId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("quiz score {0} is out of range 0..=100")]
    ScoreOutOfRange(u8),

    #[error("completion percentage {0} is out of range 0..=100")]
    PercentageOutOfRange(u8),

    #[error("day marked completed without any completed section")]
    CompletedWithoutSections,
}

/// A quiz result as an integer percentage, validated to `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuizScore(u8);

impl QuizScore {
    /// # Errors
    ///
    /// Returns `ProgressError::ScoreOutOfRange` for values above 100.
    pub fn new(percent: u8) -> Result<Self, ProgressError> {
        if percent > 100 {
            return Err(ProgressError::ScoreOutOfRange(percent));
        }
        Ok(Self(percent))
    }

    #[must_use]
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Per-day progress record for one user.
///
/// Completed sections and slides have set semantics (no duplicates) but keep
/// insertion order for the UI. Quiz scores live in an ordered map so that
/// serialization and merging stay deterministic.
///
/// A day counts as completed at 100% of its sections. The reference behavior
/// also displayed "complete" at 80% in the UI; that display rule is a
/// presentation concern and is not modeled here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayProgress {
    day: DayId,
    completed_sections: Vec<String>,
    completed_slides: Vec<String>,
    quiz_scores: BTreeMap<String, QuizScore>,
    current_slide: u32,
    completion_percentage: u8,
    completed_at: Option<DateTime<Utc>>,
    last_accessed: DateTime<Utc>,
}

impl DayProgress {
    /// Creates an empty record for a day, first touched at `now`.
    #[must_use]
    pub fn new(day: DayId, now: DateTime<Utc>) -> Self {
        Self {
            day,
            completed_sections: Vec::new(),
            completed_slides: Vec::new(),
            quiz_scores: BTreeMap::new(),
            current_slide: 0,
            completion_percentage: 0,
            completed_at: None,
            last_accessed: now,
        }
    }

    /// Rehydrates a record from persisted storage.
    ///
    /// Duplicate section/slide entries are collapsed, keeping first
    /// occurrence order.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the percentage is out of range or the
    /// record claims completion with no completed sections.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        day: DayId,
        completed_sections: Vec<String>,
        completed_slides: Vec<String>,
        quiz_scores: BTreeMap<String, QuizScore>,
        current_slide: u32,
        completion_percentage: u8,
        completed_at: Option<DateTime<Utc>>,
        last_accessed: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        if completion_percentage > 100 {
            return Err(ProgressError::PercentageOutOfRange(completion_percentage));
        }
        if completed_at.is_some() && completed_sections.is_empty() {
            return Err(ProgressError::CompletedWithoutSections);
        }

        Ok(Self {
            day,
            completed_sections: dedup_preserving_order(completed_sections),
            completed_slides: dedup_preserving_order(completed_slides),
            quiz_scores,
            current_slide,
            completion_percentage,
            completed_at,
            last_accessed,
        })
    }

    #[must_use]
    pub fn day(&self) -> DayId {
        self.day
    }

    #[must_use]
    pub fn completed_sections(&self) -> &[String] {
        &self.completed_sections
    }

    #[must_use]
    pub fn completed_slides(&self) -> &[String] {
        &self.completed_slides
    }

    #[must_use]
    pub fn quiz_scores(&self) -> &BTreeMap<String, QuizScore> {
        &self.quiz_scores
    }

    #[must_use]
    pub fn current_slide(&self) -> u32 {
        self.current_slide
    }

    #[must_use]
    pub fn completion_percentage(&self) -> u8 {
        self.completion_percentage
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    /// Canonical completion rule: all sections done, and at least one exists.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completion_percentage == 100 && !self.completed_sections.is_empty()
    }

    #[must_use]
    pub fn has_section(&self, section_id: &str) -> bool {
        self.completed_sections.iter().any(|s| s == section_id)
    }

    #[must_use]
    pub fn has_slide(&self, slide_id: &str) -> bool {
        self.completed_slides.iter().any(|s| s == slide_id)
    }

    /// Toggles a section's completion and re-derives the percentage.
    ///
    /// Marking an already-complete section (or unmarking an absent one) is a
    /// no-op apart from the access timestamp.
    pub fn set_section(
        &mut self,
        section_id: &str,
        completed: bool,
        total_sections: u32,
        now: DateTime<Utc>,
    ) {
        if completed {
            if !self.has_section(section_id) {
                self.completed_sections.push(section_id.to_owned());
            }
        } else {
            self.completed_sections.retain(|s| s != section_id);
        }
        self.recompute_completion(total_sections, now);
        self.last_accessed = now;
    }

    /// Marks a slide as viewed.
    pub fn mark_slide(&mut self, slide_id: &str, now: DateTime<Utc>) {
        if !self.has_slide(slide_id) {
            self.completed_slides.push(slide_id.to_owned());
        }
        self.last_accessed = now;
    }

    /// Records a quiz score, overwriting any previous attempt.
    pub fn record_quiz_score(&mut self, quiz_id: &str, score: QuizScore, now: DateTime<Utc>) {
        self.quiz_scores.insert(quiz_id.to_owned(), score);
        self.last_accessed = now;
    }

    /// Bookmarks the slide the user is currently on.
    pub fn set_current_slide(&mut self, index: u32, now: DateTime<Utc>) {
        self.current_slide = index;
        self.last_accessed = now;
    }

    /// Re-derives `completion_percentage` from the completed-section count.
    ///
    /// Percentage is `round(100 * completed / total)`, clamped to 100 so
    /// stale section ids from older course revisions cannot overflow it.
    /// Completion time is set on reaching 100% and cleared if the day drops
    /// back below it.
    pub fn recompute_completion(&mut self, total_sections: u32, now: DateTime<Utc>) {
        let completed = u32::try_from(self.completed_sections.len()).unwrap_or(u32::MAX);
        self.completion_percentage = derive_completion_percentage(completed, total_sections);

        if self.is_completed() {
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        } else {
            self.completed_at = None;
        }
    }

    /// Crate-internal constructor for the conflict resolver, which upholds
    /// the invariants itself.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        day: DayId,
        completed_sections: Vec<String>,
        completed_slides: Vec<String>,
        quiz_scores: BTreeMap<String, QuizScore>,
        current_slide: u32,
        completion_percentage: u8,
        completed_at: Option<DateTime<Utc>>,
        last_accessed: DateTime<Utc>,
    ) -> Self {
        Self {
            day,
            completed_sections,
            completed_slides,
            quiz_scores,
            current_slide,
            completion_percentage,
            completed_at,
            last_accessed,
        }
    }
}

/// Percentage of `total` covered by `completed`, rounded to the nearest
/// integer and clamped to 100 so stale section ids from older course
/// revisions cannot overflow it. A zero total is always 0%.
#[must_use]
pub fn derive_completion_percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let rounded = (u64::from(completed) * 100 + u64::from(total) / 2) / u64::from(total);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
