use std::collections::BTreeMap;

use super::ids::DayId;

/// Number of days in the course.
pub const COURSE_DAY_COUNT: u8 = 5;

/// Section counts per day, needed to derive completion percentages.
///
/// The course content itself is rendered elsewhere; the progress layer only
/// needs to know how many sections each day has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseOutline {
    sections_per_day: BTreeMap<DayId, u32>,
}

impl CourseOutline {
    #[must_use]
    pub fn new(sections_per_day: BTreeMap<DayId, u32>) -> Self {
        Self { sections_per_day }
    }

    /// An outline where every day has the same number of sections.
    ///
    /// # Panics
    ///
    /// Never panics: all generated day ids are within the course range.
    #[must_use]
    pub fn uniform(sections_per_day: u32) -> Self {
        Self {
            sections_per_day: DayId::all().map(|d| (d, sections_per_day)).collect(),
        }
    }

    /// Total sections for the given day, or zero if the day is unknown.
    #[must_use]
    pub fn sections_for(&self, day: DayId) -> u32 {
        self.sections_per_day.get(&day).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_outline_covers_all_days() {
        let outline = CourseOutline::uniform(4);
        for day in DayId::all() {
            assert_eq!(outline.sections_for(day), 4);
        }
    }

    #[test]
    fn unknown_day_has_zero_sections() {
        let outline = CourseOutline::new(BTreeMap::new());
        assert_eq!(outline.sections_for(DayId::new(1).unwrap()), 0);
    }
}
