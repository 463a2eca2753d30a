use chrono::{DateTime, Utc};

use super::ids::DayId;

/// UI session state persisted alongside progress records.
///
/// Secondary data: migration and storage treat missing or malformed fields
/// leniently and fall back to defaults rather than failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub current_day: Option<DayId>,
    pub last_route: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    #[must_use]
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            current_day: None,
            last_route: None,
            updated_at: now,
        }
    }
}
