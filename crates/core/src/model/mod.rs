mod day_progress;
mod ids;
mod outline;
mod session_state;
mod sync;
mod user_progress;

pub use day_progress::{DayProgress, ProgressError, QuizScore, derive_completion_percentage};
pub use ids::{ClientId, DayId, DayIdError};
pub use outline::{COURSE_DAY_COUNT, CourseOutline};
pub use session_state::SessionState;
pub use sync::{ConflictStrategy, StrategyParseError, SyncAction, SyncQueueEntry, SyncableRecord};
pub use user_progress::{OverallProgress, UserProgress};
