use thiserror::Error;

use crate::model::{DayIdError, ProgressError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    DayId(#[from] DayIdError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
}
