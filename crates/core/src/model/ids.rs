use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::outline::COURSE_DAY_COUNT;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DayIdError {
    #[error("day {0} is outside the course range 1..={COURSE_DAY_COUNT}")]
    OutOfRange(u8),

    #[error("failed to parse day id from string")]
    Unparseable,
}

/// Identifier for one day of the course (1-based).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DayId(u8);

impl DayId {
    /// Creates a `DayId`, validating it against the course length.
    ///
    /// # Errors
    ///
    /// Returns `DayIdError::OutOfRange` for days outside `1..=COURSE_DAY_COUNT`.
    pub fn new(value: u8) -> Result<Self, DayIdError> {
        if (1..=COURSE_DAY_COUNT).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DayIdError::OutOfRange(value))
        }
    }

    /// Returns the underlying 1-based day number.
    #[must_use]
    pub fn value(&self) -> u8 {
        self.0
    }

    /// All days of the course in order.
    pub fn all() -> impl Iterator<Item = DayId> {
        (1..=COURSE_DAY_COUNT).map(DayId)
    }
}

impl TryFrom<u8> for DayId {
    type Error = DayIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DayId> for u8 {
    fn from(id: DayId) -> Self {
        id.0
    }
}

impl fmt::Debug for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DayId({})", self.0)
    }
}

impl fmt::Display for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DayId {
    type Err = DayIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.parse::<u8>().map_err(|_| DayIdError::Unparseable)?;
        Self::new(raw)
    }
}

/// Stable per-device identifier.
///
/// Attributes the origin of a write during sync; it does not imply ownership
/// of the record.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier for a new device.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
