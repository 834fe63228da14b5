use std::{fmt, str::FromStr};

use uuid::Uuid;

use crate::error::ModelError;

/// Strongly typed identifier for official measurement attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MeasurementId(pub Uuid);

impl Default for MeasurementId {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementId {
    /// Time-ordered so that ids sort by creation.
    pub fn new() -> Self {
        MeasurementId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl AsRef<Uuid> for MeasurementId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for MeasurementId {
    fn from(value: Uuid) -> Self {
        MeasurementId(value)
    }
}

impl fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MeasurementId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(MeasurementId)
            .map_err(|_| ModelError::InvalidId(s.to_string()))
    }
}
