//! Core data model definitions shared across bandwatch crates.
//!
//! Everything here is plain data: identifiers, the persisted
//! [`MeasurementRecord`], and the small enums that describe why a
//! measurement ran and where it is in its lifecycle.

pub use ::chrono;

pub mod error;
pub mod ids;
pub mod measurement;
pub mod threshold;

pub use error::{ModelError, Result as ModelResult};
pub use ids::MeasurementId;
pub use measurement::{
    ExtractedResult, MeasurementRecord, MeasurementStatus, PageMetadata,
    TriggerReason,
};
pub use threshold::ThresholdStatus;
