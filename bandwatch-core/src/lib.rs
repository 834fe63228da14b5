//! Measurement orchestration core for bandwatch.
//!
//! When routine speed tests fall below the contracted rate, bandwatch runs
//! the heavier official measurement on breitbandmessung.de through a remote
//! browser and keeps the evidence. This crate holds everything between the
//! trigger and the finished archive:
//!
//! - [`measurement::MeasurementOrchestrator`] runs at most one measurement at
//!   a time under a hard deadline and recovers records left behind by a crash.
//! - [`measurement::MeasurementDriver`] walks the site's fixed protocol
//!   through an [`automation::BrowserSession`].
//! - [`extract`] turns the site's CSV export into numbers.
//! - [`archive`] packages screenshots, export and page snapshot into a zip.
//! - [`database`] persists the measurement lifecycle.

pub mod archive;
pub mod artifacts;
pub mod automation;
pub mod database;
pub mod error;
pub mod extract;
pub mod measurement;
pub mod threshold;

pub use error::{OrchestratorError, StorageError};

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
