//! Persistence of measurement records.
//!
//! The orchestrator only talks to [`MeasurementRepository`]; the Postgres
//! adapter backs the real deployment and [`InMemoryMeasurementRepository`]
//! serves tests and throwaway runs.

pub mod memory;
pub mod ports;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::InMemoryMeasurementRepository;
pub use ports::{CompletedMeasurement, MeasurementRepository};
#[cfg(feature = "database")]
pub use postgres::PostgresMeasurementRepository;
