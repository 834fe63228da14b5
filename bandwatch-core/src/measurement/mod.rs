//! The official measurement pipeline: driver protocol, run log and the
//! single-flight orchestrator around them.

pub mod config;
pub mod driver;
pub mod orchestrator;
pub mod run_log;

pub use config::{DEFAULT_TARGET_URL, DriverConfig, DriverTimings, OrchestratorSettings, SiteProfile};
pub use driver::{DriverError, DriverOutput, ExportArtifact, MeasurementDriver};
pub use orchestrator::{CANCELLED_MESSAGE, MeasurementOrchestrator, STUCK_MESSAGE};
pub use run_log::{DriverStep, RunLog, StepOutcome, StepRecord};
