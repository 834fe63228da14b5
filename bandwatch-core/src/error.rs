use bandwatch_model::MeasurementId;
use thiserror::Error;

/// Persistence failures surfaced by [`crate::database::MeasurementRepository`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored measurement is corrupt: {0}")]
    Corrupt(String),

    #[error("another measurement is already pending or running")]
    ActiveConflict,
}

impl From<bandwatch_model::ModelError> for StorageError {
    fn from(err: bandwatch_model::ModelError) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

/// Errors returned synchronously by the orchestrator's public API. Failures
/// inside the background run are persisted on the record instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("a measurement is already running ({current})")]
    AlreadyRunning { current: String },

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl OrchestratorError {
    pub fn already_running(current: Option<MeasurementId>) -> Self {
        OrchestratorError::AlreadyRunning {
            current: current
                .map(|id| id.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, OrchestratorError::AlreadyRunning { .. })
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type Result<T> = std::result::Result<T, OrchestratorError>;
