use thiserror::Error;

/// Errors produced by model parsing and validation routines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown trigger reason '{0}'")]
    UnknownTriggerReason(String),

    #[error("unknown measurement status '{0}'")]
    UnknownStatus(String),

    #[error("invalid measurement id '{0}'")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
