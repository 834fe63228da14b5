//! Configuration for bandwatch.
//!
//! Values are resolved from environment variables (after an optional `.env`
//! file), then `bandwatch.toml`, then built-in defaults. The loaded
//! [`Config`] converts straight into the orchestrator's settings.

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{
    BrowserConfig, Config, ConfigMetadata, DatabaseConfig, ExportsConfig, MeasurementConfig,
    sources::{EnvConfig, FileConfig},
};
pub use validation::{ConfigWarning, ConfigWarnings};
