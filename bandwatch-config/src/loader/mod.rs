pub mod error;

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use bandwatch_core::{
    automation::Geolocation, measurement::DEFAULT_TARGET_URL, threshold::ThresholdPolicy,
};
use once_cell::sync::Lazy;
use tracing::debug;
use url::Url;

use crate::{
    models::{
        BrowserConfig, Config, ConfigMetadata, DatabaseConfig, ExportsConfig, MeasurementConfig,
        sources::{EnvConfig, FileConfig},
    },
    util::{parse_bool, parse_duration},
    validation::{self, ConfigWarnings},
};
use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("bandwatch.toml"),
        PathBuf::from("config/bandwatch.toml"),
    ]
});

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_EXPORTS_DIR: &str = "exports";
pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_COMPLETION_WAIT: Duration = Duration::from_secs(4 * 60);
/// Berlin, used when no position is configured.
pub const DEFAULT_GEOLOCATION: Geolocation = Geolocation {
    latitude: 52.52,
    longitude: 13.405,
    accuracy: 100.0,
};
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Skip creating the export directories.
    pub skip_directories: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Same as [`ConfigLoader::load`] with an explicit environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = compose_config(
            file_config,
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )?;

        if !self.options.skip_directories {
            create_directories(&config.exports)?;
        }

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => (path.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "loaded configuration file");

        Ok((Some(file_config), Some(path)))
    }
}

fn parse_env<T: FromStr>(key: &'static str, raw: Option<&String>) -> Result<Option<T>, ConfigLoadError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value
            .trim()
            .parse::<T>()
            .map_err(|err| ConfigLoadError::InvalidValue {
                key,
                value: value.clone(),
                reason: err.to_string(),
            })
    })
    .transpose()
}

fn env_bool(key: &'static str, raw: Option<&String>) -> Result<Option<bool>, ConfigLoadError> {
    raw.map(|value| {
        parse_bool(value).ok_or_else(|| ConfigLoadError::InvalidValue {
            key,
            value: value.clone(),
            reason: "expected true/false".to_string(),
        })
    })
    .transpose()
}

/// Env value first, then the file value, then `default`.
fn duration_setting(
    key: &'static str,
    env: Option<&String>,
    file: Option<&String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match env.or(file) {
        Some(raw) => parse_duration(raw).map_err(|reason| ConfigLoadError::InvalidValue {
            key,
            value: raw.clone(),
            reason,
        }),
        None => Ok(default),
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();
    if metadata.config_path.is_none() {
        warnings.push_with_hint(
            "No bandwatch.toml detected; using environment variables and defaults",
            "Create bandwatch.toml or set BANDWATCH_CONFIG",
        );
    }

    let FileConfig {
        database: file_database,
        exports: file_exports,
        browser: file_browser,
        measurement: file_measurement,
        threshold: file_threshold,
    } = file_config.unwrap_or_default();

    let database = DatabaseConfig {
        url: env.database_url.clone().or(file_database.url),
    };

    // Resolved against the working directory once, so the browser's download
    // preference and the archive paths stored in records never depend on cwd.
    let root = absolute(
        env.exports_dir
            .clone()
            .or(file_exports.root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORTS_DIR)),
    )?;
    let layout = ExportsConfig::under(&root);
    let exports = ExportsConfig {
        screenshots: absolute(
            env.screenshots_dir
                .clone()
                .or(file_exports.screenshots)
                .unwrap_or(layout.screenshots),
        )?,
        data: absolute(env.data_dir.clone().or(file_exports.data).unwrap_or(layout.data))?,
        archives: absolute(
            env.zips_dir
                .clone()
                .or(file_exports.archives)
                .unwrap_or(layout.archives),
        )?,
        root,
    };

    let webdriver_raw = env
        .webdriver_url
        .clone()
        .or(file_browser.webdriver_url)
        .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string());
    let webdriver_url = Url::parse(&webdriver_raw)
        .map_err(|source| ConfigLoadError::InvalidWebDriverUrl { source })?;

    let file_geo = file_browser.geolocation;
    let geolocation = Geolocation {
        latitude: parse_env("GEO_LATITUDE", env.geo_latitude.as_ref())?
            .or(file_geo.latitude)
            .unwrap_or(DEFAULT_GEOLOCATION.latitude),
        longitude: parse_env("GEO_LONGITUDE", env.geo_longitude.as_ref())?
            .or(file_geo.longitude)
            .unwrap_or(DEFAULT_GEOLOCATION.longitude),
        accuracy: parse_env("GEO_ACCURACY", env.geo_accuracy.as_ref())?
            .or(file_geo.accuracy)
            .unwrap_or(DEFAULT_GEOLOCATION.accuracy),
    };

    let browser = BrowserConfig {
        webdriver_url,
        headless: env_bool("BROWSER_HEADLESS", env.headless.as_ref())?
            .or(file_browser.headless)
            .unwrap_or(true),
        locale: env
            .locale
            .clone()
            .or(file_browser.locale)
            .unwrap_or_else(|| "de-DE".to_string()),
        user_agent: env
            .user_agent
            .clone()
            .or(file_browser.user_agent)
            .or_else(|| Some(DEFAULT_USER_AGENT.to_string())),
        geolocation,
    };

    let defaults = ThresholdPolicy::default();
    let threshold = ThresholdPolicy {
        contracted_download_mbps: parse_env(
            "CONTRACTED_DOWNLOAD_MBPS",
            env.contracted_download_mbps.as_ref(),
        )?
        .or(file_threshold.contracted_download_mbps)
        .unwrap_or(defaults.contracted_download_mbps),
        contracted_upload_mbps: parse_env(
            "CONTRACTED_UPLOAD_MBPS",
            env.contracted_upload_mbps.as_ref(),
        )?
        .or(file_threshold.contracted_upload_mbps)
        .unwrap_or(defaults.contracted_upload_mbps),
        normal_threshold_pct: parse_env("THRESHOLD_NORMAL_PCT", env.normal_threshold_pct.as_ref())?
            .or(file_threshold.normal_threshold_pct)
            .unwrap_or(defaults.normal_threshold_pct),
        critical_threshold_pct: parse_env(
            "THRESHOLD_CRITICAL_PCT",
            env.critical_threshold_pct.as_ref(),
        )?
        .or(file_threshold.critical_threshold_pct)
        .unwrap_or(defaults.critical_threshold_pct),
    };

    let measurement = MeasurementConfig {
        target_url: env
            .target_url
            .clone()
            .or(file_measurement.target_url)
            .unwrap_or_else(|| DEFAULT_TARGET_URL.to_string()),
        stuck_timeout: duration_setting(
            "MEASUREMENT_STUCK_TIMEOUT",
            env.stuck_timeout.as_ref(),
            file_measurement.stuck_timeout.as_ref(),
            DEFAULT_STUCK_TIMEOUT,
        )?,
        run_timeout: duration_setting(
            "MEASUREMENT_RUN_TIMEOUT",
            env.run_timeout.as_ref(),
            file_measurement.run_timeout.as_ref(),
            DEFAULT_RUN_TIMEOUT,
        )?,
        completion_wait: duration_setting(
            "MEASUREMENT_COMPLETION_WAIT",
            env.completion_wait.as_ref(),
            file_measurement.completion_wait.as_ref(),
            DEFAULT_COMPLETION_WAIT,
        )?,
        threshold,
    };

    let config = Config {
        database,
        exports,
        browser,
        measurement,
        metadata,
    };
    warnings.extend(validation::apply_guard_rails(&config));

    Ok((config, warnings))
}

fn create_directories(exports: &ExportsConfig) -> Result<(), ConfigLoadError> {
    for dir in [&exports.screenshots, &exports.data, &exports.archives] {
        ensure_dir(dir)?;
    }
    Ok(())
}

fn absolute(path: PathBuf) -> Result<PathBuf, ConfigLoadError> {
    std::path::absolute(&path).map_err(|source| ConfigLoadError::Filesystem { path, source })
}

fn ensure_dir(path: &Path) -> Result<(), ConfigLoadError> {
    fs::create_dir_all(path).map_err(|source| ConfigLoadError::Filesystem {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> EnvConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EnvConfig::from_lookup(|key| map.get(key).cloned())
    }

    fn loader_for(path: &Path) -> ConfigLoader {
        ConfigLoader::with_options(ConfigLoaderOptions {
            config_path: Some(path.to_path_buf()),
            skip_directories: true,
            ..ConfigLoaderOptions::default()
        })
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let (config, warnings) =
            compose_config(None, EnvConfig::default(), ConfigMetadata::default()).unwrap();

        assert_eq!(config.measurement.stuck_timeout, Duration::from_secs(600));
        assert_eq!(config.measurement.run_timeout, Duration::from_secs(600));
        assert_eq!(config.measurement.completion_wait, Duration::from_secs(240));
        assert_eq!(config.measurement.target_url, DEFAULT_TARGET_URL);
        assert_eq!(config.browser.geolocation, DEFAULT_GEOLOCATION);
        assert!(config.browser.headless);
        for dir in [
            &config.exports.root,
            &config.exports.screenshots,
            &config.exports.data,
            &config.exports.archives,
        ] {
            assert!(dir.is_absolute(), "{} is relative", dir.display());
        }
        assert!(config.exports.archives.ends_with("exports/zips"));
        assert!(config.exports.data.ends_with("exports/data"));
        assert_eq!(config.measurement.threshold.normal_threshold_pct, 90.0);
        assert!(
            warnings
                .items
                .iter()
                .any(|warning| warning.message.contains("No bandwatch.toml"))
        );
    }

    #[test]
    fn relative_export_overrides_resolve_against_cwd() {
        let env = env_of(&[("EXPORTS_DIR", "var/bandwatch"), ("DATA_DIR", "downloads")]);
        let (config, _) = compose_config(None, env, ConfigMetadata::default()).unwrap();
        let cwd = std::env::current_dir().unwrap();

        assert_eq!(config.exports.root, cwd.join("var/bandwatch"));
        assert_eq!(config.exports.data, cwd.join("downloads"));
        assert_eq!(config.exports.archives, cwd.join("var/bandwatch/zips"));

        let settings = config.orchestrator_settings();
        assert!(settings.launch.download_dir.is_absolute());
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bandwatch.toml");
        fs::write(
            &path,
            r#"
[database]
url = "postgres://file/bandwatch"

[exports]
root = "/srv/bandwatch"

[browser]
headless = false
webdriver_url = "http://grid:4444/wd/hub"

[browser.geolocation]
latitude = 48.137
longitude = 11.575

[measurement]
run_timeout = "12m"
completion_wait = "5m"

[threshold]
contracted_download_mbps = 250.0
contracted_upload_mbps = 40.0
"#,
        )
        .unwrap();

        let env = env_of(&[
            ("DATABASE_URL", "postgres://env/bandwatch"),
            ("BROWSER_HEADLESS", "yes"),
            ("MEASUREMENT_STUCK_TIMEOUT", "15m"),
            ("ZIPS_DIR", "/archive"),
        ]);
        let ConfigLoad { config, warnings } = loader_for(&path).load_with_env(env, false).unwrap();

        assert_eq!(config.database.url.as_deref(), Some("postgres://env/bandwatch"));
        assert!(config.browser.headless);
        assert_eq!(config.browser.webdriver_url.as_str(), "http://grid:4444/wd/hub");
        assert_eq!(config.browser.geolocation.latitude, 48.137);
        assert_eq!(config.browser.geolocation.accuracy, 100.0);
        assert_eq!(config.exports.data, PathBuf::from("/srv/bandwatch/data"));
        assert_eq!(config.exports.archives, PathBuf::from("/archive"));
        assert_eq!(config.measurement.stuck_timeout, Duration::from_secs(900));
        assert_eq!(config.measurement.run_timeout, Duration::from_secs(720));
        assert_eq!(config.measurement.threshold.contracted_download_mbps, 250.0);
        assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));
        assert!(warnings.is_empty(), "{:?}", warnings.items);
    }

    #[test]
    fn guard_rails_flag_inverted_timeouts() {
        let env = env_of(&[
            ("MEASUREMENT_RUN_TIMEOUT", "2m"),
            ("MEASUREMENT_STUCK_TIMEOUT", "1m"),
        ]);
        let (_, warnings) = compose_config(None, env, ConfigMetadata::default()).unwrap();
        let messages: Vec<&str> = warnings
            .items
            .iter()
            .map(|warning| warning.message.as_str())
            .collect();

        assert!(messages.iter().any(|m| m.starts_with("run timeout (2m)")));
        assert!(messages.iter().any(|m| m.starts_with("stuck timeout (1m)")));
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = compose_config(
            None,
            env_of(&[("MEASUREMENT_RUN_TIMEOUT", "whenever")]),
            ConfigMetadata::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidValue {
                key: "MEASUREMENT_RUN_TIMEOUT",
                ..
            }
        ));

        let err = compose_config(
            None,
            env_of(&[("GEO_LATITUDE", "north")]),
            ConfigMetadata::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("GEO_LATITUDE"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = loader_for(&missing)
            .load_with_env(EnvConfig::default(), false)
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn directories_are_created_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("exports");
        let env = env_of(&[("EXPORTS_DIR", root.to_str().unwrap())]);
        let ConfigLoad { config, .. } = ConfigLoader::new().load_with_env(env, false).unwrap();
        assert!(config.exports.screenshots.is_dir());
        assert!(config.exports.data.is_dir());
        assert!(config.exports.archives.is_dir());
    }

    #[test]
    fn settings_follow_config() {
        let env = env_of(&[
            ("MEASUREMENT_RUN_TIMEOUT", "7m"),
            ("MEASUREMENT_COMPLETION_WAIT", "3m"),
            ("BROWSER_HEADLESS", "false"),
        ]);
        let (config, _) = compose_config(None, env, ConfigMetadata::default()).unwrap();
        let settings = config.orchestrator_settings();

        assert_eq!(settings.run_timeout, Duration::from_secs(420));
        assert_eq!(settings.driver.timings.completion_wait, Duration::from_secs(180));
        assert!(!settings.launch.headless);
        assert_eq!(settings.launch.download_dir, config.exports.data);
        assert_eq!(settings.launch.geolocation, Some(DEFAULT_GEOLOCATION));
    }
}
