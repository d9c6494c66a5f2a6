//! Testkit configuration.
//!
//! Testkit-wide defaults can be set from a YAML file or from environment
//! variables, so a whole test suite can be tuned (verbose fact logging, a
//! fixed start time) without touching individual tests. Options passed in
//! code always win over configuration.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "testkit.yaml";
/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "ANGZARR_TESTKIT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ANGZARR_TESTKIT";
/// Environment variable holding the tracing filter.
pub const LOG_ENV_VAR: &str = "ANGZARR_TESTKIT_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load testkit configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("failed to parse testkit configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid start_time '{value}': {source}")]
    StartTime {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Testkit-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TestkitConfig {
    /// Real-time interval between ticks when an engine is run, in
    /// milliseconds.
    pub tick_interval_ms: u64,
    /// Virtual-time interval between projection compactions, in seconds.
    pub compaction_interval_secs: u64,
    /// Run projection compaction concurrently with every projection event.
    pub compact_during_handling: bool,
    /// Log every fact of every test action.
    pub verbose: bool,
    /// Virtual time at which tests begin, as RFC 3339. Defaults to the wall
    /// clock.
    pub start_time: Option<String>,
}

impl Default for TestkitConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
            compaction_interval_secs: 3600,
            compact_during_handling: false,
            verbose: false,
            start_time: None,
        }
    }
}

impl TestkitConfig {
    /// Load configuration from files and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `testkit.yaml` in the current directory (if it exists)
    /// 2. The file at `path` (if given)
    /// 3. The file named by `ANGZARR_TESTKIT_CONFIG` (if set)
    /// 4. `ANGZARR_TESTKIT_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// The configured start time, if any.
    pub fn start_time(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        self.start_time
            .as_deref()
            .map(|value| {
                DateTime::parse_from_rfc3339(value)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|source| ConfigError::StartTime {
                        value: value.to_string(),
                        source,
                    })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = TestkitConfig::default();
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.compaction_interval_secs, 3600);
        assert!(!config.compact_during_handling);
        assert!(!config.verbose);
        assert!(config.start_time.is_none());
    }

    #[test]
    fn test_from_yaml_fills_defaults() {
        let config = TestkitConfig::from_yaml("verbose: true\ntick_interval_ms: 10\n").unwrap();
        assert!(config.verbose);
        assert_eq!(config.tick_interval_ms, 10);
        assert_eq!(config.compaction_interval_secs, 3600);
    }

    #[test]
    fn test_start_time() {
        let config = TestkitConfig {
            start_time: Some("2024-01-02T03:04:05Z".to_string()),
            ..TestkitConfig::default()
        };
        let start = config.start_time().unwrap().unwrap();
        assert_eq!(start.to_rfc3339(), "2024-01-02T03:04:05+00:00");

        let config = TestkitConfig {
            start_time: Some("yesterday".to_string()),
            ..TestkitConfig::default()
        };
        assert!(matches!(
            config.start_time(),
            Err(ConfigError::StartTime { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_load_from_path_and_env() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "compact_during_handling: true\ntick_interval_ms: 5").unwrap();

        std::env::set_var("ANGZARR_TESTKIT__TICK_INTERVAL_MS", "7");
        let config = TestkitConfig::load(Some(file.path()));
        std::env::remove_var("ANGZARR_TESTKIT__TICK_INTERVAL_MS");

        let config = config.unwrap();
        assert!(config.compact_during_handling);
        assert_eq!(config.tick_interval_ms, 7);
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_path_fails() {
        let result = TestkitConfig::load(Some(Path::new("/nonexistent/testkit.yaml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
