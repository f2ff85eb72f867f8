//! Configuration management for clientgate.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};
use crate::ratelimit::{LimiterConfig, LimiterConfigBuilder};

/// Prefix for environment variable overrides, e.g.
/// `CLIENTGATE_LIMITER__ALLOWED_PER_WINDOW=10`.
pub const ENV_PREFIX: &str = "CLIENTGATE";

/// Main configuration for clientgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiter settings as they appear in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Requests each client may make per window
    #[serde(default = "default_allowed_per_window")]
    pub allowed_per_window: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            allowed_per_window: default_allowed_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_allowed_per_window() -> u64 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl LimiterSettings {
    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Start a limiter configuration builder from these settings.
    pub fn to_builder(&self) -> LimiterConfigBuilder {
        LimiterConfig::builder()
            .allowed_per_window(self.allowed_per_window)
            .window(self.window())
    }

    /// Validate these settings into a limiter configuration.
    pub fn to_limiter_config(&self) -> Result<LimiterConfig> {
        self.to_builder().build()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter, used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GateConfig {
    /// Load configuration from an optional YAML file, overridden by
    /// `CLIENTGATE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder.add_source(env).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse configuration: {}", e)))
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();

        assert_eq!(config.limiter.allowed_per_window, 60);
        assert_eq!(config.limiter.window(), Duration::from_secs(60));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
limiter:
  allowed_per_window: 3
  window_secs: 10
logging:
  json: true
"#;
        let config = GateConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.limiter.allowed_per_window, 3);
        assert_eq!(config.limiter.window_secs, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.json);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = GateConfig::from_yaml("limiter: [not, a, map]");

        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_settings_are_validated() {
        let settings = LimiterSettings {
            allowed_per_window: 0,
            window_secs: 60,
        };
        assert!(matches!(
            settings.to_limiter_config(),
            Err(GateError::InvalidConfiguration(_))
        ));

        let settings = LimiterSettings {
            allowed_per_window: 5,
            window_secs: 0,
        };
        assert!(matches!(
            settings.to_limiter_config(),
            Err(GateError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_load_file_with_env_override() {
        let (path, mut file) = temp_config_file("clientgate-config-test.yaml");
        writeln!(file, "limiter:\n  allowed_per_window: 3\n  window_secs: 10").unwrap();

        let mut vars = config::Map::new();
        vars.insert(
            "CLIENTGATE_LIMITER__ALLOWED_PER_WINDOW".to_string(),
            "7".to_string(),
        );
        let env = environment().source(Some(vars));

        let config = GateConfig::load_with_env(Some(path.as_path()), env).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limiter.allowed_per_window, 7);
        assert_eq!(config.limiter.window_secs, 10);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let env = environment().source(Some(config::Map::new()));
        let path = Path::new("/nonexistent/clientgate.yaml");
        let result = GateConfig::load_with_env(Some(path), env);

        assert!(matches!(result, Err(GateError::Config(_))));
    }

    fn temp_config_file(name: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
