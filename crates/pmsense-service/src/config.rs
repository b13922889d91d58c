//! Service configuration.

use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::UtcOffset;

use pmsense_core::SamplerConfig;
use pmsense_core::sampler::MIN_SAMPLE_PERIOD;
use pmsense_types::ScalingPolicy;

/// Port value meaning "scan discovered ports".
pub const AUTO_PORT: &str = "auto";

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sensor and sampling settings.
    pub sensor: SensorConfig,
    /// Log file settings.
    pub logging: LoggingConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use pmsense_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.sensor.validate());
        errors.extend(self.logging.validate());
        errors.extend(self.server.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Sensor and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial port, or `"auto"` (or absent) to scan.
    pub port: Option<String>,
    /// Seconds between samples.
    pub sample_period_secs: f64,
    /// Register values above this are rescaled.
    pub scaling_threshold: f64,
    /// Divisor applied when rescaling.
    pub scaling_divisor: f64,
    /// Whether rescaling is applied at all.
    pub scaling_enabled: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        let scaling = ScalingPolicy::default();
        Self {
            port: None,
            sample_period_secs: 5.0,
            scaling_threshold: scaling.threshold,
            scaling_divisor: scaling.divisor,
            scaling_enabled: scaling.enabled,
        }
    }
}

impl SensorConfig {
    /// The configured port, with `"auto"` and blank values mapped to `None`.
    pub fn target_port(&self) -> Option<String> {
        normalize_port(self.port.as_deref())
    }

    /// Scaling policy for modern driver values.
    pub fn scaling(&self) -> ScalingPolicy {
        ScalingPolicy {
            threshold: self.scaling_threshold,
            divisor: self.scaling_divisor,
            enabled: self.scaling_enabled,
        }
    }

    /// Sampler configuration for these settings.
    pub fn sampler_config(&self, utc_offset: UtcOffset) -> SamplerConfig {
        let defaults = SamplerConfig::default();
        let period = Duration::try_from_secs_f64(self.sample_period_secs)
            .unwrap_or(defaults.sample_period);
        let mut config = defaults
            .sample_period(period)
            .scaling(self.scaling())
            .utc_offset(utc_offset);
        config.port = self.target_port();
        config
    }

    /// Validate sensor configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.sample_period_secs.is_finite()
            || self.sample_period_secs < MIN_SAMPLE_PERIOD.as_secs_f64()
        {
            errors.push(ValidationError {
                field: "sensor.sample_period_secs".to_string(),
                message: format!(
                    "sample period {} is too short (minimum {} seconds)",
                    self.sample_period_secs,
                    MIN_SAMPLE_PERIOD.as_secs_f64()
                ),
            });
        }

        if let Some(port) = &self.port
            && port.trim().is_empty()
        {
            errors.push(ValidationError {
                field: "sensor.port".to_string(),
                message: "port cannot be empty (use \"auto\" or omit instead)".to_string(),
            });
        }

        if let Err(e) = self.scaling().validate() {
            errors.push(ValidationError {
                field: "sensor.scaling".to_string(),
                message: e.to_string(),
            });
        }

        errors
    }
}

/// Map `"auto"` (any case) and blank values to `None`.
pub fn normalize_port(port: Option<&str>) -> Option<String> {
    port.map(str::trim)
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case(AUTO_PORT))
        .map(str::to_string)
}

/// Log file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily CSV files and `connection.log`.
    pub directory: PathBuf,
    /// CSV file name prefix.
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: pmsense_store::default_log_dir(),
            file_prefix: pmsense_store::DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.directory.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "logging.directory".to_string(),
                message: "log directory cannot be empty".to_string(),
            });
        }

        if self.file_prefix.is_empty() {
            errors.push(ValidationError {
                field: "logging.file_prefix".to_string(),
                message: "file prefix cannot be empty".to_string(),
            });
        } else if self
            .file_prefix
            .chars()
            .any(|c| std::path::is_separator(c) || c.is_control())
        {
            errors.push(ValidationError {
                field: "logging.file_prefix".to_string(),
                message: format!(
                    "file prefix '{}' must not contain path separators",
                    self.file_prefix
                ),
            });
        }

        errors
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Whether to serve the HTTP API.
    pub enabled: bool,
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// The bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.bind.trim().parse()
    }

    /// Validate server configuration. Skipped when the server is disabled.
    pub fn validate(&self) -> Vec<ValidationError> {
        if !self.enabled {
            return Vec::new();
        }
        let message = match self.bind_addr() {
            Ok(addr) if addr.port() == 0 => "port 0 is not allowed".to_string(),
            Ok(_) => return Vec::new(),
            Err(_) if self.bind.trim().is_empty() => "bind address cannot be empty".to_string(),
            Err(e) => format!("'{}' is not an IP:port address ({})", self.bind, e),
        };
        vec![ValidationError {
            field: "server.bind".to_string(),
            message,
        }]
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Cannot encode configuration: {0}")]
    Serialize(toml::ser::Error),
    #[error("Cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// One rejected field.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind`).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  {} - {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pmsense")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert!(config.server.enabled);
        assert_eq!(config.sensor.port, None);
        assert_eq!(config.sensor.sample_period_secs, 5.0);
        assert_eq!(config.logging.file_prefix, "sps30");
        assert_eq!(config.logging.directory, pmsense_store::default_log_dir());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [sensor]
            port = "COM5"
            sample_period_secs = 2.5
            scaling_enabled = false

            [logging]
            directory = "/var/log/pm"
            file_prefix = "office"

            [server]
            enabled = false
            bind = "0.0.0.0:9090"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.sensor.target_port().as_deref(), Some("COM5"));
        assert_eq!(config.sensor.sample_period_secs, 2.5);
        assert!(!config.sensor.scaling().enabled);
        assert_eq!(config.sensor.scaling_divisor, 100_000.0);
        assert_eq!(config.logging.directory, PathBuf::from("/var/log/pm"));
        assert_eq!(config.logging.file_prefix, "office");
        assert!(!config.server.enabled);
        assert_eq!(config.server.bind, "0.0.0.0:9090");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[sensor]\nport = \"auto\"\n").unwrap();
        assert_eq!(config.sensor.target_port(), None);
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_normalize_port() {
        assert_eq!(normalize_port(None), None);
        assert_eq!(normalize_port(Some("AUTO")), None);
        assert_eq!(normalize_port(Some("  ")), None);
        assert_eq!(normalize_port(Some(" COM3 ")).as_deref(), Some("COM3"));
    }

    #[test]
    fn test_sampler_config_mapping() {
        let sensor = SensorConfig {
            port: Some("/dev/ttyUSB0".to_string()),
            sample_period_secs: 2.0,
            scaling_threshold: 500.0,
            ..SensorConfig::default()
        };
        let offset = UtcOffset::from_hms(2, 0, 0).unwrap();
        let config = sensor.sampler_config(offset);
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.sample_period, Duration::from_secs(2));
        assert_eq!(config.scaling.threshold, 500.0);
        assert_eq!(config.utc_offset, offset);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.sensor.port = Some("COM7".to_string());
        config.logging.directory = PathBuf::from("/tmp/pm-logs");
        config.server.bind = "0.0.0.0:9000".to_string();

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.sensor.port.as_deref(), Some("COM7"));
        assert_eq!(loaded.logging.directory, PathBuf::from("/tmp/pm-logs"));
        assert_eq!(loaded.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[sensor\nport = ").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_sensor_validation() {
        let sensor = SensorConfig {
            sample_period_secs: 0.1,
            port: Some(String::new()),
            scaling_divisor: 0.0,
            ..SensorConfig::default()
        };
        let errors = sensor.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "sensor.sample_period_secs"));
        assert!(errors.iter().any(|e| e.field == "sensor.port"));
        assert!(errors.iter().any(|e| e.field == "sensor.scaling"));

        let sensor = SensorConfig {
            sample_period_secs: f64::NAN,
            ..SensorConfig::default()
        };
        assert_eq!(sensor.validate().len(), 1);
    }

    #[test]
    fn test_logging_validation() {
        let logging = LoggingConfig {
            directory: PathBuf::new(),
            file_prefix: "a/b".to_string(),
        };
        let errors = logging.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_server_bind_validation() {
        let cases = [
            ("127.0.0.1:8080", true),
            ("[::1]:8080", true),
            ("localhost:8080", false),
            ("localhost", false),
            ("127.0.0.1:0", false),
            ("127.0.0.1:http", false),
            ("", false),
        ];
        for (bind, ok) in cases {
            let server = ServerConfig {
                enabled: true,
                bind: bind.to_string(),
            };
            assert_eq!(server.validate().is_empty(), ok, "bind {bind:?}");
        }

        let disabled = ServerConfig {
            enabled: false,
            bind: "nope".to_string(),
        };
        assert!(disabled.validate().is_empty());
    }

    #[test]
    fn test_config_validation_error_display() {
        let mut config = Config::default();
        config.server.bind = "nope".to_string();
        config.sensor.sample_period_secs = 0.0;
        let err = config.validate().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Invalid configuration"));
        assert!(text.contains("server.bind"));
        assert!(text.contains("sensor.sample_period_secs"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("pmsense/config.toml"));
    }
}
