//! Configuration file management.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use readerlink_core::{EpcChangerConfig, InventorySettings, ManagerConfig, SignalRange};

/// Configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reader session settings.
    pub session: ManagerConfig,
    /// Seed bounds for signal normalization, in dBm.
    pub signal: SignalRange,
    /// Inventory report fields and output power.
    pub inventory: InventorySettings,
    /// EPC change tuning.
    pub epc_changer: EpcChangerConfig,
}

/// Lowest output power accepted in the configuration, in dBm.
pub const MIN_OUTPUT_POWER: i32 = 0;
/// Highest output power accepted in the configuration, in dBm.
pub const MAX_OUTPUT_POWER: i32 = 33;

impl Config {
    /// Load configuration from the default path, or defaults if there is no
    /// file.
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

    /// Load from `path` if given, otherwise from the default location, and
    /// validate the result.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::load_default()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories.
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

    /// Validate every section and collect all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.session.event_capacity == 0 {
            errors.push(ValidationError::new(
                "session.event_capacity",
                "event capacity must be greater than 0",
            ));
        }
        if self.session.command_capacity == 0 {
            errors.push(ValidationError::new(
                "session.command_capacity",
                "command capacity must be greater than 0",
            ));
        }

        if self.signal.minimum > self.signal.maximum {
            errors.push(ValidationError::new(
                "signal.minimum",
                format!(
                    "minimum {} dBm is above maximum {} dBm",
                    self.signal.minimum, self.signal.maximum
                ),
            ));
        }

        if let Some(power) = self.inventory.output_power
            && !(MIN_OUTPUT_POWER..=MAX_OUTPUT_POWER).contains(&power)
        {
            errors.push(ValidationError::new(
                "inventory.output_power",
                format!(
                    "output power {} dBm is outside {}..={} dBm",
                    power, MIN_OUTPUT_POWER, MAX_OUTPUT_POWER
                ),
            ));
        }
        if !self.inventory.include_epc {
            errors.push(ValidationError::new(
                "inventory.include_epc",
                "the EPC is always reported and cannot be disabled",
            ));
        }

        if self.epc_changer.tid_word_count == 0 {
            errors.push(ValidationError::new(
                "epc_changer.tid_word_count",
                "at least one TID word must be read back",
            ));
        }
        if self.epc_changer.minimum_rssi > 0 {
            errors.push(ValidationError::new(
                "epc_changer.minimum_rssi",
                format!("{} dBm is not a plausible signal strength", self.epc_changer.minimum_rssi),
            ));
        }
        if self.epc_changer.discovery_power_ceiling < MIN_OUTPUT_POWER {
            errors.push(ValidationError::new(
                "epc_changer.discovery_power_ceiling",
                "discovery power cannot be negative",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `signal.minimum`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("readerlink")
        .join("config.toml")
}

/// The file `--config` points at, or the default path.
pub fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf).unwrap_or_else(default_config_path)
}
