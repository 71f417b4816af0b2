use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ClientError, Result};
use crate::inference::GenerationConfig;
use crate::loader::LoadPolicy;
use crate::model::blob::DEFAULT_MAX_CHUNK_SIZE;
use crate::upload::UploadOptions;

/// Upper bound on `upload.max_retries`
pub const MAX_UPLOAD_RETRIES: u32 = 10;

/// Main configuration for the `sea` client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub quantize: QuantizeConfig,
    pub upload: UploadConfig,
    pub load: LoadConfig,
    pub generation: GenerationConfig,
    pub ledger: LedgerSection,
    pub logging: LoggingConfig,
}

/// Quantization and chunking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizeConfig {
    pub bits: u32,
    pub max_chunk_size: i64,
}

/// Upload pacing and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    pub pacing_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

/// Reconstruction policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub strict: bool,
    pub max_concurrent_fetches: usize,
}

/// Local ledger location and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSection {
    pub dir: String,
    pub max_record_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub log_dir: String,
}

impl ClientConfig {
    /// Get default configuration file path: `~/.sea/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        Ok(sea_home()?.join("config.toml"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: ClientConfig = toml::from_str(&content)?;

        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Generate default configuration
    pub fn default() -> Self {
        ClientConfig {
            quantize: QuantizeConfig {
                bits: 8,
                max_chunk_size: DEFAULT_MAX_CHUNK_SIZE as i64,
            },
            upload: UploadConfig {
                pacing_ms: 500,
                max_retries: 3,
                retry_backoff_ms: 500,
            },
            load: LoadConfig {
                strict: true,
                max_concurrent_fetches: 8,
            },
            generation: GenerationConfig::default(),
            ledger: LedgerSection {
                dir: "~/.sea/ledger".to_string(),
                max_record_size: ledger::DEFAULT_MAX_RECORD_SIZE,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_to_file: false,
                log_dir: "~/.sea/logs".to_string(),
            },
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if !matches!(self.quantize.bits, 8 | 16 | 32) {
            return Err(ClientError::Config("quantize.bits must be 8, 16 or 32".into()));
        }

        if self.quantize.max_chunk_size <= 0 {
            return Err(ClientError::Config("quantize.max_chunk_size must be positive".into()));
        }

        if self.load.max_concurrent_fetches == 0 {
            return Err(ClientError::Config(
                "load.max_concurrent_fetches must be at least 1".into(),
            ));
        }

        if self.ledger.max_record_size <= ledger::layout::chunk::HEADER_LEN {
            return Err(ClientError::Config(format!(
                "ledger.max_record_size must exceed the {}-byte chunk header",
                ledger::layout::chunk::HEADER_LEN
            )));
        }

        if !(1..=MAX_UPLOAD_RETRIES).contains(&self.upload.max_retries) {
            return Err(ClientError::Config(format!(
                "upload.max_retries must be between 1 and {}",
                MAX_UPLOAD_RETRIES
            )));
        }

        self.generation.validate()?;

        // Validate log level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ClientError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        Ok(())
    }

    /// Save configuration to file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(
                    path = %parent.display(),
                    error = %e,
                    "Failed to create config directory"
                );
                e
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string).map_err(|e| {
            tracing::error!(
                path = %temp_path.display(),
                error = %e,
                "Failed to write temp config file"
            );
            e
        })?;

        std::fs::rename(&temp_path, path).map_err(|e| {
            tracing::error!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to rename temp config file"
            );
            e
        })?;

        tracing::info!(path = %path.display(), "Configuration saved successfully");
        Ok(())
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            pacing: Duration::from_millis(self.upload.pacing_ms),
            max_retries: self.upload.max_retries,
            retry_backoff: Duration::from_millis(self.upload.retry_backoff_ms),
            resume: false,
        }
    }

    pub fn load_policy(&self) -> LoadPolicy {
        LoadPolicy {
            strict: self.load.strict,
            max_concurrent_fetches: self.load.max_concurrent_fetches,
        }
    }

    pub fn ledger_dir(&self) -> Result<PathBuf> {
        expand_home(&self.ledger.dir)
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        expand_home(&self.logging.log_dir)
    }
}

/// `~/.sea`
pub fn sea_home() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ClientError::Config("Cannot determine home directory".into()))?;
    Ok(home.join(".sea"))
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ClientError::Config("Cannot determine home directory".into()))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
