//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `UPD_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `UPD_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `UPD_STORAGE__ROOT=/srv/uploads` sets the `storage.root` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use upd::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Storing uploads in {}", config.storage.root.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Example
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8080
//! storage:
//!   root: /opt/config
//!   create_root: false
//! limits:
//!   max_multipart_memory: 8388608
//!   max_body_size: 33554432
//!   uploads:
//!     max_concurrent_uploads: 4
//!     max_waiting_uploads: 16
//!     max_upload_wait: 30s
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::errors::Error;

/// Default number of bytes an upload may occupy in memory before it is spilled to disk (8 MiB).
pub const DEFAULT_MAX_MULTIPART_MEMORY: u64 = 8 << 20;

/// Default hard cap on the size of a request body (32 MiB).
pub const DEFAULT_MAX_BODY_SIZE: u64 = 32 << 20;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "UPD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Where uploaded files are written
    pub storage: StorageConfig,
    /// Size and concurrency limits applied to uploads
    pub limits: LimitsConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            enable_otel_export: false,
            enable_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory uploads are stored in. Uploaded filenames are confined to this directory.
    pub root: PathBuf,
    /// Create the storage root (and its parents) at startup if it does not exist
    pub create_root: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/opt/config"),
            create_root: false,
        }
    }
}

/// Resource limits for uploads.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Bytes of a single upload held in memory before spilling to a temporary file
    pub max_multipart_memory: u64,
    /// Maximum request body size in bytes. Larger requests get 413. 0 = unlimited.
    pub max_body_size: u64,
    /// Concurrent upload limiting
    pub uploads: UploadLimitsConfig,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_multipart_memory: DEFAULT_MAX_MULTIPART_MEMORY,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            uploads: UploadLimitsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadLimitsConfig {
    /// Maximum uploads processed at once. 0 disables the limiter.
    pub max_concurrent_uploads: usize,
    /// Maximum uploads waiting for a slot. 0 = unlimited waiting.
    pub max_waiting_uploads: usize,
    /// How long an upload waits for a slot before getting 429. Zero rejects immediately.
    #[serde(with = "humantime_serde")]
    pub max_upload_wait: Duration,
}

impl Default for UploadLimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 0,
            max_waiting_uploads: 0,
            max_upload_wait: Duration::from_secs(30),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(Error::Internal {
                operation: "validate config: storage.root cannot be empty".to_string(),
            });
        }

        if self.limits.max_multipart_memory == 0 {
            return Err(Error::Internal {
                operation: "validate config: limits.max_multipart_memory must be positive (default: 8388608 = 8 MiB)".to_string(),
            });
        }

        if self.limits.max_body_size != 0 && self.limits.max_body_size < self.limits.max_multipart_memory {
            return Err(Error::Internal {
                operation: format!(
                    "validate config: limits.max_body_size ({}) cannot be smaller than limits.max_multipart_memory ({})",
                    self.limits.max_body_size, self.limits.max_multipart_memory
                ),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // UPD_CONFIG selects the file itself, it is not a config key
            .merge(Env::prefixed("UPD_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
