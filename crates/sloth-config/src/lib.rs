//! Sloth runtime options
//!
//! Collects the options that shape a running sloth runtime:
//! - Built-in defaults
//! - Options file (`./sloth.toml`, or the file named by `SLOTH_RTS_CONFIG`)
//! - RTS flags from the `SLOTH_RTS` environment variable
//! - RTS flags on the command line, between `+RTS` and `-RTS`
//!
//! # Precedence
//!
//! Sources are applied in the order above; later sources override earlier ones.
//!
//! # Example
//!
//! ```no_run
//! use sloth_config::ConfigLoader;
//!
//! let loader = ConfigLoader::new();
//! let (config, prog_args) = loader
//!     .load_with_args(["prog", "+RTS", "-K32k", "-RTS", "input.txt"])
//!     .unwrap();
//! assert_eq!(config.max_stack_size, 32 * 1024);
//! assert_eq!(prog_args, vec!["prog", "input.txt"]);
//! ```

pub mod flags;
pub mod loader;
pub mod rts;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown RTS flag: {0}")]
    UnknownFlag(String),

    #[error("Malformed size '{value}' for RTS flag {flag}")]
    MalformedSize { flag: String, value: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use flags::{parse_flag, parse_flag_string, split_rts_args, RtsArgs, RtsFlag};
pub use loader::{ConfigLoader, CONFIG_FILE_NAME, CONFIG_PATH_ENV, FLAGS_ENV};
pub use rts::{ConfigFile, RtsConfig, RtsSection};
