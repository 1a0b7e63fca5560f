//! Runtime options (`[rts]` section of sloth.toml)

use crate::flags::RtsFlag;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default evaluation budget, in nested evaluation frames
pub const DEFAULT_STACK_SIZE: usize = 4 * 1024;

/// Default ceiling for explicit evaluation budgets
pub const DEFAULT_MAX_STACK_SIZE: usize = 16 * 1024;

/// Default cap on managed threads running at once
pub const DEFAULT_MAX_WORKERS: usize = 512;

/// Default native stack reserved for each worker thread (64 MiB)
pub const DEFAULT_WORKER_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Smallest native stack a worker may be given (1 MiB)
pub const MIN_WORKER_STACK_BYTES: usize = 1024 * 1024;

/// Default time shutdown waits for interrupted threads to unwind
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1000;

/// Fully resolved runtime options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct RtsConfig {
    /// Evaluation budget used by `eval`, `eval_io` and extraction (`-k`)
    pub stack_size: usize,

    /// Largest budget an explicit-budget evaluation may request (`-K`)
    pub max_stack_size: usize,

    /// Maximum number of managed threads running at once (`-N`)
    pub max_workers: usize,

    /// Native stack size for each worker thread, in bytes
    pub worker_stack_bytes: usize,

    /// How long shutdown waits for interrupted threads, in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Default for RtsConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            worker_stack_bytes: DEFAULT_WORKER_STACK_BYTES,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

/// Partial options as written in a sloth.toml `[rts]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct RtsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stack_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_stack_bytes: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_ms: Option<u64>,
}

/// Contents of a sloth.toml file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rts: Option<RtsSection>,
}

impl ConfigFile {
    /// Load an options file from disk
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })
    }
}

impl RtsConfig {
    /// Overlay the fields a `[rts]` section sets
    pub fn merge_section(&mut self, section: &RtsSection) {
        if let Some(v) = section.stack_size {
            self.stack_size = v;
        }
        if let Some(v) = section.max_stack_size {
            self.max_stack_size = v;
        }
        if let Some(v) = section.max_workers {
            self.max_workers = v;
        }
        if let Some(v) = section.worker_stack_bytes {
            self.worker_stack_bytes = v;
        }
        if let Some(v) = section.shutdown_grace_ms {
            self.shutdown_grace_ms = v;
        }
    }

    /// Apply a single RTS flag
    pub fn apply_flag(&mut self, flag: &RtsFlag) {
        match *flag {
            RtsFlag::StackSize(n) => self.stack_size = n,
            RtsFlag::MaxStackSize(n) => self.max_stack_size = n,
            RtsFlag::MaxWorkers(n) => self.max_workers = n,
        }
    }

    /// Budget for an explicit-budget evaluation, clamped to the ceiling
    pub fn clamp_stack_size(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_stack_size)
    }

    /// Check the options are usable together
    pub fn validate(&self) -> ConfigResult<()> {
        if self.stack_size == 0 {
            return Err(invalid("rts.stack_size", "must be greater than zero"));
        }
        if self.max_stack_size < self.stack_size {
            return Err(invalid(
                "rts.max_stack_size",
                format!(
                    "must be at least stack_size ({}), got {}",
                    self.stack_size, self.max_stack_size
                ),
            ));
        }
        if self.max_workers == 0 {
            return Err(invalid("rts.max_workers", "must be greater than zero"));
        }
        if self.worker_stack_bytes < MIN_WORKER_STACK_BYTES {
            return Err(invalid(
                "rts.worker_stack_bytes",
                format!(
                    "must be at least {} bytes, got {}",
                    MIN_WORKER_STACK_BYTES, self.worker_stack_bytes
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RtsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_rts_section() {
        let toml = r#"
[rts]
stack_size = 128
max_workers = 4
"#;

        let file: ConfigFile = toml::from_str(toml).unwrap();
        let section = file.rts.unwrap();
        assert_eq!(section.stack_size, Some(128));
        assert_eq!(section.max_workers, Some(4));
        assert_eq!(section.max_stack_size, None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[rts]
heap_size = 10
"#;
        assert!(toml::from_str::<ConfigFile>(toml).is_err());
    }

    #[test]
    fn test_merge_section_overrides_only_set_fields() {
        let mut config = RtsConfig::default();
        config.merge_section(&RtsSection {
            max_stack_size: Some(20_000),
            ..Default::default()
        });

        assert_eq!(config.max_stack_size, 20_000);
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn test_zero_stack_is_invalid() {
        let config = RtsConfig {
            stack_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_below_default_is_invalid() {
        let config = RtsConfig {
            stack_size: 100,
            max_stack_size: 50,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rts.max_stack_size"));
    }

    #[test]
    fn test_clamp_stack_size() {
        let config = RtsConfig::default();
        assert_eq!(config.clamp_stack_size(10), 10);
        assert_eq!(config.clamp_stack_size(0), 1);
        assert_eq!(
            config.clamp_stack_size(usize::MAX),
            DEFAULT_MAX_STACK_SIZE
        );
    }
}
