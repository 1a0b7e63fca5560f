//! Configuration Loader
//!
//! Resolves runtime options from every source with proper precedence.

use crate::flags::{parse_flag_string, split_rts_args};
use crate::rts::{ConfigFile, RtsConfig};
use crate::ConfigResult;
use std::env;
use std::path::{Path, PathBuf};

/// Options file looked up in the base directory
pub const CONFIG_FILE_NAME: &str = "sloth.toml";

/// Environment variable naming an explicit options file
pub const CONFIG_PATH_ENV: &str = "SLOTH_RTS_CONFIG";

/// Environment variable carrying RTS flags
pub const FLAGS_ENV: &str = "SLOTH_RTS";

/// Configuration loader
///
/// Applies sources in order (later overrides earlier):
/// 1. Built-in defaults
/// 2. Options file: `$SLOTH_RTS_CONFIG` if set, else `<base_dir>/sloth.toml` if present
/// 3. `SLOTH_RTS` flags
/// 4. `+RTS ... -RTS` flags on the command line (`load_with_args` only)
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    base_dir: PathBuf,
    read_env: bool,
}

impl ConfigLoader {
    /// Create a loader rooted at the current directory
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            read_env: true,
        }
    }

    /// Look for sloth.toml in `dir` instead of the current directory
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Skip `SLOTH_RTS_CONFIG` and `SLOTH_RTS`
    pub fn ignore_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Resolve options from defaults, the options file and the environment
    pub fn load(&self) -> ConfigResult<RtsConfig> {
        let mut config = RtsConfig::default();

        if let Some(path) = self.config_file_path() {
            let file = ConfigFile::load_from_file(&path)?;
            if let Some(section) = &file.rts {
                config.merge_section(section);
            }
        }

        if self.read_env {
            if let Ok(flags) = env::var(FLAGS_ENV) {
                for flag in parse_flag_string(&flags)? {
                    config.apply_flag(&flag);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolve options including command-line RTS flags
    ///
    /// Returns the options and the program arguments with RTS flags removed.
    pub fn load_with_args<I, S>(&self, args: I) -> ConfigResult<(RtsConfig, Vec<String>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let split = split_rts_args(args)?;
        let mut config = self.load()?;
        for flag in &split.flags {
            config.apply_flag(flag);
        }
        config.validate()?;
        Ok((config, split.program_args))
    }

    /// Options file to read, if any
    ///
    /// An explicit `SLOTH_RTS_CONFIG` path must exist; the default
    /// sloth.toml is optional.
    fn config_file_path(&self) -> Option<PathBuf> {
        if self.read_env {
            if let Ok(path) = env::var(CONFIG_PATH_ENV) {
                return Some(PathBuf::from(path));
            }
        }
        let default = self.base_dir.join(CONFIG_FILE_NAME);
        default.exists().then_some(default)
    }

    /// Directory searched for sloth.toml
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
