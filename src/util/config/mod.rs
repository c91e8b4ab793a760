//! cinline configuration system
//!
//! Settings for the system toolchain, layered with override semantics.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (CINLINE_CC, CC, CINLINE_CFLAGS, CINLINE_TIMEOUT, CINLINE_WORK_DIR)
//! 3. User-level (~/.config/cinline/config.toml)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use cinline::util::config::InlineConfig;
//!
//! let config = InlineConfig::load().unwrap_or_default();
//! assert!(config.compile_timeout_secs > 0);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Toolchain configuration for inline execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineConfig {
    /// C compiler executable
    #[serde(default = "default_compiler")]
    pub compiler: PathBuf,
    /// Leading arguments of the compiler command (`CC="ccache cc"` gives
    /// `ccache` with `["cc"]`)
    #[serde(default)]
    pub compiler_args: Vec<String>,
    /// Flags placed before the per-call flags of every compilation
    #[serde(default)]
    pub extra_flags: Vec<String>,
    /// Upper bound on a single compiler invocation
    #[serde(default = "default_timeout")]
    pub compile_timeout_secs: u64,
    /// Parent directory for per-call build directories
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_compiler() -> PathBuf {
    PathBuf::from("cc")
}

fn default_timeout() -> u64 {
    60
}

impl Default for InlineConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            compiler_args: Vec::new(),
            extra_flags: Vec::new(),
            compile_timeout_secs: default_timeout(),
            work_dir: None,
        }
    }
}

impl InlineConfig {
    /// Load defaults, then the user config file, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(get_config_path().as_deref(), |key| std::env::var(key).ok())
    }

    /// Layer the file at `path` (if any) and the variables seen through
    /// `lookup` over the defaults.
    ///
    /// A bad file is an error. A bad environment value is logged and skipped;
    /// the other layers and variables still apply.
    pub fn load_from<F>(
        path: Option<&Path>,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => load_config_file(path)?,
            None => Self::default(),
        };
        if let Err(err) = config.apply_env(lookup) {
            warn!("ignoring environment override: {}", err);
        }
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    ///
    /// Every valid variable is applied; the first invalid one is returned
    /// after the rest have been processed.
    pub fn apply_env<F>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut invalid = None;

        if let Some(cc) = non_empty("CINLINE_CC").or_else(|| non_empty("CC")) {
            let mut words = cc.split_whitespace().map(str::to_string);
            if let Some(program) = words.next() {
                self.compiler = PathBuf::from(program);
                self.compiler_args = words.collect();
            }
        }
        if let Some(flags) = non_empty("CINLINE_CFLAGS") {
            self.extra_flags = flags.split_whitespace().map(str::to_string).collect();
        }
        if let Some(timeout) = non_empty("CINLINE_TIMEOUT") {
            match timeout.trim().parse::<u64>().ok().filter(|secs| *secs > 0) {
                Some(secs) => self.compile_timeout_secs = secs,
                None => {
                    invalid.get_or_insert(ConfigError::InvalidValue {
                        key: "CINLINE_TIMEOUT",
                        value: timeout,
                    });
                }
            }
        }
        if let Some(dir) = non_empty("CINLINE_WORK_DIR") {
            self.work_dir = Some(PathBuf::from(dir));
        }
        match invalid {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    // Try XDG config directory on Unix
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("cinline"));
    }

    // Fallback to ~/.config/cinline
    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("cinline"));
    }

    None
}

/// Get the user config file path (~/.config/cinline/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load a config file, returning defaults if it does not exist
pub fn load_config_file(path: &Path) -> Result<InlineConfig, ConfigError> {
    if !path.exists() {
        return Ok(InlineConfig::default());
    }

    debug!("loading config from {}", path.display());
    let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(toml::de::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
