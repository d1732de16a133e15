//! Interpreter configuration
//!
//! Stack limits, the time-slice quantum and the allocation threshold that
//! triggers collection. Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults ([`InterpConfig::default`])
//! 2. an optional TOML file ([`InterpConfig::load`])
//! 3. `PSI_*` environment variables ([`InterpConfig::with_env_overrides`])
//!
//! ## Environment Variables
//!
//! | Variable | Field | Description |
//! |----------|-------|-------------|
//! | `PSI_MAX_OSTACK` | `max_ostack` | Operand stack limit across all blocks |
//! | `PSI_MAX_ESTACK` | `max_estack` | Execution stack limit across all blocks |
//! | `PSI_MAX_DSTACK` | `max_dstack` | Dictionary stack limit across all blocks |
//! | `PSI_TIME_SLICE` | `time_slice` | Ticks per scheduling quantum |
//! | `PSI_VM_THRESHOLD` | `vm_threshold` | Bytes allocated before a collection is signalled |
//! | `PSI_PACKING` | `packing` | Scan procedures into packed arrays |
//! | `PSI_TRACE_OPS` | `trace_operators` | Log every operator call at `trace` level |
//!
//! ## Example
//!
//! ```toml
//! max_ostack = 2000
//! time_slice = 50
//! packing = true
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Slots kept free at the top of a full execution stack for error handling.
pub const ES_HEADROOM: usize = 20;

/// Smallest useful execution stack block; also how far below the headroom
/// line the overflow recovery looks for a mark to cut at.
pub const MIN_BLOCK_ESTACK: usize = 8;

/// Permanent dictionaries at the bottom of the dictionary stack
/// (`systemdict`, `userdict`).
pub const MIN_DSTACK: usize = 2;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InterpConfig {
    /// Operand stack limit across all blocks.
    pub max_ostack: usize,
    /// Operand stack slots per block.
    pub ostack_block: usize,
    /// Execution stack limit across all blocks.
    pub max_estack: usize,
    /// Execution stack slots per block.
    pub estack_block: usize,
    /// Whether the execution stack may grow beyond one block.
    pub estack_expansion: bool,
    /// Dictionary stack limit across all blocks.
    pub max_dstack: usize,
    /// Dictionary stack slots per block.
    pub dstack_block: usize,
    /// Ticks per scheduling quantum.
    pub time_slice: i64,
    /// Bytes allocated since the last collection before one is signalled.
    pub vm_threshold: usize,
    /// Scan procedures into packed arrays.
    pub packing: bool,
    /// Populate `errordict` with handlers that record the error and `stop`.
    pub default_error_handlers: bool,
    /// Log every operator call at `trace` level.
    pub trace_operators: bool,
    /// Collect at every time-slice checkpoint.
    pub gc_every_slice: bool,
    /// Report `%` comments in files to a `ProcessComment` procedure.
    pub process_comments: bool,
    /// Bytes pulled from a file source per refill.
    pub file_chunk: usize,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            max_ostack: 800,
            ostack_block: 800,
            max_estack: 5000,
            estack_block: 250,
            estack_expansion: true,
            max_dstack: 20,
            dstack_block: 20,
            time_slice: 100,
            vm_threshold: 1 << 20,
            packing: false,
            default_error_handlers: true,
            trace_operators: false,
            gc_every_slice: false,
            process_comments: false,
            file_chunk: 4096,
        }
    }
}

/// Errors that can occur while loading configuration
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl InterpConfig {
    /// Defaults overlaid with `PSI_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: InterpConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `PSI_*` environment variables. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("PSI_MAX_OSTACK") {
            self.max_ostack = v;
        }
        if let Some(v) = env_parse("PSI_MAX_ESTACK") {
            self.max_estack = v;
        }
        if let Some(v) = env_parse("PSI_MAX_DSTACK") {
            self.max_dstack = v;
        }
        if let Some(v) = env_parse::<i64>("PSI_TIME_SLICE").filter(|&v| v > 0) {
            self.time_slice = v;
        }
        if let Some(v) = env_parse("PSI_VM_THRESHOLD") {
            self.vm_threshold = v;
        }
        if let Some(v) = env_flag("PSI_PACKING") {
            self.packing = v;
        }
        if let Some(v) = env_flag("PSI_TRACE_OPS") {
            self.trace_operators = v;
        }
        if let Err(e) = self.validate() {
            warn!(error = %e, "environment produced an invalid configuration, using defaults");
            return Self::default();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ostack_block == 0 || self.max_ostack == 0 {
            return Err(ConfigError::Invalid("operand stack must hold at least one value".into()));
        }
        if self.estack_block < MIN_BLOCK_ESTACK || self.max_estack <= ES_HEADROOM + MIN_BLOCK_ESTACK {
            return Err(ConfigError::Invalid(format!(
                "execution stack needs blocks of at least {} and more than {} slots",
                MIN_BLOCK_ESTACK,
                ES_HEADROOM + MIN_BLOCK_ESTACK
            )));
        }
        if self.dstack_block <= MIN_DSTACK || self.max_dstack <= MIN_DSTACK {
            return Err(ConfigError::Invalid(format!(
                "dictionary stack needs more than {} slots",
                MIN_DSTACK
            )));
        }
        if self.time_slice <= 0 {
            return Err(ConfigError::Invalid("time_slice must be positive".into()));
        }
        if self.file_chunk == 0 {
            return Err(ConfigError::Invalid("file_chunk must be positive".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn env_flag(var: &str) -> Option<bool> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!(var, value = %raw, "ignoring unparseable flag");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "PSI_MAX_OSTACK",
            "PSI_MAX_ESTACK",
            "PSI_MAX_DSTACK",
            "PSI_TIME_SLICE",
            "PSI_VM_THRESHOLD",
            "PSI_PACKING",
            "PSI_TRACE_OPS",
        ] {
            // SAFETY: tests touching the environment are serialized
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = InterpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_ostack, 800);
        assert_eq!(config.max_estack, 5000);
        assert_eq!(config.max_dstack, 20);
        assert!(config.default_error_handlers);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = InterpConfig::from_toml_str("time_slice = 7\npacking = true\n").unwrap();
        assert_eq!(config.time_slice, 7);
        assert!(config.packing);
        assert_eq!(config.ostack_block, 800);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(matches!(
            InterpConfig::from_toml_str("time_slice = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            InterpConfig::from_toml_str("time_slice = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            InterpConfig::from_toml_str("max_dstack = 2"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = InterpConfig::load(Path::new("/nonexistent/psi.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.to_string().starts_with("Failed to read config"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        // SAFETY: serialized
        unsafe {
            std::env::set_var("PSI_MAX_OSTACK", "1200");
            std::env::set_var("PSI_PACKING", "yes");
            std::env::set_var("PSI_TIME_SLICE", "not-a-number");
        }
        let config = InterpConfig::from_env();
        assert_eq!(config.max_ostack, 1200);
        assert!(config.packing);
        assert_eq!(config.time_slice, 100);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_invalid_combination_falls_back() {
        clear_env();
        // SAFETY: serialized
        unsafe { std::env::set_var("PSI_MAX_DSTACK", "1") };
        let config = InterpConfig::from_env();
        assert_eq!(config, InterpConfig::default());
        clear_env();
    }
}
