//! Pool configuration
//!
//! Loaded from TOML (`mempool.toml`) with environment overrides:
//!
//! ```toml
//! min_pool_size = 64
//! growth_factor = 1.5
//! default_pool_size = 65536
//! default_fast = false
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PoolError, Result};
use crate::pool::{HEADER_SIZE, MIN_BLOCK_SIZE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Floor applied to every requested pool capacity
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: usize,

    /// Multiplier applied when a new segment is chained on
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    /// Initial capacity of the lazily created default pool
    #[serde(default = "default_pool_size")]
    pub default_pool_size: usize,

    /// Default pool uses last-freed reuse instead of best fit
    #[serde(default = "default_false")]
    pub default_fast: bool,
}

fn default_min_pool_size() -> usize {
    64
}

fn default_growth_factor() -> f64 {
    1.5
}

fn default_pool_size() -> usize {
    64 * 1024
}

fn default_false() -> bool {
    false
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: default_min_pool_size(),
            growth_factor: default_growth_factor(),
            default_pool_size: default_pool_size(),
            default_fast: default_false(),
        }
    }
}

impl PoolConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| PoolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| PoolError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `MEMPOOL_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_parse::<usize>("MEMPOOL_MIN_POOL_SIZE")? {
            self.min_pool_size = value;
        }
        if let Some(value) = env_parse::<f64>("MEMPOOL_GROWTH_FACTOR")? {
            self.growth_factor = value;
        }
        if let Some(value) = env_parse::<usize>("MEMPOOL_DEFAULT_POOL_SIZE")? {
            self.default_pool_size = value;
        }
        if let Ok(value) = std::env::var("MEMPOOL_FAST") {
            self.default_fast = value == "1" || value.eq_ignore_ascii_case("true");
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_pool_size < HEADER_SIZE + MIN_BLOCK_SIZE {
            return Err(PoolError::Config(format!(
                "min_pool_size must be at least {} bytes, got {}",
                HEADER_SIZE + MIN_BLOCK_SIZE,
                self.min_pool_size
            )));
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(PoolError::Config(format!(
                "growth_factor must be a finite value >= 1.0, got {}",
                self.growth_factor
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PoolError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, 64);
        assert_eq!(config.growth_factor, 1.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PoolConfig::from_toml_str("growth_factor = 2.0\n").expect("parse");
        assert_eq!(config.growth_factor, 2.0);
        assert_eq!(config.default_pool_size, 64 * 1024);
    }

    #[test]
    fn shrinking_growth_factor_rejected() {
        let err = PoolConfig::from_toml_str("growth_factor = 0.5\n").unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn tiny_floor_rejected() {
        let err = PoolConfig::from_toml_str("min_pool_size = 8\n").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "min_pool_size = 128\ndefault_fast = true").expect("write");

        let config = PoolConfig::from_file(file.path()).expect("load");
        assert_eq!(config.min_pool_size, 128);
        assert!(config.default_fast);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = PoolConfig::from_file(Path::new("/nonexistent/mempool.toml")).unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }
}
