//! Lock System Configuration
//!
//! Tuning knobs for the lock manager. None of them are load-bearing for
//! correctness: they bound memory reuse, deadlock search cost and how long a
//! large transaction may hold the lock-table mutex while releasing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete lock system configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockSysConfig {
    /// Extra heap slots allocated in every record lock bitmap, so that
    /// records inserted later on the page can reuse the lock object
    pub bitmap_safety_margin: usize,

    /// Maximum number of waits-for graph nodes visited in one deadlock search
    pub max_deadlock_steps: u64,

    /// Maximum recursion depth of one deadlock search
    pub max_deadlock_depth: usize,

    /// Locks released at commit before the lock-table mutex is yielded
    pub release_batch_size: usize,

    /// How long `suspend_until_granted` parks a thread, in milliseconds
    pub lock_wait_timeout_ms: u64,

    /// Run the deadlock detector when a lock request has to wait
    pub deadlock_detect: bool,

    /// Do not inherit X locks set by UPDATE/DELETE as gap locks
    pub locks_unsafe_for_binlog: bool,

    /// Log every deadlock report, not only the counter
    pub print_all_deadlocks: bool,
}

impl Default for LockSysConfig {
    fn default() -> Self {
        Self {
            bitmap_safety_margin: 64,
            max_deadlock_steps: 1_000_000,
            max_deadlock_depth: 200,
            release_batch_size: 1000,
            lock_wait_timeout_ms: 50_000, // 50s
            deadlock_detect: true,
            locks_unsafe_for_binlog: false,
            print_all_deadlocks: false,
        }
    }
}

impl LockSysConfig {
    /// Load configuration from defaults plus `MANTIS_LOCK_*` environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<usize>("MANTIS_LOCK_BITMAP_MARGIN")? {
            self.bitmap_safety_margin = v;
        }
        if let Some(v) = env_parse::<u64>("MANTIS_LOCK_MAX_DEADLOCK_STEPS")? {
            self.max_deadlock_steps = v;
        }
        if let Some(v) = env_parse::<usize>("MANTIS_LOCK_MAX_DEADLOCK_DEPTH")? {
            self.max_deadlock_depth = v;
        }
        if let Some(v) = env_parse::<usize>("MANTIS_LOCK_RELEASE_BATCH")? {
            self.release_batch_size = v;
        }
        if let Some(v) = env_parse::<u64>("MANTIS_LOCK_WAIT_TIMEOUT_MS")? {
            self.lock_wait_timeout_ms = v;
        }
        if let Some(v) = env_parse::<bool>("MANTIS_LOCK_DEADLOCK_DETECT")? {
            self.deadlock_detect = v;
        }
        if let Some(v) = env_parse::<bool>("MANTIS_LOCK_UNSAFE_FOR_BINLOG")? {
            self.locks_unsafe_for_binlog = v;
        }
        if let Some(v) = env_parse::<bool>("MANTIS_LOCK_PRINT_ALL_DEADLOCKS")? {
            self.print_all_deadlocks = v;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_deadlock_steps == 0 {
            return Err(Error::ConfigError(
                "max_deadlock_steps must be greater than zero".to_string(),
            ));
        }
        if self.max_deadlock_depth == 0 {
            return Err(Error::ConfigError(
                "max_deadlock_depth must be greater than zero".to_string(),
            ));
        }
        if self.release_batch_size == 0 {
            return Err(Error::ConfigError(
                "release_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::ConfigError(format!("Invalid {}: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Configuration builder for programmatic setup
pub struct LockSysConfigBuilder {
    config: LockSysConfig,
}

impl LockSysConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LockSysConfig::default(),
        }
    }

    pub fn with_bitmap_safety_margin(mut self, slots: usize) -> Self {
        self.config.bitmap_safety_margin = slots;
        self
    }

    pub fn with_deadlock_bounds(mut self, max_steps: u64, max_depth: usize) -> Self {
        self.config.max_deadlock_steps = max_steps;
        self.config.max_deadlock_depth = max_depth;
        self
    }

    pub fn with_release_batch_size(mut self, locks: usize) -> Self {
        self.config.release_batch_size = locks;
        self
    }

    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_deadlock_detect(mut self, enabled: bool) -> Self {
        self.config.deadlock_detect = enabled;
        self
    }

    pub fn with_locks_unsafe_for_binlog(mut self, enabled: bool) -> Self {
        self.config.locks_unsafe_for_binlog = enabled;
        self
    }

    pub fn with_print_all_deadlocks(mut self, enabled: bool) -> Self {
        self.config.print_all_deadlocks = enabled;
        self
    }

    pub fn build(self) -> Result<LockSysConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for LockSysConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LockSysConfig::default();
        assert_eq!(config.bitmap_safety_margin, 64);
        assert_eq!(config.max_deadlock_steps, 1_000_000);
        assert_eq!(config.max_deadlock_depth, 200);
        assert!(config.deadlock_detect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = LockSysConfigBuilder::new()
            .with_bitmap_safety_margin(8)
            .with_deadlock_bounds(500, 10)
            .with_lock_wait_timeout(Duration::from_millis(250))
            .build()
            .unwrap();

        assert_eq!(config.bitmap_safety_margin, 8);
        assert_eq!(config.max_deadlock_depth, 10);
        assert_eq!(config.lock_wait_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_validation_rejects_zero_bounds() {
        let result = LockSysConfigBuilder::new().with_deadlock_bounds(0, 10).build();
        assert!(matches!(result, Err(Error::ConfigError(_))));

        let result = LockSysConfigBuilder::new().with_release_batch_size(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = LockSysConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: LockSysConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
