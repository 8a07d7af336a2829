//! Handoff timing configuration.
//!
//! Read from an optional INI file:
//!
//! ```ini
//! [handoff]
//! max_execution_time_ms = 15000
//! retry_interval_ms = 50
//! ```

use std::path::Path;
use std::time::Duration;

use ini::Ini;

use super::error::{HandoffError, HandoffResult};

/// Name of the config file looked up in the lock directory.
pub const HANDOFF_CONFIG_FILE: &str = "handoff.ini";

/// Default deadline for the whole handoff, measured from process start.
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_millis(15_000);

/// Default delay between rename attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

const SECTION: &str = "handoff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffConfig {
    pub max_execution_time: Duration,
    pub retry_interval: Duration,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl HandoffConfig {
    pub fn with_max_execution_time(mut self, max: Duration) -> Self {
        self.max_execution_time = max;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> HandoffResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| HandoffError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini).map_err(|reason| HandoffError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Read the `[handoff]` section. Missing keys keep their defaults.
    pub fn from_ini(ini: &Ini) -> Result<Self, String> {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(SECTION)) else {
            return Ok(config);
        };

        if let Some(ms) = section.get("max_execution_time_ms") {
            config.max_execution_time = parse_millis("max_execution_time_ms", ms)?;
        }
        if let Some(ms) = section.get("retry_interval_ms") {
            config.retry_interval = parse_millis("retry_interval_ms", ms)?;
        }
        Ok(config)
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, String> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| format!("{} = {:?}: {}", key, value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = HandoffConfig::load(&temp.path().join(HANDOFF_CONFIG_FILE)).unwrap();
        assert_eq!(config, HandoffConfig::default());
        assert_eq!(config.max_execution_time, Duration::from_secs(15));
    }

    #[test]
    fn test_load_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(HANDOFF_CONFIG_FILE);
        fs::write(&path, "[handoff]\nmax_execution_time_ms = 3000\n").unwrap();

        let config = HandoffConfig::load(&path).unwrap();

        assert_eq!(config.max_execution_time, Duration::from_millis(3000));
        assert_eq!(config.retry_interval, DEFAULT_RETRY_INTERVAL);
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(HANDOFF_CONFIG_FILE);
        fs::write(&path, "[handoff]\nretry_interval_ms = soon\n").unwrap();

        let err = HandoffConfig::load(&path).unwrap_err();
        assert!(matches!(err, HandoffError::Config { .. }));
    }

    #[test]
    fn test_other_sections_ignored() {
        let ini = Ini::load_from_str("[other]\nretry_interval_ms = 1\n").unwrap();
        assert_eq!(HandoffConfig::from_ini(&ini).unwrap(), HandoffConfig::default());
    }
}
