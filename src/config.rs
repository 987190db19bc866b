//! Dispatcher configuration, loadable from TOML.
//!
//! Durations are written as seconds:
//!
//! ```toml
//! long_press_threshold = 0.8
//! debounce_window = 0.05
//! primary_long_press = "back"
//!
//! [device_name_keywords]
//! primary = ["pon", "power"]
//! auxiliary = ["wps", "reset"]
//! # Used when the name matches nothing: KEY_POWER, KEY_WPS_BUTTON, KEY_RESTART.
//! primary_codes = [116]
//! auxiliary_codes = [529, 408]
//! ```

use crate::event::ActionKind;
use crate::role::RoleKeywords;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shortest wait `poll(2)` can express.
const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Tunables for one dispatcher instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Press duration at or above which a PRIMARY release is a long press.
    pub long_press_threshold: Duration,
    /// Minimum spacing between two delivered actions.
    pub debounce_window: Duration,
    /// Upper bound on one multiplex wait; also bounds stop latency.
    pub poll_timeout: Duration,
    /// How long `stop()` waits for the background thread.
    pub stop_grace: Duration,
    /// Directory scanned for `event*` nodes.
    pub device_dir: PathBuf,
    pub keywords: RoleKeywords,
    /// Action produced by a long PRIMARY press.
    pub primary_long_press: ActionKind,
    /// Close devices that match no role instead of polling them.
    pub skip_unknown: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            long_press_threshold: Duration::from_millis(800),
            debounce_window: Duration::from_millis(50),
            poll_timeout: Duration::from_millis(500),
            stop_grace: Duration::from_secs(1),
            device_dir: PathBuf::from("/dev/input"),
            keywords: RoleKeywords::default(),
            primary_long_press: ActionKind::Context,
            skip_unknown: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    long_press_threshold: Option<f64>,
    debounce_window: Option<f64>,
    poll_timeout: Option<f64>,
    stop_grace: Option<f64>,
    device_dir: Option<PathBuf>,
    device_name_keywords: Option<RoleKeywords>,
    primary_long_press: Option<String>,
    skip_unknown: Option<bool>,
}

impl DispatcherConfig {
    /// Parse a TOML document. Keys that are absent keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(s).context("Failed to parse dispatcher config")?;
        let mut config = Self::default();

        if let Some(secs) = file.long_press_threshold {
            config.long_press_threshold = seconds("long_press_threshold", secs)?;
        }
        if let Some(secs) = file.debounce_window {
            config.debounce_window = seconds("debounce_window", secs)?;
        }
        if let Some(secs) = file.poll_timeout {
            config.poll_timeout = seconds("poll_timeout", secs)?;
            if config.poll_timeout < MIN_POLL_TIMEOUT {
                return Err(anyhow!("poll_timeout must be at least 1 ms"));
            }
        }
        if let Some(secs) = file.stop_grace {
            config.stop_grace = seconds("stop_grace", secs)?;
        }
        if let Some(dir) = file.device_dir {
            config.device_dir = dir;
        }
        if let Some(keywords) = file.device_name_keywords {
            config.keywords = keywords;
        }
        if let Some(action) = file.primary_long_press {
            config.primary_long_press = action.parse()?;
        }
        if let Some(skip) = file.skip_unknown {
            config.skip_unknown = skip;
        }

        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a finite, non-negative number of seconds", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = DispatcherConfig::from_toml_str("").unwrap();
        assert_eq!(config, DispatcherConfig::default());
        assert_eq!(config.long_press_threshold, Duration::from_millis(800));
        assert_eq!(config.debounce_window, Duration::from_millis(50));
    }

    #[test]
    fn test_full_document() {
        let config = DispatcherConfig::from_toml_str(
            r#"
            long_press_threshold = 1.5
            debounce_window = 0.1
            poll_timeout = 0.25
            stop_grace = 2
            device_dir = "/tmp/input"
            primary_long_press = "back"
            skip_unknown = true

            [device_name_keywords]
            primary = ["PowerKey"]
            auxiliary = ["menu"]
            "#,
        )
        .unwrap();

        assert_eq!(config.long_press_threshold, Duration::from_millis(1500));
        assert_eq!(config.debounce_window, Duration::from_millis(100));
        assert_eq!(config.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert_eq!(config.device_dir, PathBuf::from("/tmp/input"));
        assert_eq!(config.primary_long_press, ActionKind::Back);
        assert!(config.skip_unknown);
        assert_eq!(config.keywords.primary, vec!["PowerKey".to_string()]);
        assert_eq!(config.keywords.auxiliary, vec!["menu".to_string()]);
    }

    #[test]
    fn test_partial_keyword_table_keeps_other_default() {
        let config = DispatcherConfig::from_toml_str(
            r#"
            [device_name_keywords]
            auxiliary = ["volume"]
            "#,
        )
        .unwrap();
        assert_eq!(config.keywords.primary, RoleKeywords::default().primary);
        assert_eq!(config.keywords.auxiliary, vec!["volume".to_string()]);
    }

    #[test]
    fn test_rejects_negative_seconds() {
        assert!(DispatcherConfig::from_toml_str("debounce_window = -0.1").is_err());
    }

    #[test]
    fn test_rejects_zero_poll_timeout() {
        assert!(DispatcherConfig::from_toml_str("poll_timeout = 0").is_err());
    }

    #[test]
    fn test_rejects_sub_millisecond_poll_timeout() {
        assert!(DispatcherConfig::from_toml_str("poll_timeout = 0.0005").is_err());
        let config = DispatcherConfig::from_toml_str("poll_timeout = 0.001").unwrap();
        assert_eq!(config.poll_timeout, Duration::from_millis(1));
    }

    #[test]
    fn test_key_code_lists() {
        let config = DispatcherConfig::from_toml_str(
            r#"
            [device_name_keywords]
            primary_codes = [352]
            auxiliary_codes = []
            "#,
        )
        .unwrap();
        assert_eq!(config.keywords.primary_codes, vec![352]);
        assert!(config.keywords.auxiliary_codes.is_empty());
        assert_eq!(config.keywords.primary, RoleKeywords::default().primary);
    }

    #[test]
    fn test_rejects_unknown_key() {
        assert!(DispatcherConfig::from_toml_str("long_press = 1.0").is_err());
    }

    #[test]
    fn test_rejects_unknown_action() {
        assert!(DispatcherConfig::from_toml_str("primary_long_press = \"scroll\"").is_err());
    }
}
