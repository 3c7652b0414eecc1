//! Session lifecycle configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for session lifecycle management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Path of the persisted session file (default: "sessions.json")
    #[serde(default = "default_persistence_path")]
    pub persistence_path: PathBuf,

    /// Idle time after which a session expires, in seconds (default: 1800)
    #[serde(default = "default_idle_expiry_secs")]
    pub idle_expiry_secs: u64,

    /// Warning rungs, in seconds before expiry, most distant first
    /// (default: [600, 300])
    #[serde(default = "default_warning_intervals_secs")]
    pub warning_intervals_secs: Vec<u64>,

    /// How often the expiry sweep runs, in seconds (default: 60)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Budget for a single classification call, in seconds (default: 25)
    #[serde(default = "default_classify_timeout_secs")]
    pub classify_timeout_secs: u64,

    /// How long a concurrent turn waits on an in-flight classification
    /// before forcing the fallback workflow, in seconds (default: 30)
    #[serde(default = "default_dispatch_wait_timeout_secs")]
    pub dispatch_wait_timeout_secs: u64,

    /// Maximum title length in characters (default: 60)
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,

    /// Model assigned to new sessions, if any
    #[serde(default)]
    pub default_model: Option<String>,

    /// Working directory assigned to new sessions, if any
    #[serde(default)]
    pub default_working_directory: Option<String>,
}

fn default_persistence_path() -> PathBuf {
    PathBuf::from("sessions.json")
}

fn default_idle_expiry_secs() -> u64 {
    1800
}

fn default_warning_intervals_secs() -> Vec<u64> {
    vec![600, 300]
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_classify_timeout_secs() -> u64 {
    25
}

fn default_dispatch_wait_timeout_secs() -> u64 {
    30
}

fn default_title_max_chars() -> usize {
    60
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            persistence_path: default_persistence_path(),
            idle_expiry_secs: default_idle_expiry_secs(),
            warning_intervals_secs: default_warning_intervals_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            classify_timeout_secs: default_classify_timeout_secs(),
            dispatch_wait_timeout_secs: default_dispatch_wait_timeout_secs(),
            title_max_chars: default_title_max_chars(),
            default_model: None,
            default_working_directory: None,
        }
    }
}

impl SessionSettings {
    pub fn idle_expiry(&self) -> Duration {
        Duration::from_secs(self.idle_expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }

    pub fn dispatch_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_wait_timeout_secs)
    }

    /// Warning rungs as durations, most distant first.
    pub fn warning_intervals(&self) -> Vec<Duration> {
        self.warning_intervals_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = SessionSettings::default();
        assert_eq!(settings.idle_expiry_secs, 1800);
        assert_eq!(settings.warning_intervals_secs, vec![600, 300]);
        assert_eq!(settings.classify_timeout_secs, 25);
        assert_eq!(settings.title_max_chars, 60);
        assert!(settings.default_model.is_none());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: SessionSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.sweep_interval(), Duration::from_secs(60));
        assert_eq!(settings.persistence_path, PathBuf::from("sessions.json"));
    }

    #[test]
    fn test_settings_partial_override() {
        let settings: SessionSettings =
            serde_json::from_str(r#"{"idle_expiry_secs": 60, "warning_intervals_secs": [30]}"#)
                .unwrap();
        assert_eq!(settings.idle_expiry(), Duration::from_secs(60));
        assert_eq!(settings.warning_intervals(), vec![Duration::from_secs(30)]);
        assert_eq!(settings.classify_timeout_secs, 25);
    }
}
