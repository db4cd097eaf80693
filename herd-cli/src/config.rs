//! Program configuration, loaded and validated before any session spawns.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::Level;

use herd_engine::{RepeatMode, SessionConfig, TimeShift, TransportConfig};

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Stream URLs handed out to sessions round-robin.
    pub sources: Vec<String>,

    /// Number of concurrent virtual viewers.
    #[serde(default = "default_sessions")]
    pub sessions: usize,

    /// Per-session body-read ceiling in bytes per second. 0 = unlimited.
    #[serde(default)]
    pub rate_limit_bytes_per_sec: u64,

    /// "once" or "forever".
    #[serde(default = "default_repeat")]
    pub repeat: String,

    /// Shift playback back by a random 1..=N seconds. Mutually exclusive
    /// with `playback_window_secs`.
    #[serde(default)]
    pub timeshift_offset_secs: u64,

    /// Watch a random start/end window inside the last N seconds.
    #[serde(default)]
    pub playback_window_secs: u64,

    /// Simulated-playback seconds after which a viewer hops to a new
    /// stream. 0 = watch until the stream ends.
    #[serde(default)]
    pub stop_after_secs: u64,

    /// Process-wide cap on concurrent segment/file downloads.
    #[serde(default = "default_concurrency")]
    pub download_concurrency: usize,

    /// Overall per-request timeout in seconds. 0 disables it.
    #[serde(default)]
    pub request_timeout_secs: u64,

    /// Socket address for the read-only stats endpoint. Unset disables it.
    #[serde(default)]
    pub status_listen: Option<SocketAddr>,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// trace | debug | info | warn | error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files. Unset logs to stdout only.
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

fn default_sessions() -> usize {
    100
}

fn default_repeat() -> String {
    "forever".to_owned()
}

fn default_concurrency() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;
        let config: AppConfig =
            toml::from_str(&raw).map_err(|e| AppError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.sources.is_empty() {
            return Err(AppError::InvalidConfig(
                "at least one source URL is required".to_owned(),
            ));
        }
        if self.sessions == 0 {
            return Err(AppError::InvalidConfig(
                "sessions must be at least 1".to_owned(),
            ));
        }
        if self.download_concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "download_concurrency must be at least 1".to_owned(),
            ));
        }
        if self.timeshift_offset_secs > 0 && self.playback_window_secs > 0 {
            return Err(AppError::InvalidConfig(
                "timeshift_offset_secs and playback_window_secs are mutually exclusive".to_owned(),
            ));
        }
        self.repeat_mode()?;
        self.log.level()?;
        Ok(())
    }

    pub fn repeat_mode(&self) -> Result<RepeatMode, AppError> {
        match self.repeat.as_str() {
            "once" => Ok(RepeatMode::RunOnce),
            "forever" => Ok(RepeatMode::RunForever),
            other => Err(AppError::InvalidConfig(format!(
                "invalid repeat mode '{other}' (expected \"once\" or \"forever\")"
            ))),
        }
    }

    pub fn time_shift(&self) -> TimeShift {
        if self.timeshift_offset_secs > 0 {
            TimeShift::Offset(self.timeshift_offset_secs)
        } else if self.playback_window_secs > 0 {
            TimeShift::Window(self.playback_window_secs)
        } else {
            TimeShift::Live
        }
    }

    pub fn session_config(&self) -> Result<SessionConfig, AppError> {
        Ok(SessionConfig {
            rate_limit_bytes_per_sec: self.rate_limit_bytes_per_sec,
            repeat: self.repeat_mode()?,
            time_shift: self.time_shift(),
            stop_after_secs: self.stop_after_secs,
            ..SessionConfig::default()
        })
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..TransportConfig::default()
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> Result<Level, AppError> {
        self.level
            .parse::<Level>()
            .map_err(|_| AppError::InvalidConfig(format!("invalid log level '{}'", self.level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<AppConfig, AppError> {
        let config: AppConfig = toml::from_str(raw).map_err(|e| AppError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse("sources = [\"http://origin/live/chan1.m3u8\"]\n").unwrap();
        assert_eq!(config.sessions, 100);
        assert_eq!(config.download_concurrency, 64);
        assert_eq!(config.repeat_mode().unwrap(), RepeatMode::RunForever);
        assert_eq!(config.time_shift(), TimeShift::Live);
        assert_eq!(config.log.level().unwrap(), Level::INFO);
    }

    #[test]
    fn empty_sources_are_rejected() {
        assert!(parse("sources = []\n").is_err());
    }

    #[test]
    fn time_shift_strategies_are_mutually_exclusive() {
        let raw = "sources = [\"http://o/c.m3u8\"]\n\
timeshift_offset_secs = 60\n\
playback_window_secs = 3600\n";
        assert!(parse(raw).is_err());
    }

    #[test]
    fn offset_shift_maps_to_the_offset_strategy() {
        let raw = "sources = [\"http://o/c.m3u8\"]\ntimeshift_offset_secs = 120\n";
        let config = parse(raw).unwrap();
        assert_eq!(config.time_shift(), TimeShift::Offset(120));
    }

    #[test]
    fn bad_repeat_mode_is_rejected() {
        let raw = "sources = [\"http://o/c.m3u8\"]\nrepeat = \"sometimes\"\n";
        assert!(parse(raw).is_err());
    }

    #[test]
    fn run_once_maps_through() {
        let raw = "sources = [\"http://o/c.m3u8\"]\nrepeat = \"once\"\n";
        let config = parse(raw).unwrap();
        assert_eq!(config.repeat_mode().unwrap(), RepeatMode::RunOnce);
        assert_eq!(
            config.session_config().unwrap().repeat,
            RepeatMode::RunOnce
        );
    }
}
