//! Configuration for the battguard daemon.
//!
//! Settings come from an optional JSON config file with CLI flags layered on
//! top; everything is immutable for the process lifetime once the daemon
//! starts.

use crate::error::ConfigError;
use crate::threshold::{Threshold, ThresholdPaths, DEFAULT_END_PATH, DEFAULT_START_PATH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default delay before committing docked mode. Long on purpose: brief AC
/// blips must not raise the charge ceiling.
pub const DEFAULT_DOCKED_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Default delay before committing mobile mode. Short so thresholds revert
/// quickly once power is really gone.
pub const DEFAULT_MOBILE_DELAY: Duration = Duration::from_secs(60);

/// Threshold profile plus debounce delay for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    #[serde(with = "human_duration")]
    pub delay: Duration,
    pub start: u8,
    pub end: u8,
}

impl ModeProfile {
    pub fn threshold(&self) -> Threshold {
        Threshold {
            start: self.start,
            end: self.end,
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub docked: ModeProfile,
    pub mobile: ModeProfile,
    /// Cadence of the drift-detection tick.
    #[serde(with = "human_duration")]
    pub resync_interval: Duration,
    /// Divergence between expected and actual elapsed time that triggers a
    /// timer re-arm while a schedule is pending.
    #[serde(with = "human_duration")]
    pub drift_threshold: Duration,
    pub data_dir: PathBuf,
    pub ac_online_path: PathBuf,
    pub threshold_start_path: PathBuf,
    pub threshold_end_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docked: ModeProfile {
                delay: DEFAULT_DOCKED_DELAY,
                start: 40,
                end: 95,
            },
            mobile: ModeProfile {
                delay: DEFAULT_MOBILE_DELAY,
                start: 90,
                end: 95,
            },
            resync_interval: Duration::from_secs(1),
            drift_threshold: Duration::from_secs(1),
            data_dir: PathBuf::from("/var/lib/battguard"),
            ac_online_path: PathBuf::from(crate::power::DEFAULT_AC_ONLINE_PATH),
            threshold_start_path: PathBuf::from(DEFAULT_START_PATH),
            threshold_end_path: PathBuf::from(DEFAULT_END_PATH),
        }
    }
}

impl Config {
    /// Load from `path` when given, else from the default location if one
    /// exists, else defaults. An explicitly named file must parse.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let p = Self::default_path();
                if !p.exists() {
                    return Ok(Self::default());
                }
                p
            }
        };

        let contents = std::fs::read_to_string(&path)?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config path (~/.config/battguard/config.json, falling back
    /// to /etc/battguard/config.json for system services).
    pub fn default_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("battguard").join("config.json"),
            None => PathBuf::from("/etc/battguard/config.json"),
        }
    }

    /// Validate threshold ranges and timing values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, profile) in [("docked", &self.docked), ("mobile", &self.mobile)] {
            if profile.start > profile.end {
                return Err(ConfigError::ValidationError(format!(
                    "{} start ({}) cannot be greater than end ({})",
                    name, profile.start, profile.end
                )));
            }
            if profile.end > 100 {
                return Err(ConfigError::ValidationError(format!(
                    "{} end ({}) must not exceed 100",
                    name, profile.end
                )));
            }
        }

        if self.resync_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "resync_interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn threshold_paths(&self) -> ThresholdPaths {
        ThresholdPaths {
            start: self.threshold_start_path.clone(),
            end: self.threshold_end_path.clone(),
        }
    }

    /// Location of the persisted schedule record.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}

/// Parse a duration given as `<number><unit>` with unit one of ms, s, m, h,
/// d; a bare number means seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", s))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        "d" => Ok(Duration::from_secs(value * 86_400)),
        _ => Err(format!(
            "invalid duration unit '{}', expected one of: ms, s, m, h, d",
            unit
        )),
    }
}

/// Render a duration in the largest exact unit.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || (d.as_secs() == 0 && !d.is_zero()) {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

// Durations are stored in config files as human-readable strings.
mod human_duration {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.docked.delay, Duration::from_secs(86_400));
        assert_eq!(config.docked.threshold(), Threshold { start: 40, end: 95 });
        assert_eq!(config.mobile.delay, Duration::from_secs(60));
        assert_eq!(config.mobile.threshold(), Threshold { start: 90, end: 95 });
        assert_eq!(config.resync_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10 minutes").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_format_duration_round_trips() {
        for s in ["500ms", "45s", "2m", "24h"] {
            assert_eq!(format_duration(parse_duration(s).unwrap()), s);
        }
    }

    #[test]
    fn test_validation_start_above_end() {
        let mut config = Config::default();
        config.mobile.start = 96;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot be greater than"));
    }

    #[test]
    fn test_validation_end_above_100() {
        let mut config = Config::default();
        config.docked.end = 101;
        config.docked.start = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_resync_interval() {
        let mut config = Config::default();
        config.resync_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "docked": { "delay": "12h", "start": 50, "end": 80 },
                "mobile": { "delay": "30s", "start": 90, "end": 95 },
                "resync_interval": "1s",
                "drift_threshold": "2s",
                "data_dir": "/tmp/battguard-test"
            }"#,
        )
        .unwrap();

        let config = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.docked.delay, Duration::from_secs(12 * 3600));
        assert_eq!(config.docked.threshold(), Threshold { start: 50, end: 80 });
        assert_eq!(config.drift_threshold, Duration::from_secs(2));
        // Unspecified fields keep their defaults.
        assert_eq!(
            config.ac_online_path,
            PathBuf::from(crate::power::DEFAULT_AC_ONLINE_PATH)
        );
    }

    #[test]
    fn test_load_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();

        assert!(Config::load_or_default(Some(&path)).is_err());
    }
}
