//! Threshold mode vocabulary shared by the schedule record and the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A committed or pending threshold profile.
///
/// A record field that has never been initialized is `Option<Mode>::None`;
/// there is no separate "unset" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// AC-present steady state; permits a higher charge ceiling.
    Docked,
    /// Battery-only steady state; favors a lower ceiling for longevity.
    Mobile,
}

impl Mode {
    /// The mode desired for a given AC presence reading.
    pub fn for_presence(ac_online: bool) -> Self {
        if ac_online {
            Mode::Docked
        } else {
            Mode::Mobile
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Docked => "docked",
            Mode::Mobile => "mobile",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Persisted as lowercase strings so the state file stays hand-readable.
impl Serialize for Mode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "docked" => Ok(Mode::Docked),
            "mobile" => Ok(Mode::Mobile),
            _ => Err(serde::de::Error::custom(format!(
                "invalid mode: {}, expected one of: docked, mobile",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_for_presence() {
        assert_eq!(Mode::for_presence(true), Mode::Docked);
        assert_eq!(Mode::for_presence(false), Mode::Mobile);
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_string(&Mode::Docked).unwrap(), "\"docked\"");
        let parsed: Mode = serde_json::from_str("\"mobile\"").unwrap();
        assert_eq!(parsed, Mode::Mobile);
    }

    #[test]
    fn test_invalid_mode_deserialization() {
        let result: Result<Mode, _> = serde_json::from_str("\"desktop\"");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("invalid mode"));
    }
}
