//! Charge-control threshold files.
//!
//! Reads and writes the two sysfs files that bound battery charging. The two
//! writes are not atomic as a pair: each value independently encodes a safe
//! bound, and the next commit overwrites both together. A failed end write
//! leaves the start value applied; the error is reported, not rolled back.

use crate::error::ThresholdError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default sysfs location of the charge-control start threshold.
pub const DEFAULT_START_PATH: &str =
    "/sys/class/power_supply/BAT0/charge_control_start_threshold";

/// Default sysfs location of the charge-control end threshold.
pub const DEFAULT_END_PATH: &str = "/sys/class/power_supply/BAT0/charge_control_end_threshold";

/// A start/end threshold percentage pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub start: u8,
    pub end: u8,
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "start:{} end:{}", self.start, self.end)
    }
}

/// Locations of the two threshold files.
#[derive(Debug, Clone)]
pub struct ThresholdPaths {
    pub start: PathBuf,
    pub end: PathBuf,
}

impl Default for ThresholdPaths {
    fn default() -> Self {
        Self {
            start: PathBuf::from(DEFAULT_START_PATH),
            end: PathBuf::from(DEFAULT_END_PATH),
        }
    }
}

impl ThresholdPaths {
    /// Fail early when either file is missing, so the daemon refuses to
    /// start on hardware without charge-control support.
    pub fn check_exists(&self) -> Result<(), ThresholdError> {
        for path in [&self.start, &self.end] {
            if let Err(e) = std::fs::metadata(path) {
                return Err(ThresholdError::ReadFailed {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        }
        Ok(())
    }
}

/// Seam between the engine and the threshold files, so tests can substitute
/// a recording fake.
pub trait ApplyThresholds {
    fn apply(&self, threshold: Threshold) -> Result<(), ThresholdError>;
}

/// Writes threshold pairs to their sysfs files.
pub struct SysfsThresholds {
    paths: ThresholdPaths,
}

impl SysfsThresholds {
    pub fn new(paths: ThresholdPaths) -> Self {
        Self { paths }
    }

    /// Read the currently applied pair.
    pub fn read(&self) -> Result<Threshold, ThresholdError> {
        Ok(Threshold {
            start: read_value(&self.paths.start)?,
            end: read_value(&self.paths.end)?,
        })
    }
}

impl ApplyThresholds for SysfsThresholds {
    /// Write start then end. Ordering is fixed; see the module docs for why
    /// a partial write is acceptable.
    fn apply(&self, threshold: Threshold) -> Result<(), ThresholdError> {
        write_value(&self.paths.start, threshold.start)?;
        write_value(&self.paths.end, threshold.end)?;
        Ok(())
    }
}

fn read_value(path: &Path) -> Result<u8, ThresholdError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ThresholdError::ReadFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    contents
        .trim()
        .parse::<u8>()
        .map_err(|_| ThresholdError::InvalidValue {
            path: path.display().to_string(),
            value: contents.trim().to_string(),
        })
}

fn write_value(path: &Path, value: u8) -> Result<(), ThresholdError> {
    let io_err = |e| ThresholdError::WriteFailed {
        path: path.display().to_string(),
        source: e,
    };

    // Truncate + write; sysfs attributes do not support partial updates.
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(value.to_string().as_bytes()).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths_in(dir: &Path) -> ThresholdPaths {
        ThresholdPaths {
            start: dir.join("start"),
            end: dir.join("end"),
        }
    }

    #[test]
    fn test_read_and_apply_round_trip() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.start, "0\n").unwrap();
        std::fs::write(&paths.end, "100\n").unwrap();

        let sysfs = SysfsThresholds::new(paths);
        sysfs.apply(Threshold { start: 40, end: 95 }).unwrap();

        assert_eq!(sysfs.read().unwrap(), Threshold { start: 40, end: 95 });
    }

    #[test]
    fn test_read_trims_trailing_newline() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.start, "90\n").unwrap();
        std::fs::write(&paths.end, "95\n").unwrap();

        let sysfs = SysfsThresholds::new(paths);
        assert_eq!(sysfs.read().unwrap(), Threshold { start: 90, end: 95 });
    }

    #[test]
    fn test_read_invalid_value() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.start, "banana").unwrap();
        std::fs::write(&paths.end, "95").unwrap();

        let sysfs = SysfsThresholds::new(paths);
        let err = sysfs.read().unwrap_err();
        assert!(matches!(err, ThresholdError::InvalidValue { .. }));
    }

    #[test]
    fn test_partial_write_reports_error_keeps_start() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.start, "0").unwrap();
        // No end file: the second write must fail after the first succeeded.

        let sysfs = SysfsThresholds::new(paths.clone());
        let err = sysfs.apply(Threshold { start: 40, end: 95 }).unwrap_err();

        assert!(matches!(err, ThresholdError::WriteFailed { .. }));
        assert!(err.to_string().contains("end"));
        assert_eq!(std::fs::read_to_string(&paths.start).unwrap(), "40");
    }

    #[test]
    fn test_check_exists_missing_file() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.start, "0").unwrap();

        assert!(paths.check_exists().is_err());

        std::fs::write(&paths.end, "100").unwrap();
        assert!(paths.check_exists().is_ok());
    }
}
