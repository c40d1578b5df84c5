//! Durable single-record store for the engine's mode schedule.
//!
//! The record holds the last committed mode plus an optional pending
//! transition (target mode and absolute deadline). Every mutator persists
//! before returning, so a crash immediately after any engine decision leaves
//! the on-disk state exactly consistent with that decision. This is a
//! single-record rewrite on each change, not an append log.

use crate::error::ScheduleError;
use crate::mode::Mode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// The persisted record.
///
/// `scheduled_at` is meaningful only while `scheduled_mode` is set; `mode`
/// is the last *applied* mode, never a merely-desired one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub scheduled_mode: Option<Mode>,
    #[serde(default)]
    pub scheduled_at: Option<SystemTime>,
}

/// Schedule store bound to its backing file.
#[derive(Debug)]
pub struct PersistentSchedule {
    record: ScheduleRecord,
    path: PathBuf,
}

impl PersistentSchedule {
    /// Load the record from `path`, starting empty when no file exists yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ScheduleError> {
        let path = path.into();

        let record = match fs::read_to_string(&path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| ScheduleError::ParseFailed {
                    path: path.display().to_string(),
                    source: e,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ScheduleRecord::default(),
            Err(e) => {
                return Err(ScheduleError::ReadFailed {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        Ok(Self { record, path })
    }

    /// Persist the record using an atomic write (temp file + fsync + rename).
    fn save(&self) -> Result<(), ScheduleError> {
        let io_err = |e| ScheduleError::WriteFailed {
            path: self.path.display().to_string(),
            source: e,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(&self.record)?;
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path).map_err(io_err)?;
            file.write_all(json.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&temp_path, &self.path).map_err(io_err)
    }

    /// The last committed mode, `None` on a never-initialized record.
    pub fn mode(&self) -> Option<Mode> {
        self.record.mode
    }

    /// The pending transition target, if any.
    pub fn scheduled_mode(&self) -> Option<Mode> {
        self.record.scheduled_mode
    }

    /// Commit `mode`: set it as current, clear the pending schedule, persist.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), ScheduleError> {
        self.record.mode = Some(mode);
        self.record.scheduled_mode = None;
        self.record.scheduled_at = None;
        self.save()
    }

    /// Schedule `mode` to be committed after `delay`, persisting the
    /// absolute deadline. At most one transition is pending at a time; any
    /// previous schedule is replaced.
    pub fn set_scheduled_mode(&mut self, mode: Mode, delay: Duration) -> Result<(), ScheduleError> {
        self.record.scheduled_mode = Some(mode);
        self.record.scheduled_at = Some(SystemTime::now() + delay);
        self.save()
    }

    /// Time left until the pending deadline for `mode`, clamped at zero.
    /// Zero when `mode` is not the scheduled mode.
    pub fn remaining_for(&self, mode: Mode) -> Duration {
        self.remaining_for_at(mode, SystemTime::now())
    }

    /// As [`remaining_for`](Self::remaining_for), with an explicit clock
    /// reading (for testing).
    pub fn remaining_for_at(&self, mode: Mode, now: SystemTime) -> Duration {
        if self.record.scheduled_mode != Some(mode) {
            return Duration::ZERO;
        }
        match self.record.scheduled_at {
            Some(deadline) => deadline.duration_since(now).unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_nonexistent_starts_empty() {
        let dir = tempdir().unwrap();
        let store = PersistentSchedule::load(dir.path().join("state.json")).unwrap();

        assert_eq!(store.mode(), None);
        assert_eq!(store.scheduled_mode(), None);
    }

    #[test]
    fn test_set_mode_persists_and_clears_schedule() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = PersistentSchedule::load(&path).unwrap();
        store
            .set_scheduled_mode(Mode::Docked, Duration::from_secs(60))
            .unwrap();
        store.set_mode(Mode::Docked).unwrap();

        // A fresh load must see the committed mode and no pending schedule.
        let reloaded = PersistentSchedule::load(&path).unwrap();
        assert_eq!(reloaded.mode(), Some(Mode::Docked));
        assert_eq!(reloaded.scheduled_mode(), None);
        assert_eq!(reloaded.remaining_for(Mode::Docked), Duration::ZERO);
    }

    #[test]
    fn test_schedule_survives_reload_with_remaining() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = PersistentSchedule::load(&path).unwrap();
        store.set_mode(Mode::Mobile).unwrap();
        store
            .set_scheduled_mode(Mode::Docked, Duration::from_secs(600))
            .unwrap();

        let reloaded = PersistentSchedule::load(&path).unwrap();
        assert_eq!(reloaded.mode(), Some(Mode::Mobile));
        assert_eq!(reloaded.scheduled_mode(), Some(Mode::Docked));

        let remaining = reloaded.remaining_for(Mode::Docked);
        assert!(remaining > Duration::from_secs(590));
        assert!(remaining <= Duration::from_secs(600));
    }

    #[test]
    fn test_remaining_for_other_mode_is_zero() {
        let dir = tempdir().unwrap();
        let mut store = PersistentSchedule::load(dir.path().join("state.json")).unwrap();
        store
            .set_scheduled_mode(Mode::Docked, Duration::from_secs(600))
            .unwrap();

        assert_eq!(store.remaining_for(Mode::Mobile), Duration::ZERO);
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = PersistentSchedule::load(&path).unwrap_err();
        assert!(matches!(err, ScheduleError::ParseFailed { .. }));
    }

    proptest! {
        // Remaining time is always clamped at zero, including deadlines in
        // the past (the suspend/resume case).
        #[test]
        fn prop_remaining_never_negative(offset_secs in -86_400i64..=86_400i64) {
            let dir = tempdir().unwrap();
            let mut store = PersistentSchedule::load(dir.path().join("state.json")).unwrap();
            store.set_scheduled_mode(Mode::Mobile, Duration::ZERO).unwrap();

            let now = if offset_secs >= 0 {
                SystemTime::now() + Duration::from_secs(offset_secs as u64)
            } else {
                SystemTime::now() - Duration::from_secs((-offset_secs) as u64)
            };

            let remaining = store.remaining_for_at(Mode::Mobile, now);
            if offset_secs > 0 {
                // Clock past the deadline: clamped.
                prop_assert_eq!(remaining, Duration::ZERO);
            } else {
                prop_assert!(remaining <= Duration::from_secs((-offset_secs) as u64 + 1));
            }
        }
    }
}
