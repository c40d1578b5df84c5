//! AC presence detection.
//!
//! Two boundaries live here. [`PresenceProbe`] is the synchronous on-demand
//! read of the sysfs "online" attribute; the engine re-reads it for every
//! decision instead of caching. [`subscribe`] opens the kernel
//! `NETLINK_KOBJECT_UEVENT` socket and pumps matching power-supply uevents
//! into a channel pair (notifications + errors) with a cancel handle, which
//! is the event-source contract the engine multiplexes over.

use crate::error::PowerError;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default sysfs location of the AC adapter presence attribute.
pub const DEFAULT_AC_ONLINE_PATH: &str = "/sys/class/power_supply/AC/online";

/// Multicast group carrying kernel (not udevd-processed) uevents.
const KERNEL_EVENT_GROUP: u32 = 1;

/// Receive buffer for a single uevent datagram.
const UEVENT_BUFFER_SIZE: usize = 8192;

/// Channel capacity for presence notifications.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// On-demand AC presence, substitutable in tests.
pub trait PresenceProbe {
    fn ac_online(&self) -> Result<bool, PowerError>;
}

/// Reads the single-line ASCII "0"/"1" presence attribute.
pub struct SysfsPresence {
    path: PathBuf,
}

impl SysfsPresence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PresenceProbe for SysfsPresence {
    fn ac_online(&self) -> Result<bool, PowerError> {
        read_presence(&self.path)
    }
}

fn read_presence(path: &Path) -> Result<bool, PowerError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| PowerError::PresenceReadFailed {
            path: path.display().to_string(),
            source: e,
        })?;

    match contents.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(PowerError::InvalidPresence {
            path: path.display().to_string(),
            value: other.to_string(),
        }),
    }
}

/// Which uevents count as presence changes.
///
/// Passed explicitly at subscription time; there is no global matcher table.
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Required SUBSYSTEM value.
    pub subsystem: String,
    /// Env key whose "0"/"1" value carries the new presence.
    pub presence_key: String,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            subsystem: "power_supply".to_string(),
            presence_key: "POWER_SUPPLY_ONLINE".to_string(),
        }
    }
}

impl EventFilter {
    /// Match one raw uevent datagram, returning the new presence value when
    /// the event passes the filter.
    ///
    /// Kernel uevents are "action@devpath\0KEY=VALUE\0..."; the header
    /// segment is skipped, the rest is scanned as env pairs.
    pub fn match_uevent(&self, data: &[u8]) -> Option<bool> {
        let mut subsystem_matched = false;
        let mut presence = None;

        for segment in data.split(|b| *b == 0).skip(1) {
            let Ok(pair) = std::str::from_utf8(segment) else {
                continue;
            };
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };

            if key == "SUBSYSTEM" {
                subsystem_matched = value == self.subsystem;
            } else if key == self.presence_key {
                presence = match value {
                    "1" => Some(true),
                    "0" => Some(false),
                    _ => None,
                };
            }
        }

        if subsystem_matched {
            presence
        } else {
            None
        }
    }
}

/// Handle releasing the uevent subscription.
pub struct CancelHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CancelHandle {
    pub(crate) fn from_parts(cancel_tx: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { cancel_tx, task }
    }

    /// Stop the pump task and close the netlink socket.
    pub fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        self.task.abort();
    }
}

/// A live uevent subscription: presence notifications, a stream error
/// channel, and the cancel handle.
pub struct Subscription {
    pub events: mpsc::Receiver<bool>,
    pub errors: mpsc::Receiver<PowerError>,
    pub cancel: CancelHandle,
}

/// Subscribe to presence-change uevents matching `filter`.
pub fn subscribe(filter: EventFilter) -> Result<Subscription, PowerError> {
    let socket = open_uevent_socket()?;
    let async_fd = AsyncFd::new(socket).map_err(PowerError::SocketFailed)?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (error_tx, error_rx) = mpsc::channel(1);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let task = tokio::spawn(pump_uevents(async_fd, filter, event_tx, error_tx, cancel_rx));

    Ok(Subscription {
        events: event_rx,
        errors: error_rx,
        cancel: CancelHandle { cancel_tx, task },
    })
}

fn open_uevent_socket() -> Result<OwnedFd, PowerError> {
    let raw = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            libc::NETLINK_KOBJECT_UEVENT,
        )
    };
    if raw < 0 {
        return Err(PowerError::SocketFailed(std::io::Error::last_os_error()));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_groups = KERNEL_EVENT_GROUP;

    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(PowerError::SocketFailed(std::io::Error::last_os_error()));
    }

    Ok(fd)
}

fn recv_datagram(fd: &OwnedFd, buf: &mut [u8]) -> std::io::Result<usize> {
    let n = unsafe {
        libc::recv(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
        )
    };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Pump matching uevents until cancelled, the receiver is dropped, or the
/// socket fails. Socket failures go out on the error channel; the engine
/// treats them as fatal.
async fn pump_uevents(
    async_fd: AsyncFd<OwnedFd>,
    filter: EventFilter,
    events: mpsc::Sender<bool>,
    errors: mpsc::Sender<PowerError>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut buf = [0u8; UEVENT_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                debug!("uevent subscription cancelled");
                return;
            }
            ready = async_fd.readable() => {
                let mut guard = match ready {
                    Ok(guard) => guard,
                    Err(e) => {
                        let _ = errors.send(PowerError::RecvFailed(e)).await;
                        return;
                    }
                };

                match guard.try_io(|inner| recv_datagram(inner.get_ref(), &mut buf)) {
                    Ok(Ok(len)) => {
                        if let Some(ac_online) = filter.match_uevent(&buf[..len]) {
                            debug!(ac_online, "power supply uevent");
                            if events.send(ac_online).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        let _ = errors.send(PowerError::RecvFailed(e)).await;
                        return;
                    }
                    // Spurious readiness; wait again.
                    Err(_would_block) => continue,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn uevent(segments: &[&str]) -> Vec<u8> {
        let mut data = Vec::new();
        for s in segments {
            data.extend_from_slice(s.as_bytes());
            data.push(0);
        }
        data
    }

    #[test]
    fn test_filter_matches_online_event() {
        let filter = EventFilter::default();
        let data = uevent(&[
            "change@/devices/platform/ACPI0003:00/power_supply/AC",
            "ACTION=change",
            "SUBSYSTEM=power_supply",
            "POWER_SUPPLY_NAME=AC",
            "POWER_SUPPLY_ONLINE=1",
        ]);

        assert_eq!(filter.match_uevent(&data), Some(true));
    }

    #[test]
    fn test_filter_matches_offline_event() {
        let filter = EventFilter::default();
        let data = uevent(&[
            "change@/devices/platform/ACPI0003:00/power_supply/AC",
            "SUBSYSTEM=power_supply",
            "POWER_SUPPLY_ONLINE=0",
        ]);

        assert_eq!(filter.match_uevent(&data), Some(false));
    }

    #[test]
    fn test_filter_rejects_other_subsystem() {
        let filter = EventFilter::default();
        let data = uevent(&[
            "change@/devices/pci0000:00/usb1",
            "SUBSYSTEM=usb",
            "POWER_SUPPLY_ONLINE=1",
        ]);

        assert_eq!(filter.match_uevent(&data), None);
    }

    #[test]
    fn test_filter_ignores_battery_events_without_online_key() {
        // Battery status changes share the subsystem but carry no
        // POWER_SUPPLY_ONLINE key; they must not produce notifications.
        let filter = EventFilter::default();
        let data = uevent(&[
            "change@/devices/platform/power_supply/BAT0",
            "SUBSYSTEM=power_supply",
            "POWER_SUPPLY_NAME=BAT0",
            "POWER_SUPPLY_STATUS=Discharging",
        ]);

        assert_eq!(filter.match_uevent(&data), None);
    }

    #[test]
    fn test_sysfs_presence_reads_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("online");

        std::fs::write(&path, "1\n").unwrap();
        assert!(SysfsPresence::new(&path).ac_online().unwrap());

        std::fs::write(&path, "0\n").unwrap();
        assert!(!SysfsPresence::new(&path).ac_online().unwrap());
    }

    #[test]
    fn test_sysfs_presence_invalid_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("online");
        std::fs::write(&path, "yes").unwrap();

        let err = SysfsPresence::new(&path).ac_online().unwrap_err();
        assert!(matches!(err, PowerError::InvalidPresence { .. }));
    }

    #[test]
    fn test_sysfs_presence_missing_file() {
        let dir = tempdir().unwrap();
        let err = SysfsPresence::new(dir.path().join("online"))
            .ac_online()
            .unwrap_err();
        assert!(matches!(err, PowerError::PresenceReadFailed { .. }));
    }
}
