//! Service-manager integration: watchdog cadence and readiness
//! notifications.

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Environment variable carrying the watchdog period in microseconds.
pub const WATCHDOG_USEC_ENV: &str = "WATCHDOG_USEC";
/// Environment variable with the notify socket path.
pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// Ping cadence for a configured watchdog period: half the period,
/// converted to milliseconds and clamped to `u32`. Returns `None` for
/// unparseable values and for periods too short to yield a non-zero
/// cadence.
pub fn watchdog_cycle(value: &str) -> Option<Duration> {
    let usec: u64 = value.parse().ok()?;
    let millis = (usec / 2000).min(u64::from(u32::MAX));
    if millis == 0 {
        return None;
    }
    Some(Duration::from_millis(millis))
}

/// Read the watchdog cadence from the environment. Absent or invalid
/// configuration disables the ping timer.
pub fn watchdog_cycle_from_env() -> Option<Duration> {
    let Ok(value) = std::env::var(WATCHDOG_USEC_ENV) else {
        warn!("watchdog timeout not configured");
        return None;
    };

    match watchdog_cycle(&value) {
        Some(cycle) => {
            info!(cycle_ms = cycle.as_millis() as u64, "started watchdog timer");
            Some(cycle)
        }
        None => {
            error!(value = %value, "failed to parse WATCHDOG_USEC");
            None
        }
    }
}

/// Sends state notifications to the service manager's notify socket.
/// Without a usable socket every notification is silently skipped.
pub struct ServiceManagerNotifier {
    socket: Option<PathBuf>,
}

impl ServiceManagerNotifier {
    pub fn from_env() -> Self {
        let socket = std::env::var_os(NOTIFY_SOCKET_ENV)
            .map(PathBuf::from)
            .filter(|path| path.is_absolute());
        Self { socket }
    }

    /// Announce that startup has completed.
    pub fn notify_ready(&self) {
        self.send("READY=1");
    }

    /// Ping the service-manager watchdog.
    pub fn notify_watchdog(&self) {
        self.send("WATCHDOG=1");
    }

    fn send(&self, state: &str) {
        let Some(path) = &self.socket else {
            return;
        };
        let result = UnixDatagram::unbound().and_then(|socket| socket.send_to(state.as_bytes(), path));
        if let Err(err) = result {
            debug!(state, error = %err, "service manager notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_cycle_is_half_the_period_in_millis() {
        assert_eq!(watchdog_cycle("5000000"), Some(Duration::from_millis(2500)));
        assert_eq!(watchdog_cycle("2000"), Some(Duration::from_millis(1)));
    }

    #[test]
    fn watchdog_cycle_rejects_garbage() {
        assert_eq!(watchdog_cycle(""), None);
        assert_eq!(watchdog_cycle("abc"), None);
        assert_eq!(watchdog_cycle("-5"), None);
        assert_eq!(watchdog_cycle("12x"), None);
    }

    #[test]
    fn watchdog_cycle_too_short_disables_the_timer() {
        assert_eq!(watchdog_cycle("0"), None);
        assert_eq!(watchdog_cycle("1999"), None);
    }

    #[test]
    fn watchdog_cycle_clamps_large_periods() {
        let value = u64::MAX.to_string();
        assert_eq!(
            watchdog_cycle(&value),
            Some(Duration::from_millis(u64::from(u32::MAX)))
        );
    }

    #[test]
    fn notifier_without_socket_is_inert() {
        let notifier = ServiceManagerNotifier { socket: None };
        notifier.notify_ready();
        notifier.notify_watchdog();
    }

    #[test]
    fn notifier_delivers_datagrams() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path).expect("bind");

        let notifier = ServiceManagerNotifier {
            socket: Some(path.clone()),
        };
        notifier.notify_ready();

        let mut buf = [0u8; 32];
        let len = receiver.recv(&mut buf).expect("recv");
        assert_eq!(&buf[..len], b"READY=1");
    }
}
