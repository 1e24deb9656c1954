//! Service manager integration. Every call is a no-op outside systemd.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
#[cfg(target_os = "linux")]
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
fn send(state: sd_notify::NotifyState, what: &str) {
    if let Err(err) = sd_notify::notify(false, &[state]) {
        warn!(error = %err, state = what, "systemd notify failed");
    }
}

pub fn ready() {
    #[cfg(target_os = "linux")]
    send(sd_notify::NotifyState::Ready, "ready");
}

pub fn stopping() {
    #[cfg(target_os = "linux")]
    send(sd_notify::NotifyState::Stopping, "stopping");
}

/// Pings the watchdog at half the requested timeout until `shutdown` flips.
pub fn spawn_watchdog(mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
    let period = watchdog_period(
        std::env::var("WATCHDOG_USEC").ok().as_deref(),
        std::env::var("WATCHDOG_PID").ok().as_deref(),
    )?;
    if !cfg!(target_os = "linux") {
        return None;
    }

    Some(tokio::spawn(async move {
        #[cfg(target_os = "linux")]
        debug!(period_ms = period.as_millis(), "watchdog keepalive started");
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    #[cfg(target_os = "linux")]
                    send(sd_notify::NotifyState::Watchdog, "watchdog");
                }
            }
        }
    }))
}

/// Keepalive period for the given `WATCHDOG_USEC` and `WATCHDOG_PID` values.
/// `None` when no watchdog is armed for this process.
fn watchdog_period(usec: Option<&str>, pid: Option<&str>) -> Option<Duration> {
    let timeout = usec?.trim().parse::<u64>().ok().filter(|usec| *usec > 0)?;
    let addressed_here = match pid.map(|pid| pid.trim().parse::<u32>()) {
        None => true,
        Some(Ok(pid)) => pid == std::process::id(),
        Some(Err(_)) => false,
    };
    if !addressed_here {
        return None;
    }
    Some(Duration::from_micros(timeout / 2).max(Duration::from_millis(100)))
}
