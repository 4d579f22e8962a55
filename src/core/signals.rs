//! Termination signal watch
//!
//! Turns the first SIGINT/SIGTERM/SIGHUP/SIGQUIT received during a session
//! into a callback, so the runner can tear down and restore the terminal
//! instead of dying with the console in raw mode.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use tracing::{debug, info};

use super::task::TaskGroup;

#[cfg(unix)]
pub const TERMINATION_SIGNALS: &[i32] = &[
    SIGINT,
    SIGTERM,
    signal_hook::consts::SIGHUP,
    signal_hook::consts::SIGQUIT,
];

#[cfg(not(unix))]
pub const TERMINATION_SIGNALS: &[i32] = &[SIGINT, SIGTERM];

/// Flag handlers that store the signal number into one slot. Unregistered
/// on drop.
struct Registration {
    ids: Vec<SigId>,
}

impl Registration {
    fn register(signals: &[i32], received: &Arc<AtomicUsize>) -> io::Result<Self> {
        let mut registration = Self {
            ids: Vec::with_capacity(signals.len()),
        };
        for &signal in signals {
            // On error the partial registration drops here
            let id = signal_hook::flag::register_usize(signal, received.clone(), signal as usize)?;
            registration.ids.push(id);
        }
        Ok(registration)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// Watch for termination signals until the group is cancelled. `on_signal`
/// runs at most once, with the signal number.
pub fn watch_termination<F>(group: &mut TaskGroup, check_interval: Duration, on_signal: F) -> io::Result<()>
where
    F: FnOnce(i32) + Send + 'static,
{
    let received = Arc::new(AtomicUsize::new(0));
    let registration = Registration::register(TERMINATION_SIGNALS, &received)?;

    // If the spawn fails the closure, and the registration with it, drops
    group
        .spawn("signal-watch", move |token| {
            let _registration = registration;
            while !token.wait_timeout(check_interval) {
                let signal = received.swap(0, Ordering::SeqCst);
                if signal != 0 {
                    info!("Got signal {}", signal);
                    on_signal(signal as i32);
                    break;
                }
            }
            debug!("Signal watcher stopped");
        })
        .map(|_| ())
}
