//! Terminal resize notifications
//!
//! [`ResizeWatcher`] turns SIGWINCH, or a periodic tick where no signal
//! exists, into a coalescing stream of [`ResizeEvent`]s. At most one event
//! is ever pending; the consumer re-queries the actual size.

use std::io;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::time::Duration;

use tracing::{debug, trace};

use super::task::{CancelToken, TaskGroup};
use crate::term::ResizeSource;

/// Tick used when a backend asks for signals on a platform without them
#[cfg(not(unix))]
const FALLBACK_POLL: Duration = Duration::from_secs(2);

/// "The window may have changed size"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeEvent;

pub struct ResizeWatcher;

impl ResizeWatcher {
    /// Start watching. The returned stream closes once, when the group is
    /// cancelled.
    pub fn spawn(group: &mut TaskGroup, source: ResizeSource) -> io::Result<Receiver<ResizeEvent>> {
        let (tx, rx) = mpsc::sync_channel(1);

        match source {
            ResizeSource::Poll(interval) => {
                group.spawn("resize-watch", move |token| poll_ticks(token, tx, interval))?;
            }
            #[cfg(unix)]
            ResizeSource::Signal => {
                use signal_hook::consts::SIGWINCH;
                use signal_hook::iterator::Signals;

                let mut signals = Signals::new([SIGWINCH])?;
                let handle = signals.handle();

                // Closing the handle ends `forever`, which drops the sender
                group.spawn("resize-watch", move |_| {
                    for _ in signals.forever() {
                        if !notify(&tx) {
                            break;
                        }
                    }
                    debug!("Resize watcher stopped");
                })?;
                let closer = handle.clone();
                if let Err(e) = group.spawn("resize-watch-close", move |token| {
                    token.wait();
                    closer.close();
                }) {
                    handle.close();
                    return Err(e);
                }
            }
            #[cfg(not(unix))]
            ResizeSource::Signal => {
                group.spawn("resize-watch", move |token| poll_ticks(token, tx, FALLBACK_POLL))?;
            }
        }

        Ok(rx)
    }
}

/// Queue an event unless one is already pending. `false` once the
/// receiver is gone.
fn notify(tx: &SyncSender<ResizeEvent>) -> bool {
    match tx.try_send(ResizeEvent) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            trace!("Resize event coalesced");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Fallback for consoles without a resize signal. Every tick costs a size
/// query, and a resize is noticed up to `interval` late.
fn poll_ticks(token: CancelToken, tx: SyncSender<ResizeEvent>, interval: Duration) {
    while !token.wait_timeout(interval) {
        if !notify(&tx) {
            break;
        }
    }
    debug!("Resize watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::Instant;

    #[test]
    fn test_poll_source_ticks_and_closes_once() {
        let mut group = TaskGroup::new();
        let rx = ResizeWatcher::spawn(&mut group, ResizeSource::Poll(Duration::from_millis(10))).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(ResizeEvent));

        group.cancel_and_join();
        // At most the one coalesced event, then the stream is closed
        let mut pending = 0;
        while rx.try_recv().is_ok() {
            pending += 1;
        }
        assert!(pending <= 1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(50)), Err(RecvTimeoutError::Disconnected));
    }

    #[test]
    fn test_cancel_without_events_closes_stream() {
        let mut group = TaskGroup::new();
        let rx = ResizeWatcher::spawn(&mut group, ResizeSource::Poll(Duration::from_secs(3600))).unwrap();

        let start = Instant::now();
        group.cancel_and_join();
        assert!(start.elapsed() < Duration::from_secs(5));

        assert_eq!(rx.try_recv(), Err(mpsc::TryRecvError::Disconnected));
    }

    #[test]
    fn test_events_coalesce() {
        let (tx, rx) = mpsc::sync_channel(1);
        for _ in 0..5 {
            assert!(notify(&tx));
        }
        assert_eq!(rx.try_recv(), Ok(ResizeEvent));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!notify(&tx));
    }

    #[cfg(unix)]
    #[test]
    fn test_sigwinch_delivers_event() {
        let mut group = TaskGroup::new();
        let rx = ResizeWatcher::spawn(&mut group, ResizeSource::Signal).unwrap();

        signal_hook::low_level::raise(signal_hook::consts::SIGWINCH).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(ResizeEvent));

        group.cancel_and_join();
        while rx.try_recv().is_ok() {}
        assert_eq!(rx.recv_timeout(Duration::from_millis(50)), Err(RecvTimeoutError::Disconnected));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_source_closes_without_events() {
        let mut group = TaskGroup::new();
        let rx = ResizeWatcher::spawn(&mut group, ResizeSource::Signal).unwrap();

        let start = Instant::now();
        group.cancel_and_join();
        assert!(start.elapsed() < Duration::from_secs(5));

        while rx.try_recv().is_ok() {}
        assert_eq!(rx.try_recv(), Err(mpsc::TryRecvError::Disconnected));
    }
}
