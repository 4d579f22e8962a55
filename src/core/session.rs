//! Session lifecycle
//!
//! [`SessionRunner`] drives one remote session through
//! `Init → RemoteTerminalRequested → LocalRawModeSet → PumpsRunning →
//! Draining → Closed`. Every path ends in `Closed`, with the local terminal
//! restored and the remote channel closed.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::pump::{PumpHandles, PumpOptions, RemotePipes, SessionIOPump};
use super::remote::{RemoteError, RemoteExit, RemoteSession, RemoteTarget};
use super::resize::ResizeWatcher;
use super::signals;
use super::task::TaskGroup;
use crate::config::SessionConfig;
use crate::term::{
    ModeError, TerminalBackend, TerminalCapabilities, TerminalModeController, WindowSize,
};

/// Session errors. All of them happen before any pump starts.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to get window size: {0}")]
    WindowSize(#[source] io::Error),

    #[error("failed to request pty: {0}")]
    RequestPty(#[source] RemoteError),

    #[error("failed to open remote {stream}: {source}")]
    Pipe {
        stream: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("failed to start {target}: {source}")]
    Start {
        target: String,
        #[source]
        source: RemoteError,
    },

    #[error("failed to set raw mode: {0}")]
    RawMode(#[from] ModeError),

    #[error("failed to start session tasks: {0}")]
    Spawn(#[source] io::Error),

    #[error("session already ran")]
    AlreadyRan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    RemoteTerminalRequested,
    LocalRawModeSet,
    PumpsRunning,
    Draining,
    Closed,
}

/// What ended a session that got as far as running its pumps
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Exited(RemoteExit),
    Signalled(i32),
}

/// First of these wins the race out of `PumpsRunning`
#[derive(Debug)]
enum SessionEvent {
    Signal(i32),
    Exited(RemoteExit),
}

pub struct SessionRunner {
    remote: Arc<dyn RemoteSession>,
    terminal: Arc<dyn TerminalBackend>,
    config: SessionConfig,
    watch_signals: bool,
    state: SessionState,
    history: Vec<SessionState>,
}

impl SessionRunner {
    pub fn new(
        remote: Arc<dyn RemoteSession>,
        terminal: Arc<dyn TerminalBackend>,
        config: SessionConfig,
    ) -> Self {
        Self {
            remote,
            terminal,
            config,
            watch_signals: true,
            state: SessionState::Init,
            history: vec![SessionState::Init],
        }
    }

    /// Whether termination signals end the session (on by default)
    pub fn watch_signals(mut self, enabled: bool) -> Self {
        self.watch_signals = enabled;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Run the session to completion. Blocks until `Closed`.
    pub fn run(&mut self, target: &RemoteTarget) -> Result<SessionOutcome, SessionError> {
        if self.state != SessionState::Init {
            return Err(SessionError::AlreadyRan);
        }
        let pty = !self.config.no_tty;
        info!("Starting {} (pty={})", target, pty);

        let (pipes, size) = match self.request_remote_terminal(target, pty) {
            Ok(acquired) => acquired,
            Err(e) => {
                self.close_remote();
                self.transition(SessionState::Closed);
                return Err(e);
            }
        };
        self.transition(SessionState::RemoteTerminalRequested);

        let controller = TerminalModeController::new(self.terminal.clone());
        let caps = if pty {
            match controller.enter_raw_mode() {
                Ok(caps) => caps,
                Err(e) => {
                    controller.restore_mode();
                    self.close_remote();
                    self.transition(SessionState::Closed);
                    return Err(e.into());
                }
            }
        } else {
            TerminalCapabilities::NATIVE
        };
        self.transition(SessionState::LocalRawModeSet);

        let mut group = TaskGroup::new();
        let (events_tx, events) = mpsc::channel();
        let pumps = match self.start_tasks(&mut group, pipes, size, caps, &events_tx) {
            Ok(pumps) => pumps,
            Err(e) => {
                self.transition(SessionState::Draining);
                group.cancel_and_join();
                controller.restore_mode();
                self.close_remote();
                self.transition(SessionState::Closed);
                return Err(e);
            }
        };
        drop(events_tx);
        self.transition(SessionState::PumpsRunning);

        let outcome = match events.recv() {
            Ok(SessionEvent::Signal(signal)) => SessionOutcome::Signalled(signal),
            Ok(SessionEvent::Exited(exit)) => SessionOutcome::Exited(exit),
            Err(_) => SessionOutcome::Exited(RemoteExit::Failed("session event channel closed".into())),
        };
        debug!("Session ended: {:?}", outcome);

        self.transition(SessionState::Draining);
        if let SessionOutcome::Exited(_) = outcome {
            self.drain_output(&pumps, &events);
        }
        group.cancel_and_join();
        controller.restore_mode();
        self.close_remote();
        self.transition(SessionState::Closed);

        Ok(outcome)
    }

    fn request_remote_terminal(
        &self,
        target: &RemoteTarget,
        pty: bool,
    ) -> Result<(RemotePipes, Option<WindowSize>), SessionError> {
        let size = if pty {
            let size = self.terminal.window_size().map_err(SessionError::WindowSize)?;
            self.remote
                .request_pty(&self.config.term, size)
                .map_err(SessionError::RequestPty)?;
            Some(size)
        } else {
            None
        };

        let pipes = RemotePipes {
            stdin: self.remote.stdin_pipe().map_err(pipe_error("stdin"))?,
            stdout: self.remote.stdout_pipe().map_err(pipe_error("stdout"))?,
            stderr: self.remote.stderr_pipe().map_err(pipe_error("stderr"))?,
        };

        self.remote.start(target).map_err(|source| SessionError::Start {
            target: target.to_string(),
            source,
        })?;

        Ok((pipes, size))
    }

    fn start_tasks(
        &self,
        group: &mut TaskGroup,
        pipes: RemotePipes,
        size: Option<WindowSize>,
        caps: TerminalCapabilities,
        events: &Sender<SessionEvent>,
    ) -> Result<PumpHandles, SessionError> {
        let check = self.config.check_interval();

        if self.watch_signals {
            let tx = events.clone();
            signals::watch_termination(group, check, move |signal| {
                let _ = tx.send(SessionEvent::Signal(signal));
            })
            .map_err(SessionError::Spawn)?;
        }

        let resize = match size {
            Some(size) => {
                let source = self.terminal.resize_source();
                let rx = ResizeWatcher::spawn(group, source).map_err(SessionError::Spawn)?;
                Some((rx, size))
            }
            None => None,
        };

        let options = PumpOptions {
            input_buffer_size: self.config.input_buffer_size,
            check_interval: check,
        };
        let pumps = SessionIOPump::new(self.terminal.clone(), self.remote.clone(), caps, options)
            .start(group, pipes, resize)
            .map_err(SessionError::Spawn)?;

        spawn_exit_waiter(self.remote.clone(), events.clone()).map_err(SessionError::Spawn)?;
        Ok(pumps)
    }

    /// Let remote output that was sent before the exit reach the console.
    /// Waits for both output pumps to hit EOF, up to the drain timeout; a
    /// termination signal stops the wait at once.
    fn drain_output(&self, pumps: &PumpHandles, events: &Receiver<SessionEvent>) {
        let deadline = Instant::now() + self.config.drain_timeout();
        let check = self.config.check_interval();

        while !pumps.output_finished() {
            let now = Instant::now();
            if now >= deadline {
                warn!("Remote output still open after exit; dropping the rest");
                return;
            }
            match events.recv_timeout(check.min(deadline - now)) {
                Ok(SessionEvent::Signal(signal)) => {
                    info!("Got signal {} while draining output", signal);
                    return;
                }
                Ok(SessionEvent::Exited(_)) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(check.min(deadline - now)),
            }
        }
        debug!("Remote output drained");
    }

    fn close_remote(&self) {
        if let Err(e) = self.remote.close() {
            warn!("Failed to close session channel: {}", e);
        }
    }
}

fn pipe_error(stream: &'static str) -> impl FnOnce(RemoteError) -> SessionError {
    move |source| SessionError::Pipe { stream, source }
}

/// `wait` cannot be interrupted, so the waiter runs outside the task group.
/// Closing the channel during teardown releases it.
fn spawn_exit_waiter(remote: Arc<dyn RemoteSession>, events: Sender<SessionEvent>) -> io::Result<()> {
    thread::Builder::new()
        .name("exit-waiter".into())
        .spawn(move || {
            let exit = remote.wait();
            match &exit {
                RemoteExit::Success => debug!("Remote exited successfully"),
                other => info!("Remote exit: {:?}", other),
            }
            let _ = events.send(SessionEvent::Exited(exit));
        })
        .map(|_| ())
}
