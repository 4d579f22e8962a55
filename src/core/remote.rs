//! Remote session interface
//!
//! The SSH transport is supplied by the embedding application through
//! these traits. Everything here is what the session engine needs from an
//! open channel; authentication and host verification happen before a
//! [`RemoteSession`] exists.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use thiserror::Error;

use crate::config::ConnectConfig;
use crate::term::WindowSize;

/// Channel request name for window size changes
pub const WINDOW_CHANGE: &str = "window-change";

/// Errors reported by the remote side or the transport
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("request {0:?} rejected by remote")]
    Rejected(String),

    #[error("channel closed")]
    Closed,

    #[error("{0}")]
    Protocol(String),
}

/// Payload of a "window-change" request: four big-endian u32 values
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowChange {
    pub columns: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
}

impl From<WindowSize> for WindowChange {
    fn from(size: WindowSize) -> Self {
        Self {
            columns: u32::from(size.width),
            rows: u32::from(size.height),
            width_px: 0,
            height_px: 0,
        }
    }
}

impl WindowChange {
    pub fn to_wire(&self) -> [u8; 16] {
        let mut wire = [0u8; 16];
        for (chunk, value) in wire
            .chunks_exact_mut(4)
            .zip([self.columns, self.rows, self.width_px, self.height_px])
        {
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        wire
    }
}

/// What the remote side runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteTarget {
    Shell,
    Command(String),
    Subsystem(String),
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteTarget::Shell => write!(f, "shell"),
            RemoteTarget::Command(cmd) => write!(f, "command {:?}", cmd),
            RemoteTarget::Subsystem(name) => write!(f, "subsystem {:?}", name),
        }
    }
}

/// A non-zero exit reported by the remote process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitStatus {
    pub status: u32,
    pub signal: Option<String>,
    pub message: String,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process exited with status {}", self.status)?;
        if let Some(signal) = &self.signal {
            write!(f, " from signal {}", signal)?;
        }
        if !self.message.is_empty() {
            write!(f, ". Reason was: {}", self.message)?;
        }
        Ok(())
    }
}

/// How the remote session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteExit {
    Success,
    Status(ExitStatus),
    /// Channel closed without an exit-status message
    MissingStatus(String),
    Failed(String),
}

impl RemoteExit {
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteExit::Success)
    }

    /// Process exit code to propagate locally
    pub fn code(&self) -> i32 {
        match self {
            RemoteExit::Success => 0,
            RemoteExit::Status(status) => i32::try_from(status.status).unwrap_or(255),
            RemoteExit::MissingStatus(_) | RemoteExit::Failed(_) => 255,
        }
    }
}

/// Remote standard input. Closing consumes the pipe, so it can happen
/// only once.
pub trait RemoteStdin: Write + Send {
    /// Send EOF to the remote process
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// An open session channel.
///
/// Methods take `&self` so the session can be shared between the runner,
/// the resize pump and the exit waiter. `close` must be idempotent.
pub trait RemoteSession: Send + Sync {
    fn request_pty(&self, term: &str, size: WindowSize) -> Result<(), RemoteError>;

    fn stdin_pipe(&self) -> Result<Box<dyn RemoteStdin>, RemoteError>;
    fn stdout_pipe(&self) -> Result<Box<dyn Read + Send>, RemoteError>;
    fn stderr_pipe(&self) -> Result<Box<dyn Read + Send>, RemoteError>;

    fn shell(&self) -> Result<(), RemoteError>;
    fn exec(&self, command: &str) -> Result<(), RemoteError>;
    fn request_subsystem(&self, name: &str) -> Result<(), RemoteError>;

    /// Send a channel request. Returns the remote's reply when
    /// `want_reply` is set, `true` otherwise.
    fn send_request(&self, name: &str, want_reply: bool, payload: &[u8]) -> Result<bool, RemoteError>;

    /// Block until the remote process exits
    fn wait(&self) -> RemoteExit;

    fn close(&self) -> Result<(), RemoteError>;

    fn start(&self, target: &RemoteTarget) -> Result<(), RemoteError> {
        match target {
            RemoteTarget::Shell => self.shell(),
            RemoteTarget::Command(cmd) => self.exec(cmd),
            RemoteTarget::Subsystem(name) => self.request_subsystem(name),
        }
    }
}

/// An authenticated connection that can open session channels
pub trait RemoteConnection: Send + Sync {
    fn new_session(&self) -> Result<Arc<dyn RemoteSession>, RemoteError>;

    fn close(&self) -> Result<(), RemoteError>;
}

/// Dials and authenticates a connection
pub trait Connector {
    fn connect(&self, config: &ConnectConfig) -> Result<Box<dyn RemoteConnection>, RemoteError>;
}
