//! Local terminal layer
//!
//! Raw-mode negotiation, window size queries, byte/key input and output
//! streams for the local console. Platform details live behind
//! [`TerminalBackend`].

pub mod console;
pub mod keys;
pub mod mode;
pub mod parser;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use keys::KeyEvent;

pub use mode::{ModeSlot, TerminalModeController};

/// Size of the visible terminal window in character cells
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u16,
    pub height: u16,
}

impl WindowSize {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

/// What the local terminal could not do natively after entering raw mode.
///
/// Fixed for the lifetime of a session once raw mode has been entered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TerminalCapabilities {
    /// Input must be read as key events and translated to bytes
    pub emulate_input: bool,
    /// Output escape sequences must be interpreted locally
    pub emulate_output: bool,
}

impl TerminalCapabilities {
    /// Terminal handles escape sequences in both directions
    pub const NATIVE: Self = Self {
        emulate_input: false,
        emulate_output: false,
    };
}

/// How resize notifications reach the process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeSource {
    /// SIGWINCH delivered by the kernel
    Signal,
    /// No notification mechanism; poll at the given interval
    Poll(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn name(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Result of a read that may time out
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Polled<T> {
    Ready(T),
    /// Nothing arrived before the timeout
    Idle,
    /// End of input
    Closed,
}

/// Local byte input with a bounded wait, so readers can observe cancellation
pub trait InputSource: Send {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Polled<usize>>;
}

/// Native key events, used when the console cannot produce VT input
pub trait KeyEventSource: Send {
    /// Next batch of key events. A batch may be empty when only non-key
    /// records (mouse, focus) were pending.
    fn read_events(&mut self, timeout: Duration) -> io::Result<Polled<Vec<KeyEvent>>>;
}

impl<S: KeyEventSource + ?Sized> KeyEventSource for Box<S> {
    fn read_events(&mut self, timeout: Duration) -> io::Result<Polled<Vec<KeyEvent>>> {
        (**self).read_events(timeout)
    }
}

/// Terminal mode errors
#[derive(Error, Debug)]
pub enum ModeError {
    #[error("failed to get {stream} mode: {source}")]
    GetMode {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to set {stream} mode: {source}")]
    SetMode {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to restore {0}")]
    Restore(String),

    #[error("{0}")]
    NotATerminal(String),
}

/// Platform terminal operations.
///
/// Methods take `&self`; implementations keep their saved modes behind a
/// lock so the backend can be shared between the runner and the pumps.
pub trait TerminalBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Switch the local terminal to raw mode, saving the previous modes.
    fn enter_raw_mode(&self) -> Result<TerminalCapabilities, ModeError>;

    /// Restore every saved mode. Safe to call more than once; only modes
    /// that were actually changed are touched.
    fn restore_mode(&self) -> Result<(), ModeError>;

    fn window_size(&self) -> io::Result<WindowSize>;

    fn resize_source(&self) -> ResizeSource;

    /// Open local standard input as a byte stream
    fn open_input(&self) -> io::Result<Box<dyn InputSource>>;

    /// Open local standard input as a key event stream
    fn open_key_events(&self) -> io::Result<Box<dyn KeyEventSource>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} terminal has no key event input", self.name()),
        ))
    }

    fn open_output(&self, stream: OutputStream) -> Box<dyn Write + Send>;
}

/// Terminal backend for the current platform
pub fn detect(resize_poll: Duration) -> Arc<dyn TerminalBackend> {
    #[cfg(unix)]
    {
        let _ = resize_poll;
        Arc::new(posix::PosixTerminal::new())
    }
    #[cfg(windows)]
    {
        Arc::new(windows::ConsoleTerminal::new(resize_poll))
    }
}

/// Check that stdin and stdout are attached to a terminal
pub fn ensure_terminal() -> Result<(), ModeError> {
    if io::stdin().is_terminal() && io::stdout().is_terminal() {
        return Ok(());
    }

    let mut message = String::from("stdin/stdout is not a terminal");
    if cfg!(windows) {
        message.push_str(" (under mintty/msys, run through winpty)");
    }
    Err(ModeError::NotATerminal(message))
}
