//! POSIX terminal backend (termios + poll)

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    InputSource, ModeError, ModeSlot, OutputStream, Polled, ResizeSource, TerminalBackend,
    TerminalCapabilities, WindowSize,
};

pub struct PosixTerminal {
    stdin_mode: Mutex<ModeSlot<libc::termios>>,
}

impl Default for PosixTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl PosixTerminal {
    pub fn new() -> Self {
        Self {
            stdin_mode: Mutex::new(ModeSlot::Unset),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, ModeSlot<libc::termios>> {
        self.stdin_mode.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TerminalBackend for PosixTerminal {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn enter_raw_mode(&self) -> Result<TerminalCapabilities, ModeError> {
        let fd = libc::STDIN_FILENO;
        // SAFETY: termios is plain data and tcgetattr fills it completely
        let mut original: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
            return Err(ModeError::GetMode {
                stream: "stdin",
                source: io::Error::last_os_error(),
            });
        }

        let mut raw = original;
        unsafe { libc::cfmakeraw(&mut raw) };
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(ModeError::SetMode {
                stream: "stdin",
                source: io::Error::last_os_error(),
            });
        }

        self.slot().capture(original);
        Ok(TerminalCapabilities::NATIVE)
    }

    fn restore_mode(&self) -> Result<(), ModeError> {
        let Some(original) = self.slot().take() else {
            return Ok(());
        };
        if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &original) } != 0 {
            return Err(ModeError::Restore(format!(
                "stdin: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn window_size(&self) -> io::Result<WindowSize> {
        let (width, height) = crossterm::terminal::size()?;
        Ok(WindowSize { width, height })
    }

    fn resize_source(&self) -> ResizeSource {
        ResizeSource::Signal
    }

    fn open_input(&self) -> io::Result<Box<dyn InputSource>> {
        Ok(Box::new(FdInput {
            fd: libc::STDIN_FILENO,
        }))
    }

    fn open_output(&self, stream: OutputStream) -> Box<dyn Write + Send> {
        match stream {
            OutputStream::Stdout => Box::new(io::stdout()),
            OutputStream::Stderr => Box::new(io::stderr()),
        }
    }
}

/// Reads a file descriptor, waiting with poll(2) so the caller can time out
pub struct FdInput {
    fd: libc::c_int,
}

impl FdInput {
    pub fn new(fd: libc::c_int) -> Self {
        Self { fd }
    }
}

impl InputSource for FdInput {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Polled<usize>> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Polled::Idle);
            }
            return Err(err);
        }
        if ready == 0 {
            return Ok(Polled::Idle);
        }

        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => Ok(Polled::Idle),
                _ => Err(err),
            };
        }
        if n == 0 {
            return Ok(Polled::Closed);
        }
        Ok(Polled::Ready(n as usize))
    }
}
