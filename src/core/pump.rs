//! Session I/O pumps
//!
//! Four tasks move data while a session runs: local input to remote stdin,
//! remote stdout and stderr to the local console, and resize events to
//! "window-change" requests.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::remote::{RemoteSession, RemoteStdin, WindowChange, WINDOW_CHANGE};
use super::resize::ResizeEvent;
use super::task::{CancelToken, TaskGroup, TaskHandle};
use crate::term::console::{ConsoleEmulator, CrosstermConsole};
use crate::term::keys::TranslatingInput;
use crate::term::{
    InputSource, OutputStream, Polled, TerminalBackend, TerminalCapabilities, WindowSize,
};

/// Chunks buffered between a remote reader thread and its pump
const OUTPUT_QUEUE_DEPTH: usize = 16;
const OUTPUT_CHUNK_SIZE: usize = 32 * 1024;

/// The session's three data pipes
pub struct RemotePipes {
    pub stdin: Box<dyn RemoteStdin>,
    pub stdout: Box<dyn Read + Send>,
    pub stderr: Box<dyn Read + Send>,
}

/// Pump tuning
#[derive(Clone, Copy, Debug)]
pub struct PumpOptions {
    /// Local input read size
    pub input_buffer_size: usize,
    /// Longest a pump blocks before re-checking cancellation
    pub check_interval: Duration,
}

/// Running pumps
pub struct PumpHandles {
    pub input: TaskHandle,
    /// stdout and stderr, in that order
    pub output: Vec<TaskHandle>,
    pub resize: Option<TaskHandle>,
}

impl PumpHandles {
    /// Both remote output streams reached EOF, or their pumps stopped
    pub fn output_finished(&self) -> bool {
        self.output.iter().all(TaskHandle::is_finished)
    }
}

/// Why the input pump stopped
#[derive(Debug)]
enum InputEnd {
    Cancelled,
    Eof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

pub struct SessionIOPump {
    terminal: Arc<dyn TerminalBackend>,
    remote: Arc<dyn RemoteSession>,
    caps: TerminalCapabilities,
    options: PumpOptions,
}

impl SessionIOPump {
    pub fn new(
        terminal: Arc<dyn TerminalBackend>,
        remote: Arc<dyn RemoteSession>,
        caps: TerminalCapabilities,
        options: PumpOptions,
    ) -> Self {
        Self {
            terminal,
            remote,
            caps,
            options,
        }
    }

    /// Start the pumps under `group`. The resize pump runs only when a
    /// resize stream is given; `size` is the size last sent to the remote.
    pub fn start(
        self,
        group: &mut TaskGroup,
        pipes: RemotePipes,
        resize: Option<(Receiver<ResizeEvent>, WindowSize)>,
    ) -> io::Result<PumpHandles> {
        let input = self.open_input()?;
        let RemotePipes {
            stdin,
            stdout,
            stderr,
        } = pipes;
        let options = self.options;

        let input_pump = group.spawn("stdin-pump", move |token| {
            pump_input(&token, input, stdin, options)
        })?;

        let mut output = Vec::with_capacity(2);
        for (stream, reader) in [(OutputStream::Stdout, stdout), (OutputStream::Stderr, stderr)] {
            let writer = self.open_output(stream);
            let chunks = forward_reads(stream, reader)?;
            let check = options.check_interval;
            output.push(group.spawn(&format!("{}-pump", stream.name()), move |token| {
                pump_output(&token, stream, chunks, writer, check)
            })?);
        }

        let mut handles = PumpHandles {
            input: input_pump,
            output,
            resize: None,
        };
        if let Some((events, size)) = resize {
            let mut forwarder = ResizeForwarder::new(self.terminal.clone(), self.remote.clone(), size);
            let check = options.check_interval;
            let pump = group.spawn("resize-pump", move |token| loop {
                if token.is_cancelled() {
                    break;
                }
                match events.recv_timeout(check) {
                    Ok(ResizeEvent) => forwarder.on_resize(),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
            handles.resize = Some(pump);
        }

        Ok(handles)
    }

    fn open_input(&self) -> io::Result<Box<dyn InputSource>> {
        if self.caps.emulate_input {
            let events = self.terminal.open_key_events()?;
            Ok(Box::new(TranslatingInput::new(events)))
        } else {
            self.terminal.open_input()
        }
    }

    fn open_output(&self, stream: OutputStream) -> Box<dyn Write + Send> {
        let out = self.terminal.open_output(stream);
        if self.caps.emulate_output {
            Box::new(ConsoleEmulator::new(CrosstermConsole::new(out)))
        } else {
            out
        }
    }
}

fn pump_input(
    token: &CancelToken,
    mut input: Box<dyn InputSource>,
    mut stdin: Box<dyn RemoteStdin>,
    options: PumpOptions,
) {
    let mut buf = vec![0u8; options.input_buffer_size.max(1)];
    let end = loop {
        if token.is_cancelled() {
            break InputEnd::Cancelled;
        }
        match input.read(&mut buf, options.check_interval) {
            Ok(Polled::Ready(0)) | Ok(Polled::Idle) => continue,
            Ok(Polled::Ready(n)) => {
                if let Err(e) = stdin.write_all(&buf[..n]).and_then(|_| stdin.flush()) {
                    break InputEnd::WriteFailed(e);
                }
            }
            Ok(Polled::Closed) => break InputEnd::Eof,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break InputEnd::ReadFailed(e),
        }
    };

    match end {
        InputEnd::Cancelled => {
            debug!("Input pump cancelled");
            return;
        }
        InputEnd::Eof => info!("Local input closed"),
        InputEnd::ReadFailed(e) => warn!("Failed to read local input: {}", e),
        InputEnd::WriteFailed(e) => warn!("Failed to write remote stdin: {}", e),
    }

    if let Err(e) = stdin.close() {
        warn!("Failed to close remote stdin: {}", e);
    }
}

/// Move blocking reads of a remote pipe onto a detached thread.
///
/// The thread ends at EOF, on a read error, or once the pump drops the
/// receiver and the next chunk arrives. Closing the channel unblocks it.
fn forward_reads(
    stream: OutputStream,
    mut reader: Box<dyn Read + Send>,
) -> io::Result<Receiver<io::Result<Vec<u8>>>> {
    let (tx, rx) = mpsc::sync_channel(OUTPUT_QUEUE_DEPTH);
    thread::Builder::new()
        .name(format!("remote-{}-reader", stream.name()))
        .spawn(move || {
            let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

fn pump_output(
    token: &CancelToken,
    stream: OutputStream,
    chunks: Receiver<io::Result<Vec<u8>>>,
    mut writer: Box<dyn Write + Send>,
    check_interval: Duration,
) {
    loop {
        if token.is_cancelled() {
            // Write out whatever already arrived
            while let Ok(Ok(chunk)) = chunks.try_recv() {
                if writer.write_all(&chunk).is_err() {
                    break;
                }
            }
            break;
        }
        match chunks.recv_timeout(check_interval) {
            Ok(Ok(chunk)) => {
                if let Err(e) = writer.write_all(&chunk).and_then(|_| writer.flush()) {
                    warn!("Failed to write local {}: {}", stream.name(), e);
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to read remote {}: {}", stream.name(), e);
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Remote {} closed", stream.name());
                break;
            }
        }
    }
    let _ = writer.flush();
}

/// Sends "window-change" when the local window size differs from the size
/// the remote last accepted
pub struct ResizeForwarder {
    terminal: Arc<dyn TerminalBackend>,
    remote: Arc<dyn RemoteSession>,
    last_sent: WindowSize,
}

impl ResizeForwarder {
    pub fn new(terminal: Arc<dyn TerminalBackend>, remote: Arc<dyn RemoteSession>, last_sent: WindowSize) -> Self {
        Self {
            terminal,
            remote,
            last_sent,
        }
    }

    pub fn last_sent(&self) -> WindowSize {
        self.last_sent
    }

    pub fn on_resize(&mut self) {
        let size = match self.terminal.window_size() {
            Ok(size) => size,
            Err(e) => {
                warn!("Failed to get window size: {}", e);
                return;
            }
        };
        if size == self.last_sent {
            return;
        }

        let payload = WindowChange::from(size).to_wire();
        match self.remote.send_request(WINDOW_CHANGE, false, &payload) {
            Ok(_) => {
                debug!("Window changed to {}x{}", size.width, size.height);
                self.last_sent = size;
            }
            Err(e) => warn!("Failed to send window-change: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{FakeRemote, FakeTerminal};

    fn options() -> PumpOptions {
        PumpOptions {
            input_buffer_size: 128,
            check_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_resize_forwarder_skips_unchanged_and_retries() {
        let terminal = FakeTerminal::new().with_size(WindowSize::new(80, 24));
        let remote = FakeRemote::new();
        let mut forwarder = ResizeForwarder::new(
            Arc::new(terminal.clone()),
            Arc::new(remote.clone()),
            WindowSize::new(80, 24),
        );

        forwarder.on_resize();
        assert!(remote.requests().is_empty());

        terminal.set_size(WindowSize::new(100, 30));
        remote.fail_next_requests(1);
        forwarder.on_resize();
        assert_eq!(forwarder.last_sent(), WindowSize::new(80, 24));

        forwarder.on_resize();
        assert_eq!(forwarder.last_sent(), WindowSize::new(100, 30));
        let requests = remote.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, WINDOW_CHANGE);
        assert_eq!(requests[0].1, WindowChange::from(WindowSize::new(100, 30)).to_wire().to_vec());
    }

    #[test]
    fn test_pumps_move_data_and_close_stdin() {
        let terminal = FakeTerminal::new().with_input(b"ls\n");
        let remote = FakeRemote::new().with_stdout(b"file\r\n").with_stderr(b"warn\r\n");
        let pipes = RemotePipes {
            stdin: remote.stdin_pipe().unwrap(),
            stdout: remote.stdout_pipe().unwrap(),
            stderr: remote.stderr_pipe().unwrap(),
        };

        let mut group = TaskGroup::new();
        let pumps = SessionIOPump::new(
            Arc::new(terminal.clone()),
            Arc::new(remote.clone()),
            TerminalCapabilities::NATIVE,
            options(),
        )
        .start(&mut group, pipes, None)
        .unwrap();
        assert_eq!(group.len(), 3);
        assert!(pumps.resize.is_none());

        remote.wait();
        terminal.wait_for_output(OutputStream::Stdout, b"file\r\n");
        terminal.wait_for_output(OutputStream::Stderr, b"warn\r\n");
        // Both remote streams are at EOF, so their pumps end on their own
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !pumps.output_finished() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(pumps.output_finished());
        group.cancel_and_join();
        assert!(pumps.input.is_finished());

        assert_eq!(remote.stdin_data(), b"ls\n");
        assert_eq!(remote.stdin_closes(), 1);
    }

    #[test]
    fn test_cancel_does_not_close_stdin() {
        let terminal = FakeTerminal::new().with_idle_input();
        let remote = FakeRemote::new();
        let pipes = RemotePipes {
            stdin: remote.stdin_pipe().unwrap(),
            stdout: remote.stdout_pipe().unwrap(),
            stderr: remote.stderr_pipe().unwrap(),
        };

        let mut group = TaskGroup::new();
        SessionIOPump::new(
            Arc::new(terminal),
            Arc::new(remote.clone()),
            TerminalCapabilities::NATIVE,
            options(),
        )
        .start(&mut group, pipes, None)
        .unwrap();
        group.cancel_and_join();

        assert_eq!(remote.stdin_closes(), 0);
    }
}
