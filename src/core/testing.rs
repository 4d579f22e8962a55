//! In-memory terminal and remote session for tests

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::remote::{RemoteError, RemoteExit, RemoteSession, RemoteStdin, RemoteTarget};
use crate::term::keys::KeyEvent;
use crate::term::{
    InputSource, KeyEventSource, ModeError, OutputStream, Polled, ResizeSource, TerminalBackend,
    TerminalCapabilities, WindowSize,
};

#[derive(Default)]
struct TerminalShared {
    size: Mutex<WindowSize>,
    input: Mutex<VecDeque<Vec<u8>>>,
    keys: Mutex<VecDeque<Vec<KeyEvent>>>,
    idle_input: AtomicBool,
    caps: Mutex<TerminalCapabilities>,
    fail_raw: AtomicBool,
    raw_active: AtomicBool,
    raw_entries: AtomicUsize,
    restores: AtomicUsize,
    inputs_opened: AtomicUsize,
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
}

/// Scripted local terminal
#[derive(Clone, Default)]
pub struct FakeTerminal {
    shared: Arc<TerminalShared>,
}

impl FakeTerminal {
    pub fn new() -> Self {
        let terminal = Self::default();
        *terminal.shared.size.lock().unwrap() = WindowSize::new(80, 24);
        terminal
    }

    pub fn with_size(self, size: WindowSize) -> Self {
        self.set_size(size);
        self
    }

    /// Queue one chunk of byte input; input closes after the last chunk
    pub fn with_input(self, chunk: &[u8]) -> Self {
        self.shared.input.lock().unwrap().push_back(chunk.to_vec());
        self
    }

    /// Queue one batch of key events
    pub fn with_keys(self, batch: Vec<KeyEvent>) -> Self {
        self.shared.keys.lock().unwrap().push_back(batch);
        self
    }

    /// Input never closes on its own
    pub fn with_idle_input(self) -> Self {
        self.shared.idle_input.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_capabilities(self, caps: TerminalCapabilities) -> Self {
        *self.shared.caps.lock().unwrap() = caps;
        self
    }

    pub fn failing_raw_mode(self) -> Self {
        self.shared.fail_raw.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_size(&self, size: WindowSize) {
        *self.shared.size.lock().unwrap() = size;
    }

    pub fn raw_entries(&self) -> usize {
        self.shared.raw_entries.load(Ordering::SeqCst)
    }

    pub fn is_raw(&self) -> bool {
        self.shared.raw_active.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.shared.restores.load(Ordering::SeqCst)
    }

    pub fn inputs_opened(&self) -> usize {
        self.shared.inputs_opened.load(Ordering::SeqCst)
    }

    pub fn output(&self, stream: OutputStream) -> Vec<u8> {
        self.buffer(stream).lock().unwrap().clone()
    }

    /// Block until `stream` holds exactly `expected`
    pub fn wait_for_output(&self, stream: OutputStream, expected: &[u8]) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.output(stream) == expected {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(self.output(stream), expected, "{} output", stream.name());
    }

    fn buffer(&self, stream: OutputStream) -> &Mutex<Vec<u8>> {
        match stream {
            OutputStream::Stdout => &self.shared.stdout,
            OutputStream::Stderr => &self.shared.stderr,
        }
    }
}

impl TerminalBackend for FakeTerminal {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn enter_raw_mode(&self) -> Result<TerminalCapabilities, ModeError> {
        self.shared.raw_entries.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_raw.load(Ordering::SeqCst) {
            return Err(ModeError::SetMode {
                stream: "stdin",
                source: io::Error::new(io::ErrorKind::Other, "not a tty"),
            });
        }
        self.shared.raw_active.store(true, Ordering::SeqCst);
        Ok(*self.shared.caps.lock().unwrap())
    }

    fn restore_mode(&self) -> Result<(), ModeError> {
        self.shared.restores.fetch_add(1, Ordering::SeqCst);
        self.shared.raw_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn window_size(&self) -> io::Result<WindowSize> {
        Ok(*self.shared.size.lock().unwrap())
    }

    fn resize_source(&self) -> ResizeSource {
        ResizeSource::Poll(Duration::from_secs(3600))
    }

    fn open_input(&self) -> io::Result<Box<dyn InputSource>> {
        self.shared.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            shared: self.shared.clone(),
        }))
    }

    fn open_key_events(&self) -> io::Result<Box<dyn KeyEventSource>> {
        self.shared.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeKeys {
            shared: self.shared.clone(),
        }))
    }

    fn open_output(&self, stream: OutputStream) -> Box<dyn Write + Send> {
        Box::new(FakeOutput {
            terminal: self.clone(),
            stream,
        })
    }
}

fn idle_or_closed<T>(shared: &TerminalShared, timeout: Duration) -> Polled<T> {
    if shared.idle_input.load(Ordering::SeqCst) {
        thread::sleep(timeout);
        Polled::Idle
    } else {
        Polled::Closed
    }
}

struct FakeInput {
    shared: Arc<TerminalShared>,
}

impl InputSource for FakeInput {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Polled<usize>> {
        let mut input = self.shared.input.lock().unwrap();
        let Some(mut chunk) = input.pop_front() else {
            drop(input);
            return Ok(idle_or_closed(&self.shared, timeout));
        };
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            input.push_front(chunk.split_off(n));
        }
        Ok(Polled::Ready(n))
    }
}

struct FakeKeys {
    shared: Arc<TerminalShared>,
}

impl KeyEventSource for FakeKeys {
    fn read_events(&mut self, timeout: Duration) -> io::Result<Polled<Vec<KeyEvent>>> {
        let batch = self.shared.keys.lock().unwrap().pop_front();
        match batch {
            Some(batch) => Ok(Polled::Ready(batch)),
            None => Ok(idle_or_closed(&self.shared, timeout)),
        }
    }
}

struct FakeOutput {
    terminal: FakeTerminal,
    stream: OutputStream,
}

impl Write for FakeOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.terminal.buffer(self.stream).lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct RemoteState {
    pty_requests: Vec<(String, WindowSize)>,
    started: Vec<RemoteTarget>,
    stdin: Vec<u8>,
    stdin_closes: usize,
    requests: Vec<(String, Vec<u8>)>,
    fail_requests: usize,
    fail_pty: bool,
    stdout: Vec<u8>,
    stdout_delay: Duration,
    stderr: Vec<u8>,
    exit: RemoteExit,
    finished: bool,
    closes: usize,
}

struct RemoteShared {
    state: Mutex<RemoteState>,
    changed: Condvar,
}

/// Recording remote session. `wait` returns once remote stdin is closed,
/// the session is closed, or [`FakeRemote::finish`] is called.
#[derive(Clone)]
pub struct FakeRemote {
    shared: Arc<RemoteShared>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        let state = RemoteState {
            pty_requests: Vec::new(),
            started: Vec::new(),
            stdin: Vec::new(),
            stdin_closes: 0,
            requests: Vec::new(),
            fail_requests: 0,
            fail_pty: false,
            stdout: Vec::new(),
            stdout_delay: Duration::ZERO,
            stderr: Vec::new(),
            exit: RemoteExit::Success,
            finished: false,
            closes: 0,
        };
        Self {
            shared: Arc::new(RemoteShared {
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.shared.state.lock().unwrap()
    }

    pub fn with_stdout(self, data: &[u8]) -> Self {
        self.state().stdout = data.to_vec();
        self
    }

    /// Remote stdout produces nothing until `delay` has passed
    pub fn with_stdout_delay(self, delay: Duration) -> Self {
        self.state().stdout_delay = delay;
        self
    }

    pub fn with_stderr(self, data: &[u8]) -> Self {
        self.state().stderr = data.to_vec();
        self
    }

    pub fn with_exit(self, exit: RemoteExit) -> Self {
        self.state().exit = exit;
        self
    }

    pub fn failing_pty(self) -> Self {
        self.state().fail_pty = true;
        self
    }

    pub fn fail_next_requests(&self, count: usize) {
        self.state().fail_requests = count;
    }

    /// Make the remote process exit
    pub fn finish(&self) {
        self.state().finished = true;
        self.shared.changed.notify_all();
    }

    pub fn pty_requests(&self) -> Vec<(String, WindowSize)> {
        self.state().pty_requests.clone()
    }

    pub fn started(&self) -> Vec<RemoteTarget> {
        self.state().started.clone()
    }

    pub fn stdin_data(&self) -> Vec<u8> {
        self.state().stdin.clone()
    }

    pub fn stdin_closes(&self) -> usize {
        self.state().stdin_closes
    }

    pub fn requests(&self) -> Vec<(String, Vec<u8>)> {
        self.state().requests.clone()
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

impl RemoteSession for FakeRemote {
    fn request_pty(&self, term: &str, size: WindowSize) -> Result<(), RemoteError> {
        let mut state = self.state();
        if state.fail_pty {
            return Err(RemoteError::Rejected("pty-req".into()));
        }
        state.pty_requests.push((term.to_string(), size));
        Ok(())
    }

    fn stdin_pipe(&self) -> Result<Box<dyn RemoteStdin>, RemoteError> {
        Ok(Box::new(FakeStdin {
            remote: self.clone(),
        }))
    }

    fn stdout_pipe(&self) -> Result<Box<dyn Read + Send>, RemoteError> {
        let state = self.state();
        Ok(Box::new(SlowReader {
            delay: Some(state.stdout_delay).filter(|d| !d.is_zero()),
            inner: Cursor::new(state.stdout.clone()),
        }))
    }

    fn stderr_pipe(&self) -> Result<Box<dyn Read + Send>, RemoteError> {
        Ok(Box::new(Cursor::new(self.state().stderr.clone())))
    }

    fn shell(&self) -> Result<(), RemoteError> {
        self.state().started.push(RemoteTarget::Shell);
        Ok(())
    }

    fn exec(&self, command: &str) -> Result<(), RemoteError> {
        self.state().started.push(RemoteTarget::Command(command.to_string()));
        Ok(())
    }

    fn request_subsystem(&self, name: &str) -> Result<(), RemoteError> {
        self.state().started.push(RemoteTarget::Subsystem(name.to_string()));
        Ok(())
    }

    fn send_request(&self, name: &str, _want_reply: bool, payload: &[u8]) -> Result<bool, RemoteError> {
        let mut state = self.state();
        if state.fail_requests > 0 {
            state.fail_requests -= 1;
            return Err(RemoteError::Closed);
        }
        state.requests.push((name.to_string(), payload.to_vec()));
        Ok(true)
    }

    fn wait(&self) -> RemoteExit {
        let mut state = self.state();
        while state.stdin_closes == 0 && state.closes == 0 && !state.finished {
            state = self.shared.changed.wait(state).unwrap();
        }
        state.exit.clone()
    }

    fn close(&self) -> Result<(), RemoteError> {
        self.state().closes += 1;
        self.shared.changed.notify_all();
        Ok(())
    }
}

/// Sleeps before its first read
struct SlowReader {
    delay: Option<Duration>,
    inner: Cursor<Vec<u8>>,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(delay) = self.delay.take() {
            thread::sleep(delay);
        }
        self.inner.read(buf)
    }
}

struct FakeStdin {
    remote: FakeRemote,
}

impl Write for FakeStdin {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.remote.state().stdin.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RemoteStdin for FakeStdin {
    fn close(self: Box<Self>) -> io::Result<()> {
        self.remote.state().stdin_closes += 1;
        self.remote.shared.changed.notify_all();
        Ok(())
    }
}
