//! Windows console backend
//!
//! Enables VT processing where the console supports it and falls back to
//! key event translation and output emulation where it does not.

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use windows::Win32::Foundation::{HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Storage::FileSystem::ReadFile;
use windows::Win32::System::Console::{
    GetConsoleMode, GetStdHandle, ReadConsoleInputW, SetConsoleMode, CONSOLE_MODE, INPUT_RECORD,
    STD_ERROR_HANDLE, STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows::Win32::System::Threading::WaitForSingleObject;

use super::keys::{ControlKeyState, KeyEvent};
use super::mode::{ConsoleHandle, ConsoleModeApi, ConsoleModes};
use super::{
    InputSource, KeyEventSource, ModeError, OutputStream, Polled, ResizeSource, TerminalBackend,
    TerminalCapabilities, WindowSize,
};

const KEY_EVENT_TYPE: u16 = 0x0001;

fn std_handle(which: STD_HANDLE) -> io::Result<HANDLE> {
    unsafe { GetStdHandle(which) }.map_err(io::Error::from)
}

fn handle_for(handle: ConsoleHandle) -> io::Result<HANDLE> {
    std_handle(match handle {
        ConsoleHandle::Input => STD_INPUT_HANDLE,
        ConsoleHandle::Output => STD_OUTPUT_HANDLE,
        ConsoleHandle::Error => STD_ERROR_HANDLE,
    })
}

/// Console mode calls on the process's standard handles
pub struct WinConsoleApi;

impl ConsoleModeApi for WinConsoleApi {
    fn get_mode(&self, handle: ConsoleHandle) -> io::Result<u32> {
        let h = handle_for(handle)?;
        let mut mode = CONSOLE_MODE(0);
        unsafe { GetConsoleMode(h, &mut mode) }.map_err(io::Error::from)?;
        Ok(mode.0)
    }

    fn set_mode(&self, handle: ConsoleHandle, mode: u32) -> io::Result<()> {
        let h = handle_for(handle)?;
        unsafe { SetConsoleMode(h, CONSOLE_MODE(mode)) }.map_err(io::Error::from)
    }
}

pub struct ConsoleTerminal {
    modes: Mutex<ConsoleModes>,
    resize_poll: Duration,
}

impl ConsoleTerminal {
    pub fn new(resize_poll: Duration) -> Self {
        Self {
            modes: Mutex::new(ConsoleModes::new()),
            resize_poll,
        }
    }

    fn modes(&self) -> std::sync::MutexGuard<'_, ConsoleModes> {
        self.modes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TerminalBackend for ConsoleTerminal {
    fn name(&self) -> &'static str {
        "windows console"
    }

    fn enter_raw_mode(&self) -> Result<TerminalCapabilities, ModeError> {
        self.modes().negotiate(&WinConsoleApi)
    }

    fn restore_mode(&self) -> Result<(), ModeError> {
        self.modes().restore(&WinConsoleApi)
    }

    fn window_size(&self) -> io::Result<WindowSize> {
        let (width, height) = crossterm::terminal::size()?;
        Ok(WindowSize { width, height })
    }

    fn resize_source(&self) -> ResizeSource {
        // Consoles report buffer changes as input records, which VT input
        // mode swallows; poll instead.
        ResizeSource::Poll(self.resize_poll)
    }

    fn open_input(&self) -> io::Result<Box<dyn InputSource>> {
        handle_for(ConsoleHandle::Input)?;
        Ok(Box::new(ConsoleByteInput))
    }

    fn open_key_events(&self) -> io::Result<Box<dyn KeyEventSource>> {
        handle_for(ConsoleHandle::Input)?;
        Ok(Box::new(ConsoleKeyInput))
    }

    fn open_output(&self, stream: OutputStream) -> Box<dyn Write + Send> {
        match stream {
            OutputStream::Stdout => Box::new(io::stdout()),
            OutputStream::Stderr => Box::new(io::stderr()),
        }
    }
}

fn timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32
}

/// Wait for the input handle to be signaled. `false` on timeout.
fn wait_input(h: HANDLE, timeout: Duration) -> io::Result<bool> {
    let event = unsafe { WaitForSingleObject(h, timeout_ms(timeout)) };
    if event == WAIT_OBJECT_0 {
        Ok(true)
    } else if event == WAIT_TIMEOUT {
        Ok(false)
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Console input in VT mode, read as bytes
struct ConsoleByteInput;

impl InputSource for ConsoleByteInput {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Polled<usize>> {
        let h = handle_for(ConsoleHandle::Input)?;
        if !wait_input(h, timeout)? {
            return Ok(Polled::Idle);
        }

        let mut read = 0u32;
        unsafe { ReadFile(h, Some(buf), Some(&mut read as *mut u32), None) }.map_err(io::Error::from)?;
        if read == 0 {
            return Ok(Polled::Closed);
        }
        Ok(Polled::Ready(read as usize))
    }
}

/// Console input read as raw input records
struct ConsoleKeyInput;

impl KeyEventSource for ConsoleKeyInput {
    fn read_events(&mut self, timeout: Duration) -> io::Result<Polled<Vec<KeyEvent>>> {
        let h = handle_for(ConsoleHandle::Input)?;
        if !wait_input(h, timeout)? {
            return Ok(Polled::Idle);
        }

        let mut records = [INPUT_RECORD::default(); 2];
        let mut count = 0u32;
        unsafe { ReadConsoleInputW(h, &mut records, &mut count) }.map_err(io::Error::from)?;
        if count == 0 {
            return Ok(Polled::Closed);
        }

        let events = records[..count as usize]
            .iter()
            .filter(|record| record.EventType == KEY_EVENT_TYPE)
            .map(|record| {
                // SAFETY: EventType says the union holds a key event
                let key = unsafe { record.Event.KeyEvent };
                KeyEvent {
                    key_down: key.bKeyDown.as_bool(),
                    virtual_key: key.wVirtualKeyCode,
                    unicode_char: unsafe { key.uChar.UnicodeChar },
                    control_state: ControlKeyState::from_bits_retain(key.dwControlKeyState),
                }
            })
            .collect();
        Ok(Polled::Ready(events))
    }
}
