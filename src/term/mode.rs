//! Raw mode bookkeeping
//!
//! [`ModeSlot`] records whether a stream's mode was changed and still needs
//! restoring. [`ConsoleModes`] holds the console mode negotiation with its
//! fallbacks, written against [`ConsoleModeApi`] so it runs on any platform.

use std::io;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{ModeError, TerminalBackend, TerminalCapabilities};

/// Saved mode for one stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModeSlot<T> {
    /// Never changed
    #[default]
    Unset,
    /// Changed; holds the mode to restore
    Active(T),
    /// Restored (or restoration attempted)
    Restored,
}

impl<T> ModeSlot<T> {
    pub fn capture(&mut self, original: T) {
        *self = ModeSlot::Active(original);
    }

    /// Take the saved mode. Each capture is handed out at most once.
    pub fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, ModeSlot::Restored) {
            ModeSlot::Active(mode) => Some(mode),
            ModeSlot::Unset => {
                *self = ModeSlot::Unset;
                None
            }
            ModeSlot::Restored => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ModeSlot::Active(_))
    }
}

/// Owns local raw mode for a session.
///
/// Restoration never fails from the caller's point of view: errors are
/// logged, since teardown has nobody left to report them to.
pub struct TerminalModeController {
    backend: Arc<dyn TerminalBackend>,
}

impl TerminalModeController {
    pub fn new(backend: Arc<dyn TerminalBackend>) -> Self {
        Self { backend }
    }

    pub fn enter_raw_mode(&self) -> Result<TerminalCapabilities, ModeError> {
        let caps = self.backend.enter_raw_mode()?;
        info!(
            "Raw mode set on {} terminal (emulate_input={}, emulate_output={})",
            self.backend.name(),
            caps.emulate_input,
            caps.emulate_output
        );
        Ok(caps)
    }

    pub fn restore_mode(&self) {
        match self.backend.restore_mode() {
            Ok(()) => debug!("Terminal mode restored"),
            Err(e) => error!("Failed to restore terminal mode: {}", e),
        }
    }
}

// Console mode bits
pub const ENABLE_PROCESSED_INPUT: u32 = 0x0001;
pub const ENABLE_LINE_INPUT: u32 = 0x0002;
pub const ENABLE_ECHO_INPUT: u32 = 0x0004;
pub const ENABLE_VIRTUAL_TERMINAL_INPUT: u32 = 0x0200;
pub const ENABLE_VIRTUAL_TERMINAL_PROCESSING: u32 = 0x0004;
pub const DISABLE_NEWLINE_AUTO_RETURN: u32 = 0x0008;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsoleHandle {
    Input,
    Output,
    Error,
}

impl ConsoleHandle {
    pub fn name(self) -> &'static str {
        match self {
            ConsoleHandle::Input => "stdin",
            ConsoleHandle::Output => "stdout",
            ConsoleHandle::Error => "stderr",
        }
    }
}

/// Get/set console mode words
pub trait ConsoleModeApi {
    fn get_mode(&self, handle: ConsoleHandle) -> io::Result<u32>;
    fn set_mode(&self, handle: ConsoleHandle, mode: u32) -> io::Result<()>;
}

/// Saved console modes for the three standard handles
#[derive(Debug, Default)]
pub struct ConsoleModes {
    input: ModeSlot<u32>,
    output: ModeSlot<u32>,
    error: ModeSlot<u32>,
}

impl ConsoleModes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put the console into raw mode, falling back to emulation when the
    /// virtual-terminal flags are rejected.
    ///
    /// Only failing to switch stdin out of cooked mode is fatal. A stream
    /// left in emulation is not recorded for restore.
    pub fn negotiate(&mut self, api: &dyn ConsoleModeApi) -> Result<TerminalCapabilities, ModeError> {
        let mut caps = TerminalCapabilities::NATIVE;

        let input = ConsoleHandle::Input;
        let original = get(api, input)?;
        let raw = original & !(ENABLE_ECHO_INPUT | ENABLE_PROCESSED_INPUT | ENABLE_LINE_INPUT);
        if api.set_mode(input, raw | ENABLE_VIRTUAL_TERMINAL_INPUT).is_err() {
            api.set_mode(input, raw).map_err(|source| ModeError::SetMode {
                stream: input.name(),
                source,
            })?;
            info!("Console has no VT input, translating key events");
            caps.emulate_input = true;
        }
        self.input.capture(original);

        let output = ConsoleHandle::Output;
        match enable_vt_output(api, output)? {
            Some(original) => self.output.capture(original),
            None => {
                info!("Console has no VT output, emulating escape sequences");
                caps.emulate_output = true;
            }
        }

        // The emulator writes stderr through the same console API
        if !caps.emulate_output {
            let err = ConsoleHandle::Error;
            match get(api, err).and_then(|_| enable_vt_output(api, err)) {
                Ok(Some(original)) => self.error.capture(original),
                Ok(None) => warn!("Failed to enable VT processing on stderr, passing through"),
                Err(e) => warn!("Failed to read stderr console mode: {}", e),
            }
        }

        Ok(caps)
    }

    /// Restore every captured mode, collecting failures into one error.
    pub fn restore(&mut self, api: &dyn ConsoleModeApi) -> Result<(), ModeError> {
        let mut failures = Vec::new();
        for (handle, slot) in [
            (ConsoleHandle::Input, &mut self.input),
            (ConsoleHandle::Output, &mut self.output),
            (ConsoleHandle::Error, &mut self.error),
        ] {
            if let Some(mode) = slot.take() {
                if let Err(e) = api.set_mode(handle, mode) {
                    failures.push(format!("{}: {}", handle.name(), e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ModeError::Restore(failures.join(", ")))
        }
    }
}

fn get(api: &dyn ConsoleModeApi, handle: ConsoleHandle) -> Result<u32, ModeError> {
    api.get_mode(handle).map_err(|source| ModeError::GetMode {
        stream: handle.name(),
        source,
    })
}

/// Enable VT processing on an output handle. `Ok(None)` means the console
/// rejected both variants and the mode is unchanged.
fn enable_vt_output(api: &dyn ConsoleModeApi, handle: ConsoleHandle) -> Result<Option<u32>, ModeError> {
    let original = get(api, handle)?;
    let vt = original | ENABLE_VIRTUAL_TERMINAL_PROCESSING;
    if api.set_mode(handle, vt | DISABLE_NEWLINE_AUTO_RETURN).is_ok() {
        return Ok(Some(original));
    }
    if api.set_mode(handle, vt).is_ok() {
        return Ok(Some(original));
    }
    Ok(None)
}
