//! Key event translation for consoles without virtual-terminal input
//!
//! Converts native key-down events into the byte sequences an xterm-style
//! terminal would send, so the remote side sees ordinary terminal input.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bitflags::bitflags;

use super::{InputSource, KeyEventSource, Polled};

/// Virtual key codes
pub mod vk {
    pub const BACK: u16 = 0x08;
    pub const PAUSE: u16 = 0x13;
    pub const ESCAPE: u16 = 0x1B;
    pub const PRIOR: u16 = 0x21;
    pub const NEXT: u16 = 0x22;
    pub const END: u16 = 0x23;
    pub const HOME: u16 = 0x24;
    pub const LEFT: u16 = 0x25;
    pub const UP: u16 = 0x26;
    pub const RIGHT: u16 = 0x27;
    pub const DOWN: u16 = 0x28;
    pub const INSERT: u16 = 0x2D;
    pub const DELETE: u16 = 0x2E;
    pub const F1: u16 = 0x70;
    pub const F2: u16 = 0x71;
    pub const F3: u16 = 0x72;
    pub const F4: u16 = 0x73;
    pub const F5: u16 = 0x74;
    pub const F6: u16 = 0x75;
    pub const F7: u16 = 0x76;
    pub const F8: u16 = 0x77;
    pub const F9: u16 = 0x78;
    pub const F10: u16 = 0x79;
    pub const F11: u16 = 0x7A;
    pub const F12: u16 = 0x7B;
}

bitflags! {
    /// Modifier and lock state reported with each key event
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ControlKeyState: u32 {
        const RIGHT_ALT  = 0x0001;
        const LEFT_ALT   = 0x0002;
        const RIGHT_CTRL = 0x0004;
        const LEFT_CTRL  = 0x0008;
        const SHIFT      = 0x0010;
        const NUMLOCK    = 0x0020;
        const SCROLLLOCK = 0x0040;
        const CAPSLOCK   = 0x0080;
        const ENHANCED   = 0x0100;
    }
}

impl ControlKeyState {
    pub fn ctrl(self) -> bool {
        self.intersects(Self::LEFT_CTRL | Self::RIGHT_CTRL)
    }

    pub fn alt(self) -> bool {
        self.intersects(Self::LEFT_ALT | Self::RIGHT_ALT)
    }

    pub fn shift(self) -> bool {
        self.contains(Self::SHIFT)
    }
}

/// A single key event from the console input queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key_down: bool,
    pub virtual_key: u16,
    /// One UTF-16 code unit; may be half of a surrogate pair
    pub unicode_char: u16,
    pub control_state: ControlKeyState,
}

impl KeyEvent {
    /// Key-down event for a virtual key with no character payload
    pub fn key(virtual_key: u16, control_state: ControlKeyState) -> Self {
        Self {
            key_down: true,
            virtual_key,
            unicode_char: 0,
            control_state,
        }
    }

    /// Key-down event carrying a UTF-16 code unit
    pub fn unit(unicode_char: u16, control_state: ControlKeyState) -> Self {
        Self {
            key_down: true,
            virtual_key: 0,
            unicode_char,
            control_state,
        }
    }
}

/// Letters for ESC [ <letter> cursor keys
fn cursor_letter(virtual_key: u16) -> Option<u8> {
    match virtual_key {
        vk::UP => Some(b'A'),
        vk::DOWN => Some(b'B'),
        vk::RIGHT => Some(b'C'),
        vk::LEFT => Some(b'D'),
        vk::HOME => Some(b'H'),
        vk::END => Some(b'F'),
        _ => None,
    }
}

/// Codes for ESC [ <code> ~ function keys F5-F12
fn function_code(virtual_key: u16) -> Option<&'static [u8; 2]> {
    match virtual_key {
        vk::F5 => Some(b"15"),
        vk::F6 => Some(b"17"),
        vk::F7 => Some(b"18"),
        vk::F8 => Some(b"19"),
        vk::F9 => Some(b"20"),
        vk::F10 => Some(b"21"),
        vk::F11 => Some(b"23"),
        vk::F12 => Some(b"24"),
        _ => None,
    }
}

/// Map a key event to its escape sequence.
///
/// Pure: the result depends only on the event. Returns `None` when the key
/// has no special sequence and should be handled as a plain character.
pub fn key_sequence(event: &KeyEvent) -> Option<Vec<u8>> {
    let state = event.control_state;
    let vk = event.virtual_key;

    if let Some(letter) = cursor_letter(vk) {
        return Some(if state.ctrl() {
            vec![0x1B, b'[', b'1', b';', b'5', letter]
        } else {
            vec![0x1B, b'[', letter]
        });
    }

    match vk {
        vk::BACK => {
            if state.alt() && !state.ctrl() {
                return Some(vec![0x1B, 0x08]);
            }
            return Some(vec![0x7F]);
        }
        vk::PAUSE => return Some(vec![0x1A]),
        vk::ESCAPE => return Some(vec![0x1B]),
        vk::INSERT => return Some(b"\x1b[2~".to_vec()),
        vk::DELETE => return Some(b"\x1b[3~".to_vec()),
        vk::PRIOR => return Some(b"\x1b[5~".to_vec()),
        vk::NEXT => return Some(b"\x1b[6~".to_vec()),
        vk::F1 => return Some(b"\x1bOP".to_vec()),
        vk::F2 => return Some(b"\x1bOQ".to_vec()),
        vk::F3 => return Some(b"\x1bOR".to_vec()),
        vk::F4 => return Some(b"\x1bOS".to_vec()),
        _ => {}
    }

    if let Some(code) = function_code(vk) {
        return Some(vec![0x1B, b'[', code[0], code[1], b'~']);
    }

    // Alt + printable ASCII = ESC prefix
    let ch = event.unicode_char;
    if (0x20..=0x7E).contains(&ch) && state.alt() && !state.ctrl() {
        return Some(vec![0x1B, ch as u8]);
    }

    None
}

fn is_surrogate(unit: u16) -> bool {
    (0xD800..=0xDFFF).contains(&unit)
}

fn combine_surrogates(high: u16, low: u16) -> char {
    if (0xD800..=0xDBFF).contains(&high) && (0xDC00..=0xDFFF).contains(&low) {
        let code = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
        char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
    } else {
        char::REPLACEMENT_CHARACTER
    }
}

/// Stateful translator: key sequences plus UTF-16 character reassembly
#[derive(Debug, Default)]
pub struct InputTranslator {
    pending_unit: Option<u16>,
}

impl InputTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether half of a surrogate pair is waiting for its partner
    pub fn has_pending(&self) -> bool {
        self.pending_unit.is_some()
    }

    /// Translate one event. Key-up events and events with nothing to send
    /// yield `None`.
    pub fn translate(&mut self, event: &KeyEvent) -> Option<Vec<u8>> {
        if !event.key_down {
            return None;
        }

        if let Some(seq) = key_sequence(event) {
            return Some(seq);
        }

        let unit = event.unicode_char;
        let ch = if let Some(first) = self.pending_unit.take() {
            combine_surrogates(first, unit)
        } else if is_surrogate(unit) {
            self.pending_unit = Some(unit);
            return None;
        } else if unit == 0 {
            return None;
        } else {
            char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER)
        };

        let mut buf = [0u8; 4];
        Some(ch.encode_utf8(&mut buf).as_bytes().to_vec())
    }
}

/// Byte input built from a key event source and an [`InputTranslator`]
pub struct TranslatingInput<S> {
    source: S,
    translator: InputTranslator,
    pending: VecDeque<u8>,
}

impl<S: KeyEventSource> TranslatingInput<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            translator: InputTranslator::new(),
            pending: VecDeque::new(),
        }
    }

    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

impl<S: KeyEventSource> InputSource for TranslatingInput<S> {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Polled<usize>> {
        if buf.is_empty() {
            return Ok(Polled::Ready(0));
        }
        if !self.pending.is_empty() {
            return Ok(Polled::Ready(self.drain_into(buf)));
        }

        match self.source.read_events(timeout)? {
            Polled::Ready(events) => {
                for event in &events {
                    if let Some(bytes) = self.translator.translate(event) {
                        self.pending.extend(bytes);
                    }
                }
                if self.pending.is_empty() {
                    Ok(Polled::Idle)
                } else {
                    Ok(Polled::Ready(self.drain_into(buf)))
                }
            }
            Polled::Idle => Ok(Polled::Idle),
            Polled::Closed => Ok(Polled::Closed),
        }
    }
}
