//! Escape sequence parser
//!
//! Splits a VT/ANSI byte stream into [`ConsoleOp`]s. State carries across
//! calls, so sequences and UTF-8 characters may be split anywhere.

use std::io;

use crossterm::style::Attribute;

use super::console::{Color, ConsoleOp, ConsoleSink, EraseMode};

/// Longest OSC payload kept; the rest is dropped
const MAX_OSC_LEN: usize = 4096;

/// Parser state machine
pub struct EscapeParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    osc: Vec<u8>,
    /// Printable text waiting to be emitted as one `Print`
    text: String,
    /// Incomplete UTF-8 sequence
    utf8: Vec<u8>,
    utf8_len: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    /// Malformed CSI, skip to its final byte
    CsiIgnore,
    OscString,
    EscapeInOsc,
}

impl Default for EscapeParser {
    fn default() -> Self {
        Self::new()
    }
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

impl EscapeParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc: Vec::new(),
            text: String::new(),
            utf8: Vec::with_capacity(4),
            utf8_len: 0,
        }
    }

    /// Parse a chunk, emitting operations to `sink`. Text is batched up to
    /// the end of the chunk.
    pub fn advance(&mut self, bytes: &[u8], sink: &mut impl ConsoleSink) -> io::Result<()> {
        for &byte in bytes {
            self.feed(byte, sink)?;
        }
        self.flush_text(sink)
    }

    fn emit(&mut self, op: ConsoleOp, sink: &mut impl ConsoleSink) -> io::Result<()> {
        self.flush_text(sink)?;
        sink.apply(op)
    }

    fn flush_text(&mut self, sink: &mut impl ConsoleSink) -> io::Result<()> {
        if self.text.is_empty() {
            return Ok(());
        }
        sink.apply(ConsoleOp::Print(std::mem::take(&mut self.text)))
    }

    /// Feed a single byte to the parser
    fn feed(&mut self, byte: u8, sink: &mut impl ConsoleSink) -> io::Result<()> {
        let in_osc = matches!(self.state, ParserState::OscString | ParserState::EscapeInOsc);

        // A control byte ends any partial UTF-8 character
        if byte < 0x20 && !self.utf8.is_empty() {
            self.abandon_utf8();
        }

        if byte < 0x20 && !in_osc {
            return match byte {
                0x1B => {
                    self.enter_escape();
                    Ok(())
                }
                0x18 | 0x1A => {
                    // CAN / SUB abort the current sequence
                    self.state = ParserState::Ground;
                    Ok(())
                }
                0x07 => self.emit(ConsoleOp::Bell, sink),
                0x08 => self.emit(ConsoleOp::Backspace, sink),
                0x09 => self.emit(ConsoleOp::Tab, sink),
                0x0A | 0x0B | 0x0C => self.emit(ConsoleOp::LineFeed, sink),
                0x0D => self.emit(ConsoleOp::CarriageReturn, sink),
                _ => Ok(()),
            };
        }

        match self.state {
            ParserState::Ground => {
                self.ground(byte);
                Ok(())
            }
            ParserState::Escape => self.escape(byte, sink),
            ParserState::EscapeIntermediate => {
                self.escape_intermediate(byte);
                Ok(())
            }
            ParserState::CsiEntry => self.csi_entry(byte, sink),
            ParserState::CsiParam => self.csi_param(byte, sink),
            ParserState::CsiIntermediate => self.csi_intermediate(byte, sink),
            ParserState::CsiIgnore => {
                if (0x40..=0x7E).contains(&byte) {
                    self.state = ParserState::Ground;
                }
                Ok(())
            }
            ParserState::OscString => self.osc_string(byte, sink),
            ParserState::EscapeInOsc => self.escape_in_osc(byte, sink),
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn abandon_utf8(&mut self) {
        self.utf8.clear();
        self.utf8_len = 0;
        self.text.push(char::REPLACEMENT_CHARACTER);
    }

    fn ground(&mut self, byte: u8) {
        match byte {
            0x20..=0x7E => {
                if !self.utf8.is_empty() {
                    self.abandon_utf8();
                }
                self.text.push(char::from(byte));
            }
            0x7F => {}
            0x80..=0xBF if !self.utf8.is_empty() => {
                self.utf8.push(byte);
                if self.utf8.len() == self.utf8_len {
                    match std::str::from_utf8(&self.utf8) {
                        Ok(s) => self.text.push_str(s),
                        Err(_) => self.text.push(char::REPLACEMENT_CHARACTER),
                    }
                    self.utf8.clear();
                    self.utf8_len = 0;
                }
            }
            _ => {
                if !self.utf8.is_empty() {
                    self.abandon_utf8();
                }
                match utf8_len(byte) {
                    0 => self.text.push(char::REPLACEMENT_CHARACTER),
                    len => {
                        self.utf8.push(byte);
                        self.utf8_len = len;
                    }
                }
            }
        }
    }

    fn escape(&mut self, byte: u8, sink: &mut impl ConsoleSink) -> io::Result<()> {
        self.state = ParserState::Ground;
        match byte {
            b'[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
                Ok(())
            }
            b']' => {
                self.state = ParserState::OscString;
                self.osc.clear();
                Ok(())
            }
            b'7' => self.emit(ConsoleOp::SaveCursor, sink),
            b'8' => self.emit(ConsoleOp::RestoreCursor, sink),
            b'D' => self.emit(ConsoleOp::Index, sink),
            b'E' => {
                // NEL - Next line
                self.emit(ConsoleOp::CarriageReturn, sink)?;
                self.emit(ConsoleOp::LineFeed, sink)
            }
            b'M' => self.emit(ConsoleOp::ReverseIndex, sink),
            b'c' => self.emit(ConsoleOp::FullReset, sink),
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn escape_intermediate(&mut self, byte: u8) {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            // Charset selection and friends; nothing to draw
            _ => self.state = ParserState::Ground,
        }
    }

    fn csi_entry(&mut self, byte: u8, sink: &mut impl ConsoleSink) -> io::Result<()> {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some(u16::from(byte - b'0'));
                self.state = ParserState::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            b'?' | b'>' | b'!' | b'=' | b'<' => self.intermediates.push(byte),
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => return self.execute_csi(byte, sink),
            _ => self.state = ParserState::CsiIgnore,
        }
        Ok(())
    }

    fn csi_param(&mut self, byte: u8, sink: &mut impl ConsoleSink) -> io::Result<()> {
        match byte {
            b'0'..=b'9' => {
                let digit = u16::from(byte - b'0');
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            b';' | b':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            0x20..=0x2F => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                return self.execute_csi(byte, sink);
            }
            _ => self.state = ParserState::CsiIgnore,
        }
        Ok(())
    }

    fn csi_intermediate(&mut self, byte: u8, sink: &mut impl ConsoleSink) -> io::Result<()> {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            0x40..=0x7E => return self.execute_csi(byte, sink),
            _ => self.state = ParserState::CsiIgnore,
        }
        Ok(())
    }

    fn osc_string(&mut self, byte: u8, sink: &mut impl ConsoleSink) -> io::Result<()> {
        match byte {
            0x07 => {
                self.state = ParserState::Ground;
                self.execute_osc(sink)
            }
            0x1B => {
                self.state = ParserState::EscapeInOsc;
                Ok(())
            }
            _ => {
                if self.osc.len() < MAX_OSC_LEN {
                    self.osc.push(byte);
                }
                Ok(())
            }
        }
    }

    fn escape_in_osc(&mut self, byte: u8, sink: &mut impl ConsoleSink) -> io::Result<()> {
        self.state = ParserState::Ground;
        self.execute_osc(sink)?;
        if byte == b'\\' {
            // ST (ESC \)
            return Ok(());
        }
        self.enter_escape();
        self.escape(byte, sink)
    }

    fn execute_osc(&mut self, sink: &mut impl ConsoleSink) -> io::Result<()> {
        let payload = String::from_utf8_lossy(&self.osc).into_owned();
        self.osc.clear();
        if let Some((code, text)) = payload.split_once(';') {
            if matches!(code, "0" | "1" | "2") {
                return self.emit(ConsoleOp::SetTitle(text.to_string()), sink);
            }
        }
        Ok(())
    }

    fn param(&self, index: usize, default: u16) -> u16 {
        match self.params.get(index).copied() {
            Some(0) | None => default,
            Some(value) => value,
        }
    }

    fn execute_csi(&mut self, final_byte: u8, sink: &mut impl ConsoleSink) -> io::Result<()> {
        self.state = ParserState::Ground;

        let is_private = self.intermediates.contains(&b'?');
        let is_plain = self.intermediates.is_empty();
        let count = self.param(0, 1);

        let op = match (is_private, final_byte) {
            (true, b'h' | b'l') => {
                let show = final_byte == b'h';
                if self.params.contains(&25) {
                    Some(if show { ConsoleOp::ShowCursor } else { ConsoleOp::HideCursor })
                } else {
                    None
                }
            }
            _ if !is_plain => None,

            (_, b'A') => Some(ConsoleOp::CursorUp(count)),
            (_, b'B') => Some(ConsoleOp::CursorDown(count)),
            (_, b'C') => Some(ConsoleOp::CursorForward(count)),
            (_, b'D') => Some(ConsoleOp::CursorBack(count)),
            (_, b'E') => Some(ConsoleOp::CursorNextLine(count)),
            (_, b'F') => Some(ConsoleOp::CursorPrevLine(count)),
            (_, b'G') => Some(ConsoleOp::CursorColumn(count - 1)),
            (_, b'd') => Some(ConsoleOp::CursorRow(count - 1)),
            (_, b'H' | b'f') => Some(ConsoleOp::CursorPosition {
                row: self.param(0, 1) - 1,
                col: self.param(1, 1) - 1,
            }),

            (_, b'J') => EraseMode::from_param(self.params.first().copied().unwrap_or(0))
                .map(ConsoleOp::EraseDisplay),
            (_, b'K') => EraseMode::from_param(self.params.first().copied().unwrap_or(0))
                .filter(|mode| *mode != EraseMode::Saved)
                .map(ConsoleOp::EraseLine),
            (_, b'X') => Some(ConsoleOp::EraseChars(count)),
            (_, b'L') => Some(ConsoleOp::InsertLines(count)),
            (_, b'M') => Some(ConsoleOp::DeleteLines(count)),
            (_, b'@') => Some(ConsoleOp::InsertChars(count)),
            (_, b'P') => Some(ConsoleOp::DeleteChars(count)),

            (_, b'S') => Some(ConsoleOp::ScrollUp(count)),
            (_, b'T') => Some(ConsoleOp::ScrollDown(count)),
            (_, b'r') => Some(ConsoleOp::SetScrollRegion {
                top: self.param(0, 1) - 1,
                bottom: self.params.get(1).copied().filter(|b| *b > 0).map(|b| b - 1),
            }),

            (_, b's') => Some(ConsoleOp::SaveCursor),
            (_, b'u') => Some(ConsoleOp::RestoreCursor),

            (_, b'm') => {
                let params = std::mem::take(&mut self.params);
                let result = self.execute_sgr(&params, sink);
                self.params = params;
                return result;
            }

            _ => {
                tracing::debug!(
                    "Unknown CSI: intermediates={:?}, params={:?}, final={:?}",
                    self.intermediates,
                    self.params,
                    final_byte as char
                );
                None
            }
        };

        match op {
            Some(op) => self.emit(op, sink),
            None => Ok(()),
        }
    }

    fn execute_sgr(&mut self, params: &[u16], sink: &mut impl ConsoleSink) -> io::Result<()> {
        if params.is_empty() {
            return self.emit(ConsoleOp::ResetAttributes, sink);
        }

        let mut iter = params.iter().copied();
        while let Some(param) = iter.next() {
            let op = match param {
                0 => ConsoleOp::ResetAttributes,
                1 => ConsoleOp::SetAttribute(Attribute::Bold),
                2 => ConsoleOp::SetAttribute(Attribute::Dim),
                3 => ConsoleOp::SetAttribute(Attribute::Italic),
                4 => ConsoleOp::SetAttribute(Attribute::Underlined),
                5 => ConsoleOp::SetAttribute(Attribute::SlowBlink),
                7 => ConsoleOp::SetAttribute(Attribute::Reverse),
                8 => ConsoleOp::SetAttribute(Attribute::Hidden),
                9 => ConsoleOp::SetAttribute(Attribute::CrossedOut),

                22 => ConsoleOp::SetAttribute(Attribute::NormalIntensity),
                23 => ConsoleOp::SetAttribute(Attribute::NoItalic),
                24 => ConsoleOp::SetAttribute(Attribute::NoUnderline),
                25 => ConsoleOp::SetAttribute(Attribute::NoBlink),
                27 => ConsoleOp::SetAttribute(Attribute::NoReverse),
                28 => ConsoleOp::SetAttribute(Attribute::NoHidden),
                29 => ConsoleOp::SetAttribute(Attribute::NotCrossedOut),

                30..=37 => ConsoleOp::SetForeground(Color::Indexed((param - 30) as u8)),
                38 => match extended_color(&mut iter) {
                    Some(color) => ConsoleOp::SetForeground(color),
                    None => continue,
                },
                39 => ConsoleOp::SetForeground(Color::Default),

                40..=47 => ConsoleOp::SetBackground(Color::Indexed((param - 40) as u8)),
                48 => match extended_color(&mut iter) {
                    Some(color) => ConsoleOp::SetBackground(color),
                    None => continue,
                },
                49 => ConsoleOp::SetBackground(Color::Default),

                90..=97 => ConsoleOp::SetForeground(Color::Indexed((param - 90 + 8) as u8)),
                100..=107 => ConsoleOp::SetBackground(Color::Indexed((param - 100 + 8) as u8)),

                _ => continue,
            };
            self.emit(op, sink)?;
        }
        Ok(())
    }
}

/// Parse the tail of an SGR 38/48 sequence: `5;n` or `2;r;g;b`
fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    match iter.next()? {
        // Out of range index: no color
        5 => iter.next().and_then(|n| u8::try_from(n).ok()).map(Color::Indexed),
        2 => {
            let mut component = || iter.next().unwrap_or(0).min(255) as u8;
            let (r, g, b) = (component(), component(), component());
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}
