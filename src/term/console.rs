//! Console output emulation
//!
//! Remote output is parsed into [`ConsoleOp`]s and replayed on a
//! [`ConsoleSink`]. [`CrosstermConsole`] draws them with crossterm, which
//! talks to the native console API on consoles without VT processing.

use std::io::{self, Write};

use crossterm::cursor;
use crossterm::queue;
use crossterm::style::{self, Attribute};
use crossterm::terminal::{self, ClearType};
use tracing::debug;

use super::parser::EscapeParser;

/// Color value
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// The sixteen console colors in SGR index order, with their xterm RGB
const PALETTE: [(style::Color, (u8, u8, u8)); 16] = [
    (style::Color::Black, (0, 0, 0)),
    (style::Color::DarkRed, (205, 0, 0)),
    (style::Color::DarkGreen, (0, 205, 0)),
    (style::Color::DarkYellow, (205, 205, 0)),
    (style::Color::DarkBlue, (0, 0, 238)),
    (style::Color::DarkMagenta, (205, 0, 205)),
    (style::Color::DarkCyan, (0, 205, 205)),
    (style::Color::Grey, (229, 229, 229)),
    (style::Color::DarkGrey, (127, 127, 127)),
    (style::Color::Red, (255, 0, 0)),
    (style::Color::Green, (0, 255, 0)),
    (style::Color::Yellow, (255, 255, 0)),
    (style::Color::Blue, (92, 92, 255)),
    (style::Color::Magenta, (255, 0, 255)),
    (style::Color::Cyan, (0, 255, 255)),
    (style::Color::White, (255, 255, 255)),
];

const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

impl Color {
    /// Crossterm color for a console without VT processing. Its attribute
    /// table only knows the named colors, so 256-color and RGB values are
    /// reduced to the nearest of them.
    pub fn to_crossterm(self) -> style::Color {
        match self {
            Color::Default => style::Color::Reset,
            Color::Indexed(idx) if idx < 16 => PALETTE[usize::from(idx)].0,
            Color::Indexed(idx) => nearest_named(indexed_rgb(idx)),
            Color::Rgb(r, g, b) => nearest_named((r, g, b)),
        }
    }
}

/// RGB of an xterm 256-color index above 15
fn indexed_rgb(idx: u8) -> (u8, u8, u8) {
    if idx >= 232 {
        let level = 8 + 10 * (idx - 232);
        return (level, level, level);
    }
    let cube = idx - 16;
    (
        CUBE_LEVELS[usize::from(cube / 36)],
        CUBE_LEVELS[usize::from(cube / 6 % 6)],
        CUBE_LEVELS[usize::from(cube % 6)],
    )
}

fn nearest_named((r, g, b): (u8, u8, u8)) -> style::Color {
    let distance = |(pr, pg, pb): (u8, u8, u8)| {
        let d = |a: u8, b: u8| (i32::from(a) - i32::from(b)).pow(2);
        d(r, pr) + d(g, pg) + d(b, pb)
    };
    PALETTE
        .iter()
        .min_by_key(|(_, rgb)| distance(*rgb))
        .map_or(style::Color::Reset, |(color, _)| *color)
}

/// Erase extent for ED / EL
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EraseMode {
    ToEnd,
    ToStart,
    All,
    /// Scrollback as well (ED 3)
    Saved,
}

impl EraseMode {
    pub fn from_param(param: u16) -> Option<Self> {
        match param {
            0 => Some(EraseMode::ToEnd),
            1 => Some(EraseMode::ToStart),
            2 => Some(EraseMode::All),
            3 => Some(EraseMode::Saved),
            _ => None,
        }
    }
}

/// One recognized console operation. Coordinates are zero-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleOp {
    Print(String),
    Bell,
    Backspace,
    Tab,
    LineFeed,
    CarriageReturn,

    CursorUp(u16),
    CursorDown(u16),
    CursorForward(u16),
    CursorBack(u16),
    CursorNextLine(u16),
    CursorPrevLine(u16),
    CursorColumn(u16),
    CursorRow(u16),
    CursorPosition { row: u16, col: u16 },
    SaveCursor,
    RestoreCursor,
    ShowCursor,
    HideCursor,

    EraseDisplay(EraseMode),
    EraseLine(EraseMode),
    EraseChars(u16),
    InsertLines(u16),
    DeleteLines(u16),
    InsertChars(u16),
    DeleteChars(u16),

    ScrollUp(u16),
    ScrollDown(u16),
    SetScrollRegion { top: u16, bottom: Option<u16> },
    Index,
    ReverseIndex,

    ResetAttributes,
    SetAttribute(Attribute),
    SetForeground(Color),
    SetBackground(Color),

    SetTitle(String),
    FullReset,
}

/// Receiver of console operations
pub trait ConsoleSink {
    fn apply(&mut self, op: ConsoleOp) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Recording sink
impl ConsoleSink for Vec<ConsoleOp> {
    fn apply(&mut self, op: ConsoleOp) -> io::Result<()> {
        self.push(op);
        Ok(())
    }
}

/// Draws console operations with crossterm commands
pub struct CrosstermConsole<W: Write> {
    out: W,
}

impl<W: Write> CrosstermConsole<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Overwrite `count` cells with blanks and put the cursor back
fn blank(out: &mut impl Write, count: u16) -> io::Result<()> {
    queue!(
        out,
        cursor::SavePosition,
        style::Print(" ".repeat(usize::from(count))),
        cursor::RestorePosition
    )
}

impl<W: Write> ConsoleSink for CrosstermConsole<W> {
    fn apply(&mut self, op: ConsoleOp) -> io::Result<()> {
        let out = &mut self.out;
        match op {
            ConsoleOp::Print(text) => queue!(out, style::Print(text)),
            ConsoleOp::Bell => queue!(out, style::Print('\x07')),
            ConsoleOp::Backspace => queue!(out, cursor::MoveLeft(1)),
            ConsoleOp::Tab => queue!(out, style::Print('\t')),
            // Legacy consoles return the carriage on LF; pty output is CRLF anyway
            ConsoleOp::LineFeed => queue!(out, style::Print('\n')),
            ConsoleOp::CarriageReturn => queue!(out, style::Print('\r')),

            ConsoleOp::CursorUp(n) => queue!(out, cursor::MoveUp(n)),
            ConsoleOp::CursorDown(n) => queue!(out, cursor::MoveDown(n)),
            ConsoleOp::CursorForward(n) => queue!(out, cursor::MoveRight(n)),
            ConsoleOp::CursorBack(n) => queue!(out, cursor::MoveLeft(n)),
            ConsoleOp::CursorNextLine(n) => queue!(out, cursor::MoveToNextLine(n)),
            ConsoleOp::CursorPrevLine(n) => queue!(out, cursor::MoveToPreviousLine(n)),
            ConsoleOp::CursorColumn(col) => queue!(out, cursor::MoveToColumn(col)),
            ConsoleOp::CursorRow(row) => queue!(out, cursor::MoveToRow(row)),
            ConsoleOp::CursorPosition { row, col } => queue!(out, cursor::MoveTo(col, row)),
            ConsoleOp::SaveCursor => queue!(out, cursor::SavePosition),
            ConsoleOp::RestoreCursor => queue!(out, cursor::RestorePosition),
            ConsoleOp::ShowCursor => queue!(out, cursor::Show),
            ConsoleOp::HideCursor => queue!(out, cursor::Hide),

            ConsoleOp::EraseDisplay(mode) => {
                let clear = match mode {
                    EraseMode::ToEnd => ClearType::FromCursorDown,
                    EraseMode::ToStart => ClearType::FromCursorUp,
                    EraseMode::All => ClearType::All,
                    EraseMode::Saved => ClearType::Purge,
                };
                queue!(out, terminal::Clear(clear))
            }
            ConsoleOp::EraseLine(EraseMode::ToEnd) => {
                queue!(out, terminal::Clear(ClearType::UntilNewLine))
            }
            ConsoleOp::EraseLine(EraseMode::ToStart) => {
                let (col, _) = cursor::position()?;
                queue!(out, cursor::SavePosition, cursor::MoveToColumn(0))?;
                blank(out, col.saturating_add(1))?;
                queue!(out, cursor::RestorePosition)
            }
            ConsoleOp::EraseLine(EraseMode::All | EraseMode::Saved) => {
                queue!(out, terminal::Clear(ClearType::CurrentLine))
            }
            ConsoleOp::EraseChars(n) => blank(out, n),

            ConsoleOp::ScrollUp(n) => queue!(out, terminal::ScrollUp(n)),
            ConsoleOp::ScrollDown(n) => queue!(out, terminal::ScrollDown(n)),
            ConsoleOp::Index => queue!(out, cursor::MoveDown(1)),
            ConsoleOp::ReverseIndex => queue!(out, cursor::MoveUp(1)),

            ConsoleOp::ResetAttributes => {
                queue!(out, style::SetAttribute(Attribute::Reset), style::ResetColor)
            }
            ConsoleOp::SetAttribute(attr) => queue!(out, style::SetAttribute(attr)),
            ConsoleOp::SetForeground(color) => {
                queue!(out, style::SetForegroundColor(color.to_crossterm()))
            }
            ConsoleOp::SetBackground(color) => {
                queue!(out, style::SetBackgroundColor(color.to_crossterm()))
            }

            ConsoleOp::SetTitle(title) => queue!(out, terminal::SetTitle(title)),
            ConsoleOp::FullReset => queue!(
                out,
                style::SetAttribute(Attribute::Reset),
                style::ResetColor,
                terminal::Clear(ClearType::All),
                cursor::MoveTo(0, 0),
                cursor::Show
            ),

            // No native console equivalent; the screen may drift until the
            // application redraws
            op @ (ConsoleOp::InsertLines(_)
            | ConsoleOp::DeleteLines(_)
            | ConsoleOp::InsertChars(_)
            | ConsoleOp::DeleteChars(_)
            | ConsoleOp::SetScrollRegion { .. }) => {
                debug!("Unsupported console op: {:?}", op);
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Writer that interprets escape sequences instead of passing them through
pub struct ConsoleEmulator<S: ConsoleSink> {
    parser: EscapeParser,
    sink: S,
}

impl<S: ConsoleSink> ConsoleEmulator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            parser: EscapeParser::new(),
            sink,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: ConsoleSink> Write for ConsoleEmulator<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.parser.advance(buf, &mut self.sink)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}
