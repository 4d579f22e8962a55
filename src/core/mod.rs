//! Session engine.
//!
//! - **remote**: traits for the SSH collaborator (session channel, pipes,
//!   requests) and the values exchanged with it
//! - **task**: cancellation scope and join barrier for session threads
//! - **resize**: coalescing resize notifications
//! - **signals**: termination signal watch
//! - **pump**: the four data pumps
//! - **session**: the state machine tying them together
//!
//! # Architecture
//!
//! ```text
//! SessionRunner
//! ├── TerminalModeController (raw mode in, restore out)
//! └── TaskGroup
//!     ├── signal-watch
//!     ├── resize-watch ──> resize-pump ──> "window-change"
//!     ├── stdin-pump   (local input ──> remote stdin)
//!     ├── stdout-pump  (remote stdout ──> local console)
//!     └── stderr-pump  (remote stderr ──> local console)
//! ```

pub mod pump;
pub mod remote;
pub mod resize;
pub mod session;
pub mod signals;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;
