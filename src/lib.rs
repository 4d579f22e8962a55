//! sshterm - interactive terminal sessions for remote shells
//!
//! sshterm runs the local side of an SSH session: it puts the local
//! terminal into raw mode, pumps bytes between the terminal and the remote
//! channel, forwards window size changes, and restores everything when the
//! remote side exits or the process is signalled.
//!
//! The SSH transport itself is not part of this crate. Applications supply
//! it through [`core::remote::Connector`], [`core::remote::RemoteConnection`]
//! and [`core::remote::RemoteSession`].
//!
//! # Features
//!
//! - **Raw mode**: termios on Unix, console modes on Windows, restored on
//!   every exit path
//! - **Legacy consoles**: key events translated to xterm input, escape
//!   sequences drawn through the console API
//! - **Resize forwarding**: SIGWINCH, or polling where no signal exists
//! - **Commands and subsystems**: with or without a pseudo-terminal
//!
//! # Quick Start
//!
//! ```no_run
//! # fn connector() -> Box<dyn sshterm::core::remote::Connector> { unimplemented!() }
//! use sshterm::{Client, ConnectConfig};
//!
//! let config = ConnectConfig::new("me", "example.org");
//! let mut client = Client::open(connector().as_ref(), config)?;
//! client.run()?;
//! client.close();
//! # Ok::<(), sshterm::ClientError>(())
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod logging;
pub mod term;

pub use client::{exit_message, Client, ClientError};
pub use config::{ConnectConfig, SessionConfig};
pub use crate::core::remote::{RemoteError, RemoteExit, RemoteTarget};
pub use crate::core::session::{SessionError, SessionOutcome, SessionRunner, SessionState};
pub use term::{TerminalBackend, TerminalCapabilities, WindowSize};
