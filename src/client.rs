//! Client facade
//!
//! Connects through a [`Connector`], opens one session and runs it to
//! completion, printing how the connection ended.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::ConnectConfig;
use crate::core::remote::{Connector, RemoteConnection, RemoteError, RemoteExit, RemoteSession, RemoteTarget};
use crate::core::session::{SessionError, SessionOutcome, SessionRunner};
use crate::term::{self, TerminalBackend, TerminalModeController};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot connect to {hostport}: {source}")]
    Connect {
        hostport: String,
        #[source]
        source: RemoteError,
    },

    #[error("cannot open session: {0}")]
    NewSession(#[source] RemoteError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("client is closed")]
    Closed,
}

pub struct Client {
    config: ConnectConfig,
    terminal: Arc<dyn TerminalBackend>,
    connection: Option<Box<dyn RemoteConnection>>,
    session: Option<Arc<dyn RemoteSession>>,
    watch_signals: bool,
    last_outcome: Option<SessionOutcome>,
}

impl Client {
    /// Connect and open a session on the local terminal
    pub fn open(connector: &dyn Connector, config: ConnectConfig) -> Result<Self, ClientError> {
        let terminal = term::detect(config.session.resize_poll_interval());
        Self::open_with_terminal(connector, config, terminal)
    }

    pub fn open_with_terminal(
        connector: &dyn Connector,
        config: ConnectConfig,
        terminal: Arc<dyn TerminalBackend>,
    ) -> Result<Self, ClientError> {
        let hostport = config.hostport();
        info!("Connecting to {} as {}", hostport, config.user);
        let connection = connector
            .connect(&config)
            .map_err(|source| ClientError::Connect { hostport, source })?;

        let session = match connection.new_session() {
            Ok(session) => session,
            Err(e) => {
                if let Err(close) = connection.close() {
                    warn!("Failed to close connection: {}", close);
                }
                return Err(ClientError::NewSession(e));
            }
        };

        Ok(Self {
            config,
            terminal,
            connection: Some(connection),
            session: Some(session),
            watch_signals: true,
            last_outcome: None,
        })
    }

    /// Leave termination signals to the embedding application
    pub fn without_signal_watch(mut self) -> Self {
        self.watch_signals = false;
        self
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// How the last session ended
    pub fn last_outcome(&self) -> Option<&SessionOutcome> {
        self.last_outcome.as_ref()
    }

    /// Run what the configuration asks for
    pub fn run(&mut self) -> Result<(), ClientError> {
        match self.config.command.clone() {
            Some(name) if self.config.subsystem => self.begin_subsystem(&name),
            Some(cmd) => self.begin_command(&cmd),
            None => self.begin_interactive_session(),
        }
    }

    pub fn begin_interactive_session(&mut self) -> Result<(), ClientError> {
        self.begin(RemoteTarget::Shell)
    }

    pub fn begin_command(&mut self, command: &str) -> Result<(), ClientError> {
        self.begin(RemoteTarget::Command(command.to_string()))
    }

    pub fn begin_subsystem(&mut self, name: &str) -> Result<(), ClientError> {
        self.begin(RemoteTarget::Subsystem(name.to_string()))
    }

    fn begin(&mut self, target: RemoteTarget) -> Result<(), ClientError> {
        // One session per connection
        let session = self.session.take().ok_or(ClientError::Closed)?;
        let mut runner = SessionRunner::new(session, self.terminal.clone(), self.config.session.clone())
            .watch_signals(self.watch_signals);
        let outcome = runner.run(&target)?;

        if let Some(message) = exit_message(&self.config.host, &outcome, self.config.session.quiet) {
            println!("{}", message);
        }
        self.last_outcome = Some(outcome);
        Ok(())
    }

    /// Restore the terminal and close session and connection. Idempotent.
    pub fn close(&mut self) {
        TerminalModeController::new(self.terminal.clone()).restore_mode();

        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                warn!("Failed to close session: {}", e);
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                warn!("Failed to close connection: {}", e);
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Line printed when a session ends. `None` for a quiet success.
pub fn exit_message(host: &str, outcome: &SessionOutcome, quiet: bool) -> Option<String> {
    let exit = match outcome {
        SessionOutcome::Signalled(_) => return Some("got signal".to_string()),
        SessionOutcome::Exited(exit) => exit,
    };

    let prefix = format!("ssh connection to {} closed ", host);
    match exit {
        RemoteExit::Success if quiet => None,
        RemoteExit::Success => Some(format!("{}successfully", prefix)),
        RemoteExit::MissingStatus(detail) => Some(format!(
            "{}but remote didn't send exit status: {}",
            prefix, detail
        )),
        RemoteExit::Status(status) => Some(format!("{}with error: {}", prefix, status)),
        RemoteExit::Failed(detail) if detail.is_empty() => Some(format!("{}with unknown error", prefix)),
        RemoteExit::Failed(detail) => Some(format!("{}with error: {}", prefix, detail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::remote::ExitStatus;
    use crate::core::testing::{FakeRemote, FakeTerminal};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeConnection {
        remote: FakeRemote,
        closes: Arc<AtomicUsize>,
    }

    impl RemoteConnection for FakeConnection {
        fn new_session(&self) -> Result<Arc<dyn RemoteSession>, RemoteError> {
            Ok(Arc::new(self.remote.clone()))
        }

        fn close(&self) -> Result<(), RemoteError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeConnector {
        remote: FakeRemote,
        closes: Arc<AtomicUsize>,
        refuse: bool,
    }

    impl Connector for FakeConnector {
        fn connect(&self, _config: &ConnectConfig) -> Result<Box<dyn RemoteConnection>, RemoteError> {
            if self.refuse {
                return Err(RemoteError::Protocol("connection refused".into()));
            }
            Ok(Box::new(FakeConnection {
                remote: self.remote.clone(),
                closes: self.closes.clone(),
            }))
        }
    }

    fn connector(remote: &FakeRemote) -> FakeConnector {
        FakeConnector {
            remote: remote.clone(),
            closes: Arc::new(AtomicUsize::new(0)),
            refuse: false,
        }
    }

    fn config() -> ConnectConfig {
        let mut config = ConnectConfig::new("me", "example.org");
        config.session.check_interval_ms = 5;
        config
    }

    #[test]
    fn test_exit_messages() {
        let host = "example.org";
        let ok = SessionOutcome::Exited(RemoteExit::Success);
        assert_eq!(
            exit_message(host, &ok, false).as_deref(),
            Some("ssh connection to example.org closed successfully")
        );
        assert_eq!(exit_message(host, &ok, true), None);

        let missing = SessionOutcome::Exited(RemoteExit::MissingStatus("eof".into()));
        assert_eq!(
            exit_message(host, &missing, true).as_deref(),
            Some("ssh connection to example.org closed but remote didn't send exit status: eof")
        );

        let failed = SessionOutcome::Exited(RemoteExit::Status(ExitStatus {
            status: 1,
            signal: None,
            message: String::new(),
        }));
        assert_eq!(
            exit_message(host, &failed, false).as_deref(),
            Some("ssh connection to example.org closed with error: Process exited with status 1")
        );

        let unknown = SessionOutcome::Exited(RemoteExit::Failed(String::new()));
        assert_eq!(
            exit_message(host, &unknown, false).as_deref(),
            Some("ssh connection to example.org closed with unknown error")
        );

        assert_eq!(exit_message(host, &SessionOutcome::Signalled(2), true).as_deref(), Some("got signal"));
    }

    #[test]
    fn test_run_dispatches_command() {
        let remote = FakeRemote::new();
        let connector = connector(&remote);
        let mut config = config();
        config.command = Some("uptime".into());
        config.session.quiet = true;

        let mut client =
            Client::open_with_terminal(&connector, config, Arc::new(FakeTerminal::new()))
                .unwrap()
                .without_signal_watch();
        client.run().unwrap();

        assert_eq!(remote.started(), vec![RemoteTarget::Command("uptime".into())]);
        assert_eq!(
            client.last_outcome(),
            Some(&SessionOutcome::Exited(RemoteExit::Success))
        );
        // Session already consumed
        assert!(matches!(client.begin_interactive_session(), Err(ClientError::Closed)));

        client.close();
        client.close();
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_dispatches_subsystem() {
        let remote = FakeRemote::new();
        let connector = connector(&remote);
        let mut config = config();
        config.command = Some("sftp".into());
        config.subsystem = true;
        config.session.quiet = true;

        let mut client =
            Client::open_with_terminal(&connector, config, Arc::new(FakeTerminal::new()))
                .unwrap()
                .without_signal_watch();
        client.run().unwrap();
        assert_eq!(remote.started(), vec![RemoteTarget::Subsystem("sftp".into())]);
    }

    #[test]
    fn test_connect_failure_names_host() {
        let remote = FakeRemote::new();
        let mut connector = connector(&remote);
        connector.refuse = true;

        let err = Client::open_with_terminal(&connector, config(), Arc::new(FakeTerminal::new()))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "cannot connect to example.org:22: connection refused");
    }
}
