//! Connection and session configuration.
//!
//! Both structs deserialize from TOML with every field optional:
//!
//! ```toml
//! user = "deploy"
//! host = "build.example.org"
//! port = 2222
//! command = "tail -f /var/log/syslog"
//!
//! [session]
//! term = "xterm-256color"
//! no_tty = false
//! quiet = true
//! resize_poll_interval_ms = 2000
//! drain_timeout_ms = 1000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Per-session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Terminal type sent with the pty request
    pub term: String,
    /// Skip pty allocation; the local terminal stays in its current mode
    pub no_tty: bool,
    /// Suppress the "closed successfully" message
    pub quiet: bool,
    /// Resize polling period where the console has no resize signal
    pub resize_poll_interval_ms: u64,
    /// Local input read size
    pub input_buffer_size: usize,
    /// Longest a blocked task waits before re-checking cancellation
    pub check_interval_ms: u64,
    /// How long remote output may keep flowing after the remote exits
    pub drain_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            no_tty: false,
            quiet: false,
            resize_poll_interval_ms: 2000,
            input_buffer_size: 128,
            check_interval_ms: 50,
            drain_timeout_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn resize_poll_interval(&self) -> Duration {
        Duration::from_millis(self.resize_poll_interval_ms.max(1))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Where to connect and what to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    pub user: String,
    pub host: String,
    pub port: u16,
    /// Remote command; an interactive shell when unset
    pub command: Option<String>,
    /// Treat `command` as a subsystem name
    pub subsystem: bool,
    pub session: SessionConfig,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            host: String::new(),
            port: 22,
            command: None,
            subsystem: false,
            session: SessionConfig::default(),
        }
    }
}

impl ConnectConfig {
    pub fn new(user: &str, host: &str) -> Self {
        Self {
            user: user.to_string(),
            host: host.to_string(),
            ..Self::default()
        }
    }

    pub fn hostport(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid configuration")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }
}

fn default_term() -> String {
    std::env::var("TERM")
        .ok()
        .filter(|term| !term.is_empty())
        .unwrap_or_else(|| "xterm".to_string())
}

// Login name from the environment, as ssh clients look it up
fn default_user() -> String {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|user| !user.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConnectConfig::from_toml_str("host = \"example.org\"").unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.command, None);
        assert!(!config.subsystem);
        assert_eq!(config.session.input_buffer_size, 128);
        assert_eq!(config.session.resize_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.session.check_interval(), Duration::from_millis(50));
        assert_eq!(config.session.drain_timeout(), Duration::from_secs(1));
        assert!(!config.session.term.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = ConnectConfig::from_toml_str(
            r#"
            user = "deploy"
            host = "build"
            port = 2222
            command = "sftp"
            subsystem = true

            [session]
            term = "vt100"
            quiet = true
            no_tty = true
            "#,
        )
        .unwrap();
        assert_eq!(config.user, "deploy");
        assert_eq!(config.hostport(), "build:2222");
        assert_eq!(config.command.as_deref(), Some("sftp"));
        assert!(config.subsystem);
        assert_eq!(config.session.term, "vt100");
        assert!(config.session.quiet);
        assert!(config.session.no_tty);
        assert_eq!(config.session.check_interval_ms, 50);
    }

    #[test]
    fn test_ipv6_hostport() {
        let config = ConnectConfig {
            host: "::1".into(),
            ..ConnectConfig::default()
        };
        assert_eq!(config.hostport(), "[::1]:22");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"example.org\"\nport = 2200").unwrap();

        let config = ConnectConfig::load(file.path()).unwrap();
        assert_eq!(config.hostport(), "example.org:2200");
    }

    #[test]
    fn test_load_errors_name_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        let err = ConnectConfig::load(file.path()).unwrap_err();
        assert!(format!("{err}").contains(&file.path().display().to_string()));

        let missing = file.path().with_extension("missing");
        assert!(ConnectConfig::load(&missing).is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = ConnectConfig::new("me", "host");
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ConnectConfig::from_toml_str(&text).unwrap(), config);
    }
}
