//! Session establisher: authenticated SSH transport over russh.
//!
//! The rest of the crate only needs what this module's contract provides: a
//! connected, authenticated client that can open a shell or exec channel and
//! hand back a byte stream implementing `AsyncRead`/`AsyncWrite`. Host key
//! verification runs inside the handshake through the [`crate::verify`]
//! state machine; authentication tries the identity file first and falls
//! over to exactly one interactive password attempt.

mod client;
mod stream;

pub use client::{SshClient, connect};
pub use stream::ChannelStream;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Callback used for the single interactive password fallover. Receives the
/// user name being authenticated.
pub type PasswordPrompt = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Terminal parameters for the PTY request of an interactive shell.
#[derive(Debug, Clone)]
pub struct TermSpec {
    /// Terminal type advertised to the remote, e.g. `xterm-256color`.
    pub term: String,
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

impl TermSpec {
    /// Create a spec with the default terminal type.
    #[must_use]
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            term: "xterm-256color".to_string(),
            cols,
            rows,
        }
    }
}

impl Default for TermSpec {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// Connection options for [`connect`].
pub struct SshOptions {
    /// Private key used for public key authentication.
    pub identity: PathBuf,
    /// Known-hosts store file.
    pub known_hosts: PathBuf,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Interactive password fallover; `None` disables password auth.
    pub password_prompt: Option<PasswordPrompt>,
}

impl std::fmt::Debug for SshOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshOptions")
            .field("identity", &self.identity)
            .field("known_hosts", &self.known_hosts)
            .field("connect_timeout", &self.connect_timeout)
            .field("password_prompt", &self.password_prompt.is_some())
            .finish()
    }
}

impl Default for SshOptions {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        let ssh_dir = PathBuf::from(home).join(".ssh");
        Self {
            identity: ssh_dir.join("id_rsa"),
            known_hosts: ssh_dir.join("known_hosts"),
            connect_timeout: Duration::from_secs(30),
            password_prompt: None,
        }
    }
}

impl SshOptions {
    /// Set the identity file.
    #[must_use]
    pub fn identity(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity = path.into();
        self
    }

    /// Set the known-hosts store file.
    #[must_use]
    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = path.into();
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the interactive password fallover.
    #[must_use]
    pub fn password_prompt(mut self, prompt: PasswordPrompt) -> Self {
        self.password_prompt = Some(prompt);
        self
    }
}
