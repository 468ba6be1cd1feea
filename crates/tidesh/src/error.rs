//! Error types for tidesh.
//!
//! Every fallible operation in the crate returns [`ClientError`]. The variants
//! mirror the phases of a connection attempt so the caller can tell which step
//! failed: argument handling, dialing, authentication, host key verification,
//! the known-hosts store, or the established session itself.

use thiserror::Error;

/// The main error type for tidesh operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The destination argument could not be parsed.
    #[error("invalid destination: {message}")]
    Destination {
        /// Description of what is wrong with the destination string.
        message: String,
    },

    /// Connecting to the remote host failed.
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connection {
        /// The host that could not be connected to.
        host: String,
        /// The port that was used.
        port: u16,
        /// The reason for the failure.
        reason: String,
    },

    /// Authentication failed after the password fallover.
    #[error("authentication failed for user '{user}': {reason}")]
    Authentication {
        /// The user that failed to authenticate.
        user: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The identity file could not be loaded or decoded.
    #[error("identity file {path}: {reason}")]
    Identity {
        /// Path of the private key file.
        path: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The key offered by the host differs from the recorded one.
    ///
    /// This is never interactively overridable; a changed key may indicate a
    /// man-in-the-middle attack and the connection is refused outright.
    #[error(
        "host key for {host} has changed and does not match the known-hosts record; \
         refusing to connect (possible man-in-the-middle attack)"
    )]
    HostKeyMismatch {
        /// The host whose key changed.
        host: String,
    },

    /// The user declined to trust an unknown host key.
    #[error("host key for {host} was not accepted")]
    HostKeyNotAccepted {
        /// The host whose key was declined.
        host: String,
    },

    /// Reading or appending the known-hosts store failed.
    #[error("{context}: {source}")]
    KnownHosts {
        /// What operation on the store was being performed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An SSH channel request failed.
    #[error("SSH channel error: {reason}")]
    Channel {
        /// The reason for the channel error.
        reason: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session streams have closed; no further commands can be relayed.
    #[error("session closed")]
    SessionClosed,
}

/// Result type alias for tidesh operations.
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Create a destination parse error.
    pub fn destination(message: impl Into<String>) -> Self {
        Self::Destination {
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(user: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Authentication {
            user: user.into(),
            reason: reason.into(),
        }
    }

    /// Create an identity file error.
    pub fn identity(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Identity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a host key mismatch error.
    pub fn host_key_mismatch(host: impl Into<String>) -> Self {
        Self::HostKeyMismatch { host: host.into() }
    }

    /// Create a host key not accepted error.
    pub fn host_key_not_accepted(host: impl Into<String>) -> Self {
        Self::HostKeyNotAccepted { host: host.into() }
    }

    /// Create a known-hosts store error with context.
    pub fn known_hosts(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::KnownHosts {
            context: context.into(),
            source,
        }
    }

    /// Create a channel error.
    pub fn channel(reason: impl Into<String>) -> Self {
        Self::Channel {
            reason: reason.into(),
        }
    }

    /// Check if this is a host key mismatch.
    #[must_use]
    pub const fn is_host_key_mismatch(&self) -> bool {
        matches!(self, Self::HostKeyMismatch { .. })
    }

    /// Check if this error means the session ended.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_error_display() {
        let err = ClientError::destination("too many ':' separators");
        assert!(err.to_string().contains("invalid destination"));
        assert!(err.to_string().contains("':'"));
    }

    #[test]
    fn mismatch_and_unknown_are_distinguishable() {
        let mismatch = ClientError::host_key_mismatch("10.0.0.5");
        let declined = ClientError::host_key_not_accepted("10.0.0.5");

        assert!(mismatch.is_host_key_mismatch());
        assert!(!declined.is_host_key_mismatch());
        // The mismatch message must spell out the security implication.
        assert!(mismatch.to_string().contains("man-in-the-middle"));
        assert!(!declined.to_string().contains("man-in-the-middle"));
    }

    #[test]
    fn connection_error_names_host_and_port() {
        let err = ClientError::connection("host.example", 2222, "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("host.example:2222"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn known_hosts_error_keeps_context() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = ClientError::known_hosts("appending to known hosts file", io);
        assert!(err.to_string().contains("appending to known hosts file"));
    }

    #[test]
    fn session_closed_predicate() {
        assert!(ClientError::SessionClosed.is_closed());
        assert!(!ClientError::destination("x").is_closed());
    }
}
