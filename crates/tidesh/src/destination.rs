//! Destination string parsing.
//!
//! A destination names where to connect in the conventional
//! `[user@]host[:port]` form. The user defaults to the local account and the
//! port to 22 when omitted. Malformed input (more than one `@` or `:`
//! separator) is rejected rather than guessed at.

use crate::error::{ClientError, Result};

/// Default SSH port used when the destination does not name one.
pub const DEFAULT_PORT: u16 = 22;

/// A parsed connection target.
///
/// Immutable once constructed; the session establisher borrows it for the
/// lifetime of the connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Remote login name.
    pub user: String,
    /// Remote host name or address.
    pub host: String,
    /// Remote TCP port.
    pub port: u16,
}

impl Destination {
    /// Parse a `[user@]host[:port]` destination string.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Destination`] when the string carries more than
    /// one `@` or `:` separator, names an empty host or user, uses a
    /// non-numeric port, or omits the user on a platform with no local
    /// account name to fall back on.
    pub fn parse(spec: &str) -> Result<Self> {
        Self::parse_with_default_port(spec, DEFAULT_PORT)
    }

    /// Parse a destination string, falling back to `default_port` when the
    /// string does not name a port. An explicit `:port` always wins.
    pub fn parse_with_default_port(spec: &str, default_port: u16) -> Result<Self> {
        let colon_parts: Vec<&str> = spec.split(':').collect();
        if colon_parts.len() > 2 {
            return Err(ClientError::destination(
                "destination must be in format [user@]host[:port]",
            ));
        }
        let port = if colon_parts.len() == 2 {
            colon_parts[1].parse::<u16>().map_err(|_| {
                ClientError::destination(format!("port '{}' is not numeric", colon_parts[1]))
            })?
        } else {
            default_port
        };

        let at_parts: Vec<&str> = colon_parts[0].split('@').collect();
        let (user, host) = match at_parts.len() {
            1 => (local_user()?, at_parts[0]),
            2 => {
                if at_parts[0].is_empty() {
                    return Err(ClientError::destination("user must not be empty"));
                }
                (at_parts[0].to_string(), at_parts[1])
            }
            _ => {
                return Err(ClientError::destination(
                    "destination must be in format [user@]host[:port]",
                ));
            }
        };

        if host.is_empty() {
            return Err(ClientError::destination("host must not be empty"));
        }

        Ok(Self {
            user,
            host: host.to_string(),
            port,
        })
    }

    /// Get the `host:port` address string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Name of the local OS account, taken from the environment.
fn local_user() -> Result<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .map_err(|_| {
            ClientError::destination(
                "no local username available; use the user@host[:port] form",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_destination() {
        let d = Destination::parse("alice@host.example:2222").unwrap();
        assert_eq!(d.user, "alice");
        assert_eq!(d.host, "host.example");
        assert_eq!(d.port, 2222);
        assert_eq!(d.address(), "host.example:2222");
    }

    #[test]
    fn port_defaults_to_22() {
        let d = Destination::parse("alice@host.example").unwrap();
        assert_eq!(d.port, 22);
    }

    #[test]
    fn user_defaults_to_local_account() {
        // SAFETY: tests in this module that read USER set it first, so the
        // race window std::env::set_var warns about does not matter here.
        unsafe { std::env::set_var("USER", "bob") };
        let d = Destination::parse("host.example").unwrap();
        assert_eq!(d.user, "bob");
        assert_eq!(d.host, "host.example");
        assert_eq!(d.port, 22);
    }

    #[test]
    fn explicit_port_beats_flag_default() {
        let d = Destination::parse_with_default_port("alice@host.example:2222", 2022).unwrap();
        assert_eq!(d.port, 2222);
    }

    #[test]
    fn flag_default_used_without_explicit_port() {
        let d = Destination::parse_with_default_port("alice@host.example", 2022).unwrap();
        assert_eq!(d.port, 2022);
    }

    #[test]
    fn double_at_is_rejected() {
        let err = Destination::parse("a@b@c").unwrap_err();
        assert!(matches!(err, ClientError::Destination { .. }));
    }

    #[test]
    fn double_colon_is_rejected() {
        let err = Destination::parse("h:22:33").unwrap_err();
        assert!(matches!(err, ClientError::Destination { .. }));
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let err = Destination::parse("alice@host.example:ssh").unwrap_err();
        assert!(err.to_string().contains("not numeric"));
    }

    #[test]
    fn empty_host_is_rejected() {
        assert!(Destination::parse("alice@").is_err());
        assert!(Destination::parse("alice@:22").is_err());
    }

    #[test]
    fn empty_user_is_rejected() {
        assert!(Destination::parse("@host.example").is_err());
    }

    #[test]
    fn display_round_trip() {
        let d = Destination::parse("alice@host.example:2222").unwrap();
        assert_eq!(d.to_string(), "alice@host.example:2222");
    }
}
