//! Trust-on-first-use host key verification.
//!
//! One verification attempt is a small state machine over the known-hosts
//! store and the key offered by the peer:
//!
//! - the stored key matches the offered one: trusted, silently;
//! - the stored key differs: [`ClientError::HostKeyMismatch`], with no
//!   interactive override, since a changed key may mean an active attack;
//! - no key is stored: the user is shown the host and key fingerprint and
//!   asked once whether to trust it. "yes" pins the key in the store; any
//!   other answer aborts with [`ClientError::HostKeyNotAccepted`].
//!
//! The verifier works on plain strings so it stays independent of the SSH
//! transport; the session establisher converts the peer's public key into an
//! [`OfferedKey`] at the boundary.

use std::io::{BufRead, Write};

use crate::error::{ClientError, Result};
use crate::known_hosts::KnownHostsStore;

/// The key material a peer presented during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedKey {
    /// Key algorithm name, e.g. `ssh-ed25519`.
    pub algorithm: String,
    /// Base64-encoded key blob, as written in a known-hosts line.
    pub key_base64: String,
    /// SHA-256 fingerprint shown to the user on first contact.
    pub fingerprint: String,
}

impl OfferedKey {
    /// Create an offered key from its parts.
    pub fn new(
        algorithm: impl Into<String>,
        key_base64: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            key_base64: key_base64.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

/// How a successful verification attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The offered key matched the stored record.
    Trusted,
    /// The host was unknown and the user chose to pin the offered key.
    TrustedOnFirstUse,
}

/// Interactive trust decision for an unknown host.
///
/// Implementations present the host identity and key fingerprint and return
/// whether the user chose to trust it. Test code substitutes a scripted
/// implementation.
pub trait TrustPrompt {
    /// Ask whether to trust `host` with the given key fingerprint.
    fn confirm(&mut self, host: &str, fingerprint: &str) -> Result<bool>;

    /// Called after the key was pinned in the store.
    fn pinned(&mut self, _host: &str) {}
}

impl<T: TrustPrompt + ?Sized> TrustPrompt for Box<T> {
    fn confirm(&mut self, host: &str, fingerprint: &str) -> Result<bool> {
        (**self).confirm(host, fingerprint)
    }

    fn pinned(&mut self, host: &str) {
        (**self).pinned(host);
    }
}

/// Prompt on the process's standard input/output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioPrompt;

impl TrustPrompt for StdioPrompt {
    fn confirm(&mut self, host: &str, fingerprint: &str) -> Result<bool> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "Unknown host: {host} fingerprint: {fingerprint}")?;
        write!(stdout, "Would you like to add it? type yes or no: ")?;
        stdout.flush()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().eq_ignore_ascii_case("yes"))
    }

    fn pinned(&mut self, host: &str) {
        println!("Permanently added '{host}' to the list of known hosts.");
    }
}

/// Decision procedure run once per connection attempt during transport setup.
#[derive(Debug)]
pub struct HostVerifier<P> {
    store: KnownHostsStore,
    prompt: P,
}

impl<P: TrustPrompt> HostVerifier<P> {
    /// Create a verifier over a store and a trust prompt.
    pub const fn new(store: KnownHostsStore, prompt: P) -> Self {
        Self { store, prompt }
    }

    /// Verify the key offered by `host`.
    ///
    /// # Errors
    ///
    /// [`ClientError::HostKeyMismatch`] when the store holds a different key
    /// for the host, [`ClientError::HostKeyNotAccepted`] when the user
    /// declines an unknown key, and [`ClientError::KnownHosts`] when the
    /// store cannot be read or appended; a store failure never silently
    /// proceeds as if trust were established.
    pub fn verify(&mut self, host: &str, port: u16, offered: &OfferedKey) -> Result<Verification> {
        match self.store.lookup(host, port)? {
            Some(record)
                if record.key_type == offered.algorithm
                    && record.key_base64 == offered.key_base64 =>
            {
                tracing::debug!(host = %host, "host key verified against known hosts store");
                Ok(Verification::Trusted)
            }
            Some(record) => {
                tracing::error!(
                    host = %host,
                    stored = %record.key_type,
                    offered = %offered.algorithm,
                    "host key mismatch, refusing to connect"
                );
                Err(ClientError::host_key_mismatch(host))
            }
            None => {
                tracing::debug!(host = %host, "host not found in known hosts store");
                if self.prompt.confirm(host, &offered.fingerprint)? {
                    self.store
                        .append(host, port, &offered.algorithm, &offered.key_base64)?;
                    self.prompt.pinned(host);
                    Ok(Verification::TrustedOnFirstUse)
                } else {
                    Err(ClientError::host_key_not_accepted(host))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted prompt that records how often it was consulted.
    struct ScriptedPrompt {
        answer: bool,
        asked: usize,
    }

    impl ScriptedPrompt {
        const fn yes() -> Self {
            Self {
                answer: true,
                asked: 0,
            }
        }

        const fn no() -> Self {
            Self {
                answer: false,
                asked: 0,
            }
        }
    }

    impl TrustPrompt for ScriptedPrompt {
        fn confirm(&mut self, _host: &str, _fingerprint: &str) -> Result<bool> {
            self.asked += 1;
            Ok(self.answer)
        }
    }

    fn temp_store(tag: &str) -> KnownHostsStore {
        let path = std::env::temp_dir().join(format!(
            "tidesh_verify_{}_{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        KnownHostsStore::new(path)
    }

    fn offered() -> OfferedKey {
        OfferedKey::new("ssh-ed25519", "AAAAC3correct", "SHA256:abcdef")
    }

    #[test]
    fn known_host_with_matching_key_is_trusted_silently() {
        let store = temp_store("match");
        store
            .append("10.0.0.5", 22, "ssh-ed25519", "AAAAC3correct")
            .unwrap();
        let mut verifier = HostVerifier::new(store.clone(), ScriptedPrompt::yes());

        let outcome = verifier.verify("10.0.0.5", 22, &offered()).unwrap();
        assert_eq!(outcome, Verification::Trusted);
        assert_eq!(verifier.prompt.asked, 0);
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn changed_key_fails_without_prompting() {
        let store = temp_store("mismatch");
        store
            .append("10.0.0.5", 22, "ssh-ed25519", "AAAAC3other")
            .unwrap();
        let mut verifier = HostVerifier::new(store.clone(), ScriptedPrompt::yes());

        let err = verifier.verify("10.0.0.5", 22, &offered()).unwrap_err();
        assert!(err.is_host_key_mismatch());
        assert_eq!(verifier.prompt.asked, 0);
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn changed_algorithm_counts_as_mismatch() {
        let store = temp_store("alg");
        store
            .append("10.0.0.5", 22, "ssh-rsa", "AAAAC3correct")
            .unwrap();
        let mut verifier = HostVerifier::new(store.clone(), ScriptedPrompt::yes());

        assert!(
            verifier
                .verify("10.0.0.5", 22, &offered())
                .unwrap_err()
                .is_host_key_mismatch()
        );
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn unknown_host_accepted_is_pinned_then_silent() {
        let store = temp_store("tofu");
        let mut verifier = HostVerifier::new(store.clone(), ScriptedPrompt::yes());

        let outcome = verifier.verify("10.0.0.5", 22, &offered()).unwrap();
        assert_eq!(outcome, Verification::TrustedOnFirstUse);
        assert_eq!(verifier.prompt.asked, 1);

        // Exactly one record was appended.
        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);

        // A second attempt with the same key succeeds without prompting.
        let outcome = verifier.verify("10.0.0.5", 22, &offered()).unwrap();
        assert_eq!(outcome, Verification::Trusted);
        assert_eq!(verifier.prompt.asked, 1);
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn unknown_host_declined_is_rejected() {
        let store = temp_store("declined");
        let mut verifier = HostVerifier::new(store.clone(), ScriptedPrompt::no());

        let err = verifier.verify("10.0.0.5", 22, &offered()).unwrap_err();
        assert!(matches!(err, ClientError::HostKeyNotAccepted { .. }));
        assert_eq!(verifier.prompt.asked, 1);
        // Nothing was written to the store.
        assert!(!store.path().exists());
    }

    #[test]
    fn non_default_port_is_pinned_separately() {
        let store = temp_store("ports");
        let mut verifier = HostVerifier::new(store.clone(), ScriptedPrompt::yes());

        verifier.verify("10.0.0.5", 2222, &offered()).unwrap();
        assert_eq!(verifier.prompt.asked, 1);

        // Same host on the default port is still unknown.
        verifier.verify("10.0.0.5", 22, &offered()).unwrap();
        assert_eq!(verifier.prompt.asked, 2);
        let _ = std::fs::remove_file(store.path());
    }
}
