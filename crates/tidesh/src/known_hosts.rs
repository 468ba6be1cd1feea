//! Known-hosts store.
//!
//! An append-only, line-oriented record of previously trusted host keys,
//! byte-compatible with the OpenSSH `known_hosts` format
//! (`host-pattern key-type key-blob [comment]`) so the file can be shared
//! with other SSH tooling. Duplicate entries are tolerated; lookup returns
//! the first match. The backing file is opened and released within the scope
//! of each call; concurrent external writers are not coordinated.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ClientError, Result};

/// One parsed line of the known-hosts store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyRecord {
    /// Comma-separated host patterns the key is pinned for.
    pub hosts: String,
    /// Key algorithm, e.g. `ssh-ed25519`.
    pub key_type: String,
    /// Base64-encoded key material.
    pub key_base64: String,
}

impl HostKeyRecord {
    /// Parse one store line. Returns `None` for blank lines, comments,
    /// `@`-marker lines (`@cert-authority`, `@revoked`), and lines with
    /// fewer than three fields.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            return None;
        }
        let mut fields = line.split_whitespace();
        let hosts = fields.next()?;
        let key_type = fields.next()?;
        let key_base64 = fields.next()?;
        Some(Self {
            hosts: hosts.to_string(),
            key_type: key_type.to_string(),
            key_base64: key_base64.to_string(),
        })
    }

    /// Check whether this record pins a key for the given normalized host
    /// identifier. Matches any entry in the comma-separated host list,
    /// including the `*` wildcard.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> bool {
        self.hosts
            .split(',')
            .map(str::trim)
            .any(|h| h == pattern || h == "*")
    }

    /// Render the record as one store line, without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.hosts, self.key_type, self.key_base64)
    }
}

/// Durable record of previously trusted host-key pairs.
#[derive(Debug, Clone)]
pub struct KnownHostsStore {
    path: PathBuf,
}

impl KnownHostsStore {
    /// Create a store backed by the given file. The file need not exist yet;
    /// it is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalized host identifier used in store lines: the bare host for the
    /// default SSH port, `[host]:port` otherwise, as OpenSSH writes them.
    #[must_use]
    pub fn host_pattern(host: &str, port: u16) -> String {
        if port == 22 {
            host.to_string()
        } else {
            format!("[{host}]:{port}")
        }
    }

    /// Look up the recorded key for a host. Linear scan; the first matching
    /// record wins. Only the normalized identifier is consulted, so a key
    /// pinned for the default port says nothing about other ports on the
    /// same host, and vice versa. A missing store file means no host is
    /// known yet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::KnownHosts`] when the store file exists but
    /// cannot be read.
    pub fn lookup(&self, host: &str, port: u16) -> Result<Option<HostKeyRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| ClientError::known_hosts("reading known hosts file", e))?;

        let pattern = Self::host_pattern(host, port);
        for line in contents.lines() {
            if let Some(record) = HostKeyRecord::parse(line) {
                if record.matches(&pattern) {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Append one newline-terminated record for a host. Opens the backing
    /// file for append (creating it, and its parent directory, if missing),
    /// writes, flushes, and releases the handle on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::KnownHosts`] when the file cannot be opened or
    /// written.
    pub fn append(&self, host: &str, port: u16, key_type: &str, key_base64: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ClientError::known_hosts("creating known hosts directory", e))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ =
                        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
                }
            }
        }

        let record = HostKeyRecord {
            hosts: Self::host_pattern(host, port),
            key_type: key_type.to_string(),
            key_base64: key_base64.to_string(),
        };

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ClientError::known_hosts("opening known hosts file for append", e))?;
        writeln!(file, "{}", record.to_line())
            .map_err(|e| ClientError::known_hosts("appending to known hosts file", e))?;
        file.flush()
            .map_err(|e| ClientError::known_hosts("flushing known hosts file", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }

        tracing::info!(
            host = %host,
            path = %self.path.display(),
            "added host key to known hosts store"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> KnownHostsStore {
        let path = std::env::temp_dir().join(format!(
            "tidesh_known_hosts_{}_{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        KnownHostsStore::new(path)
    }

    #[test]
    fn parse_skips_comments_and_markers() {
        assert!(HostKeyRecord::parse("").is_none());
        assert!(HostKeyRecord::parse("# comment").is_none());
        assert!(HostKeyRecord::parse("@revoked host ssh-ed25519 AAAA").is_none());
        assert!(HostKeyRecord::parse("host ssh-ed25519").is_none());
    }

    #[test]
    fn parse_tolerates_trailing_comment() {
        let record = HostKeyRecord::parse("host.example ssh-ed25519 AAAAC3 user@box").unwrap();
        assert_eq!(record.hosts, "host.example");
        assert_eq!(record.key_type, "ssh-ed25519");
        assert_eq!(record.key_base64, "AAAAC3");
    }

    #[test]
    fn line_round_trip_is_byte_identical() {
        let line = "[host.example]:2222 ssh-ed25519 AAAAC3NzaC1lZDI1";
        let record = HostKeyRecord::parse(line).unwrap();
        assert_eq!(record.to_line(), line);
    }

    #[test]
    fn host_pattern_normalization() {
        assert_eq!(KnownHostsStore::host_pattern("host.example", 22), "host.example");
        assert_eq!(
            KnownHostsStore::host_pattern("host.example", 2222),
            "[host.example]:2222"
        );
    }

    #[test]
    fn record_matches_host_lists_and_wildcard() {
        let record = HostKeyRecord::parse("a.example,b.example ssh-rsa AAAA").unwrap();
        assert!(record.matches("a.example"));
        assert!(record.matches("b.example"));
        assert!(!record.matches("c.example"));

        let wild = HostKeyRecord::parse("* ssh-rsa AAAA").unwrap();
        assert!(wild.matches("anything"));
    }

    #[test]
    fn lookup_on_missing_file_is_not_found() {
        let store = temp_store("missing");
        assert!(store.lookup("host.example", 22).unwrap().is_none());
    }

    #[test]
    fn append_then_lookup() {
        let store = temp_store("roundtrip");
        store
            .append("10.0.0.5", 22, "ssh-ed25519", "AAAAC3example")
            .unwrap();

        let record = store.lookup("10.0.0.5", 22).unwrap().unwrap();
        assert_eq!(record.key_type, "ssh-ed25519");
        assert_eq!(record.key_base64, "AAAAC3example");

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents, "10.0.0.5 ssh-ed25519 AAAAC3example\n");
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn append_uses_port_qualified_pattern() {
        let store = temp_store("port");
        store
            .append("10.0.0.5", 2222, "ssh-ed25519", "AAAAC3example")
            .unwrap();

        assert!(store.lookup("10.0.0.5", 2222).unwrap().is_some());
        assert!(store.lookup("10.0.0.5", 22).unwrap().is_none());
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn default_port_entry_does_not_cover_other_ports() {
        let store = temp_store("bare");
        store
            .append("10.0.0.5", 22, "ssh-ed25519", "AAAAC3example")
            .unwrap();

        // A key pinned for port 22 must not answer for port 2222; the
        // other port is an unknown host and gets its own first-use
        // decision instead of a mismatch against the wrong record.
        assert!(store.lookup("10.0.0.5", 2222).unwrap().is_none());
        assert!(store.lookup("10.0.0.5", 22).unwrap().is_some());
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn first_match_wins_over_duplicates() {
        let store = temp_store("dup");
        store.append("h.example", 22, "ssh-ed25519", "FIRST").unwrap();
        store.append("h.example", 22, "ssh-ed25519", "SECOND").unwrap();

        let record = store.lookup("h.example", 22).unwrap().unwrap();
        assert_eq!(record.key_base64, "FIRST");
        let _ = std::fs::remove_file(store.path());
    }
}
