//! tidesh: SSH client core with trust-on-first-use host verification and a
//! prompt-synchronized command relay.
//!
//! The crate turns an authenticated SSH session's raw, unframed byte stream
//! into discrete command/response exchanges, and pins host keys in an
//! OpenSSH-compatible known-hosts store on first contact.
//!
//! # Example
//!
//! ```ignore
//! use tidesh::{Destination, Relay, SshOptions, StdioPrompt, TermSpec, ssh};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tidesh::ClientError> {
//!     let destination = Destination::parse("alice@host.example:2222")?;
//!     let mut client = ssh::connect(&destination, SshOptions::default(), StdioPrompt).await?;
//!     let stream = client.shell(&TermSpec::default()).await?;
//!     let (reader, writer) = tokio::io::split(stream);
//!     let mut relay = Relay::start(reader, writer);
//!
//!     relay.submit("ls").await?;
//!     while let Some(chunk) = relay.receive().await {
//!         print!("{}", String::from_utf8_lossy(&chunk.data));
//!         if chunk.is_final() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod destination;
pub mod error;
pub mod known_hosts;
pub mod relay;
pub mod ssh;
pub mod verify;

pub use destination::{DEFAULT_PORT, Destination};
pub use error::{ClientError, Result};
pub use known_hosts::{HostKeyRecord, KnownHostsStore};
pub use relay::{
    ChunkKind, OutputChunk, PromptPolicy, READ_BUFFER_SIZE, Relay, RelayConfig, RelayInput,
    RelayOutput, posix_prompt,
};
pub use ssh::{ChannelStream, PasswordPrompt, SshClient, SshOptions, TermSpec};
pub use verify::{HostVerifier, OfferedKey, StdioPrompt, TrustPrompt, Verification};
