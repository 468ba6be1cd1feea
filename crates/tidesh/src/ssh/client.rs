//! SSH client: dial, verify, authenticate, open channels.

use std::path::Path;
use std::sync::{Arc, Mutex};

use russh::client;
use russh::keys::{HashAlg, PrivateKey, PrivateKeyWithHashAlg, PublicKey};

use super::stream::ChannelStream;
use super::{SshOptions, TermSpec};
use crate::destination::Destination;
use crate::error::{ClientError, Result};
use crate::known_hosts::KnownHostsStore;
use crate::verify::{HostVerifier, OfferedKey, TrustPrompt};

/// Client handler that runs host key verification during the handshake.
///
/// russh's handler contract only reports accept/reject, so the precise
/// rejection reason (mismatch vs. declined vs. store failure) is parked in a
/// shared slot for [`connect`] to surface once the handshake errors out.
struct ClientHandler {
    verifier: HostVerifier<Box<dyn TrustPrompt + Send>>,
    host: String,
    port: u16,
    rejection: Arc<Mutex<Option<ClientError>>>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let Some(offered) = offered_key(server_public_key) else {
            self.park(ClientError::channel(
                "could not encode the server's public key",
            ));
            return Ok(false);
        };
        match self.verifier.verify(&self.host, self.port, &offered) {
            Ok(outcome) => {
                tracing::debug!(host = %self.host, outcome = ?outcome, "host key accepted");
                Ok(true)
            }
            Err(e) => {
                self.park(e);
                Ok(false)
            }
        }
    }
}

impl ClientHandler {
    fn park(&self, error: ClientError) {
        if let Ok(mut slot) = self.rejection.lock() {
            *slot = Some(error);
        }
    }
}

/// Convert the peer's public key into the transport-free form the verifier
/// works on. `None` when the key cannot be encoded.
fn offered_key(key: &PublicKey) -> Option<OfferedKey> {
    let openssh = key.to_openssh().ok()?;
    let mut parts = openssh.split_whitespace();
    let algorithm = parts.next()?;
    let key_base64 = parts.next()?;
    Some(OfferedKey::new(
        algorithm,
        key_base64,
        key.fingerprint(HashAlg::Sha256).to_string(),
    ))
}

/// Connect and authenticate to a destination.
///
/// The host key offered during the handshake is verified against the
/// known-hosts store named in `options`, with `prompt` deciding first
/// contact. Authentication tries the identity file, then falls over to one
/// interactive password attempt; a second failure is fatal.
///
/// # Errors
///
/// [`ClientError::Connection`] when dialing fails or times out, the host key
/// errors from [`crate::verify`] when verification fails, and
/// [`ClientError::Authentication`] when every method is exhausted.
pub async fn connect(
    destination: &Destination,
    options: SshOptions,
    prompt: impl TrustPrompt + Send + 'static,
) -> Result<SshClient> {
    let store = KnownHostsStore::new(options.known_hosts.clone());
    let verifier = HostVerifier::new(store, Box::new(prompt) as Box<dyn TrustPrompt + Send>);
    let rejection = Arc::new(Mutex::new(None));
    let handler = ClientHandler {
        verifier,
        host: destination.host.clone(),
        port: destination.port,
        rejection: Arc::clone(&rejection),
    };

    tracing::info!(
        host = %destination.host,
        port = destination.port,
        user = %destination.user,
        "connecting to SSH server"
    );

    let config = Arc::new(client::Config::default());
    let addr = (destination.host.as_str(), destination.port);
    let mut handle = tokio::time::timeout(
        options.connect_timeout,
        client::connect(config, addr, handler),
    )
    .await
    .map_err(|_| {
        ClientError::connection(
            &destination.host,
            destination.port,
            format!("timed out after {:?}", options.connect_timeout),
        )
    })?
    .map_err(|e| {
        // A parked verification error explains the handshake failure better
        // than russh's generic one.
        rejection
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or_else(|| {
                ClientError::connection(&destination.host, destination.port, e.to_string())
            })
    })?;

    authenticate(&mut handle, destination, &options).await?;

    tracing::info!(
        host = %destination.host,
        user = %destination.user,
        "SSH connection established"
    );

    Ok(SshClient {
        handle,
        host: destination.host.clone(),
    })
}

/// Try public key authentication, then the single password fallover.
async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    destination: &Destination,
    options: &SshOptions,
) -> Result<()> {
    let user = &destination.user;

    match load_private_key(&options.identity).await {
        Ok(key) => {
            let rsa_hash = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            match handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, rsa_hash))
                .await
            {
                Ok(result) if result.success() => {
                    tracing::info!(user = %user, "public key authentication successful");
                    return Ok(());
                }
                Ok(_) => {
                    tracing::debug!(user = %user, "public key rejected by server");
                }
                Err(e) => {
                    tracing::debug!(user = %user, error = %e, "public key authentication error");
                }
            }
        }
        Err(e) => {
            tracing::debug!(
                key = %options.identity.display(),
                error = %e,
                "identity file unusable, falling over to password"
            );
        }
    }

    let Some(prompt) = options.password_prompt.as_ref() else {
        return Err(ClientError::authentication(
            user,
            "no usable private key and password authentication is disabled",
        ));
    };
    let password = prompt(user)?;
    match handle.authenticate_password(user, &password).await {
        Ok(result) if result.success() => {
            tracing::info!(user = %user, "password authentication successful");
            Ok(())
        }
        Ok(_) => Err(ClientError::authentication(user, "password rejected")),
        Err(e) => Err(ClientError::authentication(user, e.to_string())),
    }
}

/// Load and decode the private key at `path`.
async fn load_private_key(path: &Path) -> Result<Arc<PrivateKey>> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ClientError::identity(path.display().to_string(), e.to_string()))?;
    let text = String::from_utf8(data).map_err(|_| {
        ClientError::identity(path.display().to_string(), "file is not valid UTF-8")
    })?;
    let key = russh::keys::decode_secret_key(&text, None)
        .map_err(|e| ClientError::identity(path.display().to_string(), e.to_string()))?;
    Ok(Arc::new(key))
}

/// A connected, authenticated SSH client.
pub struct SshClient {
    handle: client::Handle<ClientHandler>,
    host: String,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient").field("host", &self.host).finish()
    }
}

impl SshClient {
    /// The host this client is connected to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Open an interactive shell with a PTY, returning the session's byte
    /// stream. The stream is exclusively owned by whoever takes it; the
    /// relay is the intended owner.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Channel`] when opening the channel or any of
    /// the PTY/shell requests fail.
    pub async fn shell(&mut self, term: &TermSpec) -> Result<ChannelStream> {
        let channel = self.open_channel().await?;
        channel
            .request_pty(
                false,
                &term.term,
                u32::from(term.cols),
                u32::from(term.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| ClientError::channel(format!("PTY request failed: {e}")))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| ClientError::channel(format!("shell request failed: {e}")))?;
        Ok(ChannelStream::new(channel))
    }

    /// Execute a single command, returning the channel's byte stream. The
    /// stream reaches end-of-stream when the command finishes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Channel`] when opening the channel or the exec
    /// request fails.
    pub async fn exec(&mut self, command: &str) -> Result<ChannelStream> {
        let channel = self.open_channel().await?;
        channel
            .exec(false, command)
            .await
            .map_err(|e| ClientError::channel(format!("exec request failed: {e}")))?;
        Ok(ChannelStream::new(channel))
    }

    async fn open_channel(&mut self) -> Result<russh::Channel<client::Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| ClientError::channel(format!("channel open failed: {e}")))
    }

    /// Gracefully disconnect.
    pub async fn disconnect(self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
        tracing::debug!(host = %self.host, "disconnected");
    }
}
