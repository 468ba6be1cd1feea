//! Prompt-synchronized command relay.
//!
//! The remote shell speaks over one unframed duplex byte stream: command
//! echo, stdout, stderr, and prompts all arrive interleaved, with nothing
//! marking where one response ends and the next begins. The relay turns that
//! stream into discrete command/response exchanges by watching for the
//! trailing shell prompt.
//!
//! Two long-lived tasks own the stream halves: one drains and classifies
//! output chunks, one writes submitted commands. They communicate with the
//! caller through capacity-one hand-off channels and with each other through
//! a capacity-one gate that releases when the login banner, and thereafter
//! each response's terminating prompt, has been consumed. The writer holds
//! every command until the gate opens, which guarantees the central
//! invariant: nothing is written before the banner was read, and command N+1
//! is never written to the remote before command N's response completed.
//!
//! Stream closure (remote exit, link failure) closes both hand-off channels,
//! so a waiting caller observes an end-of-session signal instead of hanging.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{ClientError, Result};

/// Default capacity of one stream read, generous enough to hold one
/// prompt-terminated block.
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Echo artifact a pseudo-terminal inserts into relayed output.
const PTY_ECHO_ARTIFACT: &[u8] = b"\r\r\n";

/// How a chunk relates to the response in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Output belonging to the response in progress; more follows.
    Intermediate,
    /// The block that ends the response; the next command may be sent.
    Final,
}

/// Classification of a chunk from its trailing bytes.
///
/// Kept as a plain function type so the known-fragile prompt heuristic can be
/// swapped or tested in isolation from the I/O plumbing.
pub type PromptPolicy = fn(&[u8]) -> ChunkKind;

/// Classify a chunk by the canonical POSIX prompt terminators: a chunk whose
/// second-to-last byte is `$` or `#` ends the response. Chunks shorter than
/// two bytes cannot carry a prompt and are intermediate.
#[must_use]
pub fn posix_prompt(chunk: &[u8]) -> ChunkKind {
    if chunk.len() < 2 {
        return ChunkKind::Intermediate;
    }
    match chunk[chunk.len() - 2] {
        b'$' | b'#' => ChunkKind::Final,
        _ => ChunkKind::Intermediate,
    }
}

/// One delivered block of remote output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// The chunk bytes, with PTY echo artifacts stripped on final chunks.
    pub data: Bytes,
    /// Whether this chunk completes the current response.
    pub kind: ChunkKind,
}

impl OutputChunk {
    /// Whether this chunk completes the current response.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self.kind, ChunkKind::Final)
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Capacity of one stream read.
    pub read_buffer_size: usize,
    /// Prompt detection policy.
    pub prompt_policy: PromptPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: READ_BUFFER_SIZE,
            prompt_policy: posix_prompt,
        }
    }
}

/// Command-submitting half of a started relay.
#[derive(Debug, Clone)]
pub struct RelayInput {
    commands: mpsc::Sender<String>,
}

impl RelayInput {
    /// Submit one command. A newline is appended and the line is handed to
    /// the writer task, which will not put it on the wire until the banner
    /// (for the first command) or the previous response's terminating prompt
    /// has been observed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SessionClosed`] once the session has ended.
    pub async fn submit(&self, command: &str) -> Result<()> {
        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');
        self.commands
            .send(line)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

/// Output-consuming half of a started relay.
#[derive(Debug)]
pub struct RelayOutput {
    output: mpsc::Receiver<OutputChunk>,
}

impl RelayOutput {
    /// Receive the next output chunk, in production order. Returns `None`
    /// once the stream has closed and all chunks were drained.
    pub async fn receive(&mut self) -> Option<OutputChunk> {
        self.output.recv().await
    }
}

/// The prompt-synchronized multiplexer over one remote session.
///
/// Constructed with [`Relay::start`], which takes exclusive ownership of the
/// session's stream halves. [`Relay::split`] separates the two faces when the
/// producer and consumer live in different tasks.
#[derive(Debug)]
pub struct Relay {
    input: RelayInput,
    output: RelayOutput,
}

impl Relay {
    /// Start a relay over a session's output and input streams with the
    /// default configuration.
    pub fn start<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(reader, writer, RelayConfig::default())
    }

    /// Start a relay with a custom configuration.
    pub fn with_config<R, W>(reader: R, writer: W, config: RelayConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<String>(1);
        let (output_tx, output_rx) = mpsc::channel::<OutputChunk>(1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>(1);

        tokio::spawn(drain_output(reader, output_tx, gate_tx, config));
        tokio::spawn(write_commands(writer, command_rx, gate_rx));

        Self {
            input: RelayInput {
                commands: command_tx,
            },
            output: RelayOutput { output: output_rx },
        }
    }

    /// Submit one command. See [`RelayInput::submit`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SessionClosed`] once the session has ended.
    pub async fn submit(&self, command: &str) -> Result<()> {
        self.input.submit(command).await
    }

    /// Receive the next output chunk. See [`RelayOutput::receive`].
    pub async fn receive(&mut self) -> Option<OutputChunk> {
        self.output.receive().await
    }

    /// Split into independently owned submit and receive halves.
    #[must_use]
    pub fn split(self) -> (RelayInput, RelayOutput) {
        (self.input, self.output)
    }
}

/// Output-draining task: reads raw chunks, classifies them against the prompt
/// policy, forwards them to the consumer, and releases the gate once the
/// banner was consumed and thereafter whenever a response completes. Ends on
/// stream EOF or error, or when the consumer is gone; ending drops both
/// senders, which is the closure signal.
async fn drain_output<R>(
    mut reader: R,
    output: mpsc::Sender<OutputChunk>,
    gate: mpsc::Sender<()>,
    config: RelayConfig,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; config.read_buffer_size];
    let mut first_chunk = true;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("session output stream reached end of stream");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "session output stream read failed");
                break;
            }
        };
        let chunk = &buf[..n];

        // The initial login banner and prompt precede any command and are
        // not a response to one. Consuming it opens the gate for the first
        // command; were the command written earlier, the banner and the
        // response could coalesce into one read and both would be lost.
        if first_chunk {
            first_chunk = false;
            tracing::trace!(len = n, "discarding pre-command banner chunk");
            let _ = gate.try_send(());
            continue;
        }

        match (config.prompt_policy)(chunk) {
            ChunkKind::Final => {
                let delivered = OutputChunk {
                    data: strip_pty_echo(chunk),
                    kind: ChunkKind::Final,
                };
                if output.send(delivered).await.is_err() {
                    break;
                }
                // Capacity-one gate; a failed try_send means a release is
                // already pending and the permit would be redundant.
                let _ = gate.try_send(());
            }
            ChunkKind::Intermediate => {
                // Only line-complete chunks are forwarded mid-response.
                if chunk.ends_with(b"\r\n") {
                    let delivered = OutputChunk {
                        data: Bytes::copy_from_slice(chunk),
                        kind: ChunkKind::Intermediate,
                    };
                    if output.send(delivered).await.is_err() {
                        break;
                    }
                } else {
                    tracing::trace!(len = n, "dropping line-incomplete chunk");
                }
            }
        }
    }
}

/// Input-writing task: takes submitted lines off the command channel, waits
/// for the gate to open, and writes them to the remote input stream, so at
/// most one command is ever in flight. Ends on write failure or when either
/// the submitters or the gate (i.e. the draining task) are gone.
async fn write_commands<W>(
    mut writer: W,
    mut commands: mpsc::Receiver<String>,
    mut gate: mpsc::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = commands.recv().await {
        // The gate opens once the banner, or the previous command's
        // response, has been consumed by the draining task.
        if gate.recv().await.is_none() {
            tracing::debug!("gate closed before the line could be written");
            break;
        }
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!(error = %e, "session input stream write failed");
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!(error = %e, "session input stream flush failed");
            break;
        }
    }
}

/// Remove the carriage-return-doubling artifact PTY echo inserts.
fn strip_pty_echo(chunk: &[u8]) -> Bytes {
    if !chunk
        .windows(PTY_ECHO_ARTIFACT.len())
        .any(|w| w == PTY_ECHO_ARTIFACT)
    {
        return Bytes::copy_from_slice(chunk);
    }
    let mut out = Vec::with_capacity(chunk.len());
    let mut i = 0;
    while i < chunk.len() {
        if chunk[i..].starts_with(PTY_ECHO_ARTIFACT) {
            i += PTY_ECHO_ARTIFACT.len();
        } else {
            out.push(chunk[i]);
            i += 1;
        }
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_prompt_detects_dollar_and_hash() {
        assert_eq!(posix_prompt(b"output\r\n$ "), ChunkKind::Final);
        assert_eq!(posix_prompt(b"output\r\n# "), ChunkKind::Final);
        assert_eq!(posix_prompt(b"$ "), ChunkKind::Final);
    }

    #[test]
    fn posix_prompt_treats_plain_lines_as_intermediate() {
        assert_eq!(posix_prompt(b"file1\r\nfile2\r\n"), ChunkKind::Intermediate);
        assert_eq!(posix_prompt(b"no newline at all"), ChunkKind::Intermediate);
    }

    #[test]
    fn posix_prompt_is_safe_on_short_chunks() {
        assert_eq!(posix_prompt(b""), ChunkKind::Intermediate);
        assert_eq!(posix_prompt(b"$"), ChunkKind::Intermediate);
        assert_eq!(posix_prompt(b"\n"), ChunkKind::Intermediate);
    }

    #[test]
    fn strip_pty_echo_removes_every_artifact() {
        assert_eq!(
            strip_pty_echo(b"ls\r\r\nfile1\r\nfile2\r\r\n$ ").as_ref(),
            b"lsfile1\r\nfile2$ "
        );
    }

    #[test]
    fn strip_pty_echo_leaves_clean_chunks_alone() {
        assert_eq!(
            strip_pty_echo(b"file1\r\nfile2\r\n$ ").as_ref(),
            b"file1\r\nfile2\r\n$ "
        );
    }
}
