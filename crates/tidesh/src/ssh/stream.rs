//! Byte-stream view of an SSH channel.
//!
//! Wraps a russh channel in `AsyncRead`/`AsyncWrite` so the relay can own it
//! like any other duplex stream. Remote EOF or channel close surfaces as a
//! zero-byte read, which is the relay's closure signal.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Extended-data code the SSH protocol assigns to stderr.
const STDERR_EXT: u32 = 1;

/// A duplex byte stream over one SSH session channel.
///
/// Stdout and stderr are folded into a single stream; the interleaving is
/// whatever order the channel messages arrive in, which matches what a PTY
/// session produces anyway.
pub struct ChannelStream {
    channel: russh::Channel<russh::client::Msg>,
    /// Bytes taken off the channel but not yet handed to a reader.
    pending: VecDeque<u8>,
    /// Exit status, once the remote process reported one.
    exit_status: Option<u32>,
    /// Whether the remote sent EOF or closed the channel.
    ended: bool,
}

impl std::fmt::Debug for ChannelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStream")
            .field("pending", &self.pending.len())
            .field("exit_status", &self.exit_status)
            .field("ended", &self.ended)
            .finish()
    }
}

impl ChannelStream {
    /// Wrap a channel whose shell/exec request has already been issued.
    #[must_use]
    pub fn new(channel: russh::Channel<russh::client::Msg>) -> Self {
        Self {
            channel,
            pending: VecDeque::new(),
            exit_status: None,
            ended: false,
        }
    }

    /// Exit status of the remote process, if it reported one.
    #[must_use]
    pub const fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    /// Whether the remote side has ended the channel.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// Move as much pending data as fits into `buf`.
    fn hand_over(&mut self, buf: &mut ReadBuf<'_>) {
        let take = buf.remaining().min(self.pending.len());
        {
            let contiguous = self.pending.make_contiguous();
            buf.put_slice(&contiguous[..take]);
        }
        self.pending.drain(..take);
    }
}

impl AsyncRead for ChannelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // Keep absorbing channel messages until there is something to hand
        // over, the channel ends, or it has nothing ready.
        loop {
            if !this.pending.is_empty() {
                this.hand_over(buf);
                return Poll::Ready(Ok(()));
            }
            if this.ended {
                // Zero-byte read signals end of stream.
                return Poll::Ready(Ok(()));
            }

            let next = this.channel.wait();
            tokio::pin!(next);
            match next.poll(cx) {
                Poll::Ready(Some(russh::ChannelMsg::Data { data })) => {
                    this.pending.extend(&data[..]);
                }
                Poll::Ready(Some(russh::ChannelMsg::ExtendedData { data, ext }))
                    if ext == STDERR_EXT =>
                {
                    this.pending.extend(&data[..]);
                }
                Poll::Ready(Some(russh::ChannelMsg::Eof | russh::ChannelMsg::Close)) => {
                    this.ended = true;
                }
                Poll::Ready(Some(russh::ChannelMsg::ExitStatus { exit_status })) => {
                    this.exit_status = Some(exit_status);
                }
                // Window adjustments, success/failure replies, and unknown
                // extended-data codes carry no stream bytes.
                Poll::Ready(Some(_)) => {}
                Poll::Ready(None) => {
                    this.ended = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for ChannelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.ended {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }

        let send = this.channel.data(buf);
        tokio::pin!(send);
        send.poll(cx).map(|sent| match sent {
            Ok(()) => Ok(buf.len()),
            Err(e) => Err(io::Error::other(format!("channel write failed: {e}"))),
        })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Channel data is framed and sent as it is written.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let eof = this.channel.eof();
        tokio::pin!(eof);
        eof.poll(cx)
            .map_err(|e| io::Error::other(format!("channel shutdown failed: {e}")))
    }
}
