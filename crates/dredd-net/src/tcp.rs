//! TCP relay transport.
//!
//! One connection per delivery: connect, write a `dredd_message` frame, read
//! one `ack` frame. A subscription keeps its connection open; envelopes
//! arrive as `dredd_message` frames and decoys go back as
//! `mirror_response` frames on the same socket.

use std::time::Duration;

use dredd_protocol::{DecoyResponse, RelayAddress, SigilId, WireEnvelope};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::frame::{AckStatus, RelayFrame, MAX_FRAME_BYTES};
use crate::relay::{BoxFuture, Inbound, RelayAck, RelayChannel, RelayTransport, ReplyHandle};
use crate::{NetError, Result};

/// Default time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay transport over plain TCP with JSON-lines framing.
#[derive(Debug, Clone)]
pub struct TcpRelayTransport {
    connect_timeout: Duration,
}

impl Default for TcpRelayTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TcpRelayTransport {
    /// Transport with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, node: &RelayAddress) -> Result<TcpStream> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(node.as_str())).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(NetError::Connection(format!("{}: {}", node, e))),
            Err(_) => Err(NetError::Timeout(format!("connecting to {}", node))),
        }
    }

    async fn deliver_inner(&self, node: &RelayAddress, envelope: &WireEnvelope) -> Result<RelayAck> {
        let stream = self.connect(node).await?;
        let (read, mut write) = stream.into_split();

        let frame = RelayFrame::DreddMessage {
            envelope: serde_json::to_value(envelope)?,
        };
        write.write_all(frame.to_line()?.as_bytes()).await?;
        write.flush().await?;

        let mut reader = BufReader::new(read);
        let line = read_frame_line(&mut reader)
            .await?
            .ok_or(NetError::Closed)?;

        match RelayFrame::from_line(&line)? {
            RelayFrame::Ack {
                status: AckStatus::Accepted,
                ..
            } => Ok(RelayAck::Accepted),
            RelayFrame::Ack {
                status: AckStatus::Refused,
                reason,
            } => Ok(RelayAck::Refused(reason.unwrap_or_default())),
            other => Err(NetError::Frame(format!(
                "expected ack from {}, got {:?}",
                node, other
            ))),
        }
    }

    async fn subscribe_inner(
        &self,
        node: &RelayAddress,
        identity: &SigilId,
    ) -> Result<Box<dyn RelayChannel>> {
        let stream = self.connect(node).await?;
        let (read, mut write) = stream.into_split();

        let frame = RelayFrame::Subscribe {
            target_sigil: identity.to_string(),
        };
        write.write_all(frame.to_line()?.as_bytes()).await?;
        write.flush().await?;

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_decoys(node.clone(), write, reply_rx));

        debug!(node = %node, identity = %identity, "TCP subscription opened");
        Ok(Box::new(TcpChannel {
            node: node.clone(),
            reader: BufReader::new(read),
            reply: ReplyHandle::new(reply_tx),
        }))
    }
}

impl RelayTransport for TcpRelayTransport {
    fn deliver<'a>(
        &'a self,
        node: &'a RelayAddress,
        envelope: &'a WireEnvelope,
    ) -> BoxFuture<'a, Result<RelayAck>> {
        Box::pin(self.deliver_inner(node, envelope))
    }

    fn subscribe<'a>(
        &'a self,
        node: &'a RelayAddress,
        identity: &'a SigilId,
    ) -> BoxFuture<'a, Result<Box<dyn RelayChannel>>> {
        Box::pin(self.subscribe_inner(node, identity))
    }
}

async fn write_decoys(
    node: RelayAddress,
    mut write: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<DecoyResponse>,
) {
    while let Some(decoy) = rx.recv().await {
        let line = match (RelayFrame::MirrorResponse { decoy }).to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(node = %node, error = %e, "Failed to encode mirror response");
                continue;
            }
        };
        if let Err(e) = write.write_all(line.as_bytes()).await {
            debug!(node = %node, error = %e, "Relay connection closed while writing decoy");
            return;
        }
    }
}

/// Read one line of at most [`MAX_FRAME_BYTES`]. `None` on clean EOF.
async fn read_frame_line<R>(reader: &mut BufReader<R>) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = (MAX_FRAME_BYTES + 1) as u64;
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge {
            max: MAX_FRAME_BYTES,
        });
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| NetError::Frame("frame is not UTF-8".into()))
}

struct TcpChannel {
    node: RelayAddress,
    reader: BufReader<OwnedReadHalf>,
    reply: ReplyHandle,
}

impl TcpChannel {
    async fn next_inner(&mut self) -> Result<Option<Inbound>> {
        loop {
            let Some(line) = read_frame_line(&mut self.reader).await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match RelayFrame::from_line(&line) {
                Ok(RelayFrame::DreddMessage { envelope }) => {
                    return Ok(Some(Inbound {
                        node: self.node.clone(),
                        payload: envelope.to_string(),
                        reply: self.reply.clone(),
                    }));
                }
                Ok(other) => {
                    debug!(node = %self.node, frame = ?other, "Ignoring non-message frame");
                }
                Err(e) => {
                    warn!(node = %self.node, error = %e, "Skipping unreadable relay frame");
                }
            }
        }
    }
}

impl RelayChannel for TcpChannel {
    fn node(&self) -> &RelayAddress {
        &self.node
    }

    fn next_envelope(&mut self) -> BoxFuture<'_, Result<Option<Inbound>>> {
        Box::pin(self.next_inner())
    }
}
