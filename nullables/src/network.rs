//! Nullable network: a scripted remote peer over an in-memory socket.

use std::sync::Arc;
use std::time::Duration;

use chainwire_messages::Message;
use chainwire_protocol::{encode_frame, BincodeSerializer, FrameDecoder, ProtocolError, Serializer};
use chainwire_types::NetworkId;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// The far end of a test connection.
///
/// [`NullPeer::pair`] returns the peer plus the socket to hand to the code
/// under test. The peer frames and unframes messages exactly like a real
/// node, but also lets tests write raw bytes.
pub struct NullPeer {
    io: DuplexStream,
    magic: [u8; 4],
    decoder: FrameDecoder,
    serializer: Arc<dyn Serializer>,
    inbox: Vec<Message>,
}

impl NullPeer {
    pub fn pair(network: NetworkId) -> (Self, DuplexStream) {
        let (ours, theirs) = duplex(DUPLEX_CAPACITY);
        let magic = network.magic();
        (
            Self {
                io: ours,
                magic,
                decoder: FrameDecoder::new(magic),
                serializer: Arc::new(BincodeSerializer),
                inbox: Vec::new(),
            },
            theirs,
        )
    }

    /// Send one framed message.
    pub async fn send(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let payload = self.serializer.serialize(message)?;
        let frame = encode_frame(self.magic, &payload)?;
        self.send_raw(&frame).await
    }

    /// Write bytes without framing, e.g. garbage.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.io
            .write_all(bytes)
            .await
            .map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Next message from the node, or `None` on EOF or after `wait`.
    pub async fn recv(&mut self, wait: Duration) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut buf = vec![0u8; 8192];
        loop {
            if !self.inbox.is_empty() {
                return Some(self.inbox.remove(0));
            }
            let read = tokio::time::timeout_at(deadline, self.io.read(&mut buf)).await;
            let n = match read {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
                Ok(Ok(n)) => n,
            };
            let frames = self.decoder.push(&buf[..n]).ok()?;
            for frame in frames {
                self.inbox.push(self.serializer.deserialize(&frame).ok()?);
            }
        }
    }

    /// Skip messages until one matches `pred`.
    pub async fn recv_matching(
        &mut self,
        wait: Duration,
        mut pred: impl FnMut(&Message) -> bool,
    ) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let message = self.recv(left).await?;
            if pred(&message) {
                return Some(message);
            }
        }
    }

    /// True once the node has closed its end.
    pub async fn is_closed(&mut self, wait: Duration) -> bool {
        let mut buf = [0u8; 1024];
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.io.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    /// Close our end.
    pub async fn shutdown(&mut self) {
        let _ = self.io.shutdown().await;
    }
}
