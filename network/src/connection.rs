//! One peer connection: a socket plus its inbound and outbound streams.
//!
//! Three tasks serve each connection. The reader feeds socket bytes into
//! the inbound stream, the dispatcher forwards decoded messages to the node,
//! and the writer drains the outbound stream onto the socket. Whichever side
//! finishes first closes the connection exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chainwire_messages::Message;
use chainwire_protocol::Serializer;
use chainwire_types::{NetworkId, PeerAddress};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::big_object::{BigObjectConfig, StreamRequest};
use crate::bus::EventBus;
use crate::error::{BigObjectError, NetworkError, StreamError};
use crate::event::{ConnectionDirection, ConnectionState, NetworkEvent};
use crate::stages::{inbound_stream, outbound_stream};
use crate::stream::{StreamConfig, StreamDirection, StreamSender};
use crate::tracing_spans::connection_span;

pub const DEFAULT_READ_BUFFER: usize = 8192;

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub network: NetworkId,
    pub stream: StreamConfig,
    pub read_buffer_bytes: usize,
    pub big_object: BigObjectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            network: NetworkId::default(),
            stream: StreamConfig::default(),
            read_buffer_bytes: DEFAULT_READ_BUFFER,
            big_object: BigObjectConfig::default(),
        }
    }
}

/// What a connection hands to the node.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    Message { peer: PeerAddress, message: Message },
    Closed { peer: PeerAddress, reason: String },
}

pub struct PeerConnection {
    address: PeerAddress,
    direction: ConnectionDirection,
    big_object: BigObjectConfig,
    outbound: StreamSender<Message>,
    bus: EventBus,
    inbound_tx: mpsc::Sender<InboundEvent>,
    closed: Arc<AtomicBool>,
    close_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerConnection {
    /// Wrap an established socket and start serving it.
    ///
    /// Publishes `Connected` before any message from the peer can be
    /// dispatched.
    pub async fn open<S>(
        address: PeerAddress,
        direction: ConnectionDirection,
        io: S,
        config: &ConnectionConfig,
        serializer: Arc<dyn Serializer>,
        inbound_tx: mpsc::Sender<InboundEvent>,
        bus: EventBus,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let magic = config.network.magic();
        let inbound =
            inbound_stream(address.clone(), magic, serializer.clone()).open(&config.stream);
        let outbound = outbound_stream(address.clone(), magic, serializer, &config.big_object)
            .open(&config.stream);
        let (close_tx, close_rx) = watch::channel(false);

        let conn = Arc::new(Self {
            address: address.clone(),
            direction,
            big_object: config.big_object.clone(),
            outbound: outbound.sender,
            bus: bus.clone(),
            inbound_tx: inbound_tx.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            close_tx,
            tasks: Mutex::new(Vec::new()),
        });

        info!(peer = %address, %direction, "peer connected");
        bus.publish(NetworkEvent::ConnectionStateChanged {
            peer: address.clone(),
            direction,
            state: ConnectionState::Connected,
        })
        .await;

        let (mut reader, mut writer) = tokio::io::split(io);
        let span = connection_span(&address, direction);

        // socket -> inbound stream
        let reader_task = {
            let conn = Arc::clone(&conn);
            let feed = inbound.sender;
            let mut close_rx = close_rx.clone();
            let mut buf = vec![0u8; config.read_buffer_bytes.max(1)];
            tokio::spawn(
                async move {
                    let reason = loop {
                        tokio::select! {
                            _ = wait_closed(&mut close_rx) => return,
                            read = reader.read(&mut buf) => match read {
                                Ok(0) => break "remote closed".to_string(),
                                Ok(n) => {
                                    if feed.send(buf[..n].to_vec()).await.is_err() {
                                        break "inbound stream closed".to_string();
                                    }
                                }
                                Err(e) => break format!("read error: {e}"),
                            },
                        }
                    };
                    conn.finish(reason).await;
                }
                .instrument(span.clone()),
            )
        };

        // inbound stream -> node
        let dispatch_task = {
            let conn = Arc::clone(&conn);
            let mut messages = inbound.receiver;
            tokio::spawn(
                async move {
                    while let Some(item) = messages.recv().await {
                        match item {
                            Ok(event) => {
                                let delivered = conn
                                    .inbound_tx
                                    .send(InboundEvent::Message {
                                        peer: conn.address.clone(),
                                        message: event.data,
                                    })
                                    .await;
                                if delivered.is_err() {
                                    conn.finish("node stopped".into()).await;
                                    return;
                                }
                            }
                            Err(e) => {
                                conn.stream_failed(StreamDirection::Inbound, e).await;
                                return;
                            }
                        }
                    }
                }
                .instrument(span.clone()),
            )
        };

        // outbound stream -> socket
        let writer_task = {
            let conn = Arc::clone(&conn);
            let mut frames = outbound.receiver;
            let mut close_rx = close_rx;
            tokio::spawn(
                async move {
                    loop {
                        let item = tokio::select! {
                            _ = wait_closed(&mut close_rx) => break,
                            item = frames.recv() => item,
                        };
                        match item {
                            Some(Ok(event)) => {
                                if let Err(e) = writer.write_all(&event.data).await {
                                    conn.finish(format!("write error: {e}")).await;
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                conn.stream_failed(StreamDirection::Outbound, e).await;
                                break;
                            }
                            None => break,
                        }
                    }
                    let _ = writer.shutdown().await;
                }
                .instrument(span),
            )
        };

        conn.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([reader_task, dispatch_task, writer_task, inbound.worker, outbound.worker]);
        conn
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Disconnected {
                reason: "closed".into(),
            }
        } else {
            ConnectionState::Connected
        }
    }

    /// Queue a message, waiting while the outbound stream is full.
    pub async fn send(&self, message: Message) -> Result<(), NetworkError> {
        self.check_size(&message)?;
        self.outbound.send(message).await?;
        Ok(())
    }

    /// Queue a message or fail with backpressure.
    pub fn try_send(&self, message: Message) -> Result<(), NetworkError> {
        self.check_size(&message)?;
        self.outbound.try_send(message)?;
        Ok(())
    }

    /// Stream an object chunk by chunk. Only one batch of the object is
    /// held by this call at any time; closing the connection cancels it.
    pub async fn send_big_object(&self, request: StreamRequest) -> Result<u32, NetworkError> {
        let id = request.id.clone();
        if request.total_len == 0 {
            self.outbound
                .send(Message::Object(chainwire_messages::ObjectMessage {
                    id,
                    kind: request.kind,
                    payload: Vec::new(),
                }))
                .await?;
            return Ok(0);
        }

        let mut chunks = crate::big_object::ByteChunker::new(&self.big_object).chunks(request)?;
        let mut close_rx = self.close_tx.subscribe();
        let mut sent = 0u32;
        while let Some(chunk) = chunks.next_message() {
            let chunk = chunk?;
            tokio::select! {
                _ = wait_closed(&mut close_rx) => {
                    debug!(
                        peer = %self.address, object = %id, sent,
                        "big object transfer cancelled"
                    );
                    return Err(BigObjectError::Cancelled { id }.into());
                }
                res = self.outbound.send(Message::ObjectChunk(chunk)) => res?,
            }
            sent += 1;
        }
        debug!(peer = %self.address, object = %id, chunks = sent, "big object sent");
        Ok(sent)
    }

    /// Close the connection locally.
    pub async fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.is_closed() {
            return;
        }
        self.bus
            .publish(NetworkEvent::ConnectionStateChanged {
                peer: self.address.clone(),
                direction: self.direction,
                state: ConnectionState::Disconnecting {
                    reason: reason.clone(),
                },
            })
            .await;
        self.finish(reason).await;
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }

    fn check_size(&self, message: &Message) -> Result<(), NetworkError> {
        if let Message::Object(object) = message {
            let size = object.payload.len() as u64;
            if size > self.big_object.max_size() {
                return Err(BigObjectError::SizeExceeded {
                    id: object.id.clone(),
                    size,
                    max: self.big_object.max_size(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn stream_failed(&self, direction: StreamDirection, error: StreamError) {
        warn!(peer = %self.address, %direction, error = %error, "peer stream failed");
        self.bus
            .publish(NetworkEvent::StreamFailed {
                peer: self.address.clone(),
                direction,
                error: error.to_string(),
            })
            .await;
        self.finish(format!("{direction} stream failed: {error}")).await;
    }

    /// Runs once per connection, whichever path gets here first.
    async fn finish(&self, reason: String) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(peer = %self.address, %reason, "peer disconnected");
        let _ = self.close_tx.send(true);
        self.bus
            .publish(NetworkEvent::ConnectionStateChanged {
                peer: self.address.clone(),
                direction: self.direction,
                state: ConnectionState::Disconnected {
                    reason: reason.clone(),
                },
            })
            .await;
        // The node may be waiting on us; never block the closing task on it.
        let tx = self.inbound_tx.clone();
        let peer = self.address.clone();
        tokio::spawn(async move {
            let _ = tx.send(InboundEvent::Closed { peer, reason }).await;
        });
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}

/// Resolves once the close flag is set or its sender is gone.
async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
