//! Connection manager: owns every live [`PeerConnection`].
//!
//! Dials outbound peers, accepts inbound ones in server mode, executes the
//! actions handlers emit, and routes decoded messages: object chunks go to
//! the assembler, whole objects to the store, everything else onto the bus.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use chainwire_messages::Message;
use chainwire_network::{
    ConnectionDirection, ConnectionState, HandlerAction, InboundEvent, NetworkError,
    NetworkEvent, PeerConnection, StreamDirection, StreamError, StreamRequest,
};
use chainwire_types::PeerAddress;

use crate::context::NodeContext;
use crate::shutdown::shutdown_signalled;
use crate::NodeError;

/// Bound on decoded messages waiting for the dispatcher.
const INBOUND_QUEUE: usize = 1024;

pub struct ConnectionManager {
    ctx: Arc<NodeContext>,
    connections: RwLock<HashMap<PeerAddress, Arc<PeerConnection>>>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    /// Set by [`ConnectionManager::close_all`]; later attaches are refused.
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Create the manager and the receiving end its connections feed.
    /// Pass the receiver to [`spawn_dispatcher`].
    pub fn new(ctx: Arc<NodeContext>) -> (Arc<Self>, mpsc::Receiver<InboundEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let manager = Arc::new(Self {
            ctx,
            connections: RwLock::new(HashMap::new()),
            inbound_tx,
            closed: AtomicBool::new(false),
        });
        (manager, inbound_rx)
    }

    /// Dial `addr` and serve the connection.
    ///
    /// Publishes `Connecting`, then `Connected` or `ConnectFailed`.
    pub async fn connect(&self, addr: PeerAddress) -> Result<Arc<PeerConnection>, NodeError> {
        if self.is_shut() {
            return Err(NodeError::NotRunning);
        }
        if self.is_live(&addr).await {
            return Err(NetworkError::AlreadyConnected(addr).into());
        }
        self.publish_state(&addr, ConnectionState::Connecting).await;

        let timeout = self.ctx.config.connect_timeout();
        let dialed = tokio::time::timeout(timeout, TcpStream::connect(addr.to_string())).await;
        let stream = match dialed {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.connect_failed(addr, e.to_string()).await),
            Err(_) => {
                let reason = format!("timed out after {}s", timeout.as_secs());
                return Err(self.connect_failed(addr, reason).await);
            }
        };
        let _ = stream.set_nodelay(true);
        self.attach(stream, addr, ConnectionDirection::Outbound).await
    }

    /// Serve an already established byte stream as a peer connection.
    pub async fn attach<S>(
        &self,
        io: S,
        addr: PeerAddress,
        direction: ConnectionDirection,
    ) -> Result<Arc<PeerConnection>, NodeError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_live(&addr).await {
            return Err(NetworkError::AlreadyConnected(addr).into());
        }
        // Opening publishes on the bus, so no lock is held across it.
        let conn = PeerConnection::open(
            addr.clone(),
            direction,
            io,
            &self.ctx.connection,
            Arc::clone(&self.ctx.serializer),
            self.inbound_tx.clone(),
            self.ctx.bus.clone(),
        )
        .await;

        let refused = {
            let mut connections = self.connections.write().await;
            if self.is_shut() {
                Some("manager closed")
            } else {
                match connections.get(&addr) {
                    Some(existing) if !existing.is_closed() => Some("duplicate connection"),
                    _ => {
                        connections.insert(addr.clone(), Arc::clone(&conn));
                        None
                    }
                }
            }
        };
        match refused {
            None => Ok(conn),
            Some(reason) => {
                conn.close(reason).await;
                if self.is_shut() {
                    Err(NodeError::NotRunning)
                } else {
                    Err(NetworkError::AlreadyConnected(addr).into())
                }
            }
        }
    }

    /// Accept inbound connections on `port` until shutdown.
    pub async fn listen(
        self: &Arc<Self>,
        port: u16,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(SocketAddr, JoinHandle<()>), NodeError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local = listener.local_addr()?;
        info!(%local, "listening for peers");

        let manager = Arc::clone(self);
        let task = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown_signalled(&mut shutdown) => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, remote)) => {
                                let _ = stream.set_nodelay(true);
                                let peer = PeerAddress::from(remote);
                                if let Err(e) = manager
                                    .attach(stream, peer.clone(), ConnectionDirection::Inbound)
                                    .await
                                {
                                    debug!(%peer, error = %e, "inbound connection refused");
                                }
                            }
                            Err(e) => warn!(error = %e, "accept failed"),
                        },
                    }
                }
                debug!("listener stopped");
            }
            .instrument(tracing::info_span!("listener", %local)),
        );
        Ok((local, task))
    }

    pub async fn disconnect(&self, peer: &PeerAddress, reason: impl Into<String>) {
        let conn = self.connections.write().await.remove(peer);
        match conn {
            Some(conn) => conn.close(reason).await,
            None => debug!(%peer, "disconnect for unknown peer ignored"),
        }
    }

    pub async fn send(&self, peer: &PeerAddress, message: Message) -> Result<(), NodeError> {
        let conn = self.get(peer).await?;
        conn.send(message).await?;
        self.ctx.metrics.messages_sent.inc();
        Ok(())
    }

    /// Stream a big object to `peer`. Returns the number of chunks sent.
    pub async fn send_big_object(
        &self,
        peer: &PeerAddress,
        request: StreamRequest,
    ) -> Result<u32, NodeError> {
        let conn = self.get(peer).await?;
        let chunks = conn.send_big_object(request).await?;
        self.ctx.metrics.chunks_sent.inc_by(u64::from(chunks));
        Ok(chunks)
    }

    /// Queue `message` without waiting on the peer's outbound stream.
    pub async fn try_send(&self, peer: &PeerAddress, message: Message) -> Result<(), NodeError> {
        let conn = self.get(peer).await?;
        match conn.try_send(message) {
            Ok(()) => {
                self.ctx.metrics.messages_sent.inc();
                Ok(())
            }
            Err(e) => {
                if matches!(e, NetworkError::Stream(StreamError::Backpressure { .. })) {
                    self.ctx.metrics.messages_dropped.inc();
                }
                Err(e.into())
            }
        }
    }

    /// Tear down a peer that stopped reading: its outbound stream is full.
    /// Only the first call for a connection publishes `StreamFailed`.
    pub async fn drop_stalled(&self, peer: &PeerAddress, error: String) {
        let Some(conn) = self.connections.write().await.remove(peer) else {
            return;
        };
        warn!(%peer, %error, "peer stopped reading, disconnecting");
        self.ctx
            .bus
            .publish(NetworkEvent::StreamFailed {
                peer: peer.clone(),
                direction: StreamDirection::Outbound,
                error,
            })
            .await;
        conn.close("outbound stream full").await;
    }

    /// Queue `message` on every open connection. Returns how many accepted it.
    pub async fn broadcast(&self, message: Message) -> usize {
        let conns: Vec<_> = self.connections.read().await.values().cloned().collect();
        let mut sent = 0;
        for conn in conns {
            match conn.try_send(message.clone()) {
                Ok(()) => sent += 1,
                Err(e) => debug!(peer = %conn.address(), error = %e, "broadcast skipped peer"),
            }
        }
        self.ctx.metrics.messages_sent.inc_by(sent as u64);
        sent
    }

    pub async fn peers(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<_> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, c)| !c.is_closed())
            .map(|(p, _)| p.clone())
            .collect();
        peers.sort();
        peers
    }

    pub async fn connection(&self, peer: &PeerAddress) -> Option<Arc<PeerConnection>> {
        self.connections.read().await.get(peer).cloned()
    }

    /// Close every connection. The manager refuses new ones afterwards.
    pub async fn close_all(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let conns: Vec<_> = self.connections.write().await.drain().map(|(_, c)| c).collect();
        for conn in conns {
            conn.close(reason).await;
        }
    }

    /// Carry out one handler action. Sends never wait on a peer's stream.
    pub async fn execute(&self, action: HandlerAction) {
        match action {
            HandlerAction::Send { peer, message } => match self.try_send(&peer, message).await {
                Ok(()) => {}
                Err(e) if is_backpressure(&e) => self.drop_stalled(&peer, e.to_string()).await,
                Err(e) => debug!(%peer, error = %e, "handler send failed"),
            },
            HandlerAction::Connect(addr) => {
                if let Err(e) = self.connect(addr.clone()).await {
                    debug!(peer = %addr, error = %e, "handler connect failed");
                }
            }
            HandlerAction::Disconnect { peer, reason } => self.disconnect(&peer, reason).await,
            HandlerAction::Publish(event) => self.ctx.bus.publish(event).await,
        }
    }

    pub fn is_shut(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn is_live(&self, peer: &PeerAddress) -> bool {
        self.connections
            .read()
            .await
            .get(peer)
            .is_some_and(|c| !c.is_closed())
    }

    async fn get(&self, peer: &PeerAddress) -> Result<Arc<PeerConnection>, NodeError> {
        self.connections
            .read()
            .await
            .get(peer)
            .filter(|c| !c.is_closed())
            .cloned()
            .ok_or_else(|| NetworkError::NotConnected(peer.clone()).into())
    }

    async fn publish_state(&self, peer: &PeerAddress, state: ConnectionState) {
        self.ctx
            .bus
            .publish(NetworkEvent::ConnectionStateChanged {
                peer: peer.clone(),
                direction: ConnectionDirection::Outbound,
                state,
            })
            .await;
    }

    async fn connect_failed(&self, addr: PeerAddress, reason: String) -> NodeError {
        info!(peer = %addr, %reason, "connect failed");
        self.publish_state(&addr, ConnectionState::ConnectFailed { reason: reason.clone() })
            .await;
        NetworkError::ConnectionFailed(format!("{addr}: {reason}")).into()
    }

    /// Drop a closed connection and discard the assemblies it was feeding.
    async fn on_closed(&self, peer: &PeerAddress) {
        {
            let mut connections = self.connections.write().await;
            if connections.get(peer).is_some_and(|c| c.is_closed()) {
                connections.remove(peer);
            }
        }
        let dropped = self.ctx.assembler.peer_disconnected(peer).await;
        if !dropped.is_empty() {
            debug!(%peer, count = dropped.len(), "discarded partial objects");
        }
    }

    async fn on_message(&self, peer: PeerAddress, message: Message) {
        match message {
            Message::ObjectChunk(chunk) => {
                if let Err(e) = self.ctx.assembler.accept(peer.clone(), chunk).await {
                    debug!(%peer, error = %e, "object chunk rejected");
                }
            }
            Message::Object(object) => {
                if let Err(e) = self.ctx.assembler.accept_whole(peer.clone(), object).await {
                    debug!(%peer, error = %e, "object rejected");
                }
            }
            other => {
                self.ctx
                    .bus
                    .publish(NetworkEvent::MessageReceived {
                        peer,
                        message: Arc::new(other),
                    })
                    .await;
            }
        }
    }
}

/// Whether a send failed only because the peer's outbound stream is full.
pub fn is_backpressure(error: &NodeError) -> bool {
    matches!(
        error,
        NodeError::Network(NetworkError::Stream(StreamError::Backpressure { .. }))
    )
}

/// Route what connections hand to the node until every sender is gone.
pub fn spawn_dispatcher(
    manager: Arc<ConnectionManager>,
    mut inbound: mpsc::Receiver<InboundEvent>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    InboundEvent::Message { peer, message } => {
                        manager.on_message(peer, message).await
                    }
                    InboundEvent::Closed { peer, reason } => {
                        debug!(%peer, %reason, "connection closed");
                        manager.on_closed(&peer).await;
                    }
                }
            }
            debug!("dispatcher stopped");
        }
        .instrument(tracing::info_span!("dispatcher")),
    )
}
