//! End-to-end node tests over in-memory sockets and loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use chainwire_messages::{Message, ObjectChunkMessage, ObjectKind};
use chainwire_network::{
    ConnectionDirection, ConnectionState, EventSubscription, HandlerState, NetworkEvent,
    StreamDirection, StreamRequest,
};
use chainwire_node::{Node, NodeConfig, NodeContext, NodeError};
use chainwire_nullables::{NullClock, NullPeer, NullStore};
use chainwire_protocol::BincodeSerializer;
use chainwire_store::ObjectStore;
use chainwire_types::{NetworkId, ObjectId, PeerAddress, Service, ServiceState};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.auto_connect = false;
    config.tick_interval_ms = 20;
    config.keepalive.ping_interval_secs = 10;
    config.keepalive.pong_timeout_secs = 5;
    config
}

async fn running_node(config: NodeConfig) -> (Node, Arc<NullStore>) {
    let store = Arc::new(NullStore::new());
    let mut node = Node::new(config, store.clone()).unwrap();
    node.start().await.unwrap();
    (node, store)
}

async fn next_matching(
    sub: &mut EventSubscription,
    pred: impl Fn(&NetworkEvent) -> bool,
) -> Option<NetworkEvent> {
    timeout(WAIT, async {
        while let Some(event) = sub.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

async fn wait_for_snapshot(node: &Node, handler: &str, pred: impl Fn(&HandlerState) -> bool) {
    let mut rx = node.watch_handler(handler).unwrap();
    timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("snapshot not reached in time")
        .unwrap();
}

fn peer(n: u8) -> PeerAddress {
    PeerAddress::new(format!("10.0.0.{n}"), 18444)
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let (node, _) = running_node(test_config()).await;
    let (mut remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(1), ConnectionDirection::Outbound)
        .await
        .unwrap();

    remote.send(&Message::Ping { nonce: 7 }).await.unwrap();
    let pong = remote
        .recv_matching(WAIT, |m| matches!(m, Message::Pong { .. }))
        .await;
    assert_eq!(pong, Some(Message::Pong { nonce: 7 }));
}

#[tokio::test]
async fn handler_snapshots_follow_connections() {
    let (node, _) = running_node(test_config()).await;
    let (mut remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(2), ConnectionDirection::Outbound)
        .await
        .unwrap();

    wait_for_snapshot(&node, "network", |s| {
        matches!(s, HandlerState::Network(n) if n.active_count() == 1)
    })
    .await;

    remote.shutdown().await;
    wait_for_snapshot(&node, "network", |s| {
        matches!(s, HandlerState::Network(n) if n.active_count() == 0)
    })
    .await;
    assert!(node.connections().peers().await.is_empty());
}

#[tokio::test]
async fn duplicate_attach_is_refused() {
    let (node, _) = running_node(test_config()).await;
    let (_remote, sock) = NullPeer::pair(NetworkId::Regtest);
    let (_other, sock2) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(3), ConnectionDirection::Outbound)
        .await
        .unwrap();
    let err = node
        .connections()
        .attach(sock2, peer(3), ConnectionDirection::Outbound)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, NodeError::Network(_)));
}

#[tokio::test]
async fn idle_peer_is_pinged_then_dropped() {
    let clock = Arc::new(NullClock::new(1_000));
    let ctx = NodeContext::with_parts(
        test_config(),
        Arc::new(NullStore::new()),
        Arc::new(BincodeSerializer),
        clock.clone(),
    )
    .unwrap();
    let mut node = Node::with_context(ctx).unwrap();
    node.start().await.unwrap();
    wait_for_snapshot(&node, "keepalive", |s| {
        matches!(s, HandlerState::Keepalive(k) if k.now_secs == 1_000)
    })
    .await;

    let (mut remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(4), ConnectionDirection::Outbound)
        .await
        .unwrap();
    wait_for_snapshot(&node, "keepalive", |s| {
        matches!(s, HandlerState::Keepalive(k) if k.peers.contains_key(&peer(4)))
    })
    .await;

    clock.advance(10);
    let ping = remote
        .recv_matching(WAIT, |m| matches!(m, Message::Ping { .. }))
        .await;
    assert!(ping.is_some());

    clock.advance(5);
    assert!(remote.is_closed(WAIT).await);
}

#[tokio::test]
async fn big_object_crosses_two_nodes() {
    let (sender, _) = running_node(test_config()).await;
    let (receiver, receiver_store) = running_node(test_config()).await;
    let (a, b) = tokio::io::duplex(64 * 1024);
    sender
        .connections()
        .attach(a, peer(20), ConnectionDirection::Outbound)
        .await
        .unwrap();
    receiver
        .connections()
        .attach(b, peer(10), ConnectionDirection::Outbound)
        .await
        .unwrap();

    let data: Vec<u8> = (0..25_000u32).map(|n| (n % 251) as u8).collect();
    let id = ObjectId::new("block-1");
    let mut events = receiver.bus().subscribe("test");
    let chunks = sender
        .connections()
        .send_big_object(
            &peer(20),
            StreamRequest::from_bytes(id.clone(), ObjectKind::Block, data.clone()),
        )
        .await
        .unwrap();
    assert_eq!(chunks, 3);
    assert_eq!(sender.metrics().chunks_sent.get(), 3);

    let size = receiver.context().assembler.wait_for(&id).await.unwrap();
    assert_eq!(size, 25_000);
    assert_eq!(receiver_store.get(&id).unwrap(), data);

    let received = next_matching(&mut events, |e| {
        matches!(e, NetworkEvent::BigObjectReceived { .. })
    })
    .await;
    assert!(matches!(
        received,
        Some(NetworkEvent::BigObjectReceived { size: 25_000, kind: ObjectKind::Block, .. })
    ));
}

#[tokio::test]
async fn small_object_is_stored_whole() {
    let (node, store) = running_node(test_config()).await;
    let (mut remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(5), ConnectionDirection::Outbound)
        .await
        .unwrap();

    let id = ObjectId::new("tx-1");
    remote
        .send(&Message::Object(chainwire_messages::ObjectMessage {
            id: id.clone(),
            kind: ObjectKind::Transaction,
            payload: b"raw tx".to_vec(),
        }))
        .await
        .unwrap();
    assert_eq!(node.context().assembler.wait_for(&id).await.unwrap(), 6);
    assert_eq!(store.get(&id).unwrap(), b"raw tx");
}

#[tokio::test]
async fn disconnect_mid_assembly_reports_incomplete() {
    let (node, store) = running_node(test_config()).await;
    let mut events = node.bus().subscribe("test");
    let (mut remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(6), ConnectionDirection::Outbound)
        .await
        .unwrap();

    let id = ObjectId::new("half");
    remote
        .send(&Message::ObjectChunk(ObjectChunkMessage {
            id: id.clone(),
            kind: ObjectKind::Block,
            ordinal: 0,
            total_len: 20_000,
            last: false,
            payload: vec![1; 10_000],
        }))
        .await
        .unwrap();
    timeout(WAIT, async {
        while node.context().assembler.in_progress().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    remote.shutdown().await;
    let incomplete = next_matching(&mut events, |e| {
        matches!(e, NetworkEvent::AssemblyIncomplete { .. })
    })
    .await;
    assert!(matches!(
        incomplete,
        Some(NetworkEvent::AssemblyIncomplete { received: 10_000, declared: 20_000, .. })
    ));
    assert!(!store.contains(&id).unwrap());
    assert!(node.context().assembler.in_progress().await.is_empty());
}

#[tokio::test]
async fn nodes_meet_over_tcp() {
    let mut server_config = test_config();
    server_config.server_mode = true;
    server_config.port = 0;
    let (server, _) = running_node(server_config).await;
    let port = server.listen_addr().unwrap().port();

    let (client, _) = running_node(test_config()).await;
    let target = PeerAddress::new("127.0.0.1", port);
    client.connections().connect(target.clone()).await.unwrap();

    wait_for_snapshot(&server, "network", |s| {
        matches!(s, HandlerState::Network(n) if n.inbound_count() == 1)
    })
    .await;
    wait_for_snapshot(&client, "network", |s| {
        matches!(s, HandlerState::Network(n) if n.active_count() == 1)
    })
    .await;
    assert_eq!(client.connections().peers().await, vec![target]);
}

#[tokio::test]
async fn refused_connect_publishes_connect_failed() {
    let (node, _) = running_node(test_config()).await;
    let mut events = node.bus().subscribe("test");

    // Bind then drop a listener to get a port nobody is listening on.
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let target = PeerAddress::new("127.0.0.1", port);
    assert!(node.connections().connect(target.clone()).await.is_err());

    let failed = next_matching(&mut events, |e| {
        matches!(
            e,
            NetworkEvent::ConnectionStateChanged {
                state: ConnectionState::ConnectFailed { .. },
                ..
            }
        )
    })
    .await;
    assert!(matches!(
        failed,
        Some(NetworkEvent::ConnectionStateChanged { peer, .. }) if peer == target
    ));
}

#[tokio::test]
async fn peer_that_never_reads_is_dropped_and_node_stays_responsive() {
    let mut config = test_config();
    config.stream.buffer_size = 4;
    let (node, _) = running_node(config).await;
    let mut events = node.bus().subscribe("test");

    let (mut flooder, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(20), ConnectionDirection::Outbound)
        .await
        .unwrap();

    // Every ping asks for a pong, but the flooder never reads one.
    let flood = tokio::spawn(async move {
        for nonce in 0..20_000u64 {
            if flooder.send(&Message::Ping { nonce }).await.is_err() {
                break;
            }
        }
    });

    let failed = next_matching(&mut events, |e| {
        matches!(
            e,
            NetworkEvent::StreamFailed { direction: StreamDirection::Outbound, .. }
        )
    })
    .await;
    assert!(matches!(
        failed,
        Some(NetworkEvent::StreamFailed { peer: failed, .. }) if failed == peer(20)
    ));
    assert!(node.metrics().messages_dropped.get() >= 1);
    assert!(!node.connections().peers().await.contains(&peer(20)));
    timeout(WAIT, flood).await.unwrap().unwrap();

    let (mut remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(21), ConnectionDirection::Outbound)
        .await
        .unwrap();
    remote.send(&Message::Ping { nonce: 9 }).await.unwrap();
    assert!(remote
        .recv_matching(WAIT, |m| matches!(m, Message::Pong { nonce: 9 }))
        .await
        .is_some());
}

#[tokio::test]
async fn connection_finishing_after_stop_is_refused() {
    let (mut node, _) = running_node(test_config()).await;
    let stopped = Arc::clone(node.connections());
    node.stop().await.unwrap();

    // A dial that completes after stop must not register a peer.
    let (mut late, sock) = NullPeer::pair(NetworkId::Regtest);
    let attached = stopped
        .attach(sock, peer(30), ConnectionDirection::Outbound)
        .await;
    assert!(matches!(attached, Err(NodeError::NotRunning)));
    assert!(stopped.peers().await.is_empty());
    assert!(late.is_closed(WAIT).await);
    assert!(matches!(
        stopped.connect(peer(31)).await,
        Err(NodeError::NotRunning)
    ));

    node.start().await.unwrap();
    let (_remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(32), ConnectionDirection::Outbound)
        .await
        .unwrap();
    assert_eq!(node.connections().peers().await, vec![peer(32)]);
}

#[tokio::test]
async fn stop_start_destroy_lifecycle() {
    let store = Arc::new(NullStore::new());
    let mut node = Node::new(test_config(), store.clone()).unwrap();
    assert_eq!(node.service_state(), ServiceState::Stopped);

    node.start().await.unwrap();
    node.start().await.unwrap();
    assert_eq!(node.service_state(), ServiceState::Running);

    node.stop().await.unwrap();
    assert_eq!(node.service_state(), ServiceState::Stopped);
    assert_eq!(node.handler_state("network").await, Some(ServiceState::Stopped));
    assert_eq!(store.service_state(), ServiceState::Stopped);

    node.start().await.unwrap();
    assert_eq!(node.handler_state("keepalive").await, Some(ServiceState::Running));
    let (mut remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(7), ConnectionDirection::Outbound)
        .await
        .unwrap();
    remote.send(&Message::Ping { nonce: 1 }).await.unwrap();
    assert!(remote
        .recv_matching(WAIT, |m| matches!(m, Message::Pong { nonce: 1 }))
        .await
        .is_some());

    node.destroy().await.unwrap();
    assert_eq!(node.service_state(), ServiceState::Destroyed);
    assert!(node.start().await.is_err());
}

#[tokio::test]
async fn paused_handler_misses_events_until_resumed() {
    let (node, _) = running_node(test_config()).await;
    node.pause_handler("keepalive").await.unwrap();
    assert_eq!(node.handler_state("keepalive").await, Some(ServiceState::Paused));

    let (mut remote, sock) = NullPeer::pair(NetworkId::Regtest);
    node.connections()
        .attach(sock, peer(8), ConnectionDirection::Outbound)
        .await
        .unwrap();
    remote.send(&Message::Ping { nonce: 3 }).await.unwrap();
    assert!(remote
        .recv_matching(Duration::from_millis(200), |m| matches!(m, Message::Pong { .. }))
        .await
        .is_none());

    node.resume_handler("keepalive").await.unwrap();
    remote.send(&Message::Ping { nonce: 4 }).await.unwrap();
    assert_eq!(
        remote
            .recv_matching(WAIT, |m| matches!(m, Message::Pong { .. }))
            .await,
        Some(Message::Pong { nonce: 4 })
    );
    assert!(!node.restart_handler("keepalive").await.unwrap());
}
