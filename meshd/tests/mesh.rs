use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use meshd::codec::FrameCodec;
use meshd::config::TimingConfig;
use meshd::membership::{Node, NodeStatus};
use meshd::wire::{Command, Frame};
use meshd::{Mesh, MeshConfig};

fn localhost() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn fast_config(name: &str) -> MeshConfig {
    MeshConfig {
        friendly_name: name.to_owned(),
        ip: localhost(),
        port: 0,
        timing: TimingConfig {
            gossip_period: Duration::from_millis(100),
            heartbeat_period: Duration::from_millis(100),
            queue_poll: Duration::from_millis(20),
            send_timeout: Duration::from_secs(1),
            max_send_attempts: 3,
        },
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A free loopback port with nothing listening on it.
fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test_log::test(tokio::test)]
async fn two_node_handshake() {
    let a = Mesh::start(fast_config("alpha")).await.unwrap();
    let b = Mesh::start(fast_config("beta")).await.unwrap();

    a.connect(b.local_addr().ip(), b.local_addr().port());

    wait_until("beta to learn about alpha", || {
        b.table()
            .lookup(a.local_addr().ip(), a.local_addr().port())
            .is_some()
    })
    .await;

    let alpha_at_beta = b
        .table()
        .lookup(a.local_addr().ip(), a.local_addr().port())
        .unwrap();
    assert_eq!(alpha_at_beta.name, "alpha");
    assert_eq!(alpha_at_beta.status, NodeStatus::Live);

    assert_eq!(a.table().len(), 2);
    assert_eq!(b.table().len(), 2);
    assert!(a
        .table()
        .lookup(b.local_addr().ip(), b.local_addr().port())
        .is_some());

    a.shutdown().await;
    b.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn every_frame_is_acknowledged_with_the_right_identities() {
    let b = Mesh::start(fast_config("beta")).await.unwrap();
    let probe = Node::new("probe", localhost(), 45555);

    let stream = TcpStream::connect(b.local_addr()).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::new());

    for _ in 0..2 {
        framed
            .send(Frame::heartbeat(&probe, &b.local_node()))
            .await
            .unwrap();

        let ack = framed.next().await.unwrap().unwrap().unwrap();
        assert_eq!(ack.command, Command::Ack);
        assert_eq!(ack.source_friendly_name, "beta");
        assert_eq!(
            ack.sender_id(),
            (b.local_addr().ip(), b.local_addr().port())
        );
        assert_eq!(ack.destination_friendly_name, "probe");
        assert_eq!(ack.recipient_id(), probe.id());
    }

    b.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn gossip_converges_to_full_membership() {
    let a = Mesh::start(fast_config("alpha")).await.unwrap();
    let b = Mesh::start(fast_config("beta")).await.unwrap();
    let c = Mesh::start(fast_config("gamma")).await.unwrap();

    // Partial knowledge only: alpha knows beta, beta knows gamma.
    a.connect(b.local_addr().ip(), b.local_addr().port());
    b.connect(c.local_addr().ip(), c.local_addr().port());

    wait_until("every table to hold all three nodes", || {
        a.table().len() == 3 && b.table().len() == 3 && c.table().len() == 3
    })
    .await;

    for mesh in [&a, &b, &c] {
        for node in mesh.table().list_all() {
            assert_eq!(node.status, NodeStatus::Live);
        }
    }

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn unreachable_peers_are_marked_dead_and_revived_on_contact() {
    let a = Mesh::start(fast_config("alpha")).await.unwrap();
    let beta_port = unused_port();

    a.connect(localhost(), beta_port);

    wait_until("alpha to give up on beta", || {
        matches!(
            a.table().lookup(localhost(), beta_port),
            Some(node) if node.status == NodeStatus::Dead && node.failed_connections >= 3
        )
    })
    .await;

    // Quiesce the protocol loops and let queued retries burn out so the
    // revival below sticks.
    a.gossip_toggle().disable();
    a.heartbeat_toggle().disable();
    wait_until("the outbound queue to drain", || a.outbound().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    wait_until("the outbound queue to stay drained", || {
        a.outbound().is_empty()
    })
    .await;

    // "Beta" comes back and heartbeats alpha directly.
    let beta = Node::new("beta", localhost(), beta_port);
    let stream = TcpStream::connect(a.local_addr()).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::new());
    framed
        .send(Frame::heartbeat(&beta, &a.local_node()))
        .await
        .unwrap();
    let ack = framed.next().await.unwrap().unwrap().unwrap();
    assert_eq!(ack.command, Command::Ack);

    wait_until("alpha to revive beta", || {
        matches!(
            a.table().lookup(localhost(), beta_port),
            Some(node) if node.status == NodeStatus::Live
                && node.failed_connections == 0
                && node.last_heartbeat.is_some()
        )
    })
    .await;

    a.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn disabling_gossip_stops_emission() {
    let a = Mesh::start(fast_config("alpha")).await.unwrap();
    a.heartbeat_toggle().disable();

    // A hand-rolled peer that counts the gossip frames it is sent.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = listener.local_addr().unwrap();
    let gossip_count = Arc::new(AtomicU32::new(0));

    let count = gossip_count.clone();
    let alpha = a.local_node();
    tokio::spawn(async move {
        let probe = Node::new("probe", peer_addr.ip(), peer_addr.port());
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let mut framed = Framed::new(stream, FrameCodec::new());
            while let Some(Ok(Ok(frame))) = framed.next().await {
                if frame.command == Command::Gossip {
                    count.fetch_add(1, Ordering::SeqCst);
                }
                if framed.send(Frame::ack(&probe, &alpha)).await.is_err() {
                    break;
                }
            }
        }
    });

    a.connect(peer_addr.ip(), peer_addr.port());
    wait_until("gossip to start flowing", || {
        gossip_count.load(Ordering::SeqCst) >= 2
    })
    .await;

    a.gossip_toggle().disable();
    // Let anything already queued drain before sampling.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let settled = gossip_count.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(gossip_count.load(Ordering::SeqCst), settled);

    a.shutdown().await;
}
