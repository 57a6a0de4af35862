use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::membership::NodeTable;
use crate::queue::{MessageQueue, QueuedFrame};
use crate::wire::Frame;
use crate::Toggle;

/// Periodic liveness pings: once per period, when enabled, send a heartbeat
/// to one randomly chosen live peer.
pub async fn run(
    table: Arc<NodeTable>,
    outbound: Arc<MessageQueue>,
    toggle: Toggle,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // The first tick completes immediately, so an enabled node heartbeats
    // as soon as it comes up rather than a full period later.
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if toggle.is_enabled() {
                    emit(&table, &outbound);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("Stopping heartbeat protocol");
}

/// One heartbeat tick; skipped when no live peer is known.
pub(crate) fn emit(table: &NodeTable, outbound: &MessageQueue) -> bool {
    let Some(peer) = table.random_live_peer() else {
        debug!("No live peer to heartbeat, skipping tick");
        return false;
    };

    debug!("Sending heartbeat to {}", peer);
    outbound.enqueue(QueuedFrame::new(Frame::heartbeat(&table.local(), &peer)));
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::membership::Node;
    use crate::wire::Command;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn skips_the_tick_without_live_peers() {
        let table = NodeTable::new(Node::local("me", ip("127.0.0.1"), 5000), 3);
        let outbound = MessageQueue::new("Outbound");

        assert!(!emit(&table, &outbound));
        assert!(outbound.is_empty());
    }

    #[test]
    fn heartbeats_address_a_live_peer() {
        let table = NodeTable::new(Node::local("me", ip("127.0.0.1"), 5000), 3);
        let peer = table.add(Node::new("peer", ip("10.0.0.2"), 6000));

        let outbound = MessageQueue::new("Outbound");
        assert!(emit(&table, &outbound));

        let queued = outbound.dequeue().unwrap();
        assert_eq!(queued.frame.command, Command::Heartbeat);
        assert_eq!(queued.frame.recipient_id(), peer.id());
        assert_eq!(queued.frame.sender_id(), table.local_id());
    }
}
