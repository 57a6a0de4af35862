use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::membership::NodeTable;
use crate::queue::{MessageQueue, QueuedFrame};
use crate::wire::{Frame, GossipPeer};
use crate::Toggle;

/// Periodic gossip dissemination: once per period, when enabled, send the
/// local view of live membership to one randomly chosen live peer.
pub async fn run(
    table: Arc<NodeTable>,
    outbound: Arc<MessageQueue>,
    toggle: Toggle,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // The first tick completes immediately, so an enabled node gossips as
    // soon as it comes up rather than a full period later.
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
    info!("Stopping gossip protocol");
}

/// One gossip tick. Returns whether a message was enqueued; ticks with no
/// live peer are skipped.
pub(crate) fn emit(table: &NodeTable, outbound: &MessageQueue) -> bool {
    let Some(peer) = table.random_live_peer() else {
        debug!("No live peer to gossip with, skipping tick");
        return false;
    };

    let payload = table
        .live_snapshot()
        .into_iter()
        .map(|n| {
            (
                n.name,
                GossipPeer {
                    ip_address: n.addr,
                    port_number: n.port,
                },
            )
        })
        .collect::<BTreeMap<_, _>>();

    debug!("Gossiping {} live nodes to {}", payload.len(), peer);
    outbound.enqueue(QueuedFrame::new(Frame::gossip(&table.local(), &peer, payload)));
    true
}
