use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::config::TimingConfig;
use crate::membership::{Node, NodeTable};
use crate::queue::MessageQueue;
use crate::wire::{Command, Frame};

/// Inbound drain loop: applies queued frames to the node table.
pub async fn run(
    table: Arc<NodeTable>,
    inbound: Arc<MessageQueue>,
    timing: TimingConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match inbound.dequeue() {
            Some(queued) => apply(&table, &queued.frame),
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(timing.queue_poll) => (),
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    info!("Stopping inbound processor");
}

/// Membership effect of one inbound frame.
pub(crate) fn apply(table: &NodeTable, frame: &Frame) {
    match &frame.command {
        Command::Connect => {
            info!("Connection request from {}", frame.sender_node());
            table.add(frame.sender_node());
        }
        Command::Heartbeat => {
            debug!("Heartbeat from {}", frame.sender_node());
            table.record_heartbeat(frame.sender_node());
        }
        Command::Gossip => {
            debug!("Gossip from {}", frame.sender_node());
            for (name, peer) in frame.nodes.iter().flatten() {
                if (peer.ip_address, peer.port_number) == table.local_id() {
                    continue;
                }
                // The sender only vouches that these peers exist; heartbeat
                // timestamps are earned firsthand.
                table.observe_mention(Node::new(name.clone(), peer.ip_address, peer.port_number));
            }
        }
        Command::Ack => debug!("Ignoring queued acknowledgment from {}", frame.sender_node()),
        Command::Other(command) => {
            warn!("Unknown command {:?} from {}", command, frame.sender_node())
        }
    }
}
