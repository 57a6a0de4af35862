use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::config::TimingConfig;
use crate::membership::NodeTable;
use crate::queue::{MessageQueue, QueuedFrame};
use crate::wire::{Command, Frame};

/// Outbound drain loop. Messages are sent in queue order, one fresh TCP
/// connection per message. An empty queue and a failed send both wait one
/// poll interval so a dead recipient cannot spin the loop.
pub async fn run(
    table: Arc<NodeTable>,
    outbound: Arc<MessageQueue>,
    timing: TimingConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let delivered = match outbound.dequeue() {
            Some(queued) => send_one(&table, &outbound, &timing, queued).await,
            None => false,
        };

        if !delivered {
            tokio::select! {
                _ = tokio::time::sleep(timing.queue_poll) => (),
                _ = shutdown.changed() => break,
            }
        }
    }
    info!("Stopping sender");
}

/// One delivery attempt for one queued frame. On failure the recipient's
/// failure count goes up (Dead once it crosses the ceiling) and the frame
/// returns to the tail of the queue until its own attempt ceiling is hit.
pub(crate) async fn send_one(
    table: &NodeTable,
    outbound: &MessageQueue,
    timing: &TimingConfig,
    mut queued: QueuedFrame,
) -> bool {
    let (ip, port) = queued.frame.recipient_id();

    match deliver(&queued.frame, timing.send_timeout).await {
        Ok(()) => {
            debug!(
                "Delivered {:?} frame to {}:{}",
                queued.frame.command.as_str(),
                ip,
                port
            );
            true
        }
        Err(e) => {
            warn!("Failed to send to {}:{}: {:#}", ip, port, e);
            table.record_send_failure(&(ip, port));

            queued.attempts += 1;
            if queued.attempts < timing.max_send_attempts {
                outbound.enqueue(queued);
            } else {
                warn!(
                    "Dropping {:?} frame to {}:{} after {} attempts",
                    queued.frame.command.as_str(),
                    ip,
                    port,
                    queued.attempts
                );
            }
            false
        }
    }
}

/// Connect, write the frame, read one acknowledgment, close. Every step is
/// bounded by the send timeout; the sender never blocks indefinitely.
async fn deliver(frame: &Frame, send_timeout: Duration) -> Result<()> {
    let (ip, port) = frame.recipient_id();

    let stream = timeout(send_timeout, TcpStream::connect((ip, port)))
        .await
        .context("connect timed out")?
        .context("failed to connect")?;
    let mut framed = Framed::new(stream, FrameCodec::new());

    timeout(send_timeout, framed.send(frame.clone()))
        .await
        .context("send timed out")?
        .context("failed to send frame")?;

    let reply = timeout(send_timeout, framed.next())
        .await
        .context("acknowledgment timed out")?;

    match reply {
        Some(Ok(Ok(ack))) => {
            if ack.command != Command::Ack {
                debug!(
                    "Expected an acknowledgment, got {:?} from {}",
                    ack.command.as_str(),
                    ack.sender_node()
                );
            }
            Ok(())
        }
        Some(Ok(Err(e))) => Err(e).context("peer replied with a malformed frame"),
        Some(Err(e)) => Err(e).context("failed to read acknowledgment"),
        None => Err(anyhow!("connection closed before acknowledgment")),
    }
}
