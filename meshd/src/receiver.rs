use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::membership::NodeTable;
use crate::queue::{MessageQueue, QueuedFrame};
use crate::wire::{Command, Frame};

/// Accept loop. Every connection gets its own handler task; a failing
/// handler never takes the listener down with it. The loop exits when the
/// shutdown signal fires, letting in-flight handlers finish their current
/// frame.
pub async fn run(
    listener: TcpListener,
    table: Arc<NodeTable>,
    inbound: Arc<MessageQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Connection from {}", peer);
                    let table = table.clone();
                    let inbound = inbound.clone();
                    tokio::spawn(handle_connection(stream, peer, table, inbound));
                }
                Err(e) => warn!("Failed to accept connection: {e}"),
            },
            _ = shutdown.changed() => {
                info!("Stopping receiver");
                break;
            }
        }
    }
}

/// One connection, any number of request/acknowledgment exchanges. Each
/// non-ack frame is acknowledged before the next frame is read; a malformed
/// frame or a socket error closes the connection.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    table: Arc<NodeTable>,
    inbound: Arc<MessageQueue>,
) {
    let mut framed = Framed::new(stream, FrameCodec::new());

    while let Some(next) = framed.next().await {
        let frame = match next {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                warn!("Dropping malformed frame from {peer}: {e}");
                break;
            }
            Err(e) => {
                warn!("Closing connection from {peer}: {e}");
                break;
            }
        };

        debug!("Received {:?} frame from {}", frame.command.as_str(), peer);
        let sender = frame.sender_node();

        if route(&inbound, frame) {
            let ack = Frame::ack(&table.local(), &sender);
            if let Err(e) = framed.send(ack).await {
                warn!("Failed to acknowledge frame from {peer}: {e}");
                break;
            }
        }
    }

    debug!("Connection from {} closed", peer);
}

/// Routes one decoded frame and reports whether it must be acknowledged.
/// Acks themselves are never answered, everything else is.
fn route(inbound: &MessageQueue, frame: Frame) -> bool {
    match frame.command {
        Command::Connect | Command::Heartbeat | Command::Gossip => {
            inbound.enqueue(QueuedFrame::new(frame));
            true
        }
        Command::Ack => {
            debug!("Acknowledgment from {}", frame.sender_node());
            false
        }
        Command::Other(ref command) => {
            warn!("Unknown command {:?} from {}", command, frame.sender_node());
            true
        }
    }
}
