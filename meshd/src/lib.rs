pub mod codec;
pub mod config;
pub mod gossip;
pub mod heartbeat;
pub mod inbound;
pub mod log_setup;
pub mod membership;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod shell;
pub mod wire;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use config::{CliOptions, TimingConfig};
use membership::{Node, NodeTable};
use queue::{MessageQueue, QueuedFrame};
use wire::Frame;

/// Per-loop enable flag, shared between a protocol loop and the operator
/// commands that flip it. Loops observe the flag at the top of each tick.
#[derive(Clone)]
pub struct Toggle {
    enabled: Arc<AtomicBool>,
}

impl Toggle {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

pub struct MeshConfig {
    pub friendly_name: String,
    pub ip: IpAddr,
    /// Port to listen on and advertise. Zero asks the operating system for
    /// a free port, which the node table then records as its identity.
    pub port: u16,
    pub timing: TimingConfig,
}

impl MeshConfig {
    pub fn from_options(options: &CliOptions) -> Self {
        Self {
            friendly_name: options.friendly_name.clone(),
            ip: options.ip,
            port: options.port,
            timing: TimingConfig::default(),
        }
    }
}

/// One running node: the shared membership table, the two queues and every
/// background loop. Dropping the handle does not stop the loops; call
/// [`Mesh::shutdown`].
pub struct Mesh {
    table: Arc<NodeTable>,
    outbound: Arc<MessageQueue>,
    inbound: Arc<MessageQueue>,
    gossip_toggle: Toggle,
    heartbeat_toggle: Toggle,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Mesh {
    /// Bind the listener and start the receiver, sender, inbound processor
    /// and both protocol loops. Nothing is spawned unless the bind succeeds,
    /// so configuration errors fail fast.
    pub async fn start(config: MeshConfig) -> Result<Mesh> {
        let listener = TcpListener::bind((config.ip, config.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", config.ip, config.port))?;
        let local_addr = listener.local_addr().context("failed to read local address")?;

        info!("{:?} listening on {}", config.friendly_name, local_addr);

        let table = Arc::new(NodeTable::new(
            Node::local(config.friendly_name, local_addr.ip(), local_addr.port()),
            config.timing.max_send_attempts,
        ));
        let outbound_queue = Arc::new(MessageQueue::new("Outbound"));
        let inbound_queue = Arc::new(MessageQueue::new("Inbound"));
        let gossip_toggle = Toggle::new(true);
        let heartbeat_toggle = Toggle::new(true);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(receiver::run(
                listener,
                table.clone(),
                inbound_queue.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(sender::run(
                table.clone(),
                outbound_queue.clone(),
                config.timing.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(inbound::run(
                table.clone(),
                inbound_queue.clone(),
                config.timing.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(gossip::run(
                table.clone(),
                outbound_queue.clone(),
                gossip_toggle.clone(),
                config.timing.gossip_period,
                shutdown_rx.clone(),
            )),
            tokio::spawn(heartbeat::run(
                table.clone(),
                outbound_queue.clone(),
                heartbeat_toggle.clone(),
                config.timing.heartbeat_period,
                shutdown_rx,
            )),
        ];

        Ok(Mesh {
            table,
            outbound: outbound_queue,
            inbound: inbound_queue,
            gossip_toggle,
            heartbeat_toggle,
            local_addr,
            shutdown,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_node(&self) -> Node {
        self.table.local()
    }

    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    pub fn outbound(&self) -> &MessageQueue {
        &self.outbound
    }

    pub fn inbound(&self) -> &MessageQueue {
        &self.inbound
    }

    pub fn gossip_toggle(&self) -> &Toggle {
        &self.gossip_toggle
    }

    pub fn heartbeat_toggle(&self) -> &Toggle {
        &self.heartbeat_toggle
    }

    /// Operator-initiated contact: record the peer under a placeholder name
    /// and enqueue a greeting to it.
    pub fn connect(&self, addr: IpAddr, port: u16) {
        let peer = self.table.add(Node::new("unknown", addr, port));
        self.outbound
            .enqueue(QueuedFrame::new(Frame::connect(&self.table.local(), &peer, "Hello")));
    }

    /// Signal every loop to stop and wait for them to finish. The sender
    /// completes its current delivery attempt; frames still queued are
    /// dropped.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Start a node from CLI options and hand the terminal to the operator
/// shell until it exits or the process is interrupted.
pub async fn run(options: CliOptions) -> Result<()> {
    let mesh = Mesh::start(MeshConfig::from_options(&options)).await?;

    tokio::select! {
        _ = shell::run(&mesh) => info!("Operator shell exited"),
        _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
    }

    mesh.shutdown().await;
    info!("Goodbye");
    Ok(())
}
