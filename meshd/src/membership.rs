use std::collections::HashMap;
use std::fmt::Display;
use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::seq::SliceRandom;

/// Identity of a node in the mesh. The friendly name is mutable metadata
/// and takes no part in identity.
pub type NodeId = (IpAddr, u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Live,
    Dead,
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Live => write!(f, "Live"),
            NodeStatus::Dead => write!(f, "Dead"),
        }
    }
}

/// A node in the mesh, local or remote.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub addr: IpAddr,
    pub port: u16,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub failed_connections: u32,
    pub is_local: bool,
}

impl Node {
    pub fn new(name: impl Into<String>, addr: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            addr,
            port,
            status: NodeStatus::Live,
            last_heartbeat: None,
            failed_connections: 0,
            is_local: false,
        }
    }

    pub fn local(name: impl Into<String>, addr: IpAddr, port: u16) -> Self {
        Self {
            is_local: true,
            ..Self::new(name, addr, port)
        }
    }

    pub fn id(&self) -> NodeId {
        (self.addr, self.port)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Node {}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} {}:{}>", self.name, self.addr, self.port)
    }
}

/// The shared membership table. One record per `(addr, port)` identity, with
/// exactly one local record that is created at startup and never removed.
///
/// All operations take the internal lock for the duration of one call, so
/// they are atomic with respect to one another; snapshot operations copy out.
/// The lock is never held across an await point.
pub struct NodeTable {
    local: NodeId,
    max_send_attempts: u32,
    nodes: Mutex<HashMap<NodeId, Node>>,
}

impl NodeTable {
    pub fn new(local_node: Node, max_send_attempts: u32) -> Self {
        let local_node = Node {
            is_local: true,
            ..local_node
        };
        let local = local_node.id();
        let mut nodes = HashMap::new();
        nodes.insert(local, local_node);
        Self {
            local,
            max_send_attempts,
            nodes: Mutex::new(nodes),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local
    }

    pub fn local(&self) -> Node {
        self.nodes
            .lock()
            .unwrap()
            .get(&self.local)
            .cloned()
            .expect("local node missing from table")
    }

    /// Upsert by identity. A record that already exists keeps all of its
    /// state except the friendly name, which the incoming record overwrites.
    /// Returns the record as stored.
    pub fn add(&self, node: Node) -> Node {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(&node.id()) {
            Some(existing) => {
                if existing.name != node.name {
                    debug!(
                        "Renaming {}:{} from {:?} to {:?}",
                        existing.addr, existing.port, existing.name, node.name
                    );
                    existing.name = node.name;
                }
                existing.clone()
            }
            None => {
                info!("Adding {} to the node table", node);
                nodes.insert(node.id(), node.clone());
                node
            }
        }
    }

    /// Delete by identity. No-op when the id is absent or names the local
    /// record, which is never removed.
    pub fn remove(&self, id: &NodeId) {
        if *id == self.local {
            return;
        }
        self.nodes.lock().unwrap().remove(id);
    }

    pub fn lookup(&self, addr: IpAddr, port: u16) -> Option<Node> {
        self.nodes.lock().unwrap().get(&(addr, port)).cloned()
    }

    /// Uniformly random live node, excluding the local record. `None` when
    /// no live peer is known.
    pub fn random_live_peer(&self) -> Option<Node> {
        let nodes = self.nodes.lock().unwrap();
        let candidates = nodes
            .values()
            .filter(|n| n.status == NodeStatus::Live && !n.is_local)
            .collect::<Vec<_>>();
        candidates.choose(&mut rand::thread_rng()).map(|n| (*n).clone())
    }

    /// Point-in-time copy of every live record, the local one included.
    pub fn live_snapshot(&self) -> Vec<Node> {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.status == NodeStatus::Live)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<Node> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    /// One more failed connection attempt to `id`. Crossing the attempt
    /// ceiling flips the record to Dead; only fresh inbound evidence brings
    /// it back. Returns the new count, or `None` for an unknown id.
    pub fn record_send_failure(&self, id: &NodeId) -> Option<u32> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(id)?;
        node.failed_connections += 1;
        if node.failed_connections >= self.max_send_attempts && node.status != NodeStatus::Dead {
            info!(
                "{} unreachable after {} attempts, marking Dead",
                node, node.failed_connections
            );
            node.status = NodeStatus::Dead;
        }
        Some(node.failed_connections)
    }

    /// A direct heartbeat from `node`: stamp the heartbeat time, zero the
    /// failure count and revive. Unknown senders are inserted with the
    /// stamp already set.
    pub fn record_heartbeat(&self, node: Node) {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(&node.id()) {
            Some(existing) => {
                existing.last_heartbeat = Some(Utc::now());
                existing.failed_connections = 0;
                existing.status = NodeStatus::Live;
            }
            None => {
                info!("Heartbeat from unknown node {}, adding to the table", node);
                let stamped = Node {
                    last_heartbeat: Some(Utc::now()),
                    ..node
                };
                nodes.insert(stamped.id(), stamped);
            }
        }
    }

    /// Secondhand evidence that `node` is alive (a gossip mention). Revives
    /// and zeroes the failure count, but does not stamp `last_heartbeat`;
    /// that is reserved for heartbeats received firsthand.
    pub fn observe_mention(&self, node: Node) {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(&node.id()) {
            Some(existing) => {
                existing.status = NodeStatus::Live;
                existing.failed_connections = 0;
            }
            None => {
                info!("Learned about {} through gossip, adding to the table", node);
                nodes.insert(node.id(), node);
            }
        }
    }
}
