use std::io::Write;

use log::warn;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::membership::Node;
use crate::queue::MessageQueue;
use crate::Mesh;

const COMMANDS_HELP: &[(&str, &str)] = &[
    ("list_nodes", "List all nodes in the network"),
    ("list_outbound_messages", "List all messages in the outbound queue"),
    ("list_inbound_messages", "List all messages in the inbound queue"),
    ("connect <ip> <port>", "Connect to a node in the network"),
    ("enable_gossip_protocol", "Enable the gossip protocol"),
    ("disable_gossip_protocol", "Disable the gossip protocol"),
    ("enable_heartbeat_protocol", "Enable the heartbeat protocol"),
    ("disable_heartbeat_protocol", "Disable the heartbeat protocol"),
    ("help", "List all available commands"),
    ("exit | quit", "Shut down the node and exit"),
];

enum Flow {
    Continue,
    Exit,
}

/// Interactive operator loop on stdin. Returns when the operator exits or
/// stdin reaches end of file; the caller is responsible for shutting the
/// mesh down afterwards.
pub async fn run(mesh: &Mesh) {
    let prompt = format!("{}> ", mesh.local_node().name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{prompt}");
        let _ = std::io::stdout().flush();

        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Flow::Exit = dispatch(mesh, line.trim()) {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read operator input: {e}");
                break;
            }
        }
    }
}

fn dispatch(mesh: &Mesh, line: &str) -> Flow {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Flow::Continue;
    };

    match command {
        "list_nodes" => println!("{}", render_node_table(&mesh.table().list_all())),
        "list_outbound_messages" => println!("{}", render_queue(mesh.outbound())),
        "list_inbound_messages" => println!("{}", render_queue(mesh.inbound())),
        "connect" => match (parts.next(), parts.next()) {
            (Some(ip), Some(port)) => match (ip.parse(), port.parse()) {
                (Ok(ip), Ok(port)) => mesh.connect(ip, port),
                _ => println!("connect: invalid address {ip}:{port}"),
            },
            _ => println!("Usage: connect <ip> <port>"),
        },
        "enable_gossip_protocol" => {
            mesh.gossip_toggle().enable();
            println!("Gossip protocol enabled");
        }
        "disable_gossip_protocol" => {
            mesh.gossip_toggle().disable();
            println!("Gossip protocol disabled");
        }
        "enable_heartbeat_protocol" => {
            mesh.heartbeat_toggle().enable();
            println!("Heartbeat protocol enabled");
        }
        "disable_heartbeat_protocol" => {
            mesh.heartbeat_toggle().disable();
            println!("Heartbeat protocol disabled");
        }
        "help" | "?" => {
            println!("Available commands:");
            for (name, description) in COMMANDS_HELP {
                println!("  {name:<28} {description}");
            }
        }
        "exit" | "quit" => return Flow::Exit,
        other => println!("Unknown command: {other} (try 'help')"),
    }

    Flow::Continue
}

const NODE_HEADERS: [&str; 6] = [
    "Friendly Name",
    "IP Address",
    "Port",
    "Status",
    "Last Heartbeat",
    "Failed Connections",
];

fn node_row(node: &Node) -> [String; 6] {
    let name = if node.is_local {
        format!("{}*", node.name)
    } else {
        node.name.clone()
    };
    let last_heartbeat = node
        .last_heartbeat
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_owned());
    [
        name,
        node.addr.to_string(),
        node.port.to_string(),
        node.status.to_string(),
        last_heartbeat,
        node.failed_connections.to_string(),
    ]
}

fn render_node_table(nodes: &[Node]) -> String {
    let rows = nodes.iter().map(node_row).collect::<Vec<_>>();

    let mut widths = NODE_HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let render_row = |cells: [String; 6]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut out = Vec::new();
    out.push(render_row(NODE_HEADERS.map(str::to_owned)));
    out.push(widths.map(|w| "-".repeat(w)).join("-|-"));
    out.extend(rows.into_iter().map(render_row));
    out.join("\n")
}

fn render_queue(queue: &MessageQueue) -> String {
    let frames = queue.snapshot();
    let mut out = vec![format!("{} message count: {}", queue.name(), frames.len())];
    for queued in frames {
        let f = &queued.frame;
        out.push(format!(
            "  {} [{}|{}:{}] -> [{}|{}:{}] attempts: {}",
            f.command.as_str(),
            f.source_friendly_name,
            f.source_ip_address,
            f.source_port,
            f.destination_friendly_name,
            f.destination_ip_address,
            f.destination_port,
            queued.attempts,
        ));
    }
    out.join("\n")
}
