use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::membership::{Node, NodeId};

/// Command tag carried in every frame. Commands we don't know still decode,
/// so a well-formed envelope can be acknowledged even when its command is
/// unrecognized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    Connect,
    Ack,
    Heartbeat,
    Gossip,
    Other(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Connect => "connect",
            Command::Ack => "ack_message",
            Command::Heartbeat => "heartbeat",
            Command::Gossip => "gossip",
            Command::Other(other) => other,
        }
    }
}

impl From<String> for Command {
    fn from(s: String) -> Self {
        match s.as_str() {
            "connect" => Command::Connect,
            "ack_message" => Command::Ack,
            "heartbeat" => Command::Heartbeat,
            "gossip" => Command::Gossip,
            _ => Command::Other(s),
        }
    }
}

impl From<Command> for String {
    fn from(c: Command) -> Self {
        c.as_str().to_owned()
    }
}

/// One entry of a gossip payload. The wire encodes the port as a string
/// here, unlike the envelope ports; both spellings are accepted on decode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GossipPeer {
    pub ip_address: IpAddr,
    #[serde(with = "port_as_string")]
    pub port_number: u16,
}

/// A single wire message: one flat JSON object per frame. The envelope
/// fields are common to every command; `message` and `nodes` are carried by
/// `connect` and `gossip` respectively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub command: Command,
    pub source_friendly_name: String,
    pub source_ip_address: IpAddr,
    #[serde(with = "port_as_number")]
    pub source_port: u16,
    pub destination_friendly_name: String,
    pub destination_ip_address: IpAddr,
    #[serde(with = "port_as_number")]
    pub destination_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<BTreeMap<String, GossipPeer>>,
}

impl Frame {
    fn envelope(command: Command, sender: &Node, recipient: &Node) -> Self {
        Self {
            command,
            source_friendly_name: sender.name.clone(),
            source_ip_address: sender.addr,
            source_port: sender.port,
            destination_friendly_name: recipient.name.clone(),
            destination_ip_address: recipient.addr,
            destination_port: recipient.port,
            message: None,
            nodes: None,
        }
    }

    pub fn connect(sender: &Node, recipient: &Node, greeting: impl Into<String>) -> Self {
        Self {
            message: Some(greeting.into()),
            ..Self::envelope(Command::Connect, sender, recipient)
        }
    }

    pub fn ack(sender: &Node, recipient: &Node) -> Self {
        Self::envelope(Command::Ack, sender, recipient)
    }

    pub fn heartbeat(sender: &Node, recipient: &Node) -> Self {
        Self::envelope(Command::Heartbeat, sender, recipient)
    }

    pub fn gossip(sender: &Node, recipient: &Node, nodes: BTreeMap<String, GossipPeer>) -> Self {
        Self {
            nodes: Some(nodes),
            ..Self::envelope(Command::Gossip, sender, recipient)
        }
    }

    /// Transient node record synthesized from the envelope source fields.
    pub fn sender_node(&self) -> Node {
        Node::new(
            self.source_friendly_name.clone(),
            self.source_ip_address,
            self.source_port,
        )
    }

    pub fn sender_id(&self) -> NodeId {
        (self.source_ip_address, self.source_port)
    }

    pub fn recipient_id(&self) -> NodeId {
        (self.destination_ip_address, self.destination_port)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Number(u16),
    Text(String),
}

impl PortRepr {
    // Peers in the wild encode ports both as JSON numbers and as strings;
    // decode canonicalizes to u16.
    fn canonicalize<E: serde::de::Error>(self) -> Result<u16, E> {
        match self {
            PortRepr::Number(port) => Ok(port),
            PortRepr::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid port number {text:?}"))),
        }
    }
}

mod port_as_number {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(port: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(*port)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        super::PortRepr::deserialize(deserializer)?.canonicalize()
    }
}

mod port_as_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(port: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(port)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        super::PortRepr::deserialize(deserializer)?.canonicalize()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    fn nodes() -> (Node, Node) {
        (
            Node::new("alpha", "127.0.0.1".parse().unwrap(), 5000),
            Node::new("beta", "127.0.0.1".parse().unwrap(), 5001),
        )
    }

    #[test]
    fn frames_round_trip_through_json() {
        let (a, b) = nodes();
        let mut payload = BTreeMap::new();
        payload.insert(
            "alpha".to_owned(),
            GossipPeer {
                ip_address: a.addr,
                port_number: a.port,
            },
        );

        for frame in [
            Frame::connect(&a, &b, "Hello"),
            Frame::ack(&a, &b),
            Frame::heartbeat(&a, &b),
            Frame::gossip(&a, &b, payload),
        ] {
            let encoded = serde_json::to_string(&frame).unwrap();
            let decoded: Frame = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn envelope_ports_decode_from_numbers_and_strings() {
        let number = r#"{
            "command": "heartbeat",
            "source_friendly_name": "alpha",
            "source_ip_address": "127.0.0.1",
            "source_port": 5000,
            "destination_friendly_name": "beta",
            "destination_ip_address": "127.0.0.1",
            "destination_port": "5001"
        }"#;
        let frame: Frame = serde_json::from_str(number).unwrap();
        assert_eq!(frame.source_port, 5000);
        assert_eq!(frame.destination_port, 5001);
    }

    #[test]
    fn gossip_ports_serialize_as_strings() {
        let (a, b) = nodes();
        let mut payload = BTreeMap::new();
        payload.insert(
            "beta".to_owned(),
            GossipPeer {
                ip_address: b.addr,
                port_number: b.port,
            },
        );
        let encoded = serde_json::to_value(Frame::gossip(&a, &b, payload)).unwrap();
        assert_eq!(encoded["nodes"]["beta"]["port_number"], "5001");
        assert_eq!(encoded["source_port"], 5000);
    }

    #[test]
    fn unknown_commands_still_decode() {
        let raw = r#"{
            "command": "leave",
            "source_friendly_name": "alpha",
            "source_ip_address": "127.0.0.1",
            "source_port": 5000,
            "destination_friendly_name": "beta",
            "destination_ip_address": "127.0.0.1",
            "destination_port": 5001
        }"#;
        let frame: Frame = serde_json::from_str(raw).unwrap();
        assert_matches!(&frame.command, Command::Other(c) if c == "leave");
    }

    #[test]
    fn bad_ports_are_rejected() {
        let raw = r#"{
            "command": "heartbeat",
            "source_friendly_name": "alpha",
            "source_ip_address": "127.0.0.1",
            "source_port": "not-a-port",
            "destination_friendly_name": "beta",
            "destination_ip_address": "127.0.0.1",
            "destination_port": 5001
        }"#;
        assert!(serde_json::from_str::<Frame>(raw).is_err());
    }

    #[test]
    fn sender_node_comes_from_the_source_fields() {
        let (a, b) = nodes();
        let frame = Frame::connect(&a, &b, "Hello");
        let sender = frame.sender_node();
        assert_eq!(sender.name, "alpha");
        assert_eq!(sender.id(), a.id());
        assert_eq!(frame.recipient_id(), b.id());
    }
}
