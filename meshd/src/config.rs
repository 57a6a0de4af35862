use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

pub const DEFAULT_IP_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT_NUMBER: u16 = 54321;
pub const DEFAULT_FRIENDLY_NAME: &str = "Local Node";

pub const GOSSIP_PROTOCOL_FREQUENCY_IN_SECONDS: u64 = 10;
pub const HEARTBEAT_PROTOCOL_FREQUENCY_IN_SECONDS: u64 = 10;
pub const QUEUE_SEND_SLEEP_IN_SECONDS: u64 = 5;
pub const MAX_SEND_ATTEMPTS: u32 = 3;
pub const SEND_TIMEOUT_IN_SECONDS: u64 = 5;

/// Command line options for a single node.
#[derive(Parser, Debug)]
#[command(name = "meshd", about = "A peer-to-peer mesh membership node")]
pub struct CliOptions {
    /// Address the node listens on and advertises to peers
    #[arg(long, default_value = DEFAULT_IP_ADDRESS)]
    pub ip: IpAddr,

    /// Port the node listens on and advertises to peers
    #[arg(long, default_value_t = DEFAULT_PORT_NUMBER)]
    pub port: u16,

    /// Human-readable label for this node; not part of its identity
    #[arg(long = "name", default_value = DEFAULT_FRIENDLY_NAME)]
    pub friendly_name: String,

    /// Log level (overridable per module through RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

/// Timing knobs for the protocol loops. Production runs use the defaults;
/// tests compress them.
#[derive(Clone, Debug)]
pub struct TimingConfig {
    pub gossip_period: Duration,
    pub heartbeat_period: Duration,
    pub queue_poll: Duration,
    pub send_timeout: Duration,
    pub max_send_attempts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            gossip_period: Duration::from_secs(GOSSIP_PROTOCOL_FREQUENCY_IN_SECONDS),
            heartbeat_period: Duration::from_secs(HEARTBEAT_PROTOCOL_FREQUENCY_IN_SECONDS),
            queue_poll: Duration::from_secs(QUEUE_SEND_SLEEP_IN_SECONDS),
            send_timeout: Duration::from_secs(SEND_TIMEOUT_IN_SECONDS),
            max_send_attempts: MAX_SEND_ATTEMPTS,
        }
    }
}
