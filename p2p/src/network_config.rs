use core::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::Deserialize;

/// Options recognised by the network service. The transport itself is
/// external; the core only assembles and hands over this configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub enabled: bool,
    pub interface: IpAddr,
    pub advertised_ip: Option<IpAddr>,
    pub port: u16,
    pub advertised_port: Option<u16>,
    pub static_peers: Vec<String>,
    pub discovery_enabled: bool,
    pub bootnodes: Vec<String>,
    pub peer_lower_bound: usize,
    pub peer_upper_bound: usize,
    pub private_key_file: Option<PathBuf>,
    pub snappy_enabled: bool,
    pub wire_logs: WireLogConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertised_ip: None,
            port: 9000,
            advertised_port: None,
            static_peers: vec![],
            discovery_enabled: true,
            bootnodes: vec![],
            peer_lower_bound: 20,
            peer_upper_bound: 30,
            private_key_file: None,
            snappy_enabled: true,
            wire_logs: WireLogConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Default, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WireLogConfig {
    pub cipher: bool,
    pub plain: bool,
    pub mux_frames: bool,
    pub gossip: bool,
}
