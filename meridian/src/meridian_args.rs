use core::{net::IpAddr, num::NonZeroU64};
use std::path::PathBuf;

use anyhow::{ensure, Result};
use bytesize::ByteSize;
use clap::{Parser, ValueEnum};
use fork_choice_control::StorageMode;
use runtime::{InteropConfig, MeridianConfig, StartupConfig, StorageConfig};
use types::{config::ChainSpec, primitives::UnixSeconds};

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum Preset {
    Mainnet,
    Minimal,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum StorageModeArg {
    Archive,
    Prune,
}

#[derive(Parser)]
#[command(version, about = "A beacon chain consensus node")]
pub struct MeridianArgs {
    /// Directory that holds all databases.
    #[arg(long, default_value = ".meridian")]
    pub data_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Preset::Mainnet)]
    pub preset: Preset,

    /// Keep all databases in memory. State is lost on exit.
    #[arg(long)]
    pub in_memory: bool,

    #[arg(long, value_enum, default_value_t = StorageModeArg::Prune)]
    pub storage_mode: StorageModeArg,

    #[arg(long)]
    pub database_size: Option<ByteSize>,

    // Networking. The transport is provided by the network service; these
    // options are assembled here and handed over.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub p2p_enabled: bool,

    #[arg(long)]
    pub p2p_interface: Option<IpAddr>,

    #[arg(long)]
    pub p2p_advertised_ip: Option<IpAddr>,

    #[arg(long)]
    pub p2p_port: Option<u16>,

    #[arg(long)]
    pub p2p_advertised_port: Option<u16>,

    #[arg(long)]
    pub p2p_static_peers: Vec<String>,

    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub p2p_discovery_enabled: bool,

    #[arg(long)]
    pub bootnodes: Vec<String>,

    #[arg(long)]
    pub peer_lower_bound: Option<usize>,

    #[arg(long)]
    pub peer_upper_bound: Option<usize>,

    #[arg(long)]
    pub p2p_private_key_file: Option<PathBuf>,

    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub p2p_snappy_enabled: bool,

    #[arg(long)]
    pub wire_log_cipher: bool,

    #[arg(long)]
    pub wire_log_plain: bool,

    #[arg(long)]
    pub wire_log_mux_frames: bool,

    #[arg(long)]
    pub wire_log_gossip: bool,

    #[arg(long)]
    pub startup_target_peer_count: Option<usize>,

    #[arg(long)]
    pub startup_timeout_seconds: Option<NonZeroU64>,

    #[arg(long)]
    pub eth1_enabled: bool,

    #[arg(long)]
    pub eth1_endpoint: Option<String>,

    #[arg(long)]
    pub interop_enabled: bool,

    #[arg(long)]
    pub interop_genesis_time: Option<UnixSeconds>,

    #[arg(long, default_value_t = 64)]
    pub interop_number_of_validators: u64,

    /// Path to an SSZ-serialised genesis state.
    #[arg(long)]
    pub initial_state: Option<PathBuf>,
}

impl MeridianArgs {
    pub fn into_config(self) -> Result<MeridianConfig> {
        let chain_spec = match self.preset {
            Preset::Mainnet => ChainSpec::mainnet(),
            Preset::Minimal => ChainSpec::minimal(),
        };

        ensure!(
            !(self.interop_enabled && self.initial_state.is_some()),
            "--interop-enabled and --initial-state are mutually exclusive",
        );

        ensure!(
            self.interop_number_of_validators > 0,
            "--interop-number-of-validators must be positive",
        );

        if self.eth1_enabled {
            ensure!(
                self.eth1_endpoint.is_some(),
                "--eth1-endpoint is required when --eth1-enabled is set",
            );
        }

        let mut network = p2p::NetworkConfig {
            enabled: self.p2p_enabled,
            static_peers: self.p2p_static_peers,
            discovery_enabled: self.p2p_discovery_enabled,
            bootnodes: self.bootnodes,
            private_key_file: self.p2p_private_key_file,
            snappy_enabled: self.p2p_snappy_enabled,
            advertised_ip: self.p2p_advertised_ip,
            advertised_port: self.p2p_advertised_port,
            wire_logs: p2p::WireLogConfig {
                cipher: self.wire_log_cipher,
                plain: self.wire_log_plain,
                mux_frames: self.wire_log_mux_frames,
                gossip: self.wire_log_gossip,
            },
            ..p2p::NetworkConfig::default()
        };

        if let Some(interface) = self.p2p_interface {
            network.interface = interface;
        }

        if let Some(port) = self.p2p_port {
            network.port = port;
        }

        if let Some(lower_bound) = self.peer_lower_bound {
            network.peer_lower_bound = lower_bound;
        }

        if let Some(upper_bound) = self.peer_upper_bound {
            network.peer_upper_bound = upper_bound;
        }

        ensure!(
            network.peer_lower_bound <= network.peer_upper_bound,
            "peer lower bound must not exceed the upper bound",
        );

        let mut startup = StartupConfig::default();

        if let Some(target_peer_count) = self.startup_target_peer_count {
            startup.target_peer_count = target_peer_count;
        }

        if let Some(timeout_seconds) = self.startup_timeout_seconds {
            startup.timeout_seconds = timeout_seconds;
        }

        let mut storage = StorageConfig {
            directory: self.data_dir,
            in_memory: self.in_memory,
            mode: match self.storage_mode {
                StorageModeArg::Archive => StorageMode::Archive,
                StorageModeArg::Prune => StorageMode::Prune,
            },
            ..StorageConfig::default()
        };

        if let Some(database_size) = self.database_size {
            storage.database_size = database_size;
        }

        Ok(MeridianConfig {
            chain_spec,
            storage,
            startup,
            eth1: eth1::Eth1Config {
                enabled: self.eth1_enabled,
                endpoint: self.eth1_endpoint,
            },
            interop: InteropConfig {
                enabled: self.interop_enabled,
                genesis_time: self.interop_genesis_time,
                number_of_validators: self.interop_number_of_validators,
            },
            initial_state: self.initial_state,
            network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(arguments: &[&str]) -> MeridianArgs {
        MeridianArgs::parse_from(core::iter::once("meridian").chain(arguments.iter().copied()))
    }

    #[test]
    fn defaults_produce_a_valid_config() -> Result<()> {
        let config = parse(&[]).into_config()?;

        assert!(matches!(config.storage.mode, StorageMode::Prune));
        assert!(config.network.enabled);
        assert_eq!(config.startup.target_peer_count, 5);

        Ok(())
    }

    #[test]
    fn interop_and_initial_state_are_mutually_exclusive() {
        let args = parse(&[
            "--interop-enabled",
            "--initial-state",
            "genesis.ssz",
        ]);

        assert!(args.into_config().is_err());
    }

    #[test]
    fn eth1_requires_an_endpoint() {
        assert!(parse(&["--eth1-enabled"]).into_config().is_err());

        let config = parse(&[
            "--eth1-enabled",
            "--eth1-endpoint",
            "http://localhost:8545",
        ])
        .into_config();

        assert!(config.is_ok());
    }

    #[test]
    fn inverted_peer_bounds_are_rejected() {
        let args = parse(&["--peer-lower-bound", "40", "--peer-upper-bound", "10"]);

        assert!(args.into_config().is_err());
    }
}
