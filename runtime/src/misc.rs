use core::num::NonZeroU64;
use std::path::PathBuf;

use bytesize::ByteSize;
use eth1::Eth1Config;
use fork_choice_control::StorageMode;
use p2p::NetworkConfig;
use serde::Deserialize;
use types::{config::ChainSpec, primitives::UnixSeconds};

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub in_memory: bool,
    pub mode: StorageMode,
    pub database_size: ByteSize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from('.'),
            in_memory: false,
            mode: StorageMode::default(),
            database_size: ByteSize::gib(256),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StartupConfig {
    pub target_peer_count: usize,
    pub timeout_seconds: NonZeroU64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            target_peer_count: 5,
            timeout_seconds: nonzero_ext::nonzero!(30_u64),
        }
    }
}

#[derive(Clone, Copy, Default, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InteropConfig {
    pub enabled: bool,
    pub genesis_time: Option<UnixSeconds>,
    pub number_of_validators: u64,
}

#[derive(Clone, Default, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeridianConfig {
    pub chain_spec: ChainSpec,
    pub storage: StorageConfig,
    pub startup: StartupConfig,
    pub eth1: Eth1Config,
    pub interop: InteropConfig,
    /// Path to an SSZ-serialised genesis state supplied by the operator.
    pub initial_state: Option<PathBuf>,
    pub network: NetworkConfig,
}
