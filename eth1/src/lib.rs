//! The Eth1 side of the node: the deposit cache, the voting-period data
//! selection and the genesis trigger.
//!
//! The follower that actually speaks to an execution node is external; it
//! feeds [`Eth1Event`]s into this crate.

pub use crate::{
    eth1_cache::Eth1Cache,
    eth1_chain::Eth1Chain,
    genesis_detection::wait_for_genesis,
    messages::{DepositEvent, Eth1Block, Eth1Event},
};

use serde::Deserialize;

mod eth1_cache;
mod eth1_chain;
mod genesis_detection;
mod messages;

#[derive(Clone, Default, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Eth1Config {
    pub enabled: bool,
    pub endpoint: Option<String>,
}
