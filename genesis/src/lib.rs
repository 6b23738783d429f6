//! Genesis state synthesis.
//!
//! A genesis state can come from three places: an operator-supplied SSZ file,
//! the deterministic interop generator, or the deposits observed by the Eth1
//! follower once the genesis trigger fires. All three paths end in
//! [`Incremental::finish`], which pins the circular reference between the
//! genesis block and its state.

use std::sync::Arc;

use anyhow::Result;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    containers::{Deposit, DepositData, Eth1Data, SignedBeaconBlock},
    primitives::{DepositIndex, UnixSeconds, H256},
};

pub mod interop;

pub use deposit_tree::DepositTree;

/// Builds a genesis state one deposit at a time.
pub struct Incremental<'spec> {
    spec: &'spec ChainSpec,
    state: BeaconState,
    deposit_tree: DepositTree,
}

impl<'spec> Incremental<'spec> {
    #[must_use]
    pub fn new(spec: &'spec ChainSpec) -> Self {
        Self {
            spec,
            state: BeaconState::default(),
            deposit_tree: DepositTree::default(),
        }
    }

    pub fn add_deposit(&mut self, index: DepositIndex, data: DepositData) -> Result<()> {
        self.deposit_tree.push(index, &data)?;

        // Proofs are not checked at genesis. The tree being built here is the
        // authority the proofs would be checked against.
        transition_functions::block_processing::apply_deposit(
            self.spec,
            &mut self.state,
            &Deposit {
                data,
                ..Deposit::default()
            },
        );

        Ok(())
    }

    /// Whether the deposits added so far are enough to start the chain.
    #[must_use]
    pub fn is_genesis_ready(&self, eth1_block_timestamp: UnixSeconds) -> bool {
        let enough_validators =
            self.state.active_validator_indices(0).count() as u64
                >= self.spec.min_genesis_active_validator_count;

        enough_validators && eth1_block_timestamp >= self.spec.min_genesis_time
    }

    /// Seals the state and derives the genesis block.
    ///
    /// The genesis block is an empty block at slot zero whose root the state
    /// records as its chain tip. Nothing signs it; its signature stays empty.
    #[must_use]
    pub fn finish(
        mut self,
        genesis_time: UnixSeconds,
        eth1_block_hash: H256,
    ) -> (Arc<SignedBeaconBlock>, Arc<BeaconState>) {
        self.state.genesis_time = genesis_time;
        self.state.eth1_deposit_index = self.deposit_tree.deposit_count();
        self.state.eth1_data = Eth1Data {
            deposit_root: self.deposit_tree.root(),
            deposit_count: self.deposit_tree.deposit_count(),
            block_hash: eth1_block_hash,
        };

        let genesis_block = SignedBeaconBlock::default();

        self.state.latest_block_header = genesis_block.message.header();
        self.state.latest_block_root = genesis_block.block_root();

        (Arc::new(genesis_block), Arc::new(self.state))
    }

    #[must_use]
    pub fn deposit_tree(&self) -> &DepositTree {
        &self.deposit_tree
    }
}

/// The genesis time implied by the Eth1 block that triggered genesis.
#[must_use]
pub const fn genesis_time_from_eth1_time(
    spec: &ChainSpec,
    eth1_block_timestamp: UnixSeconds,
) -> UnixSeconds {
    eth1_block_timestamp + spec.genesis_delay
}
