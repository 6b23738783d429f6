use std::sync::Arc;

use anyhow::{ensure, Result};
use itertools::Itertools as _;
use ssz_types::FixedVector;
use typenum::Unsigned as _;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    consts::MaxDeposits,
    containers::{Deposit, Eth1Data},
};

use crate::eth1_cache::Eth1Cache;

/// The block factory's view of the Eth1 chain: the vote to cast and the
/// deposits to include.
pub struct Eth1Chain {
    spec: Arc<ChainSpec>,
    cache: Arc<Eth1Cache>,
}

impl Eth1Chain {
    #[must_use]
    pub const fn new(spec: Arc<ChainSpec>, cache: Arc<Eth1Cache>) -> Self {
        Self { spec, cache }
    }

    /// The `Eth1Data` to put in a block built on `state`.
    ///
    /// A vote that already has a majority within the voting period wins.
    /// Otherwise the node votes for the latest block it has followed, and if
    /// it has followed none, repeats the state's current value.
    pub fn eth1_data_for_block(&self, state: &BeaconState) -> Result<Eth1Data> {
        let voting_period_slots =
            self.spec.epochs_per_eth1_voting_period.get() * self.spec.slots_per_epoch.get();

        let majority_vote = state
            .eth1_data_votes
            .iter()
            .counts()
            .into_iter()
            .find(|(_, count)| *count * 2 > voting_period_slots as usize)
            .map(|(vote, _)| *vote);

        if let Some(vote) = majority_vote {
            return Ok(vote);
        }

        let Some(latest_block) = self.cache.get_latest_block()? else {
            return Ok(state.eth1_data);
        };

        let deposit_tree = self.cache.deposit_tree();

        // Never vote for data that would rewind the deposit count.
        if latest_block.deposit_count < state.eth1_data.deposit_count {
            return Ok(state.eth1_data);
        }

        Ok(Eth1Data {
            deposit_root: deposit_tree.root_at_count(latest_block.deposit_count),
            deposit_count: latest_block.deposit_count,
            block_hash: latest_block.hash,
        })
    }

    /// The deposits a block built on `state` with `eth1_data` must include,
    /// with their Merkle proofs.
    pub fn deposits_for_block(
        &self,
        state: &BeaconState,
        eth1_data: Eth1Data,
    ) -> Result<Vec<Deposit>> {
        let first_index = state.eth1_deposit_index;

        let count = eth1_data
            .deposit_count
            .saturating_sub(first_index)
            .min(MaxDeposits::U64);

        if count == 0 {
            return Ok(vec![]);
        }

        let deposit_tree = self.cache.deposit_tree();

        ensure!(
            eth1_data.deposit_count <= deposit_tree.deposit_count(),
            "state requires {} deposits but the Eth1 cache has only followed {}",
            eth1_data.deposit_count,
            deposit_tree.deposit_count(),
        );

        let deposit_data = self.cache.deposit_data(first_index, count)?;

        deposit_data
            .into_iter()
            .enumerate()
            .map(|(offset, data)| {
                let index = first_index + offset as u64;
                let proof = deposit_tree.proof(index, eth1_data.deposit_count)?;

                Ok(Deposit {
                    proof: FixedVector::new(proof)
                        .expect("deposit proofs have the expected length"),
                    data,
                })
            })
            .try_collect()
    }
}

#[cfg(test)]
mod tests {
    use bls::PublicKeyBytes;
    use database::Database;
    use types::{containers::DepositData, primitives::H256};

    use crate::messages::{DepositEvent, Eth1Block};

    use super::*;

    fn deposit_event(index: u64) -> DepositEvent {
        let mut pubkey = PublicKeyBytes::default();
        pubkey.0[..8].copy_from_slice(&index.to_le_bytes());

        DepositEvent {
            index,
            data: DepositData {
                pubkey,
                amount: 32_000_000_000,
                ..DepositData::default()
            },
        }
    }

    fn eth1_block(number: u64, deposit_count: u64) -> Eth1Block {
        Eth1Block {
            hash: H256::repeat_byte(number as u8),
            number,
            timestamp: 1000 + number,
            deposit_count,
        }
    }

    fn chain_with_deposits(deposit_count: u64) -> Eth1Chain {
        let cache = Eth1Cache::new(Database::in_memory()).expect("cache opens");

        let deposits = (0..deposit_count).map(deposit_event).collect_vec();

        cache
            .add_deposits(deposits, eth1_block(7, deposit_count))
            .expect("deposits are sequential");

        Eth1Chain::new(Arc::new(ChainSpec::minimal()), Arc::new(cache))
    }

    #[test]
    fn majority_vote_wins() -> Result<()> {
        let chain = chain_with_deposits(0);
        let spec = ChainSpec::minimal();

        let winning_vote = Eth1Data {
            deposit_root: H256::repeat_byte(3),
            deposit_count: 0,
            block_hash: H256::repeat_byte(4),
        };

        let voting_period_slots =
            spec.epochs_per_eth1_voting_period.get() * spec.slots_per_epoch.get();

        let state = BeaconState {
            eth1_data_votes: vec![winning_vote; voting_period_slots as usize / 2 + 1],
            ..BeaconState::default()
        };

        assert_eq!(chain.eth1_data_for_block(&state)?, winning_vote);

        Ok(())
    }

    #[test]
    fn without_majority_the_latest_followed_block_is_voted_for() -> Result<()> {
        let chain = chain_with_deposits(3);
        let state = BeaconState::default();

        let vote = chain.eth1_data_for_block(&state)?;

        assert_eq!(vote.deposit_count, 3);
        assert_eq!(vote.block_hash, H256::repeat_byte(7));

        Ok(())
    }

    #[test]
    fn deposits_for_block_carry_valid_proofs() -> Result<()> {
        let chain = chain_with_deposits(5);
        let state = BeaconState::default();

        let eth1_data = chain.eth1_data_for_block(&state)?;
        let deposits = chain.deposits_for_block(&state, eth1_data)?;

        assert_eq!(deposits.len(), 5);

        for (index, deposit) in deposits.iter().enumerate() {
            assert!(
                deposit_tree::is_valid_proof(
                    tree_hash::TreeHash::tree_hash_root(&deposit.data),
                    &deposit.proof,
                    index as u64,
                    eth1_data.deposit_root,
                ),
                "proof for deposit {index} must verify against the vote",
            );
        }

        Ok(())
    }
}
