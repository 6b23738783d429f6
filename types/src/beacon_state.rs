use bls::PublicKeyBytes;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};

use crate::{
    config::ChainSpec,
    consts::FAR_FUTURE_EPOCH,
    containers::{BeaconBlockHeader, Checkpoint, Eth1Data},
    primitives::{DepositIndex, Epoch, Gwei, Slot, UnixSeconds, ValidatorIndex, H256},
};

#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode,
)]
#[serde(deny_unknown_fields)]
pub struct Validator {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: H256,
    pub effective_balance: Gwei,
    pub slashed: bool,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            pubkey: PublicKeyBytes::default(),
            withdrawal_credentials: H256::ZERO,
            effective_balance: 0,
            slashed: false,
            activation_epoch: FAR_FUTURE_EPOCH,
            exit_epoch: FAR_FUTURE_EPOCH,
        }
    }
}

impl Validator {
    #[must_use]
    pub const fn is_active_at(&self, epoch: Epoch) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }
}

/// The post-state of a block, compact enough to hold in memory for every hot
/// block.
///
/// Unlike the full protocol state this does not Merkleise. States are keyed
/// by the root of the block they are the post-state of, so nothing in the
/// core needs a state root. `latest_block_root` is maintained directly by the
/// state transition for the same reason.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode)]
#[serde(deny_unknown_fields)]
pub struct BeaconState {
    pub genesis_time: UnixSeconds,
    pub slot: Slot,
    pub latest_block_header: BeaconBlockHeader,
    pub latest_block_root: H256,
    pub block_roots: Vec<H256>,
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: Vec<Eth1Data>,
    pub eth1_deposit_index: DepositIndex,
    pub validators: Vec<Validator>,
    pub balances: Vec<Gwei>,
    pub previous_epoch_target_attesters: Vec<ValidatorIndex>,
    pub current_epoch_target_attesters: Vec<ValidatorIndex>,
    pub justification_bits: u8,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}

impl BeaconState {
    #[must_use]
    pub fn current_epoch(&self, spec: &ChainSpec) -> Epoch {
        spec.epoch_at_slot(self.slot)
    }

    #[must_use]
    pub fn previous_epoch(&self, spec: &ChainSpec) -> Epoch {
        self.current_epoch(spec).saturating_sub(1)
    }

    pub fn active_validator_indices(
        &self,
        epoch: Epoch,
    ) -> impl Iterator<Item = ValidatorIndex> + '_ {
        self.validators
            .iter()
            .enumerate()
            .filter(move |(_, validator)| validator.is_active_at(epoch))
            .map(|(index, _)| index as ValidatorIndex)
    }

    #[must_use]
    pub fn total_active_balance(&self, spec: &ChainSpec) -> Gwei {
        let epoch = self.current_epoch(spec);

        self.validators
            .iter()
            .filter(|validator| validator.is_active_at(epoch))
            .map(|validator| validator.effective_balance)
            .sum::<Gwei>()
            .max(spec.effective_balance_increment)
    }

    #[must_use]
    pub fn effective_balance(&self, validator_index: ValidatorIndex) -> Gwei {
        self.validators
            .get(validator_index as usize)
            .map(|validator| validator.effective_balance)
            .unwrap_or_default()
    }

    /// The canonical block root at `slot`, if it is still in the ring buffer.
    #[must_use]
    pub fn block_root_at_slot(&self, spec: &ChainSpec, slot: Slot) -> Option<H256> {
        let history = spec.slots_per_historical_root.get();

        if slot >= self.slot || self.slot > slot + history {
            return None;
        }

        self.block_roots.get((slot % history) as usize).copied()
    }

    pub fn set_block_root_at_slot(&mut self, spec: &ChainSpec, slot: Slot, root: H256) {
        let history = spec.slots_per_historical_root.get();
        let position = (slot % history) as usize;

        if self.block_roots.len() <= position {
            self.block_roots.resize(position + 1, H256::ZERO);
        }

        self.block_roots[position] = root;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_validators(balances: &[Gwei], active: &[bool]) -> BeaconState {
        let validators = balances
            .iter()
            .zip(active)
            .map(|(balance, is_active)| Validator {
                effective_balance: *balance,
                activation_epoch: 0,
                exit_epoch: if *is_active { FAR_FUTURE_EPOCH } else { 0 },
                ..Validator::default()
            })
            .collect();

        BeaconState {
            validators,
            ..BeaconState::default()
        }
    }

    #[test]
    fn total_active_balance_skips_exited_validators() {
        let spec = ChainSpec::minimal();

        let state = state_with_validators(
            &[32_000_000_000, 32_000_000_000, 16_000_000_000],
            &[true, false, true],
        );

        assert_eq!(state.total_active_balance(&spec), 48_000_000_000);
        assert_eq!(state.active_validator_indices(0).collect::<Vec<_>>(), [0, 2]);
    }

    #[test]
    fn block_root_ring_buffer_wraps() {
        let spec = ChainSpec::minimal();
        let history = spec.slots_per_historical_root.get();

        let mut state = BeaconState {
            slot: history + 5,
            ..BeaconState::default()
        };

        state.set_block_root_at_slot(&spec, history + 4, H256::repeat_byte(9));

        assert_eq!(
            state.block_root_at_slot(&spec, history + 4),
            Some(H256::repeat_byte(9)),
        );
        assert_eq!(state.block_root_at_slot(&spec, history + 5), None);
        assert_eq!(state.block_root_at_slot(&spec, 4), None);
    }
}
