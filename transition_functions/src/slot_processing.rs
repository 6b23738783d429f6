//! Per-slot and per-epoch processing.

use types::{beacon_state::BeaconState, config::ChainSpec, containers::Checkpoint, primitives::Slot};

use crate::error::Error;

// `justification_bits` is a window over the last four epochs, newest first.
const JUSTIFICATION_BITS_LENGTH: u32 = 4;

/// Advances `state` through empty slots up to and including `slot`.
pub fn process_slots(spec: &ChainSpec, state: &mut BeaconState, slot: Slot) -> Result<(), Error> {
    if slot < state.slot {
        return Err(Error::SlotBeforeState {
            state_slot: state.slot,
            target_slot: slot,
        });
    }

    while state.slot < slot {
        state.set_block_root_at_slot(spec, state.slot, state.latest_block_root);

        if spec.is_epoch_start(state.slot + 1) {
            process_epoch(spec, state);
        }

        state.slot += 1;
    }

    Ok(())
}

fn process_epoch(spec: &ChainSpec, state: &mut BeaconState) {
    process_justification_and_finalization(spec, state);
    process_eth1_data_reset(spec, state);

    state.previous_epoch_target_attesters =
        core::mem::take(&mut state.current_epoch_target_attesters);
}

/// The Casper FFG bookkeeping run at every epoch boundary.
///
/// This follows `weigh_justification_and_finalization` from the protocol
/// specification, with attesting balances taken from the per-epoch target
/// attester lists accumulated during block processing.
fn process_justification_and_finalization(spec: &ChainSpec, state: &mut BeaconState) {
    let current_epoch = state.current_epoch(spec);

    // > Initial FFG checkpoint values have a `0x00` stub for `root`.
    // > Skip FFG updates in the first two epochs to avoid corner cases
    // > that might result in modifying this stub.
    if current_epoch <= 1 {
        return;
    }

    let previous_epoch = state.previous_epoch(spec);
    let total_active_balance = state.total_active_balance(spec);

    let attesting_balance = |attesters: &[u64]| {
        attesters
            .iter()
            .map(|validator_index| state.effective_balance(*validator_index))
            .sum::<u64>()
    };

    let previous_target_balance = attesting_balance(&state.previous_epoch_target_attesters);
    let current_target_balance = attesting_balance(&state.current_epoch_target_attesters);

    let old_previous_justified = state.previous_justified_checkpoint;
    let old_current_justified = state.current_justified_checkpoint;

    state.previous_justified_checkpoint = state.current_justified_checkpoint;
    state.justification_bits = (state.justification_bits << 1) & ((1 << JUSTIFICATION_BITS_LENGTH) - 1);

    if previous_target_balance * 3 >= total_active_balance * 2 {
        if let Some(root) = state.block_root_at_slot(spec, spec.start_slot_at_epoch(previous_epoch))
        {
            state.current_justified_checkpoint = Checkpoint {
                epoch: previous_epoch,
                root,
            };
            state.justification_bits |= 0b0010;
        }
    }

    if current_target_balance * 3 >= total_active_balance * 2 {
        if let Some(root) = state.block_root_at_slot(spec, spec.start_slot_at_epoch(current_epoch)) {
            state.current_justified_checkpoint = Checkpoint {
                epoch: current_epoch,
                root,
            };
            state.justification_bits |= 0b0001;
        }
    }

    let bits = state.justification_bits;

    // > The 2nd/3rd/4th most recent epochs are justified,
    // > the 2nd using the 4th/3rd as source.
    if bits & 0b1110 == 0b1110 && old_previous_justified.epoch + 3 == current_epoch {
        state.finalized_checkpoint = old_previous_justified;
    }

    if bits & 0b0110 == 0b0110 && old_previous_justified.epoch + 2 == current_epoch {
        state.finalized_checkpoint = old_previous_justified;
    }

    // > The 1st/2nd/3rd most recent epochs are justified,
    // > the 1st using the 3rd/2nd as source.
    if bits & 0b0111 == 0b0111 && old_current_justified.epoch + 2 == current_epoch {
        state.finalized_checkpoint = old_current_justified;
    }

    if bits & 0b0011 == 0b0011 && old_current_justified.epoch + 1 == current_epoch {
        state.finalized_checkpoint = old_current_justified;
    }
}

fn process_eth1_data_reset(spec: &ChainSpec, state: &mut BeaconState) {
    let next_epoch = state.current_epoch(spec) + 1;

    if next_epoch % spec.epochs_per_eth1_voting_period.get() == 0 {
        state.eth1_data_votes.clear();
    }
}

#[cfg(test)]
mod tests {
    use types::{
        beacon_state::Validator,
        consts::FAR_FUTURE_EPOCH,
        primitives::{ValidatorIndex, H256},
    };

    use super::*;

    fn state_at_epoch_boundary(spec: &ChainSpec, epoch: u64) -> BeaconState {
        let mut state = BeaconState {
            slot: spec.start_slot_at_epoch(epoch),
            validators: (0..4)
                .map(|_| Validator {
                    effective_balance: 32_000_000_000,
                    activation_epoch: 0,
                    exit_epoch: FAR_FUTURE_EPOCH,
                    ..Validator::default()
                })
                .collect(),
            latest_block_root: H256::repeat_byte(1),
            ..BeaconState::default()
        };

        // Give every past slot a block root so checkpoints can be formed.
        for slot in 0..state.slot {
            state.set_block_root_at_slot(spec, slot, H256::repeat_byte(1));
        }

        state
    }

    fn all_validators(state: &BeaconState) -> Vec<ValidatorIndex> {
        (0..state.validators.len() as ValidatorIndex).collect()
    }

    #[test]
    fn full_participation_justifies_and_finalizes() -> Result<(), Error> {
        let spec = ChainSpec::minimal();
        let mut state = state_at_epoch_boundary(&spec, 2);

        // Epoch 2 -> 3: justify epoch 2.
        state.current_epoch_target_attesters = all_validators(&state);
        process_slots(&spec, &mut state, spec.start_slot_at_epoch(3))?;

        assert_eq!(state.current_justified_checkpoint.epoch, 2);
        assert_eq!(state.finalized_checkpoint.epoch, 0);

        // Epoch 3 -> 4: justify epoch 3, finalizing epoch 2.
        state.current_epoch_target_attesters = all_validators(&state);
        process_slots(&spec, &mut state, spec.start_slot_at_epoch(4))?;

        assert_eq!(state.current_justified_checkpoint.epoch, 3);
        assert_eq!(state.finalized_checkpoint.epoch, 2);

        Ok(())
    }

    #[test]
    fn no_participation_justifies_nothing() -> Result<(), Error> {
        let spec = ChainSpec::minimal();
        let mut state = state_at_epoch_boundary(&spec, 2);

        process_slots(&spec, &mut state, spec.start_slot_at_epoch(4))?;

        assert_eq!(state.current_justified_checkpoint.epoch, 0);
        assert_eq!(state.finalized_checkpoint.epoch, 0);

        Ok(())
    }

    #[test]
    fn rewinding_is_rejected() {
        let spec = ChainSpec::minimal();
        let mut state = state_at_epoch_boundary(&spec, 1);

        assert_eq!(
            process_slots(&spec, &mut state, 0),
            Err(Error::SlotBeforeState {
                state_slot: spec.start_slot_at_epoch(1),
                target_slot: 0,
            }),
        );
    }
}
