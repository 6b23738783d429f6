use types::{beacon_state::BeaconState, config::ChainSpec, containers::SignedBeaconBlock};

use crate::{block_processing, error::Error, slot_processing};

pub use slot_processing::process_slots;

/// Applies `signed_block` to `state`, processing any intervening empty slots
/// first.
///
/// Signature verification is the concern of the signing client and is not
/// performed here. The block root recorded in the state is the Merkle root of
/// the unsigned message, so an attacker cannot smuggle a different block body
/// past a component that checks roots.
pub fn state_transition(
    spec: &ChainSpec,
    state: &mut BeaconState,
    signed_block: &SignedBeaconBlock,
) -> Result<(), Error> {
    let block = &signed_block.message;

    if block.slot < state.slot {
        return Err(Error::SlotNotAfterState {
            state_slot: state.slot,
            block_slot: block.slot,
        });
    }

    slot_processing::process_slots(spec, state, block.slot)?;
    block_processing::process_block(spec, state, block)
}

#[cfg(test)]
mod tests {
    use types::{
        beacon_state::Validator,
        consts::FAR_FUTURE_EPOCH,
        containers::{BeaconBlock, BeaconBlockBody},
        primitives::H256,
    };

    use super::*;

    #[test]
    fn blocks_chain_through_parent_roots() -> Result<(), Error> {
        let spec = ChainSpec::minimal();

        let mut state = BeaconState {
            validators: vec![Validator {
                effective_balance: 32_000_000_000,
                activation_epoch: 0,
                exit_epoch: FAR_FUTURE_EPOCH,
                ..Validator::default()
            }],
            balances: vec![32_000_000_000],
            latest_block_root: H256::repeat_byte(1),
            ..BeaconState::default()
        };

        let block_1 = SignedBeaconBlock {
            message: BeaconBlock {
                slot: 1,
                parent_root: H256::repeat_byte(1),
                body: BeaconBlockBody::default(),
                ..BeaconBlock::default()
            },
            ..SignedBeaconBlock::default()
        };

        state_transition(&spec, &mut state, &block_1)?;

        assert_eq!(state.slot, 1);
        assert_eq!(state.latest_block_root, block_1.block_root());

        let orphan = SignedBeaconBlock {
            message: BeaconBlock {
                slot: 2,
                parent_root: H256::repeat_byte(7),
                ..BeaconBlock::default()
            },
            ..SignedBeaconBlock::default()
        };

        assert!(matches!(
            state_transition(&spec, &mut state, &orphan),
            Err(Error::ParentRootMismatch { .. }),
        ));

        let block_2 = SignedBeaconBlock {
            message: BeaconBlock {
                slot: 2,
                parent_root: block_1.block_root(),
                ..BeaconBlock::default()
            },
            ..SignedBeaconBlock::default()
        };

        state_transition(&spec, &mut state, &block_2)?;

        assert_eq!(state.slot, 2);
        assert_eq!(
            state.block_root_at_slot(&spec, 1),
            Some(block_1.block_root()),
        );

        Ok(())
    }
}
