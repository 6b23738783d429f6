//! Per-block processing and the per-operation validators shared with the
//! operation pools.

use itertools::Itertools as _;
use tree_hash::TreeHash as _;
use typenum::Unsigned as _;
use types::{
    beacon_state::{BeaconState, Validator},
    config::ChainSpec,
    consts::FAR_FUTURE_EPOCH,
    containers::{
        Attestation, AttesterSlashing, BeaconBlock, Deposit, IndexedAttestation, ProposerSlashing,
        SignedVoluntaryExit,
    },
    primitives::{ValidatorIndex, H256},
};

use crate::{accessors, error::Error};

pub fn process_block(
    spec: &ChainSpec,
    state: &mut BeaconState,
    block: &BeaconBlock,
) -> Result<(), Error> {
    process_block_header(state, block)?;
    process_eth1_data(spec, state, block);

    for proposer_slashing in &block.body.proposer_slashings {
        let proposer_index = validate_proposer_slashing(spec, state, *proposer_slashing)?;
        slash_validator(spec, state, proposer_index);
    }

    for attester_slashing in &block.body.attester_slashings {
        for validator_index in validate_attester_slashing(spec, state, attester_slashing)? {
            slash_validator(spec, state, validator_index);
        }
    }

    for attestation in &block.body.attestations {
        process_attestation(spec, state, attestation)?;
    }

    let expected_deposits = state
        .eth1_data
        .deposit_count
        .saturating_sub(state.eth1_deposit_index)
        .min(types::consts::MaxDeposits::U64);

    if block.body.deposits.len() as u64 != expected_deposits {
        return Err(Error::DepositCountMismatch {
            expected: expected_deposits,
            in_block: block.body.deposits.len() as u64,
        });
    }

    for deposit in &block.body.deposits {
        process_deposit(spec, state, deposit)?;
    }

    for voluntary_exit in &block.body.voluntary_exits {
        let validator_index = validate_voluntary_exit(spec, state, *voluntary_exit)?;
        initiate_validator_exit(spec, state, validator_index);
    }

    Ok(())
}

fn process_block_header(state: &mut BeaconState, block: &BeaconBlock) -> Result<(), Error> {
    if block.slot != state.slot {
        return Err(Error::SlotNotAfterState {
            state_slot: state.slot,
            block_slot: block.slot,
        });
    }

    if block.parent_root != state.latest_block_root {
        return Err(Error::ParentRootMismatch {
            in_state: state.latest_block_root,
            in_block: block.parent_root,
        });
    }

    state.latest_block_header = block.header();
    state.latest_block_root = block.tree_hash_root();

    Ok(())
}

fn process_eth1_data(spec: &ChainSpec, state: &mut BeaconState, block: &BeaconBlock) {
    let vote = block.body.eth1_data;

    state.eth1_data_votes.push(vote);

    let voting_period_slots =
        spec.epochs_per_eth1_voting_period.get() * spec.slots_per_epoch.get();

    let votes_for_this_data = state
        .eth1_data_votes
        .iter()
        .filter(|data| **data == vote)
        .count() as u64;

    if votes_for_this_data * 2 > voting_period_slots {
        state.eth1_data = vote;
    }
}

/// Validates an attestation against `state` and returns its attesting
/// indices. Used both during block processing and by the attestation pool.
pub fn validate_attestation(
    spec: &ChainSpec,
    state: &BeaconState,
    attestation: &Attestation,
) -> Result<Vec<ValidatorIndex>, Error> {
    let data = attestation.data;
    let current_epoch = state.current_epoch(spec);
    let previous_epoch = state.previous_epoch(spec);

    if data.target.epoch != current_epoch && data.target.epoch != previous_epoch {
        return Err(Error::AttestationTargetsWrongEpoch {
            target_epoch: data.target.epoch,
        });
    }

    let source = if data.target.epoch == current_epoch {
        state.current_justified_checkpoint
    } else {
        state.previous_justified_checkpoint
    };

    if data.source != source {
        return Err(Error::AttestationSourceMismatch);
    }

    accessors::attesting_indices(state, spec, attestation)
}

fn process_attestation(
    spec: &ChainSpec,
    state: &mut BeaconState,
    attestation: &Attestation,
) -> Result<(), Error> {
    let data = attestation.data;

    let earliest = data.slot + spec.min_attestation_inclusion_delay;
    let latest = data.slot + spec.slots_per_epoch.get();

    if state.slot < earliest || latest < state.slot {
        return Err(Error::AttestationOutsideInclusionWindow {
            state_slot: state.slot,
            attestation_slot: data.slot,
        });
    }

    let attesting_indices = validate_attestation(spec, state, attestation)?;

    let target_matches = state
        .block_root_at_slot(spec, data.target.epoch_start_slot(spec))
        .is_some_and(|root| root == data.target.root);

    if !target_matches {
        return Ok(());
    }

    let attesters = if data.target.epoch == state.current_epoch(spec) {
        &mut state.current_epoch_target_attesters
    } else {
        &mut state.previous_epoch_target_attesters
    };

    for validator_index in attesting_indices {
        if !attesters.contains(&validator_index) {
            attesters.push(validator_index);
        }
    }

    Ok(())
}

fn process_deposit(
    spec: &ChainSpec,
    state: &mut BeaconState,
    deposit: &Deposit,
) -> Result<(), Error> {
    let index = state.eth1_deposit_index;
    let leaf = deposit.data.tree_hash_root();

    let proof_is_valid = deposit_tree::is_valid_proof(
        leaf,
        &deposit.proof,
        index,
        state.eth1_data.deposit_root,
    );

    if !proof_is_valid {
        return Err(Error::DepositProofInvalid { index });
    }

    state.eth1_deposit_index += 1;

    apply_deposit(spec, state, deposit);

    Ok(())
}

/// Credits a deposit to an existing validator or appends a new one.
///
/// New validators become active at the next epoch. The activation queue of
/// the production protocol is a rate limiter, not a correctness requirement,
/// and is left out.
pub fn apply_deposit(spec: &ChainSpec, state: &mut BeaconState, deposit: &Deposit) {
    let data = deposit.data;

    let existing = state
        .validators
        .iter()
        .position(|validator| validator.pubkey == data.pubkey);

    match existing {
        Some(position) => {
            state.balances[position] += data.amount;
        }
        None => {
            let activation_epoch = if state.slot == 0 {
                0
            } else {
                state.current_epoch(spec) + 1
            };

            state.validators.push(Validator {
                pubkey: data.pubkey,
                withdrawal_credentials: data.withdrawal_credentials,
                effective_balance: data.amount.min(spec.max_effective_balance),
                slashed: false,
                activation_epoch,
                exit_epoch: FAR_FUTURE_EPOCH,
            });
            state.balances.push(data.amount);
        }
    }
}

pub fn validate_proposer_slashing(
    spec: &ChainSpec,
    state: &BeaconState,
    proposer_slashing: ProposerSlashing,
) -> Result<ValidatorIndex, Error> {
    let header_1 = proposer_slashing.signed_header_1.message;
    let header_2 = proposer_slashing.signed_header_2.message;

    let slashable = header_1.slot == header_2.slot
        && header_1.proposer_index == header_2.proposer_index
        && header_1 != header_2;

    if !slashable {
        return Err(Error::ProposerSlashingNotSlashable);
    }

    let validator_index = header_1.proposer_index;

    check_slashable_validator(spec, state, validator_index)?;

    Ok(validator_index)
}

/// Returns the indices the slashing actually slashes, in increasing order.
pub fn validate_attester_slashing(
    spec: &ChainSpec,
    state: &BeaconState,
    attester_slashing: &AttesterSlashing,
) -> Result<Vec<ValidatorIndex>, Error> {
    let attestation_1 = &attester_slashing.attestation_1;
    let attestation_2 = &attester_slashing.attestation_2;

    if !is_slashable_attestation_data(attestation_1, attestation_2) {
        return Err(Error::AttesterSlashingNotSlashable);
    }

    check_sorted_and_unique(attestation_1)?;
    check_sorted_and_unique(attestation_2)?;

    let indices_1 = attestation_1.attesting_indices.iter().copied();
    let indices_2 = attestation_2
        .attesting_indices
        .iter()
        .copied()
        .collect::<Vec<_>>();

    let slashable_indices = indices_1
        .filter(|validator_index| indices_2.contains(validator_index))
        .filter(|validator_index| {
            check_slashable_validator(spec, state, *validator_index).is_ok()
        })
        .collect_vec();

    if slashable_indices.is_empty() {
        return Err(Error::AttesterSlashingWithoutIndices);
    }

    Ok(slashable_indices)
}

pub fn validate_voluntary_exit(
    spec: &ChainSpec,
    state: &BeaconState,
    voluntary_exit: SignedVoluntaryExit,
) -> Result<ValidatorIndex, Error> {
    let message = voluntary_exit.message;
    let validator_index = message.validator_index;
    let current_epoch = state.current_epoch(spec);

    let validator = state
        .validators
        .get(usize::try_from(validator_index).expect("validator index fits in usize"))
        .ok_or(Error::ValidatorUnknown { validator_index })?;

    if !validator.is_active_at(current_epoch) {
        return Err(Error::ValidatorNotActive { validator_index });
    }

    if validator.exit_epoch != FAR_FUTURE_EPOCH {
        return Err(Error::ValidatorAlreadyExited { validator_index });
    }

    if message.epoch > current_epoch {
        return Err(Error::ExitNotDue { validator_index });
    }

    Ok(validator_index)
}

fn initiate_validator_exit(spec: &ChainSpec, state: &mut BeaconState, index: ValidatorIndex) {
    let exit_epoch = state.current_epoch(spec) + 1;

    if let Some(validator) = state
        .validators
        .get_mut(usize::try_from(index).expect("validator index fits in usize"))
    {
        if validator.exit_epoch == FAR_FUTURE_EPOCH {
            validator.exit_epoch = exit_epoch;
        }
    }
}

fn slash_validator(spec: &ChainSpec, state: &mut BeaconState, index: ValidatorIndex) {
    initiate_validator_exit(spec, state, index);

    if let Some(validator) = state
        .validators
        .get_mut(usize::try_from(index).expect("validator index fits in usize"))
    {
        validator.slashed = true;
    }
}

fn check_slashable_validator(
    spec: &ChainSpec,
    state: &BeaconState,
    validator_index: ValidatorIndex,
) -> Result<(), Error> {
    let validator = state
        .validators
        .get(usize::try_from(validator_index).expect("validator index fits in usize"))
        .ok_or(Error::ValidatorUnknown { validator_index })?;

    if validator.slashed {
        return Err(Error::ValidatorAlreadySlashed { validator_index });
    }

    if !validator.is_active_at(state.current_epoch(spec)) {
        return Err(Error::ValidatorNotActive { validator_index });
    }

    Ok(())
}

fn check_sorted_and_unique(attestation: &IndexedAttestation) -> Result<(), Error> {
    let sorted_and_unique = attestation
        .attesting_indices
        .iter()
        .tuple_windows()
        .all(|(a, b)| a < b);

    if !sorted_and_unique {
        return Err(Error::IndicesNotSortedAndUnique);
    }

    Ok(())
}

/// Double votes and surround votes, as defined by the slashing conditions.
#[must_use]
pub fn is_slashable_attestation_data(
    attestation_1: &IndexedAttestation,
    attestation_2: &IndexedAttestation,
) -> bool {
    let data_1 = attestation_1.data;
    let data_2 = attestation_2.data;

    let double_vote = data_1 != data_2 && data_1.target.epoch == data_2.target.epoch;
    let surround_vote =
        data_1.source.epoch < data_2.source.epoch && data_2.target.epoch < data_1.target.epoch;

    double_vote || surround_vote
}

#[cfg(test)]
mod tests {
    use ssz_types::{BitList, VariableList};
    use types::{
        beacon_state::Validator,
        containers::{AttestationData, BeaconBlockHeader, Checkpoint, SignedBeaconBlockHeader},
        primitives::Epoch,
    };

    use super::*;

    fn active_validator() -> Validator {
        Validator {
            effective_balance: 32_000_000_000,
            activation_epoch: 0,
            exit_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        }
    }

    fn state_with_validators(slot: u64, count: usize) -> BeaconState {
        BeaconState {
            slot,
            validators: (0..count).map(|_| active_validator()).collect(),
            balances: vec![32_000_000_000; count],
            latest_block_root: H256::repeat_byte(1),
            ..BeaconState::default()
        }
    }

    fn indexed_attestation(
        indices: &[ValidatorIndex],
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> IndexedAttestation {
        IndexedAttestation {
            attesting_indices: VariableList::new(indices.to_vec())
                .expect("test indices fit in the list"),
            data: AttestationData {
                source: Checkpoint {
                    epoch: source_epoch,
                    ..Checkpoint::default()
                },
                target: Checkpoint {
                    epoch: target_epoch,
                    ..Checkpoint::default()
                },
                ..AttestationData::default()
            },
            signature: Default::default(),
        }
    }

    #[test]
    fn surround_vote_is_slashable() {
        let spec = ChainSpec::minimal();
        let state = state_with_validators(8, 4);

        let slashing = AttesterSlashing {
            attestation_1: indexed_attestation(&[0, 1, 2], 0, 3),
            attestation_2: indexed_attestation(&[1, 2, 3], 1, 2),
        };

        assert_eq!(
            validate_attester_slashing(&spec, &state, &slashing),
            Ok(vec![1, 2]),
        );
    }

    #[test]
    fn disjoint_attester_slashing_is_rejected() {
        let spec = ChainSpec::minimal();
        let state = state_with_validators(8, 4);

        let slashing = AttesterSlashing {
            attestation_1: indexed_attestation(&[0, 1], 0, 3),
            attestation_2: indexed_attestation(&[2, 3], 1, 2),
        };

        assert_eq!(
            validate_attester_slashing(&spec, &state, &slashing),
            Err(Error::AttesterSlashingWithoutIndices),
        );
    }

    #[test]
    fn proposer_slashing_requires_distinct_headers() {
        let spec = ChainSpec::minimal();
        let state = state_with_validators(8, 4);

        let header = BeaconBlockHeader {
            slot: 3,
            proposer_index: 2,
            ..BeaconBlockHeader::default()
        };

        let identical = ProposerSlashing {
            signed_header_1: SignedBeaconBlockHeader {
                message: header,
                ..SignedBeaconBlockHeader::default()
            },
            signed_header_2: SignedBeaconBlockHeader {
                message: header,
                ..SignedBeaconBlockHeader::default()
            },
        };

        assert_eq!(
            validate_proposer_slashing(&spec, &state, identical),
            Err(Error::ProposerSlashingNotSlashable),
        );

        let distinct = ProposerSlashing {
            signed_header_2: SignedBeaconBlockHeader {
                message: BeaconBlockHeader {
                    state_root: H256::repeat_byte(9),
                    ..header
                },
                ..SignedBeaconBlockHeader::default()
            },
            ..identical
        };

        assert_eq!(validate_proposer_slashing(&spec, &state, distinct), Ok(2));
    }

    #[test]
    fn voluntary_exit_for_future_epoch_is_rejected() {
        let spec = ChainSpec::minimal();
        let mut state = state_with_validators(8, 4);

        let premature = SignedVoluntaryExit {
            message: types::containers::VoluntaryExit {
                epoch: 5,
                validator_index: 1,
            },
            ..SignedVoluntaryExit::default()
        };

        assert_eq!(
            validate_voluntary_exit(&spec, &state, premature),
            Err(Error::ExitNotDue { validator_index: 1 }),
        );

        let due = SignedVoluntaryExit {
            message: types::containers::VoluntaryExit {
                epoch: 1,
                validator_index: 1,
            },
            ..SignedVoluntaryExit::default()
        };

        assert_eq!(validate_voluntary_exit(&spec, &state, due), Ok(1));

        initiate_validator_exit(&spec, &mut state, 1);

        assert_eq!(
            validate_voluntary_exit(&spec, &state, due),
            Err(Error::ValidatorAlreadyExited { validator_index: 1 }),
        );
    }

    #[test]
    fn attestation_with_mismatched_source_is_rejected() {
        let spec = ChainSpec::minimal();
        let state = state_with_validators(8, 16);

        let committee = accessors::beacon_committee(&state, &spec, 7, 0)
            .expect("committee 0 exists at every slot");

        let attestation = Attestation {
            aggregation_bits: BitList::with_capacity(committee.len())
                .expect("committee size is within bounds"),
            data: AttestationData {
                slot: 7,
                index: 0,
                beacon_block_root: H256::repeat_byte(1),
                source: Checkpoint {
                    epoch: 3,
                    root: H256::repeat_byte(2),
                },
                target: Checkpoint {
                    epoch: 1,
                    ..Checkpoint::default()
                },
            },
            signature: Default::default(),
        };

        assert_eq!(
            validate_attestation(&spec, &state, &attestation),
            Err(Error::AttestationSourceMismatch),
        );
    }
}
