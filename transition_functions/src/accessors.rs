//! Read-only helpers over [`BeaconState`].
//!
//! Committee assignment partitions the active validator set in index order.
//! The production protocol shuffles the set first; the shuffle only affects
//! which validators land in which committee, not any of the bookkeeping built
//! on top, so it is left to the crypto layer this repository treats as
//! external.
//!
//! [`BeaconState`]: types::beacon_state::BeaconState

use anyhow::Result;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    containers::Attestation,
    primitives::{CommitteeIndex, Epoch, Slot, ValidatorIndex},
};

use crate::error::Error;

#[must_use]
pub fn committees_per_slot(state: &BeaconState, spec: &ChainSpec, epoch: Epoch) -> u64 {
    let active_count = state.active_validator_indices(epoch).count() as u64;

    (active_count / spec.slots_per_epoch / spec.target_committee_size)
        .clamp(1, spec.max_committees_per_slot.get())
}

/// The members of committee `index` at `slot`, in validator index order.
pub fn beacon_committee(
    state: &BeaconState,
    spec: &ChainSpec,
    slot: Slot,
    index: CommitteeIndex,
) -> Result<Vec<ValidatorIndex>, Error> {
    let epoch = spec.epoch_at_slot(slot);
    let committees_per_slot = committees_per_slot(state, spec, epoch);

    if index >= committees_per_slot {
        return Err(Error::CommitteeIndexOutOfBounds {
            index,
            committees_per_slot,
        });
    }

    let active = state.active_validator_indices(epoch).collect::<Vec<_>>();
    let committees_per_epoch = committees_per_slot * spec.slots_per_epoch.get();
    let slot_in_epoch = slot % spec.slots_per_epoch.get();
    let global_index = slot_in_epoch * committees_per_slot + index;

    let start = active.len() * usize::try_from(global_index).expect("committee index fits in usize")
        / usize::try_from(committees_per_epoch).expect("committee count fits in usize");
    let end = active.len()
        * usize::try_from(global_index + 1).expect("committee index fits in usize")
        / usize::try_from(committees_per_epoch).expect("committee count fits in usize");

    Ok(active[start..end].to_vec())
}

/// Resolves an attestation's aggregation bits to validator indices.
pub fn attesting_indices(
    state: &BeaconState,
    spec: &ChainSpec,
    attestation: &Attestation,
) -> Result<Vec<ValidatorIndex>, Error> {
    let committee = beacon_committee(state, spec, attestation.data.slot, attestation.data.index)?;
    let bits = &attestation.aggregation_bits;

    if bits.len() != committee.len() {
        return Err(Error::BitlistLengthMismatch {
            committee_size: committee.len(),
            bits: bits.len(),
        });
    }

    Ok(committee
        .into_iter()
        .enumerate()
        .filter(|(position, _)| bits.get(*position).unwrap_or(false))
        .map(|(_, validator_index)| validator_index)
        .collect())
}

#[cfg(test)]
mod tests {
    use types::{beacon_state::Validator, consts::FAR_FUTURE_EPOCH};

    use super::*;

    fn state_with_active_validators(count: usize) -> BeaconState {
        BeaconState {
            validators: (0..count)
                .map(|_| Validator {
                    effective_balance: 32_000_000_000,
                    activation_epoch: 0,
                    exit_epoch: FAR_FUTURE_EPOCH,
                    ..Validator::default()
                })
                .collect(),
            ..BeaconState::default()
        }
    }

    #[test]
    fn committees_partition_the_active_set_within_an_epoch() {
        let spec = ChainSpec::minimal();
        let state = state_with_active_validators(100);
        let per_slot = committees_per_slot(&state, &spec, 0);

        let mut seen = Vec::new();

        for slot in 0..spec.slots_per_epoch.get() {
            for index in 0..per_slot {
                seen.extend(beacon_committee(&state, &spec, slot, index).expect("index is valid"));
            }
        }

        seen.sort_unstable();

        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn committee_index_out_of_bounds_is_rejected() {
        let spec = ChainSpec::minimal();
        let state = state_with_active_validators(16);
        let per_slot = committees_per_slot(&state, &spec, 0);

        assert!(matches!(
            beacon_committee(&state, &spec, 0, per_slot),
            Err(Error::CommitteeIndexOutOfBounds { .. }),
        ));
    }
}
