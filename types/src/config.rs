use core::{num::NonZeroU64, time::Duration};

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

use crate::{
    consts::GENESIS_SLOT,
    primitives::{Epoch, Gwei, Slot, UnixSeconds},
};

/// Protocol constants passed explicitly to every component that needs them.
///
/// Two presets are provided. `minimal` shortens slots and epochs and is what
/// most tests use.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainSpec {
    pub seconds_per_slot: NonZeroU64,
    pub slots_per_epoch: NonZeroU64,
    pub target_committee_size: NonZeroU64,
    pub max_committees_per_slot: NonZeroU64,
    pub epochs_per_eth1_voting_period: NonZeroU64,
    pub slots_per_historical_root: NonZeroU64,
    pub eth1_follow_distance: u64,
    pub min_genesis_time: UnixSeconds,
    pub min_genesis_active_validator_count: u64,
    pub genesis_delay: u64,
    pub max_effective_balance: Gwei,
    pub effective_balance_increment: Gwei,
    pub ejection_balance: Gwei,
    pub min_attestation_inclusion_delay: u64,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl ChainSpec {
    #[must_use]
    pub const fn mainnet() -> Self {
        Self {
            seconds_per_slot: nonzero!(12_u64),
            slots_per_epoch: nonzero!(32_u64),
            target_committee_size: nonzero!(128_u64),
            max_committees_per_slot: nonzero!(64_u64),
            epochs_per_eth1_voting_period: nonzero!(64_u64),
            slots_per_historical_root: nonzero!(8192_u64),
            eth1_follow_distance: 2048,
            min_genesis_time: 1_578_009_600,
            min_genesis_active_validator_count: 16_384,
            genesis_delay: 604_800,
            max_effective_balance: 32_000_000_000,
            effective_balance_increment: 1_000_000_000,
            ejection_balance: 16_000_000_000,
            min_attestation_inclusion_delay: 1,
        }
    }

    #[must_use]
    pub const fn minimal() -> Self {
        Self {
            seconds_per_slot: nonzero!(6_u64),
            slots_per_epoch: nonzero!(8_u64),
            target_committee_size: nonzero!(4_u64),
            max_committees_per_slot: nonzero!(4_u64),
            epochs_per_eth1_voting_period: nonzero!(4_u64),
            slots_per_historical_root: nonzero!(64_u64),
            eth1_follow_distance: 16,
            min_genesis_time: 1_578_009_600,
            min_genesis_active_validator_count: 64,
            genesis_delay: 300,
            max_effective_balance: 32_000_000_000,
            effective_balance_increment: 1_000_000_000,
            ejection_balance: 16_000_000_000,
            min_attestation_inclusion_delay: 1,
        }
    }

    #[must_use]
    pub const fn epoch_at_slot(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch.get()
    }

    #[must_use]
    pub const fn start_slot_at_epoch(&self, epoch: Epoch) -> Slot {
        epoch * self.slots_per_epoch.get()
    }

    #[must_use]
    pub const fn is_epoch_start(&self, slot: Slot) -> bool {
        slot % self.slots_per_epoch.get() == 0
    }

    /// The slot a timestamp falls in. Times before genesis map to the genesis slot.
    #[must_use]
    pub const fn slot_at_time(&self, time: UnixSeconds, genesis_time: UnixSeconds) -> Slot {
        match time.checked_sub(genesis_time) {
            Some(since_genesis) => GENESIS_SLOT + since_genesis / self.seconds_per_slot.get(),
            None => GENESIS_SLOT,
        }
    }

    #[must_use]
    pub const fn slot_start_time(&self, slot: Slot, genesis_time: UnixSeconds) -> UnixSeconds {
        genesis_time + (slot - GENESIS_SLOT) * self.seconds_per_slot.get()
    }

    /// Attestations are due a third of the way into the slot.
    #[must_use]
    pub const fn attestation_due_time(&self, slot: Slot, genesis_time: UnixSeconds) -> UnixSeconds {
        self.slot_start_time(slot, genesis_time) + self.seconds_per_slot.get() / 3
    }

    /// Aggregates are due two thirds of the way into the slot.
    #[must_use]
    pub const fn aggregation_due_time(&self, slot: Slot, genesis_time: UnixSeconds) -> UnixSeconds {
        self.slot_start_time(slot, genesis_time) + 2 * self.seconds_per_slot.get() / 3
    }

    #[must_use]
    pub const fn slot_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot.get())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0, 1000 => 0; "at genesis")]
    #[test_case(999, 1000 => 0; "before genesis")]
    #[test_case(1011, 1000 => 0; "last second of slot 0")]
    #[test_case(1012, 1000 => 1; "start of slot 1")]
    #[test_case(1240, 1000 => 20; "well past genesis")]
    fn slot_at_time_with_mainnet_spec(time: UnixSeconds, genesis_time: UnixSeconds) -> Slot {
        ChainSpec::mainnet().slot_at_time(time, genesis_time)
    }

    #[test_case(0 => (1000, 1004, 1008))]
    #[test_case(1 => (1012, 1016, 1020))]
    #[test_case(20 => (1240, 1244, 1248))]
    fn slot_interval_times_with_mainnet_spec(slot: Slot) -> (UnixSeconds, UnixSeconds, UnixSeconds) {
        let spec = ChainSpec::mainnet();

        (
            spec.slot_start_time(slot, 1000),
            spec.attestation_due_time(slot, 1000),
            spec.aggregation_due_time(slot, 1000),
        )
    }

    #[test]
    fn epoch_boundaries_with_mainnet_spec() {
        let spec = ChainSpec::mainnet();

        assert_eq!(spec.epoch_at_slot(0), 0);
        assert_eq!(spec.epoch_at_slot(31), 0);
        assert_eq!(spec.epoch_at_slot(32), 1);
        assert_eq!(spec.start_slot_at_epoch(2), 64);
        assert!(spec.is_epoch_start(64));
        assert!(!spec.is_epoch_start(65));
    }
}
