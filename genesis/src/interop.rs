//! Deterministic genesis for interop testing.
//!
//! Key material is a placeholder: public keys are derived from validator
//! indices rather than the interop secret keys, which is enough for any
//! setup that never verifies signatures.

use std::sync::Arc;

use bls::PublicKeyBytes;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    containers::{DepositData, SignedBeaconBlock},
    primitives::{DepositIndex, UnixSeconds, H256},
};

use crate::Incremental;

/// A fully active validator set of `validator_count` deterministic keys.
#[must_use]
pub fn quick_start(
    spec: &ChainSpec,
    genesis_time: UnixSeconds,
    validator_count: u64,
) -> (Arc<SignedBeaconBlock>, Arc<BeaconState>) {
    let mut incremental = Incremental::new(spec);

    for index in 0..validator_count {
        incremental
            .add_deposit(index, deposit_data(spec, index))
            .expect("interop deposit indices are sequential");
    }

    incremental.finish(genesis_time, H256::repeat_byte(0x42))
}

#[must_use]
pub fn deposit_data(spec: &ChainSpec, index: DepositIndex) -> DepositData {
    let mut pubkey = PublicKeyBytes::default();
    pubkey.0[..8].copy_from_slice(&index.to_le_bytes());

    let mut withdrawal_credentials = H256::ZERO;
    withdrawal_credentials.0[24..].copy_from_slice(&index.to_be_bytes());

    DepositData {
        pubkey,
        withdrawal_credentials,
        amount: spec.max_effective_balance,
        ..DepositData::default()
    }
}
