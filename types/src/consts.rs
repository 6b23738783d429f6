use typenum::{U128, U16, U2, U2048, U33};

use crate::primitives::{Epoch, Slot};

pub const GENESIS_SLOT: Slot = 0;
pub const GENESIS_EPOCH: Epoch = 0;
pub const FAR_FUTURE_EPOCH: Epoch = Epoch::MAX;

/// Start of slot, attestation due, aggregation due.
pub const INTERVALS_PER_SLOT: u64 = 3;

pub const ATTESTATION_PROPAGATION_SLOT_RANGE: u64 = 32;

pub const DEPOSIT_CONTRACT_TREE_DEPTH: usize = 32;

pub type MaxValidatorsPerCommittee = U2048;
pub type MaxProposerSlashings = U16;
pub type MaxAttesterSlashings = U2;
pub type MaxAttestations = U128;
pub type MaxDeposits = U16;
pub type MaxVoluntaryExits = U16;
/// `DEPOSIT_CONTRACT_TREE_DEPTH` plus one for the length mix-in.
pub type DepositProofLength = U33;
