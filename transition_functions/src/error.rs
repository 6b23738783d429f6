use thiserror::Error;
use types::primitives::{Epoch, Slot, ValidatorIndex, H256};

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error("block slot {block_slot} is not after state slot {state_slot}")]
    SlotNotAfterState { state_slot: Slot, block_slot: Slot },
    #[error("state cannot be rewound from slot {state_slot} to slot {target_slot}")]
    SlotBeforeState { state_slot: Slot, target_slot: Slot },
    #[error("block parent root {in_block:?} does not match chain tip {in_state:?}")]
    ParentRootMismatch { in_state: H256, in_block: H256 },
    #[error("attestation targets epoch {target_epoch} which is neither current nor previous")]
    AttestationTargetsWrongEpoch { target_epoch: Epoch },
    #[error("attestation slot {attestation_slot} is outside the inclusion window at state slot {state_slot}")]
    AttestationOutsideInclusionWindow {
        state_slot: Slot,
        attestation_slot: Slot,
    },
    #[error("attestation source does not match the justified checkpoint")]
    AttestationSourceMismatch,
    #[error("committee index {index} is out of bounds for {committees_per_slot} committees")]
    CommitteeIndexOutOfBounds {
        index: u64,
        committees_per_slot: u64,
    },
    #[error("aggregation bitlist length {bits} does not match committee size {committee_size}")]
    BitlistLengthMismatch { committee_size: usize, bits: usize },
    #[error("deposit proof is invalid at deposit index {index}")]
    DepositProofInvalid { index: u64 },
    #[error("block contains {in_block} deposits but {expected} are due")]
    DepositCountMismatch { expected: u64, in_block: u64 },
    #[error("validator {validator_index} is unknown")]
    ValidatorUnknown { validator_index: ValidatorIndex },
    #[error("validator {validator_index} is not active")]
    ValidatorNotActive { validator_index: ValidatorIndex },
    #[error("validator {validator_index} has already initiated an exit")]
    ValidatorAlreadyExited { validator_index: ValidatorIndex },
    #[error("voluntary exit for validator {validator_index} is not yet due")]
    ExitNotDue { validator_index: ValidatorIndex },
    #[error("attester slashing does not prove slashable behaviour")]
    AttesterSlashingNotSlashable,
    #[error("attester slashing does not slash any validator")]
    AttesterSlashingWithoutIndices,
    #[error("indexed attestation indices are not sorted and unique")]
    IndicesNotSortedAndUnique,
    #[error("proposer slashing headers are not slashable")]
    ProposerSlashingNotSlashable,
    #[error("validator {validator_index} is already slashed")]
    ValidatorAlreadySlashed { validator_index: ValidatorIndex },
}
