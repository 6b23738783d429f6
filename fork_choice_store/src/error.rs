use thiserror::Error;
use types::primitives::{Slot, H256};

#[derive(Debug, Error)]
pub enum Error {
    #[error("block failed the state transition")]
    InvalidBlock(#[source] transition_functions::Error),
    #[error("attestation failed validation against the target checkpoint state")]
    InvalidAttestation(#[source] transition_functions::Error),
    #[error(
        "attestation votes for block {block_root:?} at slot {block_slot} \
         after the attestation slot {attestation_slot}"
    )]
    AttestationForBlockFromFuture {
        block_root: H256,
        block_slot: Slot,
        attestation_slot: Slot,
    },
    #[error("checkpoint root {root:?} is not present in the store")]
    CheckpointBlockMissing { root: H256 },
}
