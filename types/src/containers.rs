use bls::{AggregateSignatureBytes, PublicKeyBytes, SignatureBytes};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{BitList, FixedVector, VariableList};
use tree_hash::TreeHash as _;
use tree_hash_derive::TreeHash;

use crate::{
    config::ChainSpec,
    consts::{
        DepositProofLength, MaxAttestations, MaxAttesterSlashings, MaxDeposits,
        MaxProposerSlashings, MaxValidatorsPerCommittee, MaxVoluntaryExits,
    },
    primitives::{CommitteeIndex, DepositIndex, Epoch, Gwei, Slot, ValidatorIndex, H256},
};

// Signatures and public keys are carried in compressed form and only
// decompressed when used. Validation is the concern of the state transition
// and the signing client, not of these containers.

#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Deserialize, Serialize,
    Encode, Decode, TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: H256,
}

impl Checkpoint {
    #[must_use]
    pub fn epoch_start_slot(self, spec: &ChainSpec) -> Slot {
        spec.start_slot_at_epoch(self.epoch)
    }
}

#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize, Encode, Decode,
    TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct Eth1Data {
    pub deposit_root: H256,
    pub deposit_count: DepositIndex,
    pub block_hash: H256,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize, Encode, Decode,
    TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct AttestationData {
    pub slot: Slot,
    pub index: CommitteeIndex,
    pub beacon_block_root: H256,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[serde(deny_unknown_fields)]
pub struct Attestation {
    pub aggregation_bits: BitList<MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: AggregateSignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[serde(deny_unknown_fields)]
pub struct IndexedAttestation {
    pub attesting_indices: VariableList<ValidatorIndex, MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: AggregateSignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[serde(deny_unknown_fields)]
pub struct AttesterSlashing {
    pub attestation_1: IndexedAttestation,
    pub attestation_2: IndexedAttestation,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize, Encode, Decode,
    TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct BeaconBlockHeader {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body_root: H256,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct SignedBeaconBlockHeader {
    pub message: BeaconBlockHeader,
    pub signature: SignatureBytes,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct ProposerSlashing {
    pub signed_header_1: SignedBeaconBlockHeader,
    pub signed_header_2: SignedBeaconBlockHeader,
}

impl ProposerSlashing {
    #[must_use]
    pub const fn proposer_index(self) -> ValidatorIndex {
        self.signed_header_1.message.proposer_index
    }
}

#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize, Encode, Decode,
    TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct VoluntaryExit {
    pub epoch: Epoch,
    pub validator_index: ValidatorIndex,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct SignedVoluntaryExit {
    pub message: VoluntaryExit,
    pub signature: SignatureBytes,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
#[serde(deny_unknown_fields)]
pub struct DepositData {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: H256,
    pub amount: Gwei,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[serde(deny_unknown_fields)]
pub struct Deposit {
    pub proof: FixedVector<H256, DepositProofLength>,
    pub data: DepositData,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[serde(deny_unknown_fields)]
pub struct BeaconBlockBody {
    pub randao_reveal: SignatureBytes,
    pub eth1_data: Eth1Data,
    pub graffiti: H256,
    pub proposer_slashings: VariableList<ProposerSlashing, MaxProposerSlashings>,
    pub attester_slashings: VariableList<AttesterSlashing, MaxAttesterSlashings>,
    pub attestations: VariableList<Attestation, MaxAttestations>,
    pub deposits: VariableList<Deposit, MaxDeposits>,
    pub voluntary_exits: VariableList<SignedVoluntaryExit, MaxVoluntaryExits>,
}

impl Default for BeaconBlockBody {
    fn default() -> Self {
        Self {
            randao_reveal: SignatureBytes::default(),
            eth1_data: Eth1Data::default(),
            graffiti: H256::ZERO,
            proposer_slashings: VariableList::empty(),
            attester_slashings: VariableList::empty(),
            attestations: VariableList::empty(),
            deposits: VariableList::empty(),
            voluntary_exits: VariableList::empty(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[serde(deny_unknown_fields)]
pub struct BeaconBlock {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body: BeaconBlockBody,
}

impl BeaconBlock {
    #[must_use]
    pub fn header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot: self.slot,
            proposer_index: self.proposer_index,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body.tree_hash_root(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[serde(deny_unknown_fields)]
pub struct SignedBeaconBlock {
    pub message: BeaconBlock,
    pub signature: SignatureBytes,
}

impl SignedBeaconBlock {
    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.message.slot
    }

    #[must_use]
    pub const fn parent_root(&self) -> H256 {
        self.message.parent_root
    }

    #[must_use]
    pub fn epoch(&self, spec: &ChainSpec) -> Epoch {
        spec.epoch_at_slot(self.slot())
    }

    /// The root the block is keyed by everywhere: the Merkle root of the
    /// unsigned message.
    #[must_use]
    pub fn block_root(&self) -> H256 {
        self.message.tree_hash_root()
    }
}

#[cfg(test)]
mod tests {
    use ssz::{Decode as _, Encode as _};

    use super::*;

    #[test]
    fn block_root_matches_header_root() {
        let block = SignedBeaconBlock {
            message: BeaconBlock {
                slot: 5,
                proposer_index: 3,
                parent_root: H256::repeat_byte(1),
                state_root: H256::repeat_byte(2),
                body: BeaconBlockBody::default(),
            },
            signature: SignatureBytes::default(),
        };

        assert_eq!(
            block.block_root(),
            block.message.header().tree_hash_root(),
            "a block and its header must Merkleise to the same root",
        );
    }

    #[test]
    fn signed_block_round_trips_through_ssz() {
        let block = SignedBeaconBlock {
            message: BeaconBlock {
                slot: 42,
                parent_root: H256::repeat_byte(7),
                ..BeaconBlock::default()
            },
            signature: SignatureBytes::default(),
        };

        let bytes = block.as_ssz_bytes();
        let decoded = SignedBeaconBlock::from_ssz_bytes(&bytes).expect("encoding is valid");

        assert_eq!(decoded, block);
    }
}
