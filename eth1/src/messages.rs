use ssz_derive::{Decode, Encode};
use types::{
    containers::DepositData,
    primitives::{DepositIndex, ExecutionBlockNumber, UnixSeconds, H256},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Encode, Decode)]
pub struct Eth1Block {
    pub hash: H256,
    pub number: ExecutionBlockNumber,
    pub timestamp: UnixSeconds,
    pub deposit_count: DepositIndex,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Encode, Decode)]
pub struct DepositEvent {
    pub index: DepositIndex,
    pub data: DepositData,
}

/// Messages from the Eth1 follower.
#[derive(Clone, Debug)]
pub enum Eth1Event {
    /// The earliest block whose timestamp satisfies the minimum genesis time.
    MinGenesisTimeBlock(Eth1Block),
    DepositsFromBlock {
        block: Eth1Block,
        deposits: Vec<DepositEvent>,
    },
}
