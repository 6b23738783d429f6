use core::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

pub use alloy_primitives::B256 as H256;

pub type Slot = u64;
pub type Epoch = u64;
pub type CommitteeIndex = u64;
pub type ValidatorIndex = u64;
pub type Gwei = u64;
pub type UnixSeconds = u64;
pub type DepositIndex = u64;
pub type ExecutionBlockNumber = u64;
pub type ExecutionBlockHash = H256;

/// Opaque identifier assigned to a connected peer by the network service.
///
/// The transport's own peer identity never crosses into the core; the network
/// service maps between the two.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Deserialize, Serialize)]
pub struct PeerId(pub u64);

impl Display for PeerId {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        write!(formatter, "peer#{}", self.0)
    }
}
