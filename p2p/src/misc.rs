use serde::Serialize;
use strum::IntoStaticStr;
use types::{
    containers::Checkpoint,
    primitives::{Slot, H256},
};

/// Correlates a request sent to the network service with its response.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct RequestId(pub usize);

/// The handshake summary peers exchange on connection.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct StatusMessage {
    pub finalized_checkpoint: Checkpoint,
    pub head_slot: Slot,
    pub head_root: H256,
}

#[derive(Clone, Copy, Debug, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum PeerReportReason {
    RequestTimeout,
    InvalidBlock,
}
