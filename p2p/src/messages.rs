use std::sync::Arc;

use futures::channel::mpsc::UnboundedSender;
use log::debug;
use types::{
    containers::SignedBeaconBlock,
    primitives::{PeerId, Slot, H256},
};

use crate::misc::{PeerReportReason, RequestId, StatusMessage};

pub enum P2pToSync {
    AddPeer(PeerId, StatusMessage),
    RemovePeer(PeerId),
    RequestedBlock(Arc<SignedBeaconBlock>, PeerId, RequestId),
    BlockByRootRequestFinished(H256),
    BlocksByRangeRequestFinished(RequestId),
    RequestFailed(PeerId, RequestId),
}

impl P2pToSync {
    pub fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to block sync service failed because the receiver was dropped");
        }
    }
}

#[derive(Debug)]
pub enum SyncToP2p {
    RequestBlockByRoot(RequestId, PeerId, H256),
    RequestBlocksByRange(RequestId, PeerId, Slot, u64),
    ReportPeer(PeerId, PeerReportReason),
}

impl SyncToP2p {
    pub fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to p2p failed because the receiver was dropped");
        }
    }
}

pub enum SyncToApi {
    SyncStatus(bool),
}

impl SyncToApi {
    pub fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to HTTP API failed because the receiver was dropped");
        }
    }
}
