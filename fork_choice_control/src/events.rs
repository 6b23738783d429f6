//! Events published to API consumers.
//!
//! Each event has its own typed channel handed out at wiring time. There is
//! no global event bus; a component that wants these events owns a receiver.

use futures::channel::mpsc::UnboundedSender;
use log::debug;
use serde::Serialize;
use types::{
    containers::Checkpoint,
    primitives::{Epoch, Slot, H256},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct SlotEvent {
    pub node_slot: Slot,
    pub head_slot: Slot,
    pub head_root: H256,
    pub epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub finalized_root: H256,
    pub peer_count: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct EpochEvent {
    pub epoch: Epoch,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub finalized_root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ReorgEvent {
    pub old_head: H256,
    pub new_head: H256,
    pub common_ancestor_slot: Option<Slot>,
}

/// Published instead of [`SlotEvent`] while the node is catching up.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct SyncSlotEvent {
    pub node_slot: Slot,
    pub head_root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum ApiMessage {
    Slot(SlotEvent),
    Epoch(EpochEvent),
    Reorg(ReorgEvent),
    FinalizedCheckpoint(Checkpoint),
    SyncSlot(SyncSlotEvent),
}

impl ApiMessage {
    pub fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to API failed because the receiver was dropped");
        }
    }
}
