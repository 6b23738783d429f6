use std::sync::{mpsc::Sender, Arc};

use clock::Tick;
use fork_choice_store::{
    AttestationOrigin, BlockAction, BlockOrigin, Error as StoreError, GossipId,
};
use log::debug;
use serde::Serialize;
use strum::IntoStaticStr;
use types::{
    containers::{Attestation, Checkpoint, SignedBeaconBlock},
    primitives::{PeerId, Slot, H256},
};

use crate::unbounded_sink::UnboundedSink;

pub enum MutatorMessage<W> {
    Tick {
        wait_group: W,
        tick: Tick,
    },
    Block {
        wait_group: W,
        result: Result<BlockAction, StoreError>,
        origin: BlockOrigin,
    },
    Attestation {
        wait_group: W,
        attestation: Arc<Attestation>,
        origin: AttestationOrigin,
    },
    // Dropping `Controller.mutator_tx` is not enough to stop the mutator
    // thread because tasks hold their own senders for reporting results.
    Stop {
        save_to_storage: bool,
    },
}

impl<W> MutatorMessage<W> {
    pub(crate) fn send(self, tx: &Sender<Self>) {
        // Don't log the value because it can contain entire `BeaconState`s.
        if tx.send(self).is_err() {
            // This can happen if the mutator thread exits early due to
            // failure or if a task completes after the `Controller` is
            // dropped and stops the mutator thread.
            debug!("send to mutator failed because the receiver was dropped");
        }
    }
}

#[derive(Clone, Copy, Debug, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum MutatorRejectionReason {
    InvalidBlock,
    InvalidAttestation,
}

#[derive(Debug, Serialize)]
pub enum P2pMessage {
    Slot(Slot),
    Accept(GossipId),
    Ignore(GossipId),
    Reject(GossipId, MutatorRejectionReason),
    BlockNeeded(H256, Option<PeerId>),
    FinalizedCheckpoint(Checkpoint),
    Stop,
}

impl P2pMessage {
    pub fn send(self, tx: &impl UnboundedSink<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to p2p failed because the receiver was dropped");
        }
    }
}

pub enum PoolMessage {
    Slot(Slot),
    ValidAttestation(Arc<Attestation>),
    ImportedBlock(Arc<SignedBeaconBlock>),
    FinalizedCheckpoint(Checkpoint),
    Stop,
}

impl PoolMessage {
    pub fn send(self, tx: &impl UnboundedSink<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to operation pools failed because the receiver was dropped");
        }
    }
}

pub enum ValidatorMessage<W> {
    Tick(W, Tick),
    Head(W, H256),
    ValidAttestation(W, Arc<Attestation>),
    BroadcastAttestation(H256, Slot),
    BroadcastAggregates(Slot),
    Stop,
}

impl<W> ValidatorMessage<W> {
    pub fn send(self, tx: &impl UnboundedSink<Self>) {
        // Don't log the value because it can contain entire `BeaconState`s.
        if tx.unbounded_send(self).is_err() {
            debug!("send to validator failed because the receiver was dropped");
        }
    }
}

#[derive(Debug, Serialize)]
pub enum SyncMessage {
    Finalized(Arc<SignedBeaconBlock>),
}

impl SyncMessage {
    pub fn send(self, tx: &impl UnboundedSink<Self>) {
        if let Err(message) = tx.unbounded_send(self) {
            debug!(
                "send to block sync service failed because the receiver was dropped: {message:?}"
            );
        }
    }
}
