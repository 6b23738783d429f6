use core::time::Duration;
use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use fork_choice_control::{Controller, P2pMessage, SyncMessage, Wait};
use futures::{channel::mpsc::{UnboundedReceiver, UnboundedSender}, StreamExt as _};
use log::{debug, info};
use tokio::sync::watch;
use types::primitives::{PeerId, Slot, H256};

use crate::{
    messages::{P2pToSync, SyncToApi, SyncToP2p},
    misc::{RequestId, StatusMessage},
    root_requests::RootRequests,
    sync_tracker::{SyncState, SyncStateTracker},
};

const REQUEST_EXPIRY_INTERVAL: Duration = Duration::from_secs(1);
const MISSED_SLOTS_TO_TRIGGER_SYNC: u64 = 2;
const MAX_SLOTS_PER_RANGE_REQUEST: u64 = 64;

pub struct Channels {
    pub fork_choice_to_p2p_rx: UnboundedReceiver<P2pMessage>,
    pub fork_choice_to_sync_rx: UnboundedReceiver<SyncMessage>,
    pub p2p_to_sync_rx: UnboundedReceiver<P2pToSync>,
    pub sync_to_p2p_tx: UnboundedSender<SyncToP2p>,
    pub sync_to_api_tx: UnboundedSender<SyncToApi>,
}

/// Read side of the sync gate the orchestrator consults on every tick.
#[derive(Clone)]
pub struct SyncGate {
    rx: watch::Receiver<(SyncState, usize)>,
}

impl SyncGate {
    /// A gate pinned to a fixed state, for tests and tools that run without
    /// a sync service.
    #[must_use]
    pub fn detached(state: SyncState, peer_count: usize) -> Self {
        let (gate_tx, gate_rx) = watch::channel((state, peer_count));
        core::mem::forget(gate_tx);
        Self { rx: gate_rx }
    }

    #[must_use]
    pub fn is_in_sync(&self) -> bool {
        matches!(self.rx.borrow().0, SyncState::InSync)
    }

    #[must_use]
    pub fn is_catching_up(&self) -> bool {
        matches!(self.rx.borrow().0, SyncState::Syncing)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.rx.borrow().1
    }
}

pub struct BlockSyncService<W: Wait> {
    controller: Arc<Controller<W>>,
    tracker: SyncStateTracker,
    root_requests: RootRequests,
    requests_by_id: HashMap<RequestId, H256>,
    range_request_in_flight: Option<RequestId>,
    peers: HashMap<PeerId, StatusMessage>,
    next_request_id: usize,
    slot: Slot,
    startup_timeout: Duration,
    gate_tx: watch::Sender<(SyncState, usize)>,
    channels: Channels,
}

impl<W: Wait> BlockSyncService<W> {
    #[must_use]
    pub fn new(
        controller: Arc<Controller<W>>,
        target_peer_count: usize,
        startup_timeout: Duration,
        channels: Channels,
    ) -> (Self, SyncGate) {
        let (gate_tx, gate_rx) = watch::channel((SyncState::Pending, 0));

        let service = Self {
            controller,
            tracker: SyncStateTracker::new(target_peer_count),
            root_requests: RootRequests::default(),
            requests_by_id: HashMap::new(),
            range_request_in_flight: None,
            peers: HashMap::new(),
            next_request_id: 0,
            slot: 0,
            startup_timeout,
            gate_tx,
            channels,
        };

        (service, SyncGate { rx: gate_rx })
    }

    pub async fn run(mut self) -> Result<()> {
        let startup_timeout = tokio::time::sleep(self.startup_timeout);
        tokio::pin!(startup_timeout);
        let mut startup_timeout_fired = false;

        let mut expiry_interval = tokio::time::interval(REQUEST_EXPIRY_INTERVAL);
        expiry_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = &mut startup_timeout, if !startup_timeout_fired => {
                    startup_timeout_fired = true;
                    let change = self.tracker.on_startup_timeout();
                    self.publish(change);
                }
                _ = expiry_interval.tick() => {
                    self.retry_expired_requests();
                }
                message = self.channels.fork_choice_to_p2p_rx.next() => {
                    match message {
                        Some(P2pMessage::Slot(slot)) => self.on_slot(slot),
                        Some(P2pMessage::BlockNeeded(root, peer)) => {
                            self.request_block(root, peer);
                        }
                        Some(P2pMessage::FinalizedCheckpoint(checkpoint)) => {
                            let spec = self.controller.chain_spec();
                            self.root_requests
                                .prune_finalized(checkpoint.epoch_start_slot(&spec));
                        }
                        // Gossip verdicts are consumed by the network
                        // service, which shares this channel's upstream.
                        Some(
                            P2pMessage::Accept(_)
                            | P2pMessage::Ignore(_)
                            | P2pMessage::Reject(_, _),
                        ) => {}
                        Some(P2pMessage::Stop) | None => break Ok(()),
                    }
                }
                message = self.channels.fork_choice_to_sync_rx.next() => {
                    if let Some(SyncMessage::Finalized(block)) = message {
                        debug!(
                            "finalized block advanced to slot {} during sync",
                            block.slot(),
                        );
                    }
                }
                message = self.channels.p2p_to_sync_rx.next() => {
                    let Some(message) = message else { break Ok(()) };
                    self.handle_p2p_message(message);
                }
            }
        }
    }

    fn handle_p2p_message(&mut self, message: P2pToSync) {
        match message {
            P2pToSync::AddPeer(peer_id, status) => {
                self.peers.insert(peer_id, status);
                let change = self.tracker.on_peer_count(self.peers.len());
                self.publish(change);
            }
            P2pToSync::RemovePeer(peer_id) => {
                self.peers.remove(&peer_id);
                let change = self.tracker.on_peer_count(self.peers.len());
                self.publish(change);
            }
            P2pToSync::RequestedBlock(block, peer_id, request_id) => {
                self.requests_by_id.remove(&request_id);
                self.root_requests.record_received(block.block_root());
                self.controller.on_requested_block(block, Some(peer_id));
            }
            P2pToSync::BlockByRootRequestFinished(root) => {
                self.root_requests.record_received(root);
            }
            P2pToSync::BlocksByRangeRequestFinished(request_id) => {
                if self.range_request_in_flight == Some(request_id) {
                    self.range_request_in_flight = None;
                }
            }
            P2pToSync::RequestFailed(peer_id, request_id) => {
                debug!("request {request_id:?} to {peer_id} failed");

                if self.range_request_in_flight == Some(request_id) {
                    self.range_request_in_flight = None;
                }

                if let Some(root) = self.requests_by_id.remove(&request_id) {
                    self.root_requests.record_failure(root);
                    self.request_block(root, None);
                }
            }
        }
    }

    fn on_slot(&mut self, slot: Slot) {
        self.slot = slot;

        // The node is catching up whenever its head trails the wall clock by
        // more than a slot of propagation delay.
        let head_slot = self.controller.head_slot();
        let active = head_slot + MISSED_SLOTS_TO_TRIGGER_SYNC <= slot;

        let change = self.tracker.on_sync_service_status(active);
        self.publish(change);

        if active {
            self.request_block_range(head_slot + 1, slot);
        }
    }

    /// Requests the missing span of slots from one peer. One range request
    /// is in flight at a time; the next one goes out once a response or a
    /// failure closes the previous.
    fn request_block_range(&mut self, first_slot: Slot, current_slot: Slot) {
        if self.range_request_in_flight.is_some() {
            return;
        }

        let Some(peer) = self.peers.keys().next().copied() else {
            return;
        };

        let count = current_slot
            .saturating_sub(first_slot)
            .saturating_add(1)
            .min(MAX_SLOTS_PER_RANGE_REQUEST);

        let request_id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        self.range_request_in_flight = Some(request_id);

        SyncToP2p::RequestBlocksByRange(request_id, peer, first_slot, count)
            .send(&self.channels.sync_to_p2p_tx);
    }

    fn request_block(&mut self, root: H256, preferred_peer: Option<PeerId>) {
        if self.controller.contains_block(root) {
            return;
        }

        if !self.root_requests.ready_to_request(root, preferred_peer) {
            return;
        }

        let Some(peer) = preferred_peer.or_else(|| self.peers.keys().next().copied()) else {
            debug!("block {root:?} is needed but no peers are connected");
            return;
        };

        let request_id = RequestId(self.next_request_id);
        self.next_request_id += 1;

        self.root_requests.record_request(root, peer, self.slot);
        self.requests_by_id.insert(request_id, root);

        SyncToP2p::RequestBlockByRoot(request_id, peer, root).send(&self.channels.sync_to_p2p_tx);
    }

    fn retry_expired_requests(&mut self) {
        for root in self.root_requests.expired() {
            debug!("block request for {root:?} timed out");
            self.request_block(root, None);
        }
    }

    fn publish(&self, change: Option<SyncState>) {
        if let Some(state) = change {
            SyncToApi::SyncStatus(matches!(state, SyncState::InSync))
                .send(&self.channels.sync_to_api_tx);

            info!("peers: {}, sync state: {state:?}", self.peers.len());
        }

        self.gate_tx
            .send((self.tracker.state(), self.peers.len()))
            .ok();
    }
}
