use std::sync::Arc;

use anyhow::Result;
use fork_choice_control::{Controller, Wait};
use futures::{
    channel::{
        mpsc::{UnboundedReceiver, UnboundedSender},
        oneshot::{self, Sender},
    },
    stream::StreamExt as _,
};
use itertools::Itertools as _;
use log::{debug, warn};
use typenum::Unsigned as _;
use types::{beacon_state::BeaconState, consts::MaxAttesterSlashings, containers::AttesterSlashing};

use crate::{
    messages::PoolToP2pMessage,
    misc::{Origin, PoolAdditionOutcome, PoolRejectionReason},
};

pub struct AttesterSlashingPool {
    tx: UnboundedSender<PoolMessage>,
}

impl AttesterSlashingPool {
    #[must_use]
    pub fn new<W: Wait>(
        controller: Arc<Controller<W>>,
        pool_to_p2p_tx: UnboundedSender<PoolToP2pMessage>,
    ) -> (Arc<Self>, AttesterSlashingPoolService<W>) {
        let (tx, rx) = futures::channel::mpsc::unbounded();

        let pool = Arc::new(Self { tx });

        let service = AttesterSlashingPoolService {
            controller,
            attester_slashings: vec![],
            pool_to_p2p_tx,
            rx,
        };

        (pool, service)
    }

    pub fn discard_stale_attester_slashings(&self) {
        PoolMessage::DiscardStale.send(&self.tx);
    }

    pub async fn handle_external_attester_slashing(
        &self,
        attester_slashing: Box<AttesterSlashing>,
        origin: Origin,
    ) -> Result<PoolAdditionOutcome> {
        let (sender, receiver) = oneshot::channel();

        PoolMessage::HandleExternal(attester_slashing, origin, Some(sender)).send(&self.tx);

        receiver.await.map_err(Into::into)
    }

    pub fn notify_external_attester_slashing(
        &self,
        attester_slashing: Box<AttesterSlashing>,
        origin: Origin,
    ) {
        PoolMessage::HandleExternal(attester_slashing, origin, None).send(&self.tx);
    }

    /// Called with the slashings taken from a verified imported block.
    pub fn remove_included(&self, attester_slashings: Vec<AttesterSlashing>) {
        PoolMessage::RemoveIncluded(attester_slashings).send(&self.tx);
    }

    pub async fn attester_slashings_for_block(
        &self,
        state: Arc<BeaconState>,
    ) -> Result<Vec<AttesterSlashing>> {
        let (sender, receiver) = oneshot::channel();
        PoolMessage::RequestForBlock(state, sender).send(&self.tx);
        receiver.await.map_err(Into::into)
    }
}

pub struct AttesterSlashingPoolService<W: Wait> {
    controller: Arc<Controller<W>>,
    attester_slashings: Vec<AttesterSlashing>,
    pool_to_p2p_tx: UnboundedSender<PoolToP2pMessage>,
    rx: UnboundedReceiver<PoolMessage>,
}

impl<W: Wait> AttesterSlashingPoolService<W> {
    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.rx.next().await {
            let success = match message {
                PoolMessage::DiscardStale => {
                    self.discard_stale();
                    true
                }
                PoolMessage::HandleExternal(attester_slashing, origin, sender) => {
                    let outcome = self.handle_external(*attester_slashing, origin);

                    sender
                        .map(|sender| sender.send(outcome).is_ok())
                        .unwrap_or(true)
                }
                PoolMessage::RemoveIncluded(attester_slashings) => {
                    self.attester_slashings
                        .retain(|kept| !attester_slashings.contains(kept));

                    true
                }
                PoolMessage::RequestForBlock(state, sender) => sender
                    .send(self.attester_slashings_for_block(&state))
                    .is_ok(),
            };

            if !success {
                warn!("failed to send response because the receiver was dropped");
            }
        }

        Ok(())
    }

    fn handle_external(
        &mut self,
        attester_slashing: AttesterSlashing,
        origin: Origin,
    ) -> PoolAdditionOutcome {
        let outcome = self.validate(&attester_slashing);

        match &outcome {
            PoolAdditionOutcome::Accept => match origin {
                Origin::Api => {
                    PoolToP2pMessage::PublishAttesterSlashing(Box::new(attester_slashing))
                        .send(&self.pool_to_p2p_tx);
                }
                Origin::Gossip(gossip_id) => {
                    PoolToP2pMessage::Accept(gossip_id).send(&self.pool_to_p2p_tx);
                }
            },
            PoolAdditionOutcome::Ignore => {
                if let Origin::Gossip(gossip_id) = origin {
                    PoolToP2pMessage::Ignore(gossip_id).send(&self.pool_to_p2p_tx);
                }
            }
            PoolAdditionOutcome::Reject(reason, error) => {
                if let Origin::Gossip(gossip_id) = origin {
                    PoolToP2pMessage::Reject(gossip_id, *reason).send(&self.pool_to_p2p_tx);
                }

                warn!("external attester slashing rejected (error: {error})");
            }
        }

        outcome
    }

    fn validate(&mut self, attester_slashing: &AttesterSlashing) -> PoolAdditionOutcome {
        let Some(state) = self.controller.head_state() else {
            return PoolAdditionOutcome::Ignore;
        };

        if self.attester_slashings.contains(attester_slashing) {
            return PoolAdditionOutcome::Ignore;
        }

        match transition_functions::block_processing::validate_attester_slashing(
            &self.controller.chain_spec(),
            &state,
            attester_slashing,
        ) {
            Ok(_) => {
                self.attester_slashings.push(attester_slashing.clone());
                PoolAdditionOutcome::Accept
            }
            Err(error) => PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidAttesterSlashing,
                error.into(),
            ),
        }
    }

    fn attester_slashings_for_block(&self, state: &BeaconState) -> Vec<AttesterSlashing> {
        let spec = self.controller.chain_spec();

        self.attester_slashings
            .iter()
            .filter(|attester_slashing| {
                transition_functions::block_processing::validate_attester_slashing(
                    &spec,
                    state,
                    attester_slashing,
                )
                .is_ok()
            })
            .take(MaxAttesterSlashings::USIZE)
            .cloned()
            .collect_vec()
    }

    // A slashing stops being includable once every validator it covers has
    // been slashed, typically by the same slashing arriving in a block.
    fn discard_stale(&mut self) {
        let Some(state) = self.controller.head_state() else {
            return;
        };

        let spec = self.controller.chain_spec();

        self.attester_slashings.retain(|attester_slashing| {
            let valid = transition_functions::block_processing::validate_attester_slashing(
                &spec,
                &state,
                attester_slashing,
            )
            .is_ok();

            if !valid {
                debug!("discarding stale attester slashing");
            }

            valid
        });
    }
}

enum PoolMessage {
    DiscardStale,
    HandleExternal(
        Box<AttesterSlashing>,
        Origin,
        Option<Sender<PoolAdditionOutcome>>,
    ),
    RemoveIncluded(Vec<AttesterSlashing>),
    RequestForBlock(Arc<BeaconState>, Sender<Vec<AttesterSlashing>>),
}

impl PoolMessage {
    fn send(self, tx: &UnboundedSender<Self>) {
        if let Err(message) = tx.unbounded_send(self) {
            debug!("internal send failed because the receiver was dropped: {message:?}");
        }
    }
}
