use std::{collections::HashMap, sync::Arc};

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
use types::{
    beacon_state::BeaconState,
    consts::MaxProposerSlashings,
    containers::ProposerSlashing,
    primitives::ValidatorIndex,
};

use crate::{
    messages::PoolToP2pMessage,
    misc::{Origin, PoolAdditionOutcome, PoolRejectionReason},
};

pub struct ProposerSlashingPool {
    tx: UnboundedSender<PoolMessage>,
}

impl ProposerSlashingPool {
    #[must_use]
    pub fn new<W: Wait>(
        controller: Arc<Controller<W>>,
        pool_to_p2p_tx: UnboundedSender<PoolToP2pMessage>,
    ) -> (Arc<Self>, ProposerSlashingPoolService<W>) {
        let (tx, rx) = futures::channel::mpsc::unbounded();

        let pool = Arc::new(Self { tx });

        let service = ProposerSlashingPoolService {
            controller,
            proposer_slashings: HashMap::new(),
            pool_to_p2p_tx,
            rx,
        };

        (pool, service)
    }

    pub fn discard_stale_proposer_slashings(&self) {
        PoolMessage::DiscardStale.send(&self.tx);
    }

    pub async fn handle_external_proposer_slashing(
        &self,
        proposer_slashing: Box<ProposerSlashing>,
        origin: Origin,
    ) -> Result<PoolAdditionOutcome> {
        let (sender, receiver) = oneshot::channel();

        PoolMessage::HandleExternal(proposer_slashing, origin, Some(sender)).send(&self.tx);

        receiver.await.map_err(Into::into)
    }

    pub fn notify_external_proposer_slashing(
        &self,
        proposer_slashing: Box<ProposerSlashing>,
        origin: Origin,
    ) {
        PoolMessage::HandleExternal(proposer_slashing, origin, None).send(&self.tx);
    }

    /// Called with the slashings taken from a verified imported block.
    pub fn remove_included(&self, proposer_slashings: Vec<ProposerSlashing>) {
        PoolMessage::RemoveIncluded(proposer_slashings).send(&self.tx);
    }

    pub async fn proposer_slashings_for_block(
        &self,
        state: Arc<BeaconState>,
    ) -> Result<Vec<ProposerSlashing>> {
        let (sender, receiver) = oneshot::channel();
        PoolMessage::RequestForBlock(state, sender).send(&self.tx);
        receiver.await.map_err(Into::into)
    }
}

pub struct ProposerSlashingPoolService<W: Wait> {
    controller: Arc<Controller<W>>,
    proposer_slashings: HashMap<ValidatorIndex, ProposerSlashing>,
    pool_to_p2p_tx: UnboundedSender<PoolToP2pMessage>,
    rx: UnboundedReceiver<PoolMessage>,
}

impl<W: Wait> ProposerSlashingPoolService<W> {
    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.rx.next().await {
            let success = match message {
                PoolMessage::DiscardStale => {
                    self.discard_stale();
                    true
                }
                PoolMessage::HandleExternal(proposer_slashing, origin, sender) => {
                    let outcome = self.handle_external(*proposer_slashing, origin);

                    sender
                        .map(|sender| sender.send(outcome).is_ok())
                        .unwrap_or(true)
                }
                PoolMessage::RemoveIncluded(proposer_slashings) => {
                    for proposer_slashing in proposer_slashings {
                        self.proposer_slashings
                            .remove(&proposer_slashing.proposer_index());
                    }

                    true
                }
                PoolMessage::RequestForBlock(state, sender) => sender
                    .send(self.proposer_slashings_for_block(&state))
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
        proposer_slashing: ProposerSlashing,
        origin: Origin,
    ) -> PoolAdditionOutcome {
        let outcome = self.validate(proposer_slashing);

        match &outcome {
            PoolAdditionOutcome::Accept => match origin {
                Origin::Api => {
                    PoolToP2pMessage::PublishProposerSlashing(Box::new(proposer_slashing))
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

                warn!(
                    "external proposer slashing rejected \
                     (error: {error}, message: {proposer_slashing:?})",
                );
            }
        }

        outcome
    }

    fn validate(&mut self, proposer_slashing: ProposerSlashing) -> PoolAdditionOutcome {
        let Some(state) = self.controller.head_state() else {
            return PoolAdditionOutcome::Ignore;
        };

        if self
            .proposer_slashings
            .contains_key(&proposer_slashing.proposer_index())
        {
            return PoolAdditionOutcome::Ignore;
        }

        match transition_functions::block_processing::validate_proposer_slashing(
            &self.controller.chain_spec(),
            &state,
            proposer_slashing,
        ) {
            Ok(proposer_index) => {
                self.proposer_slashings
                    .insert(proposer_index, proposer_slashing);
                PoolAdditionOutcome::Accept
            }
            Err(error) => PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidProposerSlashing,
                error.into(),
            ),
        }
    }

    fn proposer_slashings_for_block(&self, state: &BeaconState) -> Vec<ProposerSlashing> {
        let spec = self.controller.chain_spec();

        self.proposer_slashings
            .values()
            .filter(|proposer_slashing| {
                transition_functions::block_processing::validate_proposer_slashing(
                    &spec,
                    state,
                    **proposer_slashing,
                )
                .is_ok()
            })
            .copied()
            .take(MaxProposerSlashings::USIZE)
            .collect_vec()
    }

    fn discard_stale(&mut self) {
        let Some(state) = self.controller.head_state() else {
            return;
        };

        let spec = self.controller.chain_spec();

        self.proposer_slashings.retain(|proposer_index, proposer_slashing| {
            let valid = transition_functions::block_processing::validate_proposer_slashing(
                &spec,
                &state,
                *proposer_slashing,
            )
            .is_ok();

            if !valid {
                debug!("discarding stale proposer slashing for proposer {proposer_index}");
            }

            valid
        });
    }
}

enum PoolMessage {
    DiscardStale,
    HandleExternal(
        Box<ProposerSlashing>,
        Origin,
        Option<Sender<PoolAdditionOutcome>>,
    ),
    RemoveIncluded(Vec<ProposerSlashing>),
    RequestForBlock(Arc<BeaconState>, Sender<Vec<ProposerSlashing>>),
}

impl PoolMessage {
    fn send(self, tx: &UnboundedSender<Self>) {
        if let Err(message) = tx.unbounded_send(self) {
            debug!("internal send failed because the receiver was dropped: {message:?}");
        }
    }
}
