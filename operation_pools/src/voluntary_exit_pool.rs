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
    consts::MaxVoluntaryExits,
    containers::SignedVoluntaryExit,
    primitives::ValidatorIndex,
};

use crate::{
    messages::PoolToP2pMessage,
    misc::{Origin, PoolAdditionOutcome, PoolRejectionReason},
};

pub struct VoluntaryExitPool {
    tx: UnboundedSender<PoolMessage>,
}

impl VoluntaryExitPool {
    #[must_use]
    pub fn new<W: Wait>(
        controller: Arc<Controller<W>>,
        pool_to_p2p_tx: UnboundedSender<PoolToP2pMessage>,
    ) -> (Arc<Self>, VoluntaryExitPoolService<W>) {
        let (tx, rx) = futures::channel::mpsc::unbounded();

        let pool = Arc::new(Self { tx });

        let service = VoluntaryExitPoolService {
            controller,
            voluntary_exits: HashMap::new(),
            pool_to_p2p_tx,
            rx,
        };

        (pool, service)
    }

    pub fn discard_stale_voluntary_exits(&self) {
        PoolMessage::DiscardStale.send(&self.tx);
    }

    pub async fn handle_external_voluntary_exit(
        &self,
        voluntary_exit: Box<SignedVoluntaryExit>,
        origin: Origin,
    ) -> Result<PoolAdditionOutcome> {
        let (sender, receiver) = oneshot::channel();

        PoolMessage::HandleExternal(voluntary_exit, origin, Some(sender)).send(&self.tx);

        receiver.await.map_err(Into::into)
    }

    pub fn notify_external_voluntary_exit(
        &self,
        voluntary_exit: Box<SignedVoluntaryExit>,
        origin: Origin,
    ) {
        PoolMessage::HandleExternal(voluntary_exit, origin, None).send(&self.tx);
    }

    /// Called with the exits taken from a verified imported block.
    pub fn remove_included(&self, voluntary_exits: Vec<SignedVoluntaryExit>) {
        PoolMessage::RemoveIncluded(voluntary_exits).send(&self.tx);
    }

    /// The block factory's inclusion view.
    pub async fn voluntary_exits_for_block(
        &self,
        state: Arc<BeaconState>,
    ) -> Result<Vec<SignedVoluntaryExit>> {
        let (sender, receiver) = oneshot::channel();
        PoolMessage::RequestForBlock(state, sender).send(&self.tx);
        receiver.await.map_err(Into::into)
    }
}

pub struct VoluntaryExitPoolService<W: Wait> {
    controller: Arc<Controller<W>>,
    voluntary_exits: HashMap<ValidatorIndex, SignedVoluntaryExit>,
    pool_to_p2p_tx: UnboundedSender<PoolToP2pMessage>,
    rx: UnboundedReceiver<PoolMessage>,
}

impl<W: Wait> VoluntaryExitPoolService<W> {
    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.rx.next().await {
            let success = match message {
                PoolMessage::DiscardStale => {
                    self.discard_stale();
                    true
                }
                PoolMessage::HandleExternal(voluntary_exit, origin, sender) => {
                    let outcome = self.handle_external(*voluntary_exit, origin);

                    sender
                        .map(|sender| sender.send(outcome).is_ok())
                        .unwrap_or(true)
                }
                PoolMessage::RemoveIncluded(voluntary_exits) => {
                    for voluntary_exit in voluntary_exits {
                        self.voluntary_exits
                            .remove(&voluntary_exit.message.validator_index);
                    }

                    true
                }
                PoolMessage::RequestForBlock(state, sender) => {
                    sender.send(self.voluntary_exits_for_block(&state)).is_ok()
                }
            };

            if !success {
                warn!("failed to send response because the receiver was dropped");
            }
        }

        Ok(())
    }

    fn handle_external(
        &mut self,
        voluntary_exit: SignedVoluntaryExit,
        origin: Origin,
    ) -> PoolAdditionOutcome {
        let outcome = self.validate(voluntary_exit);

        match &outcome {
            PoolAdditionOutcome::Accept => {
                match origin {
                    Origin::Api => {
                        PoolToP2pMessage::PublishVoluntaryExit(Box::new(voluntary_exit))
                            .send(&self.pool_to_p2p_tx);
                    }
                    Origin::Gossip(gossip_id) => {
                        PoolToP2pMessage::Accept(gossip_id).send(&self.pool_to_p2p_tx);
                    }
                }
            }
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
                    "external voluntary exit rejected \
                     (error: {error}, message: {voluntary_exit:?})",
                );
            }
        }

        outcome
    }

    fn validate(&mut self, voluntary_exit: SignedVoluntaryExit) -> PoolAdditionOutcome {
        let Some(state) = self.controller.head_state() else {
            return PoolAdditionOutcome::Ignore;
        };

        let validator_index = voluntary_exit.message.validator_index;

        if self.voluntary_exits.contains_key(&validator_index) {
            return PoolAdditionOutcome::Ignore;
        }

        match transition_functions::block_processing::validate_voluntary_exit(
            &self.controller.chain_spec(),
            &state,
            voluntary_exit,
        ) {
            Ok(_) => {
                self.voluntary_exits.insert(validator_index, voluntary_exit);
                PoolAdditionOutcome::Accept
            }
            Err(error) => PoolAdditionOutcome::Reject(
                PoolRejectionReason::InvalidVoluntaryExit,
                error.into(),
            ),
        }
    }

    fn voluntary_exits_for_block(&self, state: &BeaconState) -> Vec<SignedVoluntaryExit> {
        let spec = self.controller.chain_spec();

        self.voluntary_exits
            .values()
            .filter(|voluntary_exit| {
                transition_functions::block_processing::validate_voluntary_exit(
                    &spec,
                    state,
                    **voluntary_exit,
                )
                .is_ok()
            })
            .copied()
            .take(MaxVoluntaryExits::USIZE)
            .collect_vec()
    }

    // Exits that are no longer includable (typically because the validator
    // has exited through another copy of the same message) are dropped on
    // every slot.
    fn discard_stale(&mut self) {
        let Some(state) = self.controller.head_state() else {
            return;
        };

        let spec = self.controller.chain_spec();

        self.voluntary_exits.retain(|validator_index, voluntary_exit| {
            let valid = transition_functions::block_processing::validate_voluntary_exit(
                &spec,
                &state,
                *voluntary_exit,
            )
            .is_ok();

            if !valid {
                debug!("discarding stale voluntary exit for validator {validator_index}");
            }

            valid
        });
    }
}

enum PoolMessage {
    DiscardStale,
    HandleExternal(
        Box<SignedVoluntaryExit>,
        Origin,
        Option<Sender<PoolAdditionOutcome>>,
    ),
    RemoveIncluded(Vec<SignedVoluntaryExit>),
    RequestForBlock(Arc<BeaconState>, Sender<Vec<SignedVoluntaryExit>>),
}

impl PoolMessage {
    fn send(self, tx: &UnboundedSender<Self>) {
        if let Err(message) = tx.unbounded_send(self) {
            debug!("internal send failed because the receiver was dropped: {message:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_runner::AsyncRunner;
    use clock::Tick;
    use crossbeam_utils::sync::WaitGroup;
    use database::Database;
    use fork_choice_control::{initialize_from_genesis, MutatorHandle, Storage, StorageMode};
    use futures::sink::drain;
    use std_ext::ArcExt as _;
    use types::{config::ChainSpec, containers::VoluntaryExit};

    use super::*;

    const GENESIS_TIME: u64 = 1000;

    fn build_controller() -> Result<(Arc<Controller<WaitGroup>>, MutatorHandle<WaitGroup>)> {
        let spec = Arc::new(ChainSpec::minimal());
        let (block, state) = genesis::interop::quick_start(&spec, GENESIS_TIME, 64);

        let storage = Arc::new(Storage::new(
            spec.clone_arc(),
            Database::in_memory(),
            StorageMode::Prune,
        ));

        let store = initialize_from_genesis(&storage, block, state, GENESIS_TIME)?;
        let tick = Tick::at_time(&spec, GENESIS_TIME, GENESIS_TIME)?;

        Controller::new(
            store,
            storage,
            AsyncRunner::current(),
            tick,
            drain(),
            drain(),
            drain(),
            drain(),
            drain(),
        )
    }

    fn signed_exit(validator_index: u64) -> Box<SignedVoluntaryExit> {
        Box::new(SignedVoluntaryExit {
            message: VoluntaryExit {
                epoch: 0,
                validator_index,
            },
            ..SignedVoluntaryExit::default()
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn admits_deduplicates_and_removes_on_inclusion() -> Result<()> {
        let (controller, _mutator_handle) = build_controller()?;
        let (pool_to_p2p_tx, _pool_to_p2p_rx) = futures::channel::mpsc::unbounded();
        let (pool, service) = VoluntaryExitPool::new(controller.clone_arc(), pool_to_p2p_tx);

        tokio::spawn(service.run());

        let outcome = pool
            .handle_external_voluntary_exit(signed_exit(1), Origin::Api)
            .await?;
        assert!(outcome.is_publishable());

        let outcome = pool
            .handle_external_voluntary_exit(signed_exit(1), Origin::Api)
            .await?;
        assert!(matches!(outcome, PoolAdditionOutcome::Ignore));

        let state = controller.head_state().expect("head state is present");

        let included = pool.voluntary_exits_for_block(state.clone_arc()).await?;
        assert_eq!(included.len(), 1);

        pool.remove_included(included);

        let remaining = pool.voluntary_exits_for_block(state).await?;
        assert!(remaining.is_empty());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejects_exits_for_unknown_validators() -> Result<()> {
        let (controller, _mutator_handle) = build_controller()?;
        let (pool_to_p2p_tx, _pool_to_p2p_rx) = futures::channel::mpsc::unbounded();
        let (pool, service) = VoluntaryExitPool::new(controller, pool_to_p2p_tx);

        tokio::spawn(service.run());

        let outcome = pool
            .handle_external_voluntary_exit(signed_exit(1000), Origin::Api)
            .await?;

        assert!(matches!(
            outcome,
            PoolAdditionOutcome::Reject(PoolRejectionReason::InvalidVoluntaryExit, _),
        ));

        Ok(())
    }
}
