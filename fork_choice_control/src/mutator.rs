// `Mutator::run` is executed in a background thread and performs all
// mutations on a uniquely owned copy of `Store` as an alternative to locking.
//
// Each message handler builds a transaction: a private clone of the store
// plus the `StoreUpdate` describing what changed. Committing writes the
// update durably, swaps the clone into the shared snapshot and only then
// publishes notifications. A commit failure leaves the snapshot untouched
// and stops the thread, which the controller side surfaces as a fatal error.

use core::mem;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        mpsc::{Receiver, Sender},
        Arc,
    },
};

use anyhow::{Context as _, Result};
use arc_swap::ArcSwap;
use clock::Tick;
use fork_choice_store::{
    AttestationAction, AttestationOrigin, BlockAction, BlockOrigin, Error as StoreError, Store,
};
use log::{debug, warn};
use std_ext::ArcExt as _;
use types::{
    beacon_state::BeaconState,
    containers::{Attestation, Checkpoint, SignedBeaconBlock},
    primitives::{Slot, H256},
};

use crate::{
    events::{ApiMessage, ReorgEvent},
    messages::{
        MutatorMessage, MutatorRejectionReason, P2pMessage, PoolMessage, SyncMessage,
        ValidatorMessage,
    },
    misc::{Delayed, PendingAttestation, PendingBlock},
    storage::{Storage, StoreUpdate},
    unbounded_sink::UnboundedSink,
    wait::Wait,
};

pub struct Mutator<W, PS, LS, SS, VS, AS> {
    store: Arc<Store>,
    store_snapshot: Arc<ArcSwap<Store>>,
    storage: Arc<Storage>,
    head: H256,
    delayed_until_block: HashMap<H256, Delayed>,
    // We previously considered ignoring objects that would have to be
    // delayed more than one slot. That would make the node stop syncing
    // whenever it lags by more than a slot, so anything up to the finalized
    // slot is kept.
    delayed_until_slot: BTreeMap<Slot, Delayed>,
    mutator_rx: Receiver<MutatorMessage<W>>,
    p2p_tx: PS,
    pool_tx: LS,
    sync_tx: SS,
    validator_tx: VS,
    api_tx: AS,
}

impl<W, PS, LS, SS, VS, AS> Mutator<W, PS, LS, SS, VS, AS>
where
    W: Wait,
    PS: UnboundedSink<P2pMessage>,
    LS: UnboundedSink<PoolMessage>,
    SS: UnboundedSink<SyncMessage>,
    VS: UnboundedSink<ValidatorMessage<W>>,
    AS: UnboundedSink<ApiMessage>,
{
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        store_snapshot: Arc<ArcSwap<Store>>,
        storage: Arc<Storage>,
        mutator_rx: Receiver<MutatorMessage<W>>,
        p2p_tx: PS,
        pool_tx: LS,
        sync_tx: SS,
        validator_tx: VS,
        api_tx: AS,
    ) -> Self {
        let store = store_snapshot.load_full();
        let head = store.head();

        Self {
            store,
            store_snapshot,
            storage,
            head,
            delayed_until_block: HashMap::new(),
            delayed_until_slot: BTreeMap::new(),
            mutator_rx,
            p2p_tx,
            pool_tx,
            sync_tx,
            validator_tx,
            api_tx,
        }
    }

    pub fn run(mut self) -> Result<()> {
        loop {
            match self
                .mutator_rx
                .recv()
                .expect("sender in Controller is not dropped until mutator thread exits")
            {
                MutatorMessage::Tick { wait_group, tick } => self.handle_tick(&wait_group, tick)?,
                MutatorMessage::Block {
                    wait_group,
                    result,
                    origin,
                } => self.handle_block(&wait_group, result, origin)?,
                MutatorMessage::Attestation {
                    wait_group,
                    attestation,
                    origin,
                } => self.handle_attestation(&wait_group, attestation, origin)?,
                MutatorMessage::Stop { save_to_storage } => {
                    if save_to_storage {
                        self.save_checkpoints()?;
                    }

                    break Ok(());
                }
            }
        }
    }

    fn handle_tick(&mut self, wait_group: &W, tick: Tick) -> Result<()> {
        let spec = self.store.chain_spec();
        let time = tick.time(spec, self.store.genesis_time());

        let mut transaction = (*self.store).clone();

        let Some(changes) = transaction.apply_tick(time) else {
            return Ok(());
        };

        let mut update = StoreUpdate::default();

        if changes.justified_checkpoint_promoted {
            update.justified_checkpoint = Some(transaction.justified_checkpoint());
        }

        self.commit(transaction, update)?;

        if changes.new_slot > changes.previous_slot {
            P2pMessage::Slot(changes.new_slot).send(&self.p2p_tx);

            let not_yet_due = self.delayed_until_slot.split_off(&(changes.new_slot + 1));
            let due = mem::replace(&mut self.delayed_until_slot, not_yet_due);

            for (_, delayed) in due {
                self.retry_delayed(wait_group, delayed)?;
            }
        }

        Ok(())
    }

    fn handle_block(
        &mut self,
        wait_group: &W,
        result: Result<BlockAction, StoreError>,
        origin: BlockOrigin,
    ) -> Result<()> {
        match result {
            Ok(BlockAction::Accept(block, state)) => {
                self.accept_block(wait_group, block, state, origin)?;
            }
            Ok(BlockAction::Ignore) => {
                if let Some(gossip_id) = origin.gossip_id() {
                    P2pMessage::Ignore(gossip_id).send(&self.p2p_tx);
                }
            }
            Ok(BlockAction::DelayUntilParent(block)) => {
                debug!("block delayed until parent: {:?}", block.parent_root());

                P2pMessage::BlockNeeded(block.parent_root(), origin.peer_id()).send(&self.p2p_tx);

                self.delayed_until_block
                    .entry(block.parent_root())
                    .or_default()
                    .blocks
                    .push(PendingBlock {
                        block,
                        origin,
                        submission_time: std::time::Instant::now(),
                    });
            }
            Ok(BlockAction::DelayUntilSlot(block)) => {
                debug!("block delayed until slot {}", block.slot());

                self.delayed_until_slot
                    .entry(block.slot())
                    .or_default()
                    .blocks
                    .push(PendingBlock {
                        block,
                        origin,
                        submission_time: std::time::Instant::now(),
                    });
            }
            Err(error) => {
                warn!("block rejected (origin: {}): {error:#}", origin.as_ref());

                if let Some(gossip_id) = origin.gossip_id() {
                    P2pMessage::Reject(gossip_id, MutatorRejectionReason::InvalidBlock)
                        .send(&self.p2p_tx);
                }
            }
        }

        Ok(())
    }

    fn accept_block(
        &mut self,
        wait_group: &W,
        block: Arc<SignedBeaconBlock>,
        state: Arc<BeaconState>,
        origin: BlockOrigin,
    ) -> Result<()> {
        let block_root = block.block_root();

        // The same block may have been validated concurrently from several
        // sources. The first copy to arrive wins.
        if self.store.contains_block(block_root) {
            if let Some(gossip_id) = origin.gossip_id() {
                P2pMessage::Ignore(gossip_id).send(&self.p2p_tx);
            }

            return Ok(());
        }

        // Validation ran against a snapshot that may predate a finalization
        // commit. Re-check the conditions that commit can invalidate.
        if block.slot() <= self.store.finalized_slot() {
            if let Some(gossip_id) = origin.gossip_id() {
                P2pMessage::Ignore(gossip_id).send(&self.p2p_tx);
            }

            return Ok(());
        }

        if !self.store.contains_block(block.parent_root()) {
            let result = self.store.validate_block(block);
            return self.handle_block(wait_group, result, origin);
        }

        let mut transaction = (*self.store).clone();
        let changes = transaction.apply_block(block.clone_arc(), state.clone_arc());

        let mut update = StoreUpdate {
            blocks: vec![(block_root, block.clone_arc())],
            block_states: vec![(block_root, state)],
            ..StoreUpdate::default()
        };

        // Attestations carried in the block go through the same processing
        // as gossiped ones, inside the same transaction.
        let mut accepted_attestations = vec![];

        for attestation in &block.message.body.attestations {
            let attestation = Arc::new(attestation.clone());

            match transaction.validate_attestation(attestation) {
                Ok(AttestationAction::Accept {
                    attestation,
                    attesting_indices,
                }) => {
                    transaction.apply_attestation(&attestation, &attesting_indices);
                    accepted_attestations.push(attestation);
                }
                Ok(AttestationAction::DelayUntilBlock(attestation, root)) => {
                    self.delay_attestation_until_block(attestation, root, AttestationOrigin::Block);
                }
                Ok(AttestationAction::DelayUntilSlot(attestation)) => {
                    self.delay_attestation_until_slot(attestation, AttestationOrigin::Block);
                }
                Ok(AttestationAction::Ignore) => {}
                Err(error) => {
                    debug!("attestation in block {block_root:?} ignored: {error:#}");
                }
            }
        }

        self.record_checkpoint_changes(&transaction, &mut update);

        if let Some(prune_outcome) = changes.prune_outcome {
            let archive = self.storage.storage_mode().is_archive();
            let old_finalized = self.store.finalized_checkpoint();
            let finalized = transaction.finalized_checkpoint();

            let finalized_block = transaction
                .block(finalized.root)
                .expect("finalized block is kept through pruning")
                .clone_arc();

            update.finalized_blocks.push((
                finalized_block.slot(),
                finalized.root,
                finalized_block,
                transaction.block_state(finalized.root).cloned(),
            ));

            if archive {
                // Pruned ancestors of the new finalized block move into the
                // finalized keyspace instead of disappearing. The pre-commit
                // store still holds them.
                for (slot, root) in &prune_outcome.pruned_blocks {
                    if !self.store.is_ancestor_of(*root, finalized.root) {
                        continue;
                    }

                    let block = self
                        .store
                        .block(*root)
                        .expect("pruned blocks come from the pre-commit store")
                        .clone_arc();

                    update.finalized_blocks.push((
                        *slot,
                        *root,
                        block,
                        self.store.block_state(*root).cloned(),
                    ));
                }
            } else {
                update.pruned_finalized_states.push(old_finalized.root);
            }

            update.pruned_blocks = prune_outcome.pruned_blocks;
            update.pruned_checkpoint_states = prune_outcome.pruned_checkpoint_states;
        }

        let finalized_advanced = changes.finalized_checkpoint_advanced;

        self.commit(transaction, update)?;

        if let Some(gossip_id) = origin.gossip_id() {
            P2pMessage::Accept(gossip_id).send(&self.p2p_tx);
        }

        PoolMessage::ImportedBlock(block.clone_arc()).send(&self.pool_tx);

        for attestation in accepted_attestations {
            PoolMessage::ValidAttestation(attestation.clone_arc()).send(&self.pool_tx);
            ValidatorMessage::ValidAttestation(wait_group.clone(), attestation)
                .send(&self.validator_tx);
        }

        self.update_head(wait_group);

        if finalized_advanced {
            self.notify_finalized()?;
        }

        if let Some(delayed) = self.delayed_until_block.remove(&block_root) {
            self.retry_delayed(wait_group, delayed)?;
        }

        Ok(())
    }

    fn handle_attestation(
        &mut self,
        wait_group: &W,
        attestation: Arc<Attestation>,
        origin: AttestationOrigin,
    ) -> Result<()> {
        let mut transaction = (*self.store).clone();

        match transaction.validate_attestation(attestation) {
            Ok(AttestationAction::Accept {
                attestation,
                attesting_indices,
            }) => {
                transaction.apply_attestation(&attestation, &attesting_indices);

                let mut update = StoreUpdate::default();
                self.record_checkpoint_changes(&transaction, &mut update);
                self.commit(transaction, update)?;

                if let Some(gossip_id) = origin.gossip_id() {
                    P2pMessage::Accept(gossip_id).send(&self.p2p_tx);
                }

                PoolMessage::ValidAttestation(attestation.clone_arc()).send(&self.pool_tx);
                ValidatorMessage::ValidAttestation(wait_group.clone(), attestation)
                    .send(&self.validator_tx);

                self.update_head(wait_group);
            }
            Ok(AttestationAction::Ignore) => {
                if let Some(gossip_id) = origin.gossip_id() {
                    P2pMessage::Ignore(gossip_id).send(&self.p2p_tx);
                }
            }
            Ok(AttestationAction::DelayUntilBlock(attestation, root)) => {
                P2pMessage::BlockNeeded(root, origin.gossip_id().map(|gossip_id| gossip_id.source))
                    .send(&self.p2p_tx);

                self.delay_attestation_until_block(attestation, root, origin);
            }
            Ok(AttestationAction::DelayUntilSlot(attestation)) => {
                self.delay_attestation_until_slot(attestation, origin);
            }
            Err(error) => {
                debug!("attestation rejected (origin: {}): {error:#}", origin.as_ref());

                if let Some(gossip_id) = origin.gossip_id() {
                    P2pMessage::Reject(gossip_id, MutatorRejectionReason::InvalidAttestation)
                        .send(&self.p2p_tx);
                }
            }
        }

        Ok(())
    }

    fn delay_attestation_until_block(
        &mut self,
        attestation: Arc<Attestation>,
        block_root: H256,
        origin: AttestationOrigin,
    ) {
        self.delayed_until_block
            .entry(block_root)
            .or_default()
            .attestations
            .push(PendingAttestation {
                attestation,
                origin,
            });
    }

    fn delay_attestation_until_slot(
        &mut self,
        attestation: Arc<Attestation>,
        origin: AttestationOrigin,
    ) {
        let spec = self.store.chain_spec();

        // Eligible one slot after its own, or at its target epoch, whichever
        // comes later.
        let earliest_slot = (attestation.data.slot + 1)
            .max(spec.start_slot_at_epoch(attestation.data.target.epoch));

        self.delayed_until_slot
            .entry(earliest_slot)
            .or_default()
            .attestations
            .push(PendingAttestation {
                attestation,
                origin,
            });
    }

    fn retry_delayed(&mut self, wait_group: &W, delayed: Delayed) -> Result<()> {
        let Delayed {
            blocks,
            attestations,
        } = delayed;

        for PendingBlock {
            block,
            origin,
            submission_time,
        } in blocks
        {
            // Retried blocks are validated on the mutator thread. They have
            // already waited at least one message round; revalidating them
            // here keeps the flush within a single import.
            debug!(
                "retrying block delayed for {:?} (slot: {})",
                submission_time.elapsed(),
                block.slot(),
            );

            let result = self.store.validate_block(block);
            self.handle_block(wait_group, result, origin)?;
        }

        for PendingAttestation {
            attestation,
            origin,
        } in attestations
        {
            self.handle_attestation(wait_group, attestation, origin)?;
        }

        Ok(())
    }

    fn record_checkpoint_changes(&self, transaction: &Store, update: &mut StoreUpdate) {
        if transaction.justified_checkpoint() != self.store.justified_checkpoint() {
            update.justified_checkpoint = Some(transaction.justified_checkpoint());
        }

        if transaction.best_justified_checkpoint() != self.store.best_justified_checkpoint() {
            update.best_justified_checkpoint = Some(transaction.best_justified_checkpoint());
        }

        if transaction.finalized_checkpoint() != self.store.finalized_checkpoint() {
            update.finalized_checkpoint = Some(transaction.finalized_checkpoint());
        }

        update.checkpoint_states = transaction
            .checkpoint_states()
            .filter(|(checkpoint, _)| self.store.checkpoint_state(*checkpoint).is_none())
            .map(|(checkpoint, state)| (checkpoint, state.clone_arc()))
            .collect();
    }

    fn update_head(&mut self, wait_group: &W) {
        let new_head = self.store.head();

        if new_head == self.head {
            return;
        }

        let old_head = mem::replace(&mut self.head, new_head);

        ValidatorMessage::Head(wait_group.clone(), new_head).send(&self.validator_tx);

        if !self.store.is_ancestor_of(old_head, new_head) {
            ApiMessage::Reorg(ReorgEvent {
                old_head,
                new_head,
                common_ancestor_slot: self.store.common_ancestor_slot(old_head, new_head),
            })
            .send(&self.api_tx);
        }
    }

    fn notify_finalized(&mut self) -> Result<()> {
        let finalized = self.store.finalized_checkpoint();

        let finalized_block = self
            .store
            .block(finalized.root)
            .expect("finalized block is kept through pruning")
            .clone_arc();

        ApiMessage::FinalizedCheckpoint(finalized).send(&self.api_tx);
        P2pMessage::FinalizedCheckpoint(finalized).send(&self.p2p_tx);
        PoolMessage::FinalizedCheckpoint(finalized).send(&self.pool_tx);
        SyncMessage::Finalized(finalized_block).send(&self.sync_tx);

        self.prune_delayed(finalized);

        Ok(())
    }

    // Pending objects expire when finality passes their slot.
    fn prune_delayed(&mut self, finalized: Checkpoint) {
        let spec = self.store.chain_spec();
        let finalized_slot = finalized.epoch_start_slot(spec);

        self.delayed_until_slot = self.delayed_until_slot.split_off(&(finalized_slot + 1));

        self.delayed_until_block.retain(|_, delayed| {
            delayed.blocks.retain(|pending| pending.block.slot() > finalized_slot);

            delayed
                .attestations
                .retain(|pending| pending.attestation.data.target.epoch >= finalized.epoch);

            !delayed.is_empty()
        });
    }

    fn commit(&mut self, transaction: Store, update: StoreUpdate) -> Result<()> {
        if !update.is_empty() {
            self.storage
                .apply_update(update)
                .context("store commit failed")?;
        }

        let new_store = Arc::new(transaction);
        self.store = new_store.clone_arc();
        self.store_snapshot.store(new_store);

        Ok(())
    }

    fn save_checkpoints(&self) -> Result<()> {
        self.storage.apply_update(StoreUpdate {
            justified_checkpoint: Some(self.store.justified_checkpoint()),
            best_justified_checkpoint: Some(self.store.best_justified_checkpoint()),
            finalized_checkpoint: Some(self.store.finalized_checkpoint()),
            ..StoreUpdate::default()
        })
    }
}

pub(crate) fn send_stop<W>(tx: &Sender<MutatorMessage<W>>, save_to_storage: bool) {
    MutatorMessage::Stop { save_to_storage }.send(tx);
}
