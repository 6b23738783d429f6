use std::{collections::HashMap as StdHashMap, sync::Arc};

use im::HashMap;
use itertools::Itertools as _;
use log::debug;
use std_ext::ArcExt as _;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    containers::{Attestation, Checkpoint, SignedBeaconBlock},
    primitives::{Epoch, Gwei, Slot, UnixSeconds, ValidatorIndex, H256},
};

use crate::{
    error::Error,
    misc::{
        AttestationAction, BlockAction, BlockApplied, LatestMessage, PruneOutcome, TickApplied,
    },
};

/// The in-memory fork choice view.
///
/// Cloning is cheap. All collections inside are persistent maps, so a clone
/// shares almost all of its structure with the original. The mutator relies
/// on this to build each transaction on a private copy.
#[derive(Clone)]
pub struct Store {
    spec: Arc<ChainSpec>,
    genesis_time: UnixSeconds,
    // The fork choice rule does not need a precise timestamp.
    time: UnixSeconds,
    justified_checkpoint: Checkpoint,
    best_justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    blocks: HashMap<H256, Arc<SignedBeaconBlock>>,
    block_states: HashMap<H256, Arc<BeaconState>>,
    checkpoint_states: HashMap<Checkpoint, Arc<BeaconState>>,
    // Long-lived forks can theoretically have diverging validator registries,
    // but the fork choice rule only deals with validators that were known at
    // the justified checkpoint, so plain indices are unambiguous here.
    latest_messages: HashMap<ValidatorIndex, LatestMessage>,
}

impl Store {
    /// Creates a store anchored at `anchor_block`, typically the genesis
    /// block or the finalized block a restarted node resumes from.
    #[must_use]
    pub fn new(
        spec: Arc<ChainSpec>,
        anchor_block: Arc<SignedBeaconBlock>,
        anchor_state: Arc<BeaconState>,
        time: UnixSeconds,
    ) -> Self {
        let anchor_root = anchor_block.block_root();
        let genesis_time = anchor_state.genesis_time;

        let anchor_checkpoint = Checkpoint {
            epoch: spec.epoch_at_slot(anchor_block.slot()),
            root: anchor_root,
        };

        Self {
            spec,
            genesis_time,
            time: time.max(genesis_time),
            justified_checkpoint: anchor_checkpoint,
            best_justified_checkpoint: anchor_checkpoint,
            finalized_checkpoint: anchor_checkpoint,
            blocks: HashMap::unit(anchor_root, anchor_block),
            block_states: HashMap::unit(anchor_root, anchor_state.clone_arc()),
            checkpoint_states: HashMap::unit(anchor_checkpoint, anchor_state),
            latest_messages: HashMap::new(),
        }
    }

    /// Rebuilds a store from persisted parts. Latest messages are not
    /// persisted; they are repopulated by live attestations.
    #[expect(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        spec: Arc<ChainSpec>,
        genesis_time: UnixSeconds,
        time: UnixSeconds,
        justified_checkpoint: Checkpoint,
        best_justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        blocks: impl IntoIterator<Item = (H256, Arc<SignedBeaconBlock>)>,
        block_states: impl IntoIterator<Item = (H256, Arc<BeaconState>)>,
        checkpoint_states: impl IntoIterator<Item = (Checkpoint, Arc<BeaconState>)>,
    ) -> Self {
        Self {
            spec,
            genesis_time,
            time: time.max(genesis_time),
            justified_checkpoint,
            best_justified_checkpoint,
            finalized_checkpoint,
            blocks: blocks.into_iter().collect(),
            block_states: block_states.into_iter().collect(),
            checkpoint_states: checkpoint_states.into_iter().collect(),
            latest_messages: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn chain_spec(&self) -> &Arc<ChainSpec> {
        &self.spec
    }

    #[must_use]
    pub const fn genesis_time(&self) -> UnixSeconds {
        self.genesis_time
    }

    #[must_use]
    pub const fn time(&self) -> UnixSeconds {
        self.time
    }

    /// The slot implied by `Store.time`. This can run ahead of the slot the
    /// orchestrator is processing.
    #[must_use]
    pub fn slot(&self) -> Slot {
        self.spec.slot_at_time(self.time, self.genesis_time)
    }

    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        self.spec.epoch_at_slot(self.slot())
    }

    #[must_use]
    pub const fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    #[must_use]
    pub const fn best_justified_checkpoint(&self) -> Checkpoint {
        self.best_justified_checkpoint
    }

    #[must_use]
    pub const fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    #[must_use]
    pub fn finalized_slot(&self) -> Slot {
        self.finalized_checkpoint.epoch_start_slot(&self.spec)
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.blocks.contains_key(&block_root)
    }

    #[must_use]
    pub fn block(&self, block_root: H256) -> Option<&Arc<SignedBeaconBlock>> {
        self.blocks.get(&block_root)
    }

    #[must_use]
    pub fn block_state(&self, block_root: H256) -> Option<&Arc<BeaconState>> {
        self.block_states.get(&block_root)
    }

    #[must_use]
    pub fn checkpoint_state(&self, checkpoint: Checkpoint) -> Option<&Arc<BeaconState>> {
        self.checkpoint_states.get(&checkpoint)
    }

    pub fn blocks(&self) -> impl Iterator<Item = (H256, &Arc<SignedBeaconBlock>)> + '_ {
        self.blocks.iter().map(|(root, block)| (*root, block))
    }

    pub fn block_states(&self) -> impl Iterator<Item = (H256, &Arc<BeaconState>)> + '_ {
        self.block_states.iter().map(|(root, state)| (*root, state))
    }

    pub fn checkpoint_states(
        &self,
    ) -> impl Iterator<Item = (Checkpoint, &Arc<BeaconState>)> + '_ {
        self.checkpoint_states
            .iter()
            .map(|(checkpoint, state)| (*checkpoint, state))
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// `on_tick` from the fork choice rule.
    ///
    /// `Store.time` never decreases; a stale tick is dropped.
    pub fn apply_tick(&mut self, time: UnixSeconds) -> Option<TickApplied> {
        if time <= self.time {
            return None;
        }

        let previous_slot = self.slot();
        self.time = time;
        let new_slot = self.slot();

        let crossed_epoch_boundary =
            self.spec.epoch_at_slot(new_slot) > self.spec.epoch_at_slot(previous_slot);

        let mut justified_checkpoint_promoted = false;

        if crossed_epoch_boundary
            && self.best_justified_checkpoint.epoch > self.justified_checkpoint.epoch
        {
            self.justified_checkpoint = self.best_justified_checkpoint;
            justified_checkpoint_promoted = true;
        }

        Some(TickApplied {
            previous_slot,
            new_slot,
            crossed_epoch_boundary,
            justified_checkpoint_promoted,
        })
    }

    /// `on_block` up to the point of mutation.
    ///
    /// Runs the state transition, which is the expensive part, so callers may
    /// run this off the mutator thread on a snapshot and apply the result
    /// later. Applying checks the block is still addable.
    pub fn validate_block(&self, block: Arc<SignedBeaconBlock>) -> Result<BlockAction, Error> {
        let block_root = block.block_root();

        if self.blocks.contains_key(&block_root) {
            return Ok(BlockAction::Ignore);
        }

        if block.slot() <= self.finalized_slot() {
            return Ok(BlockAction::Ignore);
        }

        if block.slot() > self.slot() {
            return Ok(BlockAction::DelayUntilSlot(block));
        }

        let Some(parent_state) = self.block_states.get(&block.parent_root()) else {
            return Ok(BlockAction::DelayUntilParent(block));
        };

        let mut state = parent_state.as_ref().clone();

        transition_functions::state_transition(&self.spec, &mut state, &block)
            .map_err(Error::InvalidBlock)?;

        Ok(BlockAction::Accept(block, Arc::new(state)))
    }

    /// `on_block` past the point of validation.
    pub fn apply_block(
        &mut self,
        block: Arc<SignedBeaconBlock>,
        state: Arc<BeaconState>,
    ) -> BlockApplied {
        let block_root = block.block_root();

        self.blocks.insert(block_root, block);
        self.block_states.insert(block_root, state.clone_arc());

        let mut changes = BlockApplied {
            block_root,
            ..BlockApplied::default()
        };

        if state.current_justified_checkpoint.epoch > self.best_justified_checkpoint.epoch {
            self.best_justified_checkpoint = state.current_justified_checkpoint;
        }

        if state.finalized_checkpoint.epoch > self.finalized_checkpoint.epoch {
            self.finalized_checkpoint = state.finalized_checkpoint;
            changes.finalized_checkpoint_advanced = true;

            if state.current_justified_checkpoint.epoch > self.justified_checkpoint.epoch {
                self.justified_checkpoint = state.current_justified_checkpoint;
                changes.justified_checkpoint_updated = true;
            }

            changes.prune_outcome = Some(self.prune_finalized());
        }

        changes
    }

    /// `on_attestation` up to the point of mutation.
    ///
    /// Takes `&mut self` because validating against a target checkpoint state
    /// may require computing and caching that state first.
    pub fn validate_attestation(
        &mut self,
        attestation: Arc<Attestation>,
    ) -> Result<AttestationAction, Error> {
        let data = attestation.data;
        let target = data.target;

        // Attestations become eligible for fork choice one slot after their own.
        if self.slot() <= data.slot {
            return Ok(AttestationAction::DelayUntilSlot(attestation));
        }

        let current_epoch = self.current_epoch();

        if target.epoch > current_epoch {
            return Ok(AttestationAction::DelayUntilSlot(attestation));
        }

        let oldest_usable_epoch = current_epoch
            .saturating_sub(1)
            .max(self.finalized_checkpoint.epoch);

        if target.epoch < oldest_usable_epoch {
            return Ok(AttestationAction::Ignore);
        }

        if !self.blocks.contains_key(&target.root) {
            return Ok(AttestationAction::DelayUntilBlock(attestation, target.root));
        }

        let Some(block_slot) = self
            .blocks
            .get(&data.beacon_block_root)
            .map(|block| block.slot())
        else {
            return Ok(AttestationAction::DelayUntilBlock(
                attestation,
                data.beacon_block_root,
            ));
        };

        if block_slot > data.slot {
            return Err(Error::AttestationForBlockFromFuture {
                block_root: data.beacon_block_root,
                block_slot,
                attestation_slot: data.slot,
            });
        }

        let target_state = self.ensure_checkpoint_state(target)?;

        let attesting_indices = transition_functions::block_processing::validate_attestation(
            &self.spec,
            &target_state,
            &attestation,
        )
        .map_err(Error::InvalidAttestation)?;

        Ok(AttestationAction::Accept {
            attestation,
            attesting_indices,
        })
    }

    /// `on_attestation` past the point of validation: records latest messages.
    pub fn apply_attestation(
        &mut self,
        attestation: &Attestation,
        attesting_indices: &[ValidatorIndex],
    ) {
        let data = attestation.data;

        for validator_index in attesting_indices {
            let update = self
                .latest_messages
                .get(validator_index)
                .is_none_or(|message| message.epoch < data.target.epoch);

            if update {
                self.latest_messages.insert(
                    *validator_index,
                    LatestMessage {
                        epoch: data.target.epoch,
                        root: data.beacon_block_root,
                    },
                );
            }
        }
    }

    /// `get_head` from the fork choice rule: a weighted-GHOST walk from the
    /// justified root, following the heaviest child at every step.
    #[must_use]
    pub fn head(&self) -> H256 {
        let justified_root = self.justified_checkpoint.root;

        let balance_state = self
            .checkpoint_states
            .get(&self.justified_checkpoint)
            .or_else(|| self.block_states.get(&justified_root));

        let mut children = StdHashMap::<H256, Vec<H256>>::new();

        for (root, block) in &self.blocks {
            if *root != justified_root && self.blocks.contains_key(&block.parent_root()) {
                children.entry(block.parent_root()).or_default().push(*root);
            }
        }

        let mut head = justified_root;

        while let Some(branches) = children.get(&head) {
            head = branches
                .iter()
                .map(|root| (self.weight(balance_state, *root), *root))
                .max()
                .map(|(_, root)| root)
                .expect("children map entries are never empty");
        }

        head
    }

    /// The weight of the subtree rooted at `root`: the total effective
    /// balance of validators whose latest message supports it.
    fn weight(&self, balance_state: Option<&Arc<BeaconState>>, root: H256) -> Gwei {
        let Some(state) = balance_state else {
            return 0;
        };

        self.latest_messages
            .iter()
            .filter(|(_, message)| self.is_ancestor_of(root, message.root))
            .map(|(validator_index, _)| state.effective_balance(*validator_index))
            .sum()
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_of(&self, ancestor: H256, descendant: H256) -> bool {
        let Some(ancestor_slot) = self.blocks.get(&ancestor).map(|block| block.slot()) else {
            return false;
        };

        let mut current = descendant;

        loop {
            if current == ancestor {
                return true;
            }

            let Some(block) = self.blocks.get(&current) else {
                return false;
            };

            if block.slot() <= ancestor_slot {
                return false;
            }

            current = block.parent_root();
        }
    }

    /// The slot of the last block two branches have in common.
    #[must_use]
    pub fn common_ancestor_slot(&self, first: H256, second: H256) -> Option<Slot> {
        let mut ancestors = im::HashSet::new();
        let mut current = first;

        while let Some(block) = self.blocks.get(&current) {
            ancestors.insert(current);
            current = block.parent_root();
        }

        current = second;

        while let Some(block) = self.blocks.get(&current) {
            if ancestors.contains(&current) {
                return Some(block.slot());
            }

            current = block.parent_root();
        }

        None
    }

    /// Removes everything the new finalized checkpoint obsoletes: blocks that
    /// do not descend from the finalized block, their states, and checkpoint
    /// states from before the finalized epoch.
    fn prune_finalized(&mut self) -> PruneOutcome {
        let finalized_root = self.finalized_checkpoint.root;

        let pruned_blocks = self
            .blocks
            .iter()
            .filter(|(root, _)| !self.is_ancestor_of(finalized_root, **root))
            .map(|(root, block)| (block.slot(), *root))
            .collect_vec();

        for (_, root) in &pruned_blocks {
            self.blocks.remove(root);
            self.block_states.remove(root);
        }

        let pruned_checkpoint_states = self
            .checkpoint_states
            .keys()
            .filter(|checkpoint| checkpoint.epoch < self.finalized_checkpoint.epoch)
            .copied()
            .collect_vec();

        for checkpoint in &pruned_checkpoint_states {
            self.checkpoint_states.remove(checkpoint);
        }

        debug!(
            "pruned {} blocks and {} checkpoint states below finalized checkpoint {:?}",
            pruned_blocks.len(),
            pruned_checkpoint_states.len(),
            self.finalized_checkpoint,
        );

        PruneOutcome {
            pruned_blocks,
            pruned_checkpoint_states,
        }
    }

    fn ensure_checkpoint_state(
        &mut self,
        checkpoint: Checkpoint,
    ) -> Result<Arc<BeaconState>, Error> {
        if let Some(state) = self.checkpoint_states.get(&checkpoint) {
            return Ok(state.clone_arc());
        }

        let base = self
            .block_states
            .get(&checkpoint.root)
            .ok_or(Error::CheckpointBlockMissing {
                root: checkpoint.root,
            })?;

        let start_slot = checkpoint.epoch_start_slot(&self.spec);

        let state = if base.slot < start_slot {
            let mut state = base.as_ref().clone();

            transition_functions::process_slots(&self.spec, &mut state, start_slot)
                .expect("checkpoint start slot is ahead of the base state");

            Arc::new(state)
        } else {
            base.clone_arc()
        };

        self.checkpoint_states.insert(checkpoint, state.clone_arc());

        Ok(state)
    }

    /// Verifies the structural invariants the rest of the application relies
    /// on. Meant for tests and debug assertions; the checks are linear in the
    /// size of the store.
    pub fn check_consistency(&self) -> Result<(), String> {
        let finalized_slot = self.finalized_slot();

        if !self.blocks.contains_key(&self.finalized_checkpoint.root) {
            return Err("finalized block is not present in the store".to_owned());
        }

        for (root, block) in &self.blocks {
            let parent_present = self.blocks.contains_key(&block.parent_root());

            if !parent_present && block.slot() > finalized_slot {
                return Err(format!(
                    "block {root:?} at slot {} has no parent in the store",
                    block.slot(),
                ));
            }

            if block.slot() < finalized_slot && *root != self.finalized_checkpoint.root {
                return Err(format!(
                    "block {root:?} at slot {} should have been pruned",
                    block.slot(),
                ));
            }
        }

        for (root, state) in &self.block_states {
            let Some(block) = self.blocks.get(root) else {
                return Err(format!("state {root:?} has no matching block"));
            };

            if block.slot() != state.slot {
                return Err(format!(
                    "state slot {} does not match block slot {} at {root:?}",
                    state.slot,
                    block.slot(),
                ));
            }
        }

        if self.finalized_checkpoint.epoch > self.justified_checkpoint.epoch
            || self.justified_checkpoint.epoch > self.best_justified_checkpoint.epoch
        {
            return Err(format!(
                "checkpoint epochs are out of order: finalized {}, justified {}, best justified {}",
                self.finalized_checkpoint.epoch,
                self.justified_checkpoint.epoch,
                self.best_justified_checkpoint.epoch,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ssz_types::BitList;
    use types::containers::{Attestation, AttestationData, BeaconBlock, BeaconBlockBody};

    use super::*;

    const GENESIS_TIME: UnixSeconds = 1000;
    const VALIDATOR_COUNT: u64 = 64;

    fn genesis_store() -> (Store, H256) {
        let spec = Arc::new(ChainSpec::minimal());
        let (block, state) = genesis::interop::quick_start(&spec, GENESIS_TIME, VALIDATOR_COUNT);
        let root = block.block_root();

        (Store::new(spec, block, state, GENESIS_TIME), root)
    }

    fn advance_to_slot(store: &mut Store, slot: Slot) {
        let time = store
            .chain_spec()
            .slot_start_time(slot, store.genesis_time());

        store.apply_tick(time);
    }

    fn make_block(store: &Store, parent_root: H256, slot: Slot, fork: u8) -> Arc<SignedBeaconBlock> {
        Arc::new(SignedBeaconBlock {
            message: BeaconBlock {
                slot,
                parent_root,
                body: BeaconBlockBody {
                    graffiti: H256::repeat_byte(fork),
                    eth1_data: store
                        .block_state(parent_root)
                        .expect("parent state is present")
                        .eth1_data,
                    ..BeaconBlockBody::default()
                },
                ..BeaconBlock::default()
            },
            ..SignedBeaconBlock::default()
        })
    }

    fn import_block(store: &mut Store, block: Arc<SignedBeaconBlock>) -> BlockApplied {
        match store.validate_block(block).expect("block is valid") {
            BlockAction::Accept(block, state) => store.apply_block(block, state),
            _ => panic!("block was not accepted"),
        }
    }

    fn extend_chain(store: &mut Store, mut parent_root: H256, slots: impl Iterator<Item = Slot>) -> Vec<H256> {
        let mut roots = vec![];

        for slot in slots {
            advance_to_slot(store, slot);
            let block = make_block(store, parent_root, slot, 0);
            parent_root = block.block_root();
            roots.push(parent_root);
            import_block(store, block);
        }

        roots
    }

    #[test]
    fn time_is_monotonically_non_decreasing() {
        let (mut store, _) = genesis_store();

        advance_to_slot(&mut store, 5);
        assert_eq!(store.slot(), 5);

        assert_eq!(store.apply_tick(GENESIS_TIME), None);
        assert_eq!(store.slot(), 5);
    }

    #[test]
    fn future_block_is_delayed_until_its_slot() {
        let (mut store, genesis_root) = genesis_store();
        let block = make_block(&store, genesis_root, 1, 0);

        assert!(matches!(
            store.validate_block(block.clone()),
            Ok(BlockAction::DelayUntilSlot(_)),
        ));

        advance_to_slot(&mut store, 1);

        assert!(matches!(
            store.validate_block(block),
            Ok(BlockAction::Accept(_, _)),
        ));
    }

    #[test]
    fn orphan_block_is_delayed_until_its_parent() {
        let (mut store, _) = genesis_store();

        advance_to_slot(&mut store, 2);

        let block = Arc::new(SignedBeaconBlock {
            message: BeaconBlock {
                slot: 2,
                parent_root: H256::repeat_byte(0xab),
                ..BeaconBlock::default()
            },
            ..SignedBeaconBlock::default()
        });

        assert!(matches!(
            store.validate_block(block),
            Ok(BlockAction::DelayUntilParent(_)),
        ));
    }

    #[test]
    fn known_block_is_ignored() {
        let (mut store, genesis_root) = genesis_store();

        advance_to_slot(&mut store, 1);
        let block = make_block(&store, genesis_root, 1, 0);
        import_block(&mut store, block.clone());

        assert!(matches!(store.validate_block(block), Ok(BlockAction::Ignore)));
    }

    #[test]
    fn imported_chain_satisfies_store_invariants() {
        let (mut store, genesis_root) = genesis_store();

        extend_chain(&mut store, genesis_root, 1..=20);

        store.check_consistency().expect("store invariants hold");
        assert_eq!(store.block_count(), 21);
    }

    #[test]
    fn finalization_prunes_blocks_and_checkpoint_states() {
        let (mut store, genesis_root) = genesis_store();
        let slots_per_epoch = store.chain_spec().slots_per_epoch.get();

        // A block in every slot up to the start of epoch 2.
        let roots = extend_chain(&mut store, genesis_root, 1..=2 * slots_per_epoch);
        let epoch_2_boundary_block = roots[roots.len() - 1];

        // Replace the boundary block with one whose post-state finalizes epoch 2.
        advance_to_slot(&mut store, 2 * slots_per_epoch + 1);
        let block = make_block(&store, epoch_2_boundary_block, 2 * slots_per_epoch + 1, 0);
        let block_root = block.block_root();

        let BlockAction::Accept(block, state) =
            store.validate_block(block).expect("block is valid")
        else {
            panic!("block was not accepted");
        };

        let mut state_with_finality = state.as_ref().clone();
        state_with_finality.current_justified_checkpoint = Checkpoint {
            epoch: 2,
            root: epoch_2_boundary_block,
        };
        state_with_finality.finalized_checkpoint = Checkpoint {
            epoch: 2,
            root: epoch_2_boundary_block,
        };

        let changes = store.apply_block(block, Arc::new(state_with_finality));

        assert!(changes.finalized_checkpoint_advanced);
        assert!(changes.justified_checkpoint_updated);

        let prune_outcome = changes.prune_outcome.expect("finalization prunes");

        // Everything below the finalized slot is gone, including genesis.
        assert_eq!(
            prune_outcome.pruned_blocks.len() as u64,
            2 * slots_per_epoch,
        );
        assert!(!store.contains_block(genesis_root));
        assert!(store.contains_block(epoch_2_boundary_block));
        assert!(store.contains_block(block_root));

        // The genesis checkpoint state is removed as well.
        assert_eq!(
            prune_outcome.pruned_checkpoint_states,
            vec![Checkpoint {
                epoch: 0,
                root: genesis_root,
            }],
        );

        store.check_consistency().expect("store invariants hold");
    }

    #[test]
    fn head_follows_the_heaviest_fork() {
        let (mut store, genesis_root) = genesis_store();

        advance_to_slot(&mut store, 1);
        let common = make_block(&store, genesis_root, 1, 0);
        let common_root = common.block_root();
        import_block(&mut store, common);

        advance_to_slot(&mut store, 2);
        let light_fork = make_block(&store, common_root, 2, 1);
        let light_root = light_fork.block_root();
        import_block(&mut store, light_fork);

        let heavy_fork = make_block(&store, common_root, 2, 2);
        let heavy_root = heavy_fork.block_root();
        import_block(&mut store, heavy_fork);

        // With no votes the tie is broken by root order, deterministically.
        let unweighted_head = store.head();
        assert!(unweighted_head == light_root.max(heavy_root));

        vote(&mut store, light_root, &[0]);
        vote(&mut store, heavy_root, &[1, 2]);

        assert_eq!(store.head(), heavy_root);

        // A later vote from the same validators moves the head.
        advance_to_slot(&mut store, store.chain_spec().slots_per_epoch.get() + 1);
        vote_at_epoch(&mut store, light_root, &[1, 2], 1);

        assert_eq!(store.head(), light_root);

        assert_eq!(store.common_ancestor_slot(light_root, heavy_root), Some(1));
    }

    #[test]
    fn attestation_is_delayed_until_the_slot_after_its_own() {
        let (mut store, genesis_root) = genesis_store();

        let attestation = Arc::new(attestation_voting_for(&store, genesis_root, 0));

        assert!(matches!(
            store.validate_attestation(attestation.clone()),
            Ok(AttestationAction::DelayUntilSlot(_)),
        ));

        advance_to_slot(&mut store, 1);

        let action = store
            .validate_attestation(attestation)
            .expect("attestation is valid");

        let AttestationAction::Accept {
            attesting_indices, ..
        } = action
        else {
            panic!("attestation was not accepted");
        };

        assert_eq!(attesting_indices.len(), 1);
    }

    #[test]
    fn attestation_for_unknown_block_is_delayed_until_import() {
        let (mut store, _) = genesis_store();

        advance_to_slot(&mut store, 1);

        let mut attestation = attestation_voting_for(&store, H256::repeat_byte(0xcd), 0);
        attestation.data.beacon_block_root = H256::repeat_byte(0xcd);

        assert!(matches!(
            store.validate_attestation(Arc::new(attestation)),
            Ok(AttestationAction::DelayUntilBlock(_, root)) if root == H256::repeat_byte(0xcd),
        ));
    }

    /// A minimal valid attestation from committee 0 of slot 0 voting for
    /// `block_root` with the genesis checkpoint as target.
    fn attestation_voting_for(store: &Store, block_root: H256, position: usize) -> Attestation {
        let justified = store.justified_checkpoint();

        let committee_size = transition_functions::accessors::beacon_committee(
            store
                .checkpoint_state(justified)
                .expect("anchor checkpoint state is present"),
            store.chain_spec(),
            0,
            0,
        )
        .expect("committee 0 exists")
        .len();

        let mut aggregation_bits =
            BitList::with_capacity(committee_size).expect("committee size is within bounds");
        aggregation_bits
            .set(position, true)
            .expect("position is within the committee");

        Attestation {
            aggregation_bits,
            data: AttestationData {
                slot: 0,
                index: 0,
                beacon_block_root: block_root,
                source: Checkpoint::default(),
                target: justified,
            },
            signature: Default::default(),
        }
    }

    fn vote(store: &mut Store, block_root: H256, validators: &[ValidatorIndex]) {
        vote_at_epoch(store, block_root, validators, 0);
    }

    fn vote_at_epoch(
        store: &mut Store,
        block_root: H256,
        validators: &[ValidatorIndex],
        epoch: Epoch,
    ) {
        let attestation = Attestation {
            aggregation_bits: BitList::with_capacity(1).expect("length 1 is within bounds"),
            data: AttestationData {
                beacon_block_root: block_root,
                target: Checkpoint {
                    epoch,
                    root: block_root,
                },
                ..AttestationData::default()
            },
            signature: Default::default(),
        };

        store.apply_attestation(&attestation, validators);
    }
}
