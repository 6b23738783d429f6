// Instead of mutating `Store` directly, the `on_*` methods send messages or
// spawn tasks that do so in the background. Query methods operate on a recent
// but potentially out-of-date snapshot of `Store`. This accomplishes 3 things:
// - Independent blocks can be validated in parallel.
// - Query methods do not need to wait.
// - The `on_*` methods return quickly and can thus be called from `async`
//   tasks.

use core::{mem, panic::AssertUnwindSafe};
use std::{
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::Builder,
};

use anyhow::{Context as _, Result};
use arc_swap::{ArcSwap, Guard};
use async_runner::AsyncRunner;
use clock::Tick;
use crossbeam_utils::sync::WaitGroup;
use fork_choice_store::{AttestationOrigin, BlockOrigin, GossipId, Store};
use std_ext::ArcExt as _;
use thiserror::Error;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    containers::{Attestation, Checkpoint, SignedBeaconBlock},
    primitives::{PeerId, Slot, UnixSeconds, H256},
};

use crate::{
    events::ApiMessage,
    messages::{MutatorMessage, P2pMessage, PoolMessage, SyncMessage, ValidatorMessage},
    mutator::{send_stop, Mutator},
    storage::Storage,
    tasks::BlockTask,
    unbounded_sink::UnboundedSink,
    wait::Wait,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("mutator panicked")]
    MutatorPanicked,
    #[error("mutator failed")]
    MutatorFailed,
}

pub struct Controller<W: Wait> {
    // The latest consistent snapshot of the store.
    store_snapshot: Arc<ArcSwap<Store>>,
    storage: Arc<Storage>,
    runner: AsyncRunner,
    wait_group: W::Swappable,
    mutator_tx: Sender<MutatorMessage<W>>,
}

impl<W: Wait> Drop for Controller<W> {
    fn drop(&mut self) {
        let save_to_storage = !std::thread::panicking();
        send_stop(&self.mutator_tx, save_to_storage);
    }
}

impl<W: Wait> Controller<W> {
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        mut store: Store,
        storage: Arc<Storage>,
        runner: AsyncRunner,
        tick: Tick,
        p2p_tx: impl UnboundedSink<P2pMessage>,
        pool_tx: impl UnboundedSink<PoolMessage>,
        sync_tx: impl UnboundedSink<SyncMessage>,
        validator_tx: impl UnboundedSink<ValidatorMessage<W>>,
        api_tx: impl UnboundedSink<ApiMessage>,
    ) -> Result<(Arc<Self>, MutatorHandle<W>)> {
        let spec = store.chain_spec().clone_arc();

        store.apply_tick(tick.time(&spec, store.genesis_time()));

        let store_snapshot = Arc::new(ArcSwap::from_pointee(store));
        let (mutator_tx, mutator_rx) = mpsc::channel();

        let mutator = Mutator::new(
            store_snapshot.clone_arc(),
            storage.clone_arc(),
            mutator_rx,
            p2p_tx,
            pool_tx,
            sync_tx,
            validator_tx,
            api_tx,
        );

        let join_handle = Builder::new().name("store-mutator".to_owned()).spawn(|| {
            // The closure should be unwind safe. The instance of `Store` used
            // by the mutator may become inconsistent on a panic but cannot be
            // observed because the shared snapshot is only updated with
            // values that are consistent.
            std::panic::catch_unwind(AssertUnwindSafe(move || mutator.run()))
                .map_err(panics::payload_into_error)
                .context(Error::MutatorPanicked)?
                .context(Error::MutatorFailed)
        })?;

        let controller = Arc::new(Self {
            store_snapshot,
            storage,
            runner,
            wait_group: W::Swappable::default(),
            mutator_tx: mutator_tx.clone(),
        });

        let mutator_handle = MutatorHandle {
            join_handle: Some(join_handle),
            mutator_tx,
        };

        Ok((controller, mutator_handle))
    }

    // This should be called at the start of every tick. The fork choice rule
    // does not need a precise timestamp, but delayed objects are retried from
    // here, so less frequent calls delay them further.
    pub fn on_tick(&self, tick: Tick) {
        // Don't spawn a task because the handler has very little to do.
        // Assume that sending to the channel never blocks.
        MutatorMessage::Tick {
            wait_group: self.owned_wait_group(),
            tick,
        }
        .send(&self.mutator_tx);
    }

    pub fn on_gossip_block(&self, block: Arc<SignedBeaconBlock>, gossip_id: GossipId) {
        self.spawn_block_task(block, BlockOrigin::Gossip(gossip_id));
    }

    pub fn on_requested_block(&self, block: Arc<SignedBeaconBlock>, peer_id: Option<PeerId>) {
        self.spawn_block_task(block, BlockOrigin::Requested(peer_id));
    }

    pub fn on_own_block(&self, block: Arc<SignedBeaconBlock>) {
        self.spawn_block_task(block, BlockOrigin::Own);
    }

    pub fn on_gossip_attestation(&self, attestation: Arc<Attestation>, gossip_id: GossipId) {
        MutatorMessage::Attestation {
            wait_group: self.owned_wait_group(),
            attestation,
            origin: AttestationOrigin::Gossip(gossip_id),
        }
        .send(&self.mutator_tx);
    }

    pub fn on_api_attestation(&self, attestation: Arc<Attestation>) {
        MutatorMessage::Attestation {
            wait_group: self.owned_wait_group(),
            attestation,
            origin: AttestationOrigin::Api,
        }
        .send(&self.mutator_tx);
    }

    #[must_use]
    pub fn chain_spec(&self) -> Arc<ChainSpec> {
        self.snapshot().chain_spec().clone_arc()
    }

    #[must_use]
    pub fn genesis_time(&self) -> UnixSeconds {
        self.snapshot().genesis_time()
    }

    #[must_use]
    pub fn slot(&self) -> Slot {
        self.snapshot().slot()
    }

    #[must_use]
    pub fn head(&self) -> H256 {
        self.snapshot().head()
    }

    #[must_use]
    pub fn head_slot(&self) -> Slot {
        let store = self.snapshot();
        let head = store.head();

        store
            .block(head)
            .map(|block| block.slot())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.snapshot().justified_checkpoint()
    }

    #[must_use]
    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.snapshot().finalized_checkpoint()
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.snapshot().contains_block(block_root)
    }

    #[must_use]
    pub fn block_by_root(&self, block_root: H256) -> Option<Arc<SignedBeaconBlock>> {
        self.snapshot().block(block_root).cloned()
    }

    #[must_use]
    pub fn state_by_block_root(&self, block_root: H256) -> Option<Arc<BeaconState>> {
        self.snapshot().block_state(block_root).cloned()
    }

    /// The post-state of the current head. This is the "best state" the
    /// operation pools validate against.
    #[must_use]
    pub fn head_state(&self) -> Option<Arc<BeaconState>> {
        let store = self.snapshot();
        store.block_state(store.head()).cloned()
    }

    #[must_use]
    pub const fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    fn snapshot(&self) -> Guard<Arc<Store>> {
        self.store_snapshot.load()
    }

    fn owned_store(&self) -> Arc<Store> {
        self.store_snapshot.load_full()
    }

    fn owned_wait_group(&self) -> W {
        W::load_and_clone(&self.wait_group)
    }

    fn spawn_block_task(&self, block: Arc<SignedBeaconBlock>, origin: BlockOrigin) {
        let task = BlockTask {
            store_snapshot: self.owned_store(),
            mutator_tx: self.mutator_tx.clone(),
            wait_group: self.owned_wait_group(),
            block,
            origin,
        };

        // The task handle is dropped on purpose; results travel through the
        // mutator channel.
        drop(self.runner.schedule_blocking(move || {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
                panics::log(payload);
            }
        }));
    }
}

impl Controller<WaitGroup> {
    /// Waits for all tasks and messages triggered by prior `on_*` calls to
    /// be fully processed. Only meaningful in tests.
    pub fn wait_for_tasks(&self) {
        let wait_group = mem::take(
            &mut *self
                .wait_group
                .lock()
                .expect("Controller.wait_group mutex is poisoned"),
        );

        wait_group.wait();
    }
}

/// Keeps the mutator thread joinable after the `Controller` is gone.
pub struct MutatorHandle<W: Wait> {
    join_handle: Option<std::thread::JoinHandle<Result<()>>>,
    mutator_tx: Sender<MutatorMessage<W>>,
}

impl<W: Wait> Drop for MutatorHandle<W> {
    fn drop(&mut self) {
        send_stop(&self.mutator_tx, false);
    }
}

impl<W: Wait> MutatorHandle<W> {
    pub fn join(mut self) -> Result<()> {
        send_stop(&self.mutator_tx, true);

        match self.join_handle.take() {
            Some(join_handle) => join_handle
                .join()
                .map_err(panics::payload_into_error)
                .context(Error::MutatorPanicked)?,
            None => Ok(()),
        }
    }
}
