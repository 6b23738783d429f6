use std::sync::Arc;

use anyhow::Result;
use async_runner::AsyncRunner;
use clock::Tick;
use crossbeam_utils::sync::WaitGroup;
use database::Database;
use fork_choice_store::GossipId;
use futures::channel::mpsc::{self, UnboundedReceiver};
use ssz_types::BitList;
use std_ext::ArcExt as _;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    containers::{
        Attestation, AttestationData, BeaconBlock, BeaconBlockBody, Checkpoint, SignedBeaconBlock,
    },
    primitives::{PeerId, Slot, UnixSeconds, H256},
};

use crate::{
    controller::{Controller, MutatorHandle},
    events::ApiMessage,
    messages::{P2pMessage, PoolMessage, SyncMessage, ValidatorMessage},
    misc::StorageMode,
    startup::{initialize_from_genesis, load_store_with_retry},
    storage::{Error as StorageError, Storage},
};

const GENESIS_TIME: UnixSeconds = 1000;
const VALIDATOR_COUNT: u64 = 64;

struct Fixture {
    controller: Arc<Controller<WaitGroup>>,
    mutator_handle: Option<MutatorHandle<WaitGroup>>,
    storage: Arc<Storage>,
    genesis_block: Arc<SignedBeaconBlock>,
    genesis_state: Arc<BeaconState>,
    p2p_rx: UnboundedReceiver<P2pMessage>,
    pool_rx: UnboundedReceiver<PoolMessage>,
    _sync_rx: UnboundedReceiver<SyncMessage>,
    _validator_rx: UnboundedReceiver<ValidatorMessage<WaitGroup>>,
    _api_rx: UnboundedReceiver<ApiMessage>,
}

impl Fixture {
    fn new() -> Result<Self> {
        let spec = Arc::new(ChainSpec::minimal());
        let (genesis_block, genesis_state) =
            genesis::interop::quick_start(&spec, GENESIS_TIME, VALIDATOR_COUNT);

        let storage = Arc::new(Storage::new(
            spec.clone_arc(),
            Database::in_memory(),
            StorageMode::Prune,
        ));

        let store = initialize_from_genesis(
            &storage,
            genesis_block.clone_arc(),
            genesis_state.clone_arc(),
            GENESIS_TIME,
        )?;

        let (p2p_tx, p2p_rx) = mpsc::unbounded();
        let (pool_tx, pool_rx) = mpsc::unbounded();
        let (sync_tx, sync_rx) = mpsc::unbounded();
        let (validator_tx, validator_rx) = mpsc::unbounded();
        let (api_tx, api_rx) = mpsc::unbounded();

        let tick = Tick::at_time(&spec, GENESIS_TIME, GENESIS_TIME)?;

        let (controller, mutator_handle) = Controller::new(
            store,
            storage.clone_arc(),
            AsyncRunner::current(),
            tick,
            p2p_tx,
            pool_tx,
            sync_tx,
            validator_tx,
            api_tx,
        )?;

        Ok(Self {
            controller,
            mutator_handle: Some(mutator_handle),
            storage,
            genesis_block,
            genesis_state,
            p2p_rx,
            pool_rx,
            _sync_rx: sync_rx,
            _validator_rx: validator_rx,
            _api_rx: api_rx,
        })
    }

    fn genesis_root(&self) -> H256 {
        self.genesis_block.block_root()
    }

    fn tick_at_slot(&self, slot: Slot) {
        let spec = self.controller.chain_spec();
        let time = spec.slot_start_time(slot, GENESIS_TIME);
        let tick = Tick::at_time(&spec, time, GENESIS_TIME).expect("time is after genesis");

        self.controller.on_tick(tick);
        self.controller.wait_for_tasks();
    }

    fn make_block(&self, parent_root: H256, slot: Slot, fork: u8) -> Arc<SignedBeaconBlock> {
        let parent_state = self
            .controller
            .state_by_block_root(parent_root)
            .expect("parent state is present");

        Arc::new(SignedBeaconBlock {
            message: BeaconBlock {
                slot,
                parent_root,
                body: BeaconBlockBody {
                    graffiti: H256::repeat_byte(fork),
                    eth1_data: parent_state.eth1_data,
                    ..BeaconBlockBody::default()
                },
                ..BeaconBlock::default()
            },
            ..SignedBeaconBlock::default()
        })
    }

    fn gossip_block(&self, block: Arc<SignedBeaconBlock>) {
        self.controller.on_gossip_block(block, gossip_id(1));
        self.controller.wait_for_tasks();
    }

    /// A valid singular attestation from committee 0 voting for `block_root`
    /// with the genesis checkpoint as target.
    fn attestation_for(&self, block_root: H256, slot: Slot) -> Arc<Attestation> {
        let spec = self.controller.chain_spec();

        let committee_size = transition_functions::accessors::beacon_committee(
            &self.genesis_state,
            &spec,
            slot,
            0,
        )
        .expect("committee 0 exists at every slot")
        .len();

        let mut aggregation_bits =
            BitList::with_capacity(committee_size).expect("committee size is within bounds");
        aggregation_bits
            .set(0, true)
            .expect("committee is not empty");

        Arc::new(Attestation {
            aggregation_bits,
            data: AttestationData {
                slot,
                index: 0,
                beacon_block_root: block_root,
                source: Checkpoint::default(),
                target: Checkpoint {
                    epoch: 0,
                    root: self.genesis_root(),
                },
            },
            signature: Default::default(),
        })
    }

    // `MutatorHandle::join` sends its own stop message, so the controller
    // does not need to be dropped first.
    fn join(&mut self) -> Result<()> {
        self.mutator_handle
            .take()
            .expect("mutator handle is taken only once")
            .join()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if let Some(handle) = self.mutator_handle.take() {
            drop(handle.join());
        }
    }
}

fn gossip_id(source: u64) -> GossipId {
    GossipId {
        source: PeerId(source),
        message_id: 0,
    }
}

fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut messages = vec![];

    while let Ok(Some(message)) = rx.try_next() {
        messages.push(message);
    }

    messages
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn imported_blocks_become_the_head() -> Result<()> {
    let mut fixture = Fixture::new()?;

    fixture.tick_at_slot(1);

    let block = fixture.make_block(fixture.genesis_root(), 1, 0);
    let block_root = block.block_root();

    fixture.gossip_block(block.clone_arc());

    assert_eq!(fixture.controller.head(), block_root);
    assert_eq!(fixture.controller.head_slot(), 1);

    let p2p_messages = drain(&mut fixture.p2p_rx);

    assert!(
        p2p_messages
            .iter()
            .any(|message| matches!(message, P2pMessage::Accept(_))),
        "an accepted gossip block must be accepted back to the network",
    );

    let pool_messages = drain(&mut fixture.pool_rx);

    assert_eq!(
        pool_messages
            .iter()
            .filter(|message| matches!(message, PoolMessage::ImportedBlock(_)))
            .count(),
        1,
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_attestation_is_flushed_by_the_block_it_votes_for() -> Result<()> {
    let mut fixture = Fixture::new()?;

    fixture.tick_at_slot(2);

    let block = fixture.make_block(fixture.genesis_root(), 1, 0);
    let block_root = block.block_root();

    // The attestation arrives before the block it votes for.
    let attestation = fixture.attestation_for(block_root, 1);
    fixture
        .controller
        .on_gossip_attestation(attestation, gossip_id(7));
    fixture.controller.wait_for_tasks();

    let p2p_messages = drain(&mut fixture.p2p_rx);

    assert!(
        p2p_messages
            .iter()
            .any(|message| matches!(message, P2pMessage::BlockNeeded(root, _) if *root == block_root)),
        "a pending attestation must trigger a fetch of the missing block",
    );

    assert!(drain(&mut fixture.pool_rx)
        .iter()
        .all(|message| !matches!(message, PoolMessage::ValidAttestation(_))));

    // Importing the block flushes the pending attestation.
    fixture.gossip_block(block);

    let pool_messages = drain(&mut fixture.pool_rx);

    assert_eq!(
        pool_messages
            .iter()
            .filter(|message| matches!(message, PoolMessage::ValidAttestation(_)))
            .count(),
        1,
        "the processed-attestation subscription must fire exactly once",
    );

    assert_eq!(fixture.controller.head(), block_root);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_block_is_flushed_by_its_parent() -> Result<()> {
    let fixture = Fixture::new()?;

    fixture.tick_at_slot(2);

    let parent = fixture.make_block(fixture.genesis_root(), 1, 0);
    let parent_root = parent.block_root();

    // The child cannot be built through the controller while the parent is
    // unknown, so it is derived from the parent directly.
    let child = Arc::new(SignedBeaconBlock {
        message: BeaconBlock {
            slot: 2,
            parent_root,
            body: BeaconBlockBody {
                eth1_data: fixture.genesis_state.eth1_data,
                ..BeaconBlockBody::default()
            },
            ..BeaconBlock::default()
        },
        ..SignedBeaconBlock::default()
    });
    let child_root = child.block_root();

    fixture.gossip_block(child);

    assert!(!fixture.controller.contains_block(child_root));

    fixture.gossip_block(parent);

    assert!(fixture.controller.contains_block(parent_root));
    assert!(fixture.controller.contains_block(child_root));
    assert_eq!(fixture.controller.head(), child_root);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn future_block_waits_for_its_slot() -> Result<()> {
    let fixture = Fixture::new()?;

    fixture.tick_at_slot(1);

    let block = fixture.make_block(fixture.genesis_root(), 2, 0);
    let block_root = block.block_root();

    fixture.gossip_block(block);

    assert!(!fixture.controller.contains_block(block_root));

    fixture.tick_at_slot(2);

    assert!(fixture.controller.contains_block(block_root));
    assert_eq!(fixture.controller.head(), block_root);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn store_round_trips_through_storage() -> Result<()> {
    let mut fixture = Fixture::new()?;

    let mut parent_root = fixture.genesis_root();
    let mut expected_roots = vec![parent_root];

    for slot in 1..=3 {
        fixture.tick_at_slot(slot);
        let block = fixture.make_block(parent_root, slot, 0);
        parent_root = block.block_root();
        expected_roots.push(parent_root);
        fixture.gossip_block(block);
    }

    let expected_finalized = fixture.controller.finalized_checkpoint();
    let expected_justified = fixture.controller.justified_checkpoint();
    let storage = fixture.storage.clone_arc();

    fixture.join()?;

    let store = storage
        .load_store(GENESIS_TIME)?
        .expect("a store was persisted");

    assert_eq!(store.genesis_time(), GENESIS_TIME);
    assert_eq!(store.finalized_checkpoint(), expected_finalized);
    assert_eq!(store.justified_checkpoint(), expected_justified);
    assert_eq!(store.block_count(), expected_roots.len());

    for root in expected_roots {
        assert!(store.contains_block(root), "block {root:?} must survive");
        assert!(
            store.block_state(root).is_some(),
            "state of {root:?} must survive",
        );
    }

    store.check_consistency().expect("loaded store is consistent");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn genesis_initialization_is_locked_after_the_first() -> Result<()> {
    let spec = Arc::new(ChainSpec::minimal());
    let (block, state) = genesis::interop::quick_start(&spec, GENESIS_TIME, VALIDATOR_COUNT);

    let storage = Arc::new(Storage::new(
        spec,
        Database::in_memory(),
        StorageMode::Prune,
    ));

    initialize_from_genesis(&storage, block.clone_arc(), state.clone_arc(), GENESIS_TIME)?;

    let error = initialize_from_genesis(&storage, block, state, GENESIS_TIME)
        .expect_err("second initialization must fail");

    assert!(matches!(
        error.downcast_ref::<StorageError>(),
        Some(StorageError::AlreadyInitialized),
    ));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_with_retry_reports_an_empty_database() {
    let storage = Arc::new(Storage::new(
        Arc::new(ChainSpec::minimal()),
        Database::in_memory(),
        StorageMode::Prune,
    ));

    assert!(load_store_with_retry(&storage, GENESIS_TIME).await.is_none());
}
