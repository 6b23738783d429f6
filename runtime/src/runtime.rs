use core::time::Duration;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_runner::AsyncRunner;
use clock::Tick;
use database::Database;
use eth1::{Eth1Cache, Eth1Event};
use fork_choice_control::{
    initialize_from_genesis, load_store_with_retry, ApiMessage, Controller, P2pMessage,
    PoolMessage, Storage, ValidatorMessage,
};
use fork_choice_store::Store;
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt as _,
};
use genesis::interop;
use log::{info, warn};
use operation_pools::{
    AttestationAggPool, AttesterSlashingPool, PoolManager, PoolToP2pMessage, ProposerSlashingPool,
    VoluntaryExitPool,
};
use p2p::{BlockSyncService, BlockSyncServiceChannels, P2pToSync, SyncToApi, SyncToP2p};
use ssz::Decode as _;
use std_ext::ArcExt as _;
use types::{beacon_state::BeaconState, containers::SignedBeaconBlock, primitives::UnixSeconds};

use crate::{misc::MeridianConfig, slot_timer::SlotTimer};

/// Channel ends owned by the external collaborators: the network service,
/// the Eth1 follower and the API surfaces.
pub struct Channels {
    pub eth1_rx: UnboundedReceiver<Eth1Event>,
    pub p2p_to_sync_rx: UnboundedReceiver<P2pToSync>,
    pub sync_to_p2p_tx: UnboundedSender<SyncToP2p>,
    pub sync_to_api_tx: UnboundedSender<SyncToApi>,
    pub pool_to_p2p_tx: UnboundedSender<PoolToP2pMessage>,
    pub validator_tx: UnboundedSender<ValidatorMessage<()>>,
    pub api_tx: UnboundedSender<ApiMessage>,
}

#[expect(clippy::too_many_lines)]
pub async fn run(config: MeridianConfig, channels: Channels) -> Result<()> {
    let Channels {
        eth1_rx,
        p2p_to_sync_rx,
        sync_to_p2p_tx,
        sync_to_api_tx,
        pool_to_p2p_tx,
        validator_tx,
        api_tx,
    } = channels;

    let spec = Arc::new(config.chain_spec.clone());
    let runner = AsyncRunner::current();

    let store_database = if config.storage.in_memory {
        Database::in_memory()
    } else {
        Database::persistent(
            "store",
            config.storage.directory.join("store"),
            config.storage.database_size,
        )?
    };

    let storage = Arc::new(Storage::new(
        spec.clone_arc(),
        store_database,
        config.storage.mode,
    ));

    let eth1_database = if config.storage.in_memory {
        Database::in_memory()
    } else {
        Database::persistent(
            "eth1",
            config.storage.directory.join("eth1"),
            config.storage.database_size,
        )?
    };

    let eth1_cache = Arc::new(Eth1Cache::new(eth1_database)?);

    let (store, eth1_rx) = acquire_store(&config, &storage, &eth1_cache, eth1_rx).await?;
    let genesis_time = store.genesis_time();

    let (fork_choice_to_p2p_tx, fork_choice_to_p2p_rx) = mpsc::unbounded();
    let (fork_choice_to_pool_tx, fork_choice_to_pool_rx) = mpsc::unbounded();
    let (fork_choice_to_sync_tx, fork_choice_to_sync_rx) = mpsc::unbounded();

    let tick = Tick::current(&spec, genesis_time).unwrap_or_else(|_| Tick::start_of_slot(0));

    let (controller, mutator_handle) = Controller::<()>::new(
        store,
        storage,
        runner.clone(),
        tick,
        fork_choice_to_p2p_tx.clone(),
        fork_choice_to_pool_tx.clone(),
        fork_choice_to_sync_tx.clone(),
        validator_tx.clone(),
        api_tx.clone(),
    )?;

    // Operation pools and their fan-out manager.

    let (attestation_agg_pool, attestation_agg_pool_service) =
        AttestationAggPool::new(spec.clone_arc());
    let (attester_slashing_pool, attester_slashing_pool_service) =
        AttesterSlashingPool::new(controller.clone_arc(), pool_to_p2p_tx.clone());
    let (proposer_slashing_pool, proposer_slashing_pool_service) =
        ProposerSlashingPool::new(controller.clone_arc(), pool_to_p2p_tx.clone());
    let (voluntary_exit_pool, voluntary_exit_pool_service) =
        VoluntaryExitPool::new(controller.clone_arc(), pool_to_p2p_tx);

    let pool_manager = PoolManager::new(
        attestation_agg_pool,
        attester_slashing_pool,
        proposer_slashing_pool,
        voluntary_exit_pool,
        fork_choice_to_pool_rx,
    );

    let attestation_agg_pool_task = runner.schedule(attestation_agg_pool_service.run());
    let attester_slashing_pool_task = runner.schedule(attester_slashing_pool_service.run());
    let proposer_slashing_pool_task = runner.schedule(proposer_slashing_pool_service.run());
    let voluntary_exit_pool_task = runner.schedule(voluntary_exit_pool_service.run());
    let pool_manager_task = runner.schedule(pool_manager.run());

    // The sync service and the gate the slot timer consults.

    let (block_sync_service, sync_gate) = BlockSyncService::new(
        controller.clone_arc(),
        config.startup.target_peer_count,
        Duration::from_secs(config.startup.timeout_seconds.get()),
        BlockSyncServiceChannels {
            fork_choice_to_p2p_rx,
            fork_choice_to_sync_rx,
            p2p_to_sync_rx,
            sync_to_p2p_tx,
            sync_to_api_tx,
        },
    );

    let block_sync_service_task = runner.schedule(block_sync_service.run());

    // The Eth1 follower keeps updating the cache after genesis.
    let eth1_task = runner.schedule(follow_eth1(eth1_cache, eth1_rx));

    let mut slot_timer = SlotTimer::new(
        controller.clone_arc(),
        sync_gate,
        fork_choice_to_pool_tx.clone(),
        validator_tx.clone(),
        api_tx,
    );

    info!("node started at slot {}", controller.slot());

    let mut ticks = clock::ticks(&spec, genesis_time)?;

    loop {
        tokio::select! {
            tick = ticks.next() => {
                match tick {
                    Some(tick) => slot_timer.handle_tick(tick?),
                    None => break,
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for the interrupt signal")?;
                info!("shutting down");
                break;
            }
        }
    }

    // Stop order: sync service, operation pools (drained), then the store.
    // Each step waits for the previous one.
    P2pMessage::Stop.send(&fork_choice_to_p2p_tx);
    block_sync_service_task.await??;

    PoolMessage::Stop.send(&fork_choice_to_pool_tx);
    pool_manager_task.await??;

    for task in [
        attestation_agg_pool_task,
        attester_slashing_pool_task,
        proposer_slashing_pool_task,
        voluntary_exit_pool_task,
    ] {
        task.cancel();
        drop(task.await);
    }

    eth1_task.cancel();
    drop(eth1_task.await);

    ValidatorMessage::Stop.send(&validator_tx);

    drop(controller);
    mutator_handle.join()
}

/// The startup protocol: load the persisted store, or synthesise one from
/// the configured source, or wait for the Eth1 genesis trigger.
async fn acquire_store(
    config: &MeridianConfig,
    storage: &Arc<Storage>,
    eth1_cache: &Arc<Eth1Cache>,
    eth1_rx: UnboundedReceiver<Eth1Event>,
) -> Result<(Store, UnboundedReceiver<Eth1Event>)> {
    let spec = storage.chain_spec().clone_arc();
    let now = unix_time();

    if let Some(store) = load_store_with_retry(storage, now).await {
        info!("resuming from the persisted store");
        return Ok((store, eth1_rx));
    }

    if let Some(path) = &config.initial_state {
        let bytes = fs_err::read(path)?;

        let state = Arc::new(
            BeaconState::from_ssz_bytes(&bytes)
                .map_err(|error| anyhow::anyhow!("undecodable initial state: {error:?}"))?,
        );

        // The operator-supplied state must be a genesis state; the block it
        // refers to is the implicit empty genesis block.
        let block = Arc::new(SignedBeaconBlock::default());

        let store = initialize_from_genesis(storage, block, state, now)?;
        info!("initialized from the supplied genesis state");
        return Ok((store, eth1_rx));
    }

    if config.interop.enabled {
        let genesis_time = config.interop.genesis_time.unwrap_or_else(unix_time);

        let (block, state) = interop::quick_start(
            &spec,
            genesis_time,
            config.interop.number_of_validators,
        );

        let store = initialize_from_genesis(storage, block, state, now)?;
        info!("initialized interop genesis at {genesis_time}");
        return Ok((store, eth1_rx));
    }

    info!("no store found; waiting for the Eth1 genesis trigger");

    let mut eth1_rx = eth1_rx;
    let (block, state) = eth1::wait_for_genesis(&spec, eth1_cache, &mut eth1_rx).await?;

    let store = initialize_from_genesis(storage, block, state, unix_time())?;

    Ok((store, eth1_rx))
}

/// Applies Eth1 follower events to the cache after genesis.
async fn follow_eth1(cache: Arc<Eth1Cache>, mut eth1_rx: UnboundedReceiver<Eth1Event>) {
    while let Some(event) = eth1_rx.next().await {
        let result = match event {
            Eth1Event::MinGenesisTimeBlock(eth1_block) => {
                cache.set_min_genesis_time_block(eth1_block)
            }
            Eth1Event::DepositsFromBlock { block, deposits } => {
                cache.add_deposits(deposits, block)
            }
        };

        if let Err(error) = result {
            warn!("failed to apply Eth1 event: {error:#}");
        }
    }
}

fn unix_time() -> UnixSeconds {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
