//! The startup protocol.
//!
//! The node is inert without a store, so the initial storage read is retried
//! forever with bounded exponential backoff. The retry loop is a single task;
//! a failed attempt re-queues itself rather than spawning a competitor, so
//! there is never more than one read in flight.

use core::time::Duration;
use std::sync::Arc;

use anyhow::Result;
use fork_choice_store::Store;
use log::warn;
use std_ext::ArcExt as _;
use types::{
    beacon_state::BeaconState,
    containers::SignedBeaconBlock,
    primitives::UnixSeconds,
};

use crate::storage::{Error, Storage, StoreUpdate};

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(30);

/// Loads the persisted store, retrying on failure. Returns `None` once a
/// read succeeds but finds no store; the caller then waits for a genesis
/// trigger or synthesises a store from an operator-supplied state.
pub async fn load_store_with_retry(storage: &Arc<Storage>, time: UnixSeconds) -> Option<Store> {
    let mut backoff = RETRY_BASE;

    loop {
        match storage.load_store(time) {
            Ok(store) => return store,
            Err(error) => {
                warn!("failed to load store, retrying in {backoff:?}: {error:#}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RETRY_CAP);
            }
        }
    }
}

/// Synthesises and persists a store from a genesis (or anchor) state.
///
/// Fails with [`Error::AlreadyInitialized`] if a store already exists. A
/// second genesis setup is always operator error; a node that hits this must
/// not silently overwrite its database.
pub fn initialize_from_genesis(
    storage: &Arc<Storage>,
    anchor_block: Arc<SignedBeaconBlock>,
    anchor_state: Arc<BeaconState>,
    time: UnixSeconds,
) -> Result<Store> {
    if storage.contains_store()? {
        return Err(Error::AlreadyInitialized.into());
    }

    let store = Store::new(
        storage.chain_spec().clone_arc(),
        anchor_block.clone_arc(),
        anchor_state.clone_arc(),
        time,
    );

    let anchor_root = anchor_block.block_root();

    storage.apply_update(StoreUpdate {
        blocks: vec![(anchor_root, anchor_block)],
        block_states: vec![(anchor_root, anchor_state)],
        checkpoint_states: store
            .checkpoint_states()
            .map(|(checkpoint, state)| (checkpoint, state.clone_arc()))
            .collect(),
        justified_checkpoint: Some(store.justified_checkpoint()),
        best_justified_checkpoint: Some(store.best_justified_checkpoint()),
        finalized_checkpoint: Some(store.finalized_checkpoint()),
        genesis_time: Some(store.genesis_time()),
        ..StoreUpdate::default()
    })?;

    Ok(store)
}
