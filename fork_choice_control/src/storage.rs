//! Persistence for the fork choice store.
//!
//! Two logical keyspaces share one database:
//! - *hot*: unfinalized blocks, their states and checkpoint states, keyed by
//!   root. Rewritten as the chain advances and pruned on finalization.
//! - *finalized*: finalized blocks by root and by slot, and (in archive mode)
//!   finalized states by root. Append-only.
//!
//! Roots are not parsed back out of keys on load. Blocks rehash to their root
//! and states carry the root of their block, so values are self-describing.

use std::{borrow::Cow, sync::Arc};

use anyhow::{Context as _, Result};
use database::Database;
use fork_choice_store::Store;
use itertools::Itertools as _;
use log::{debug, info};
use ssz::{Decode, Encode};
use std_ext::ArcExt as _;
use thiserror::Error;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    containers::{Checkpoint, SignedBeaconBlock},
    primitives::{Slot, UnixSeconds, H256},
};

use crate::misc::StorageMode;

const GENESIS_TIME_KEY: &str = "genesis_time";
const FINALIZED_CHECKPOINT_KEY: &str = "finalized_checkpoint";
const JUSTIFIED_CHECKPOINT_KEY: &str = "justified_checkpoint";
const BEST_JUSTIFIED_CHECKPOINT_KEY: &str = "best_justified_checkpoint";

#[derive(Debug, Error)]
pub enum Error {
    #[error("store is already initialized")]
    AlreadyInitialized,
    #[error("persisted store is corrupted: {reason}")]
    Corrupted { reason: String },
}

pub struct UnfinalizedBlockByRoot(pub H256);
pub struct StateByBlockRoot(pub H256);
pub struct CheckpointStateByCheckpoint(pub Checkpoint);
pub struct FinalizedBlockByRoot(pub H256);
pub struct BlockRootBySlot(pub Slot);
pub struct FinalizedStateByRoot(pub H256);

impl UnfinalizedBlockByRoot {
    const PREFIX: &'static str = "b";

    fn db_key(&self) -> String {
        format!("{}{:x}", Self::PREFIX, self.0)
    }
}

impl StateByBlockRoot {
    const PREFIX: &'static str = "s";

    fn db_key(&self) -> String {
        format!("{}{:x}", Self::PREFIX, self.0)
    }
}

impl CheckpointStateByCheckpoint {
    const PREFIX: &'static str = "c";

    fn db_key(&self) -> String {
        format!("{}{:020}{:x}", Self::PREFIX, self.0.epoch, self.0.root)
    }
}

impl FinalizedBlockByRoot {
    const PREFIX: &'static str = "f";

    fn db_key(&self) -> String {
        format!("{}{:x}", Self::PREFIX, self.0)
    }
}

impl BlockRootBySlot {
    const PREFIX: &'static str = "r";

    fn db_key(&self) -> String {
        format!("{}{:020}", Self::PREFIX, self.0)
    }
}

impl FinalizedStateByRoot {
    const PREFIX: &'static str = "a";

    fn db_key(&self) -> String {
        format!("{}{:x}", Self::PREFIX, self.0)
    }
}

// Checkpoint states are keyed by `(epoch, root)`, which cannot be recovered
// from the state alone, so the checkpoint is stored next to the state.
#[derive(ssz_derive::Encode, ssz_derive::Decode)]
struct CheckpointStateEntry {
    checkpoint: Checkpoint,
    state: BeaconState,
}

/// The writes and deletions accumulated by one store transaction.
///
/// Applied to the database as a unit before the in-memory view is swapped.
#[derive(Default)]
pub struct StoreUpdate {
    pub blocks: Vec<(H256, Arc<SignedBeaconBlock>)>,
    pub block_states: Vec<(H256, Arc<BeaconState>)>,
    pub checkpoint_states: Vec<(Checkpoint, Arc<BeaconState>)>,
    pub justified_checkpoint: Option<Checkpoint>,
    pub best_justified_checkpoint: Option<Checkpoint>,
    pub finalized_checkpoint: Option<Checkpoint>,
    pub genesis_time: Option<UnixSeconds>,
    /// Blocks promoted into the finalized keyspace: the new finalized block
    /// and, in archive mode, its pruned ancestors. States are attached for
    /// whatever the storage mode retains.
    pub finalized_blocks: Vec<(Slot, H256, Arc<SignedBeaconBlock>, Option<Arc<BeaconState>>)>,
    pub pruned_blocks: Vec<(Slot, H256)>,
    pub pruned_checkpoint_states: Vec<Checkpoint>,
    /// Finalized states made obsolete in prune mode.
    pub pruned_finalized_states: Vec<H256>,
}

impl StoreUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let Self {
            blocks,
            block_states,
            checkpoint_states,
            justified_checkpoint,
            best_justified_checkpoint,
            finalized_checkpoint,
            genesis_time,
            finalized_blocks,
            pruned_blocks,
            pruned_checkpoint_states,
            pruned_finalized_states,
        } = self;

        blocks.is_empty()
            && block_states.is_empty()
            && checkpoint_states.is_empty()
            && justified_checkpoint.is_none()
            && best_justified_checkpoint.is_none()
            && finalized_checkpoint.is_none()
            && genesis_time.is_none()
            && finalized_blocks.is_empty()
            && pruned_blocks.is_empty()
            && pruned_checkpoint_states.is_empty()
            && pruned_finalized_states.is_empty()
    }
}

pub struct Storage {
    spec: Arc<ChainSpec>,
    database: Arc<Database>,
    storage_mode: StorageMode,
}

impl Storage {
    #[must_use]
    pub fn new(spec: Arc<ChainSpec>, database: Database, storage_mode: StorageMode) -> Self {
        Self {
            spec,
            database: Arc::new(database),
            storage_mode,
        }
    }

    #[must_use]
    pub const fn chain_spec(&self) -> &Arc<ChainSpec> {
        &self.spec
    }

    #[must_use]
    pub const fn storage_mode(&self) -> StorageMode {
        self.storage_mode
    }

    pub fn contains_store(&self) -> Result<bool> {
        self.database.contains_key(GENESIS_TIME_KEY)
    }

    /// Reads the persisted store back into memory.
    ///
    /// `time` seeds `Store.time`; the first tick corrects it either way.
    pub fn load_store(&self, time: UnixSeconds) -> Result<Option<Store>> {
        let Some(genesis_time) = self.get_ssz::<u64>(GENESIS_TIME_KEY)? else {
            return Ok(None);
        };

        let finalized_checkpoint = self
            .get_ssz::<Checkpoint>(FINALIZED_CHECKPOINT_KEY)?
            .ok_or_else(|| corrupted("finalized checkpoint is missing"))?;

        let justified_checkpoint = self
            .get_ssz::<Checkpoint>(JUSTIFIED_CHECKPOINT_KEY)?
            .ok_or_else(|| corrupted("justified checkpoint is missing"))?;

        let best_justified_checkpoint = self
            .get_ssz::<Checkpoint>(BEST_JUSTIFIED_CHECKPOINT_KEY)?
            .ok_or_else(|| corrupted("best justified checkpoint is missing"))?;

        let blocks = self
            .iterate_prefix(UnfinalizedBlockByRoot::PREFIX)?
            .into_iter()
            .map(|bytes| {
                let block = SignedBeaconBlock::from_ssz_bytes(&bytes)
                    .map_err(|error| corrupted(format!("undecodable block: {error:?}")))?;

                Ok((block.block_root(), Arc::new(block)))
            })
            .collect::<Result<Vec<_>>>()?;

        let block_states = self
            .iterate_prefix(StateByBlockRoot::PREFIX)?
            .into_iter()
            .map(|bytes| {
                let state = BeaconState::from_ssz_bytes(&bytes)
                    .map_err(|error| corrupted(format!("undecodable state: {error:?}")))?;

                Ok((state.latest_block_root, Arc::new(state)))
            })
            .collect::<Result<Vec<_>>>()?;

        let checkpoint_states = self
            .iterate_prefix(CheckpointStateByCheckpoint::PREFIX)?
            .into_iter()
            .map(|bytes| {
                let entry = CheckpointStateEntry::from_ssz_bytes(&bytes).map_err(|error| {
                    corrupted(format!("undecodable checkpoint state: {error:?}"))
                })?;

                Ok((entry.checkpoint, Arc::new(entry.state)))
            })
            .collect::<Result<Vec<_>>>()?;

        if !blocks
            .iter()
            .any(|(root, _)| *root == finalized_checkpoint.root)
        {
            return Err(corrupted("finalized block is missing from the hot keyspace"));
        }

        let store = Store::from_persisted(
            self.spec.clone_arc(),
            genesis_time,
            time,
            justified_checkpoint,
            best_justified_checkpoint,
            finalized_checkpoint,
            blocks,
            block_states,
            checkpoint_states,
        );

        info!(
            "loaded store with {} blocks at finalized epoch {}",
            store.block_count(),
            store.finalized_checkpoint().epoch,
        );

        Ok(Some(store))
    }

    /// Applies one transaction's writes durably. The caller treats an error
    /// here as fatal outside of startup.
    pub fn apply_update(&self, update: StoreUpdate) -> Result<()> {
        let StoreUpdate {
            blocks,
            block_states,
            checkpoint_states,
            justified_checkpoint,
            best_justified_checkpoint,
            finalized_checkpoint,
            genesis_time,
            finalized_blocks,
            pruned_blocks,
            pruned_checkpoint_states,
            pruned_finalized_states,
        } = update;

        let mut batch = vec![];

        for (root, block) in &blocks {
            batch.push((UnfinalizedBlockByRoot(*root).db_key(), block.as_ssz_bytes()));
        }

        for (root, state) in &block_states {
            batch.push((StateByBlockRoot(*root).db_key(), state.as_ssz_bytes()));
        }

        for (checkpoint, state) in &checkpoint_states {
            let entry = CheckpointStateEntry {
                checkpoint: *checkpoint,
                state: state.as_ref().clone(),
            };

            batch.push((
                CheckpointStateByCheckpoint(*checkpoint).db_key(),
                entry.as_ssz_bytes(),
            ));
        }

        if let Some(checkpoint) = justified_checkpoint {
            batch.push((JUSTIFIED_CHECKPOINT_KEY.to_owned(), checkpoint.as_ssz_bytes()));
        }

        if let Some(checkpoint) = best_justified_checkpoint {
            batch.push((
                BEST_JUSTIFIED_CHECKPOINT_KEY.to_owned(),
                checkpoint.as_ssz_bytes(),
            ));
        }

        if let Some(checkpoint) = finalized_checkpoint {
            batch.push((FINALIZED_CHECKPOINT_KEY.to_owned(), checkpoint.as_ssz_bytes()));
        }

        if let Some(genesis_time) = genesis_time {
            batch.push((GENESIS_TIME_KEY.to_owned(), genesis_time.as_ssz_bytes()));
        }

        for (slot, root, block, state) in &finalized_blocks {
            batch.push((FinalizedBlockByRoot(*root).db_key(), block.as_ssz_bytes()));
            batch.push((BlockRootBySlot(*slot).db_key(), root.as_ssz_bytes()));

            if let Some(state) = state {
                batch.push((FinalizedStateByRoot(*root).db_key(), state.as_ssz_bytes()));
            }
        }

        self.database.put_batch(batch)?;

        for (_, root) in &pruned_blocks {
            self.database.delete(UnfinalizedBlockByRoot(*root).db_key())?;
            self.database.delete(StateByBlockRoot(*root).db_key())?;
        }

        for checkpoint in &pruned_checkpoint_states {
            self.database
                .delete(CheckpointStateByCheckpoint(*checkpoint).db_key())?;
        }

        for root in &pruned_finalized_states {
            self.database.delete(FinalizedStateByRoot(*root).db_key())?;
        }

        debug!(
            "applied store update ({} blocks, {} pruned)",
            blocks.len(),
            pruned_blocks.len(),
        );

        Ok(())
    }

    pub fn contains_finalized_block(&self, block_root: H256) -> Result<bool> {
        self.database
            .contains_key(FinalizedBlockByRoot(block_root).db_key())
    }

    pub fn finalized_block_by_slot(&self, slot: Slot) -> Result<Option<Arc<SignedBeaconBlock>>> {
        let Some(root_bytes) = self.database.get(BlockRootBySlot(slot).db_key())? else {
            return Ok(None);
        };

        let root = H256::from_ssz_bytes(&root_bytes)
            .map_err(|error| corrupted(format!("undecodable block root: {error:?}")))?;

        let Some(block_bytes) = self.database.get(FinalizedBlockByRoot(root).db_key())? else {
            return Ok(None);
        };

        SignedBeaconBlock::from_ssz_bytes(&block_bytes)
            .map(|block| Some(Arc::new(block)))
            .map_err(|error| corrupted(format!("undecodable finalized block: {error:?}")))
    }

    fn get_ssz<T: Decode>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.database.get(key)? else {
            return Ok(None);
        };

        T::from_ssz_bytes(&bytes)
            .map(Some)
            .map_err(|error| corrupted(format!("undecodable value at {key}: {error:?}")))
    }

    fn iterate_prefix(&self, prefix: &str) -> Result<Vec<Vec<u8>>> {
        let first_byte = prefix
            .as_bytes()
            .first()
            .copied()
            .expect("key prefixes are non-empty");

        self.database
            .iterator_ascending(prefix..)?
            .take_while(|result| match result {
                Ok((key, _)) => key.first() == Some(&first_byte),
                Err(_) => true,
            })
            .map_ok(|(key, value)| has_prefix(&key, prefix).then_some(value))
            .filter_map(Result::transpose)
            .try_collect()
            .context("failed to iterate database prefix")
    }
}

// Singleton keys share first letters with the prefixed keyspaces
// (`best_justified_checkpoint` sorts between block keys, for one), so prefix
// iteration checks that the remainder of the key is hexadecimal.
fn has_prefix(key: &Cow<[u8]>, prefix: &str) -> bool {
    key.starts_with(prefix.as_bytes())
        && key.len() > prefix.len()
        && key[prefix.len()..]
            .iter()
            .all(u8::is_ascii_hexdigit)
}

fn corrupted(reason: impl Into<String>) -> anyhow::Error {
    Error::Corrupted {
        reason: reason.into(),
    }
    .into()
}
