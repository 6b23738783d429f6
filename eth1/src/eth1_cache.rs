use std::sync::Mutex;

use anyhow::Result;
use database::Database;
use deposit_tree::DepositTree;
use itertools::Itertools as _;
use ssz::{Decode, Encode};
use types::primitives::{DepositIndex, ExecutionBlockNumber};

use crate::messages::{DepositEvent, Eth1Block};

const BLOCK_KEY_PREFIX: &str = "bk";
const DEPOSIT_KEY_PREFIX: &str = "dd";
const DEPOSIT_TREE_KEY: &str = "deposit_tree";
const MIN_GENESIS_TIME_BLOCK_KEY: &str = "min_genesis_time_block";

/// Durable cache of everything learned from the Eth1 chain: the deposit
/// tree, the deposit data needed to build blocks, the append-only stream of
/// blocks deposits came from, and the min-genesis-time block.
pub struct Eth1Cache {
    database: Database,
    deposit_tree: Mutex<DepositTree>,
}

impl Eth1Cache {
    pub fn new(database: Database) -> Result<Self> {
        let deposit_tree = if let Some(tree) = get(&database, DEPOSIT_TREE_KEY)? {
            tree
        } else {
            let tree = DepositTree::default();
            database.put(DEPOSIT_TREE_KEY, tree.as_ssz_bytes())?;
            tree
        };

        Ok(Self {
            database,
            deposit_tree: Mutex::new(deposit_tree),
        })
    }

    /// Applies a `DepositsFromBlock` event. Deposits below the current count
    /// are duplicates from a re-scan and are skipped.
    pub fn add_deposits(
        &self,
        mut deposit_events: Vec<DepositEvent>,
        block: Eth1Block,
    ) -> Result<()> {
        deposit_events.sort_by_key(|deposit_event| deposit_event.index);

        let mut deposit_tree = self
            .deposit_tree
            .lock()
            .expect("deposit tree mutex is poisoned");

        let mut batch = vec![];

        for event in &deposit_events {
            if deposit_tree.deposit_count() <= event.index {
                deposit_tree.push(event.index, &event.data)?;
                batch.push((deposit_key(event.index), event.data.as_ssz_bytes()));
            }
        }

        deposit_tree.last_added_block_number = block.number;

        batch.push((block_key(block.number), block.as_ssz_bytes()));
        batch.push((DEPOSIT_TREE_KEY.to_owned(), deposit_tree.as_ssz_bytes()));

        self.database.put_batch(batch)
    }

    pub fn deposit_data(
        &self,
        first_index: DepositIndex,
        count: u64,
    ) -> Result<Vec<types::containers::DepositData>> {
        (first_index..first_index + count)
            .map(|index| {
                get(&self.database, deposit_key(index))?.ok_or_else(|| {
                    anyhow::anyhow!("deposit {index} is missing from the Eth1 cache")
                })
            })
            .try_collect()
    }

    pub fn get_latest_block(&self) -> Result<Option<Eth1Block>> {
        self.database
            .prev(block_key(ExecutionBlockNumber::MAX))?
            .filter(|(key_bytes, _)| key_bytes.starts_with(BLOCK_KEY_PREFIX.as_bytes()))
            .map(|(_, value_bytes)| {
                Eth1Block::from_ssz_bytes(&value_bytes)
                    .map_err(|error| anyhow::anyhow!("undecodable Eth1 block: {error:?}"))
            })
            .transpose()
    }

    pub fn set_min_genesis_time_block(&self, block: Eth1Block) -> Result<()> {
        self.database
            .put(MIN_GENESIS_TIME_BLOCK_KEY, block.as_ssz_bytes())
    }

    pub fn min_genesis_time_block(&self) -> Result<Option<Eth1Block>> {
        get(&self.database, MIN_GENESIS_TIME_BLOCK_KEY)
    }

    /// A consistent snapshot of the deposit tree.
    #[must_use]
    pub fn deposit_tree(&self) -> DepositTree {
        self.deposit_tree
            .lock()
            .expect("deposit tree mutex is poisoned")
            .clone()
    }
}

fn block_key(block_number: ExecutionBlockNumber) -> String {
    format!("{BLOCK_KEY_PREFIX}{block_number:020}")
}

fn deposit_key(index: DepositIndex) -> String {
    format!("{DEPOSIT_KEY_PREFIX}{index:020}")
}

fn get<V: Decode>(database: &Database, key: impl AsRef<[u8]>) -> Result<Option<V>> {
    let value = match database.get(key)? {
        Some(bytes) => V::from_ssz_bytes(bytes.as_slice())
            .map_err(|error| anyhow::anyhow!("undecodable value in Eth1 cache: {error:?}"))?,
        None => return Ok(None),
    };

    Ok(Some(value))
}
