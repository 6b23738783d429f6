//! Watches the Eth1 follower for the genesis trigger.

use std::sync::Arc;

use anyhow::Result;
use futures::{channel::mpsc::UnboundedReceiver, StreamExt as _};
use genesis::Incremental;
use log::info;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    containers::SignedBeaconBlock,
};

use crate::{
    eth1_cache::Eth1Cache,
    messages::{Eth1Block, Eth1Event},
};

/// Consumes follower events until enough deposits exist at or after the
/// minimum genesis time, then synthesises the genesis state.
///
/// Completes with an error if the follower goes away first; without it
/// genesis can never be reached.
pub async fn wait_for_genesis(
    spec: &ChainSpec,
    cache: &Arc<Eth1Cache>,
    eth1_rx: &mut UnboundedReceiver<Eth1Event>,
) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
    let mut incremental = Incremental::new(spec);
    let mut min_genesis_time_block: Option<Eth1Block> = cache.min_genesis_time_block()?;

    // Deposits already cached from a previous run count towards the trigger.
    for (index, data) in cache
        .deposit_data(0, cache.deposit_tree().deposit_count())?
        .into_iter()
        .enumerate()
    {
        incremental.add_deposit(index as u64, data)?;
    }

    loop {
        if let Some(block) = min_genesis_time_block {
            if incremental.is_genesis_ready(block.timestamp) {
                let genesis_time = genesis::genesis_time_from_eth1_time(spec, block.timestamp);

                info!(
                    "genesis triggered by Eth1 block {} with {} deposits; genesis time is {genesis_time}",
                    block.number,
                    incremental.deposit_tree().deposit_count(),
                );

                return Ok(incremental.finish(genesis_time, block.hash));
            }
        }

        let event = eth1_rx
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("Eth1 follower stopped before genesis"))?;

        match event {
            Eth1Event::MinGenesisTimeBlock(block) => {
                cache.set_min_genesis_time_block(block)?;
                min_genesis_time_block = Some(block);
            }
            Eth1Event::DepositsFromBlock { block, deposits } => {
                cache.add_deposits(deposits.clone(), block)?;

                for event in deposits {
                    if incremental.deposit_tree().deposit_count() <= event.index {
                        incremental.add_deposit(event.index, event.data)?;
                    }
                }
            }
        }
    }
}
