use std::sync::Arc;

use serde::Serialize;
use strum::AsRefStr;
use types::{
    beacon_state::BeaconState,
    containers::{Attestation, Checkpoint, SignedBeaconBlock},
    primitives::{Epoch, PeerId, Slot, ValidatorIndex, H256},
};

/// Identifies a gossip message so the network service can report the outcome
/// of its validation back to the gossip router.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct GossipId {
    pub source: PeerId,
    pub message_id: u64,
}

#[derive(Clone, Debug, AsRefStr)]
pub enum BlockOrigin {
    Gossip(GossipId),
    Requested(Option<PeerId>),
    Own,
    Persisted,
}

impl BlockOrigin {
    #[must_use]
    pub const fn gossip_id(&self) -> Option<GossipId> {
        match self {
            Self::Gossip(gossip_id) => Some(*gossip_id),
            Self::Requested(_) | Self::Own | Self::Persisted => None,
        }
    }

    #[must_use]
    pub const fn peer_id(&self) -> Option<PeerId> {
        match self {
            Self::Gossip(gossip_id) => Some(gossip_id.source),
            Self::Requested(peer_id) => *peer_id,
            Self::Own | Self::Persisted => None,
        }
    }
}

#[derive(Clone, Debug, AsRefStr)]
pub enum AttestationOrigin {
    Gossip(GossipId),
    /// Carried inside a block that has just been imported.
    Block,
    Api,
}

impl AttestationOrigin {
    #[must_use]
    pub const fn gossip_id(&self) -> Option<GossipId> {
        match self {
            Self::Gossip(gossip_id) => Some(*gossip_id),
            Self::Block | Self::Api => None,
        }
    }
}

/// What to do with a block according to the store.
pub enum BlockAction {
    /// The block is valid. The post-state has already been computed.
    Accept(Arc<SignedBeaconBlock>, Arc<BeaconState>),
    /// The block is already known or cannot affect fork choice anymore.
    Ignore,
    /// The parent is not in the store yet.
    DelayUntilParent(Arc<SignedBeaconBlock>),
    /// The block is from a slot the store has not reached.
    DelayUntilSlot(Arc<SignedBeaconBlock>),
}

/// What to do with an attestation according to the store.
pub enum AttestationAction {
    Accept {
        attestation: Arc<Attestation>,
        attesting_indices: Vec<ValidatorIndex>,
    },
    /// Too old to affect fork choice.
    Ignore,
    /// The attested or target block is not in the store yet.
    DelayUntilBlock(Arc<Attestation>, H256),
    /// Attestations only become eligible for fork choice one slot after
    /// their own.
    DelayUntilSlot(Arc<Attestation>),
}

/// The most recent vote accepted from a validator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LatestMessage {
    pub epoch: Epoch,
    pub root: H256,
}

/// Side effects of [`Store::apply_tick`].
///
/// [`Store::apply_tick`]: crate::Store::apply_tick
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct TickApplied {
    pub previous_slot: Slot,
    pub new_slot: Slot,
    pub crossed_epoch_boundary: bool,
    pub justified_checkpoint_promoted: bool,
}

/// Side effects of [`Store::apply_block`].
///
/// [`Store::apply_block`]: crate::Store::apply_block
#[derive(Clone, Default, Debug)]
pub struct BlockApplied {
    pub block_root: H256,
    pub justified_checkpoint_updated: bool,
    pub finalized_checkpoint_advanced: bool,
    pub prune_outcome: Option<PruneOutcome>,
}

/// Everything removed from the store by a finalized checkpoint advance.
/// The storage layer deletes the same keys from the hot keyspace.
#[derive(Clone, Default, Debug)]
pub struct PruneOutcome {
    pub pruned_blocks: Vec<(Slot, H256)>,
    pub pruned_checkpoint_states: Vec<Checkpoint>,
}
