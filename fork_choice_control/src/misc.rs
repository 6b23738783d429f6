use std::{sync::Arc, time::Instant};

use fork_choice_store::{AttestationOrigin, BlockOrigin};
use serde::Deserialize;
use types::containers::{Attestation, SignedBeaconBlock};

/// How much finalized data the node keeps on disk.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize)]
pub enum StorageMode {
    /// Keep every finalized block and state.
    Archive,
    /// Keep only what is needed to restart from the current finalized
    /// checkpoint.
    #[default]
    Prune,
}

impl StorageMode {
    #[must_use]
    pub const fn is_archive(self) -> bool {
        matches!(self, Self::Archive)
    }
}

/// Objects waiting on a missing block or a future slot.
#[derive(Default)]
pub struct Delayed {
    pub blocks: Vec<PendingBlock>,
    pub attestations: Vec<PendingAttestation>,
}

impl Delayed {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let Self {
            blocks,
            attestations,
        } = self;

        blocks.is_empty() && attestations.is_empty()
    }
}

pub struct PendingBlock {
    pub block: Arc<SignedBeaconBlock>,
    pub origin: BlockOrigin,
    pub submission_time: Instant,
}

pub struct PendingAttestation {
    pub attestation: Arc<Attestation>,
    pub origin: AttestationOrigin,
}
