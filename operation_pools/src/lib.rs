//! Operation pools.
//!
//! Every pool follows the same shape: a cheap cloneable front that forwards
//! requests over an unbounded channel, and a service task that owns the data.
//! Pools validate additions against the current head state, deduplicate,
//! drop operations included in imported blocks, and expire stale entries on
//! every slot.

pub use crate::{
    attestation_agg_pool::{AttestationAggPool, AttestationAggPoolService},
    attester_slashing_pool::{AttesterSlashingPool, AttesterSlashingPoolService},
    manager::PoolManager,
    messages::PoolToP2pMessage,
    misc::{Origin, PoolAdditionOutcome, PoolRejectionReason},
    proposer_slashing_pool::{ProposerSlashingPool, ProposerSlashingPoolService},
    voluntary_exit_pool::{VoluntaryExitPool, VoluntaryExitPoolService},
};

mod attestation_agg_pool;
mod attester_slashing_pool;
mod manager;
mod messages;
mod misc;
mod proposer_slashing_pool;
mod voluntary_exit_pool;
