//! The fork choice store.
//!
//! [`Store`] is the single authoritative in-memory view of the chain. It is
//! only ever mutated through the transaction protocol in `fork_choice_control`:
//! the mutator thread clones the store (cheap thanks to the persistent maps
//! inside), applies `validate_*`/`apply_*` pairs to the clone, persists the
//! accumulated writes and swaps the clone in. Everything in this crate is
//! therefore synchronous and free of I/O.
//!
//! Block and attestation processing is split into `validate_*` and `apply_*`
//! methods. The `validate_*` methods never reject an object merely for being
//! early or out of order. They return [`BlockAction`] or [`AttestationAction`]
//! values instructing the caller to delay such objects instead; the caller
//! owns the pending and future buckets.

pub use crate::{
    error::Error,
    misc::{
        AttestationAction, AttestationOrigin, BlockAction, BlockApplied, BlockOrigin, GossipId,
        LatestMessage, PruneOutcome, TickApplied,
    },
    store::Store,
};

mod error;
mod misc;
mod store;
