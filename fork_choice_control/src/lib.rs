//! Supporting code for the fork choice store.
//!
//! This crate handles the following concerns:
//! - [Persistence](`storage`) and the transactional commit protocol.
//! - The startup protocol, including retrying storage reads and genesis
//!   initialisation.
//! - Serialising all store mutations through the mutator thread.
//! - Delaying and retrying objects that cannot be processed immediately
//!   (the pending and future buckets for blocks and attestations).
//! - Notifying other components of the application about changes to the
//!   fork choice store.
//!
//! This crate exists primarily to separate [`fork_choice_store`] from
//! persistence. [`fork_choice_store`] should never depend on [`database`] or
//! any other I/O.

pub use crate::{
    controller::{Controller, MutatorHandle},
    events::{ApiMessage, EpochEvent, ReorgEvent, SlotEvent, SyncSlotEvent},
    messages::{MutatorRejectionReason, P2pMessage, PoolMessage, SyncMessage, ValidatorMessage},
    misc::StorageMode,
    startup::{initialize_from_genesis, load_store_with_retry},
    storage::{Error as StorageError, Storage, StoreUpdate},
    unbounded_sink::UnboundedSink,
    wait::Wait,
};

mod controller;
mod events;
mod messages;
mod misc;
mod mutator;
mod startup;
mod storage;
mod tasks;
mod unbounded_sink;
mod wait;

#[cfg(test)]
mod extra_tests;
