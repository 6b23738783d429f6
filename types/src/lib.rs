//! Container and primitive types for the beacon chain core.
//!
//! The containers here are deliberately fork-neutral and compact. Everything
//! that is persisted or gossiped implements SSZ encoding and Merkleisation so
//! that roots computed by different components agree.

pub mod beacon_state;
pub mod config;
pub mod consts;
pub mod containers;
pub mod primitives;
