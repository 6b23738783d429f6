//! The orchestrator: configuration, wiring and the slot timer.

pub use crate::{
    misc::{InteropConfig, MeridianConfig, StartupConfig, StorageConfig},
    runtime::{run, Channels},
    slot_timer::SlotTimer,
};

mod misc;
mod runtime;
mod slot_timer;
