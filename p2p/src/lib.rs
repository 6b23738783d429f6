//! Peer coordination for the core.
//!
//! The libp2p transport lives outside this repository. This crate owns what
//! the core needs from it: the sync-state gate, the bookkeeping for
//! block-by-root requests, and the typed messages exchanged with the network
//! service.

pub use crate::{
    block_sync_service::{BlockSyncService, Channels as BlockSyncServiceChannels, SyncGate},
    messages::{P2pToSync, SyncToApi, SyncToP2p},
    misc::{PeerReportReason, RequestId, StatusMessage},
    network_config::{NetworkConfig, WireLogConfig},
    root_requests::RootRequests,
    sync_tracker::{SyncState, SyncStateTracker},
};

mod block_sync_service;
mod messages;
mod misc;
mod network_config;
mod root_requests;
mod sync_tracker;
