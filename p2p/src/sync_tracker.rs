use log::info;

/// Whether the node can meaningfully participate in the protocol.
///
/// The validator API refuses duty fulfilment unless the state is `InSync`.
/// There are no terminal states; a node oscillates as peers come and go.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncState {
    /// Waiting for enough peers after startup.
    Pending,
    InSync,
    Syncing,
}

pub struct SyncStateTracker {
    state: SyncState,
    target_peer_count: usize,
    peer_count: usize,
    sync_service_active: bool,
    startup_timeout_elapsed: bool,
}

impl SyncStateTracker {
    #[must_use]
    pub const fn new(target_peer_count: usize) -> Self {
        Self {
            state: SyncState::Pending,
            target_peer_count,
            peer_count: 0,
            sync_service_active: false,
            startup_timeout_elapsed: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    #[must_use]
    pub const fn is_in_sync(&self) -> bool {
        matches!(self.state, SyncState::InSync)
    }

    #[must_use]
    pub const fn peer_count(&self) -> usize {
        self.peer_count
    }

    /// Returns the new state if the transition changed it.
    pub fn on_peer_count(&mut self, peer_count: usize) -> Option<SyncState> {
        self.peer_count = peer_count;
        self.update()
    }

    pub fn on_sync_service_status(&mut self, active: bool) -> Option<SyncState> {
        self.sync_service_active = active;
        self.update()
    }

    /// A node that cannot find its target peer count within the startup
    /// timeout starts anyway as long as it has any peers at all.
    pub fn on_startup_timeout(&mut self) -> Option<SyncState> {
        self.startup_timeout_elapsed = true;
        self.update()
    }

    fn update(&mut self) -> Option<SyncState> {
        let new_state = match self.state {
            SyncState::Pending => {
                if self.sync_service_active {
                    SyncState::Syncing
                } else if self.peer_count >= self.target_peer_count
                    || (self.startup_timeout_elapsed && self.peer_count > 0)
                {
                    SyncState::InSync
                } else {
                    SyncState::Pending
                }
            }
            SyncState::InSync => {
                if self.sync_service_active {
                    SyncState::Syncing
                } else {
                    SyncState::InSync
                }
            }
            SyncState::Syncing => {
                if self.sync_service_active {
                    SyncState::Syncing
                } else {
                    SyncState::InSync
                }
            }
        };

        if new_state == self.state {
            return None;
        }

        info!("sync state changed: {:?} -> {new_state:?}", self.state);
        self.state = new_state;

        Some(new_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_in_sync_once_the_peer_target_is_met() {
        let mut tracker = SyncStateTracker::new(2);

        assert_eq!(tracker.on_peer_count(1), None);
        assert_eq!(tracker.state(), SyncState::Pending);

        assert_eq!(tracker.on_peer_count(2), Some(SyncState::InSync));
        assert!(tracker.is_in_sync());
    }

    #[test]
    fn startup_timeout_with_any_peers_is_enough() {
        let mut tracker = SyncStateTracker::new(10);

        assert_eq!(tracker.on_startup_timeout(), None);
        assert_eq!(tracker.on_peer_count(1), Some(SyncState::InSync));
    }

    #[test]
    fn startup_timeout_without_peers_stays_pending() {
        let mut tracker = SyncStateTracker::new(10);

        tracker.on_startup_timeout();

        assert_eq!(tracker.state(), SyncState::Pending);
    }

    #[test]
    fn oscillates_between_syncing_and_in_sync() {
        let mut tracker = SyncStateTracker::new(1);

        assert_eq!(tracker.on_peer_count(1), Some(SyncState::InSync));
        assert_eq!(
            tracker.on_sync_service_status(true),
            Some(SyncState::Syncing),
        );
        assert_eq!(
            tracker.on_sync_service_status(false),
            Some(SyncState::InSync),
        );
    }

    #[test]
    fn pending_moves_straight_to_syncing_when_catching_up() {
        let mut tracker = SyncStateTracker::new(4);

        assert_eq!(
            tracker.on_sync_service_status(true),
            Some(SyncState::Syncing),
        );
    }
}
