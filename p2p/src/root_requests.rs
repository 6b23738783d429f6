use core::time::Duration;
use std::{
    collections::HashMap,
    time::Instant,
};

use itertools::Itertools as _;
use types::primitives::{PeerId, Slot, H256};

const REQUEST_BY_ROOT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ROOT_REQUESTS_PER_KEY: usize = 3;

struct RootRequest {
    peers_tried: Vec<PeerId>,
    in_flight_since: Option<Instant>,
    requested_at_slot: Slot,
}

/// Bookkeeping for block-by-root requests.
///
/// At most one request per root is in flight at a time. A root is retried on
/// a different peer after a timeout or an explicit failure and abandoned
/// after [`MAX_ROOT_REQUESTS_PER_KEY`] attempts or once finality passes the
/// slot it was needed at.
#[derive(Default)]
pub struct RootRequests {
    requests: HashMap<H256, RootRequest>,
}

impl RootRequests {
    /// Whether a request for `root` should be sent to `peer`.
    /// Recording the attempt is a separate step so callers can check before
    /// they have picked a peer.
    #[must_use]
    pub fn ready_to_request(&self, root: H256, peer: Option<PeerId>) -> bool {
        let Some(request) = self.requests.get(&root) else {
            return true;
        };

        if request.peers_tried.len() >= MAX_ROOT_REQUESTS_PER_KEY {
            return false;
        }

        let in_flight = request
            .in_flight_since
            .is_some_and(|since| since.elapsed() < REQUEST_BY_ROOT_TIMEOUT);

        if in_flight {
            return false;
        }

        match peer {
            Some(peer) => !request.peers_tried.contains(&peer),
            None => true,
        }
    }

    pub fn record_request(&mut self, root: H256, peer: PeerId, slot: Slot) {
        let request = self.requests.entry(root).or_insert(RootRequest {
            peers_tried: vec![],
            in_flight_since: None,
            requested_at_slot: slot,
        });

        request.peers_tried.push(peer);
        request.in_flight_since = Some(Instant::now());
    }

    /// Marks the in-flight request for `root` as failed, making the root
    /// eligible for a retry on another peer.
    pub fn record_failure(&mut self, root: H256) {
        if let Some(request) = self.requests.get_mut(&root) {
            request.in_flight_since = None;
        }
    }

    pub fn record_received(&mut self, root: H256) {
        self.requests.remove(&root);
    }

    /// Roots whose in-flight request has timed out, in no particular order.
    pub fn expired(&mut self) -> Vec<H256> {
        let expired = self
            .requests
            .iter()
            .filter(|(_, request)| {
                request
                    .in_flight_since
                    .is_some_and(|since| since.elapsed() >= REQUEST_BY_ROOT_TIMEOUT)
            })
            .map(|(root, _)| *root)
            .collect_vec();

        for root in &expired {
            self.record_failure(*root);
        }

        expired
    }

    /// Forgets requests finality has made irrelevant.
    pub fn prune_finalized(&mut self, finalized_slot: Slot) {
        self.requests
            .retain(|_, request| request.requested_at_slot >= finalized_slot);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: H256 = H256::repeat_byte(1);

    #[test]
    fn one_request_per_root_is_in_flight() {
        let mut requests = RootRequests::default();

        assert!(requests.ready_to_request(ROOT, Some(PeerId(1))));

        requests.record_request(ROOT, PeerId(1), 5);

        assert!(!requests.ready_to_request(ROOT, Some(PeerId(2))));
    }

    #[test]
    fn failed_requests_retry_on_a_different_peer() {
        let mut requests = RootRequests::default();

        requests.record_request(ROOT, PeerId(1), 5);
        requests.record_failure(ROOT);

        assert!(!requests.ready_to_request(ROOT, Some(PeerId(1))));
        assert!(requests.ready_to_request(ROOT, Some(PeerId(2))));
    }

    #[test]
    fn roots_are_abandoned_after_too_many_attempts() {
        let mut requests = RootRequests::default();

        for peer in 1..=3 {
            requests.record_request(ROOT, PeerId(peer), 5);
            requests.record_failure(ROOT);
        }

        assert!(!requests.ready_to_request(ROOT, Some(PeerId(9))));
    }

    #[test]
    fn received_roots_are_forgotten() {
        let mut requests = RootRequests::default();

        requests.record_request(ROOT, PeerId(1), 5);
        requests.record_received(ROOT);

        assert!(requests.is_empty());
        assert!(requests.ready_to_request(ROOT, Some(PeerId(1))));
    }

    #[test]
    fn finality_prunes_stale_requests() {
        let mut requests = RootRequests::default();

        requests.record_request(ROOT, PeerId(1), 5);
        requests.record_request(H256::repeat_byte(2), PeerId(1), 20);

        requests.prune_finalized(16);

        assert_eq!(requests.len(), 1);
        assert!(!requests.is_empty());
    }
}
