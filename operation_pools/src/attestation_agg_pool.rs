//! The aggregating attestation pool.
//!
//! Attestations sharing `AttestationData` belong to one committee and carry
//! aggregation bits of the same length, so they can be combined whenever
//! their bits are disjoint. The pool keeps a small set of aggregates per
//! data and folds new contributions into the first disjoint aggregate.
//! Contributions covered by an existing aggregate are dropped.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use bls::AggregateSignatureBytes;
use futures::{
    channel::{
        mpsc::{UnboundedReceiver, UnboundedSender},
        oneshot::{self, Sender},
    },
    stream::StreamExt as _,
};
use itertools::Itertools as _;
use log::{debug, warn};
use ssz_types::BitList;
use typenum::Unsigned as _;
use types::{
    beacon_state::BeaconState,
    config::ChainSpec,
    consts::{MaxAttestations, MaxValidatorsPerCommittee},
    containers::{Attestation, AttestationData},
    primitives::Slot,
};

pub struct AttestationAggPool {
    tx: UnboundedSender<PoolMessage>,
}

impl AttestationAggPool {
    #[must_use]
    pub fn new(spec: Arc<ChainSpec>) -> (Arc<Self>, AttestationAggPoolService) {
        let (tx, rx) = futures::channel::mpsc::unbounded();

        let pool = Arc::new(Self { tx });

        let service = AttestationAggPoolService {
            spec,
            aggregates: HashMap::new(),
            rx,
        };

        (pool, service)
    }

    pub fn on_slot(&self, slot: Slot) {
        PoolMessage::Slot(slot).send(&self.tx);
    }

    /// Fed by the processed-attestation subscription of the fork choice
    /// store; everything arriving here has already been validated.
    pub fn add_attestation(&self, attestation: Arc<Attestation>) {
        PoolMessage::Add(attestation).send(&self.tx);
    }

    /// Called with the attestations taken from a verified imported block.
    pub fn remove_included(&self, attestations: Vec<Attestation>) {
        PoolMessage::RemoveIncluded(attestations).send(&self.tx);
    }

    /// The block factory's inclusion view: the best aggregate per data.
    pub async fn attestations_for_block(
        &self,
        state: Arc<BeaconState>,
    ) -> Result<Vec<Attestation>> {
        let (sender, receiver) = oneshot::channel();
        PoolMessage::RequestForBlock(state, sender).send(&self.tx);
        receiver.await.map_err(Into::into)
    }

    /// The best aggregate for `data`, for aggregation duties.
    pub async fn best_aggregate(&self, data: AttestationData) -> Result<Option<Attestation>> {
        let (sender, receiver) = oneshot::channel();
        PoolMessage::RequestBestAggregate(data, sender).send(&self.tx);
        receiver.await.map_err(Into::into)
    }
}

struct Aggregate {
    aggregation_bits: BitList<MaxValidatorsPerCommittee>,
    signature: AggregateSignatureBytes,
}

pub struct AttestationAggPoolService {
    spec: Arc<ChainSpec>,
    aggregates: HashMap<AttestationData, Vec<Aggregate>>,
    rx: UnboundedReceiver<PoolMessage>,
}

impl AttestationAggPoolService {
    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.rx.next().await {
            let success = match message {
                PoolMessage::Slot(slot) => {
                    self.discard_expired(slot);
                    true
                }
                PoolMessage::Add(attestation) => {
                    self.add(&attestation);
                    true
                }
                PoolMessage::RemoveIncluded(attestations) => {
                    for attestation in attestations {
                        self.remove_covered_by(&attestation);
                    }

                    true
                }
                PoolMessage::RequestForBlock(state, sender) => {
                    sender.send(self.attestations_for_block(&state)).is_ok()
                }
                PoolMessage::RequestBestAggregate(data, sender) => {
                    sender.send(self.best_aggregate(data)).is_ok()
                }
            };

            if !success {
                warn!("failed to send response because the receiver was dropped");
            }
        }

        Ok(())
    }

    fn add(&mut self, attestation: &Attestation) {
        let bits = &attestation.aggregation_bits;
        let entries = self.aggregates.entry(attestation.data).or_default();

        if entries
            .iter()
            .any(|aggregate| bits.is_subset(&aggregate.aggregation_bits))
        {
            return;
        }

        for aggregate in entries.iter_mut() {
            let disjoint = bits
                .intersection(&aggregate.aggregation_bits)
                .is_zero();

            if !disjoint {
                continue;
            }

            // Signatures are opaque bytes until this point. A contribution
            // that fails to decompress does not touch the existing
            // aggregate; it gets an entry of its own and expires with it.
            let mut combined = aggregate.signature;

            match combined.aggregate_in_place(attestation.signature) {
                Ok(()) => {
                    aggregate.aggregation_bits = bits.union(&aggregate.aggregation_bits);
                    aggregate.signature = combined;
                    return;
                }
                Err(error) => {
                    debug!("failed to aggregate attestation signature: {error}");
                    break;
                }
            }
        }

        entries.push(Aggregate {
            aggregation_bits: bits.clone(),
            signature: attestation.signature,
        });
    }

    fn remove_covered_by(&mut self, attestation: &Attestation) {
        if let Some(entries) = self.aggregates.get_mut(&attestation.data) {
            entries.retain(|aggregate| {
                !aggregate
                    .aggregation_bits
                    .is_subset(&attestation.aggregation_bits)
            });

            if entries.is_empty() {
                self.aggregates.remove(&attestation.data);
            }
        }
    }

    fn attestations_for_block(&self, state: &BeaconState) -> Vec<Attestation> {
        self.aggregates
            .iter()
            .filter(|(data, _)| {
                let earliest = data.slot + self.spec.min_attestation_inclusion_delay;
                let latest = data.slot + self.spec.slots_per_epoch.get();

                earliest <= state.slot && state.slot <= latest
            })
            .filter_map(|(data, entries)| {
                let best = entries
                    .iter()
                    .max_by_key(|aggregate| aggregate.aggregation_bits.num_set_bits())?;

                let attestation = Attestation {
                    aggregation_bits: best.aggregation_bits.clone(),
                    data: *data,
                    signature: best.signature,
                };

                transition_functions::block_processing::validate_attestation(
                    &self.spec,
                    state,
                    &attestation,
                )
                .is_ok()
                .then_some(attestation)
            })
            .take(MaxAttestations::USIZE)
            .collect_vec()
    }

    fn best_aggregate(&self, data: AttestationData) -> Option<Attestation> {
        let entries = self.aggregates.get(&data)?;

        let best = entries
            .iter()
            .max_by_key(|aggregate| aggregate.aggregation_bits.num_set_bits())?;

        Some(Attestation {
            aggregation_bits: best.aggregation_bits.clone(),
            data,
            signature: best.signature,
        })
    }

    fn discard_expired(&mut self, slot: Slot) {
        let inclusion_window = self.spec.slots_per_epoch.get();

        self.aggregates
            .retain(|data, _| slot <= data.slot + inclusion_window);
    }
}

enum PoolMessage {
    Slot(Slot),
    Add(Arc<Attestation>),
    RemoveIncluded(Vec<Attestation>),
    RequestForBlock(Arc<BeaconState>, Sender<Vec<Attestation>>),
    RequestBestAggregate(AttestationData, Sender<Option<Attestation>>),
}

impl PoolMessage {
    fn send(self, tx: &UnboundedSender<Self>) {
        if let Err(message) = tx.unbounded_send(self) {
            debug!("internal send failed because the receiver was dropped: {message:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use bls::SignatureBytes;
    use types::primitives::H256;

    use super::*;

    fn service() -> AttestationAggPoolService {
        AttestationAggPoolService {
            spec: Arc::new(ChainSpec::minimal()),
            aggregates: HashMap::new(),
            rx: futures::channel::mpsc::unbounded().1,
        }
    }

    fn attestation(data: AttestationData, positions: &[usize]) -> Attestation {
        let mut aggregation_bits = BitList::with_capacity(8).expect("length is within bounds");

        for position in positions {
            aggregation_bits
                .set(*position, true)
                .expect("position is within bounds");
        }

        Attestation {
            aggregation_bits,
            data,
            signature: AggregateSignatureBytes::infinity(),
        }
    }

    fn data_at_slot(slot: Slot) -> AttestationData {
        AttestationData {
            slot,
            beacon_block_root: H256::repeat_byte(1),
            ..AttestationData::default()
        }
    }

    #[test]
    fn disjoint_contributions_merge_into_one_aggregate() {
        let mut service = service();
        let data = data_at_slot(3);

        service.add(&attestation(data, &[0]));
        service.add(&attestation(data, &[2, 4]));

        let entries = &service.aggregates[&data];

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].aggregation_bits.num_set_bits(), 3);
    }

    #[test]
    fn covered_contributions_are_dropped() {
        let mut service = service();
        let data = data_at_slot(3);

        service.add(&attestation(data, &[1, 2]));
        service.add(&attestation(data, &[1]));

        let entries = &service.aggregates[&data];

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].aggregation_bits.num_set_bits(), 2);
    }

    #[test]
    fn overlapping_contributions_get_their_own_entry() {
        let mut service = service();
        let data = data_at_slot(3);

        service.add(&attestation(data, &[1, 2]));
        service.add(&attestation(data, &[2, 3]));

        assert_eq!(service.aggregates[&data].len(), 2);
    }

    #[test]
    fn included_attestations_are_removed() {
        let mut service = service();
        let data = data_at_slot(3);

        service.add(&attestation(data, &[0, 1]));
        service.remove_covered_by(&attestation(data, &[0, 1, 2]));

        assert!(!service.aggregates.contains_key(&data));
    }

    #[test]
    fn expired_groups_are_discarded_on_slot() {
        let spec = ChainSpec::minimal();
        let mut service = service();

        service.add(&attestation(data_at_slot(1), &[0]));
        service.add(&attestation(data_at_slot(5), &[0]));

        service.discard_expired(spec.slots_per_epoch.get() + 2);

        assert!(!service.aggregates.contains_key(&data_at_slot(1)));
        assert!(service.aggregates.contains_key(&data_at_slot(5)));
    }

    #[test]
    fn infinity_signatures_aggregate() {
        let mut aggregate = AggregateSignatureBytes::infinity();

        aggregate
            .aggregate_in_place(SignatureBytes::infinity())
            .expect("the point at infinity is a valid compressed signature");
    }
}
