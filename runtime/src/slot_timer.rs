//! The wall-clock tick handler.
//!
//! Every tick first drives the fork choice store's own clock forward, then
//! decides which of the three per-slot phases are due: slot start,
//! attestation (a third into the slot) and aggregation (two thirds in).
//! Each phase fires at most once per slot, tracked by a per-phase high-water
//! mark of the slot it last fired at. `node_slot` is the slot the node is
//! currently working on; it normally advances in the aggregation phase and
//! jumps forward when the node falls behind or is catching up with the
//! network.

use core::panic::AssertUnwindSafe;
use std::sync::Arc;

use clock::Tick;
use fork_choice_control::{
    ApiMessage, Controller, EpochEvent, PoolMessage, SlotEvent, SyncSlotEvent, UnboundedSink,
    ValidatorMessage, Wait,
};
use log::warn;
use p2p::SyncGate;
use types::primitives::{Slot, UnixSeconds};

pub struct SlotTimer<W: Wait, LS, VS, AS> {
    controller: Arc<Controller<W>>,
    sync_gate: SyncGate,
    pool_tx: LS,
    validator_tx: VS,
    api_tx: AS,
    node_slot: Slot,
    on_tick_slot_start: Option<Slot>,
    on_tick_slot_attestation: Option<Slot>,
    on_tick_slot_aggregate: Option<Slot>,
}

impl<W, LS, VS, AS> SlotTimer<W, LS, VS, AS>
where
    W: Wait,
    LS: UnboundedSink<PoolMessage>,
    VS: UnboundedSink<ValidatorMessage<W>>,
    AS: UnboundedSink<ApiMessage>,
{
    #[must_use]
    pub fn new(
        controller: Arc<Controller<W>>,
        sync_gate: SyncGate,
        pool_tx: LS,
        validator_tx: VS,
        api_tx: AS,
    ) -> Self {
        let node_slot = controller.slot();

        Self {
            controller,
            sync_gate,
            pool_tx,
            validator_tx,
            api_tx,
            node_slot,
            on_tick_slot_start: None,
            on_tick_slot_attestation: None,
            on_tick_slot_aggregate: None,
        }
    }

    #[must_use]
    pub const fn node_slot(&self) -> Slot {
        self.node_slot
    }

    /// The per-tick entry point. Never panics across the tick boundary:
    /// a panic inside a phase is caught and the phase still counts as fired,
    /// so the next tick does not retry it.
    pub fn handle_tick(&mut self, tick: Tick) {
        let spec = self.controller.chain_spec();
        let genesis_time = self.controller.genesis_time();
        let current_time = tick.time(&spec, genesis_time);

        // The store observes every tick, including those during catch-up.
        self.controller.on_tick(tick);

        let calculated_slot = tick.slot;

        // While the node is catching up it cannot usefully attest or
        // aggregate, so slot boundaries only run head selection and report
        // progress.
        if self.sync_gate.is_catching_up() {
            if calculated_slot >= self.node_slot {
                let head_root = self.controller.head();

                ApiMessage::SyncSlot(SyncSlotEvent {
                    node_slot: calculated_slot,
                    head_root,
                })
                .send(&self.api_tx);

                self.node_slot = calculated_slot + 1;
            }

            return;
        }

        // Tolerate at most one slot of drift; beyond that, skip ahead.
        if calculated_slot > self.node_slot + 1 {
            warn!(
                "node fell behind wall clock; skipping from slot {} to {calculated_slot}",
                self.node_slot,
            );

            self.node_slot = calculated_slot;
        }

        if self.start_due(calculated_slot) {
            self.on_tick_slot_start = Some(self.node_slot);
            self.run_phase(Self::process_slot_start);
        }

        if self.attestation_due(calculated_slot, current_time, genesis_time) {
            self.on_tick_slot_attestation = Some(self.node_slot);
            self.run_phase(Self::process_slot_attestation);
        }

        if self.aggregation_due(calculated_slot, current_time, genesis_time) {
            self.on_tick_slot_aggregate = Some(self.node_slot);
            self.run_phase(Self::process_slot_aggregate);
            self.node_slot += 1;
        }
    }

    fn start_due(&self, calculated_slot: Slot) -> bool {
        is_processing_due_for_slot(calculated_slot, self.on_tick_slot_start)
    }

    fn attestation_due(
        &self,
        calculated_slot: Slot,
        current_time: UnixSeconds,
        genesis_time: UnixSeconds,
    ) -> bool {
        let spec = self.controller.chain_spec();
        let earliest_time = spec.attestation_due_time(self.node_slot, genesis_time);

        is_processing_due_for_slot(calculated_slot, self.on_tick_slot_attestation)
            && current_time >= earliest_time
    }

    fn aggregation_due(
        &self,
        calculated_slot: Slot,
        current_time: UnixSeconds,
        genesis_time: UnixSeconds,
    ) -> bool {
        let spec = self.controller.chain_spec();
        let earliest_time = spec.aggregation_due_time(self.node_slot, genesis_time);

        is_processing_due_for_slot(calculated_slot, self.on_tick_slot_aggregate)
            && current_time >= earliest_time
    }

    fn process_slot_start(&mut self) {
        let spec = self.controller.chain_spec();

        if spec.is_epoch_start(self.node_slot) {
            let epoch = spec.epoch_at_slot(self.node_slot);
            let finalized = self.controller.finalized_checkpoint();

            ApiMessage::Epoch(EpochEvent {
                epoch,
                justified_epoch: self.controller.justified_checkpoint().epoch,
                finalized_epoch: finalized.epoch,
                finalized_root: finalized.root,
            })
            .send(&self.api_tx);
        }

        PoolMessage::Slot(self.node_slot).send(&self.pool_tx);
    }

    fn process_slot_attestation(&mut self) {
        let spec = self.controller.chain_spec();
        let head_root = self.controller.head();
        let finalized = self.controller.finalized_checkpoint();

        ApiMessage::Slot(SlotEvent {
            node_slot: self.node_slot,
            head_slot: self.controller.head_slot(),
            head_root,
            epoch: spec.epoch_at_slot(self.node_slot),
            finalized_epoch: finalized.epoch,
            finalized_root: finalized.root,
            peer_count: self.sync_gate.peer_count(),
        })
        .send(&self.api_tx);

        ValidatorMessage::BroadcastAttestation(head_root, self.node_slot).send(&self.validator_tx);
    }

    fn process_slot_aggregate(&mut self) {
        ValidatorMessage::BroadcastAggregates(self.node_slot).send(&self.validator_tx);
    }

    fn run_phase(&mut self, phase: fn(&mut Self)) {
        // The high-water mark has already been advanced, so a panicking
        // phase is not retried on the next tick.
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| phase(self))) {
            panics::log(payload);
        }
    }
}

fn is_processing_due_for_slot(calculated_slot: Slot, last_fired_at: Option<Slot>) -> bool {
    last_fired_at.is_none_or(|slot| slot < calculated_slot)
}
