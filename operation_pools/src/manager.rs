use std::sync::Arc;

use anyhow::Result;
use fork_choice_control::PoolMessage;
use futures::{channel::mpsc::UnboundedReceiver, stream::StreamExt as _};

use crate::{
    attestation_agg_pool::AttestationAggPool, attester_slashing_pool::AttesterSlashingPool,
    proposer_slashing_pool::ProposerSlashingPool, voluntary_exit_pool::VoluntaryExitPool,
};

/// Routes fork choice notifications to the individual pools.
///
/// This is the only place where the verified-block fan-out happens; the
/// pools never hold a reference to the importer.
pub struct PoolManager {
    attestation_agg_pool: Arc<AttestationAggPool>,
    attester_slashing_pool: Arc<AttesterSlashingPool>,
    proposer_slashing_pool: Arc<ProposerSlashingPool>,
    voluntary_exit_pool: Arc<VoluntaryExitPool>,
    fork_choice_rx: UnboundedReceiver<PoolMessage>,
}

impl PoolManager {
    #[must_use]
    pub fn new(
        attestation_agg_pool: Arc<AttestationAggPool>,
        attester_slashing_pool: Arc<AttesterSlashingPool>,
        proposer_slashing_pool: Arc<ProposerSlashingPool>,
        voluntary_exit_pool: Arc<VoluntaryExitPool>,
        fork_choice_rx: UnboundedReceiver<PoolMessage>,
    ) -> Self {
        Self {
            attestation_agg_pool,
            attester_slashing_pool,
            proposer_slashing_pool,
            voluntary_exit_pool,
            fork_choice_rx,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.fork_choice_rx.next().await {
            match message {
                PoolMessage::Slot(slot) => {
                    self.attestation_agg_pool.on_slot(slot);
                    self.attester_slashing_pool.discard_stale_attester_slashings();
                    self.proposer_slashing_pool.discard_stale_proposer_slashings();
                    self.voluntary_exit_pool.discard_stale_voluntary_exits();
                }
                PoolMessage::ValidAttestation(attestation) => {
                    self.attestation_agg_pool.add_attestation(attestation);
                }
                PoolMessage::ImportedBlock(block) => {
                    let body = &block.message.body;

                    self.attestation_agg_pool
                        .remove_included(body.attestations.to_vec());
                    self.attester_slashing_pool
                        .remove_included(body.attester_slashings.to_vec());
                    self.proposer_slashing_pool
                        .remove_included(body.proposer_slashings.to_vec());
                    self.voluntary_exit_pool
                        .remove_included(body.voluntary_exits.to_vec());
                }
                PoolMessage::FinalizedCheckpoint(_) => {
                    // Finality can invalidate operations wholesale, most
                    // visibly exits for validators slashed on the now-final
                    // chain.
                    self.attester_slashing_pool.discard_stale_attester_slashings();
                    self.proposer_slashing_pool.discard_stale_proposer_slashings();
                    self.voluntary_exit_pool.discard_stale_voluntary_exits();
                }
                PoolMessage::Stop => break,
            }
        }

        Ok(())
    }
}
