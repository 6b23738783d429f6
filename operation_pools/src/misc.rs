use anyhow::Error;
use fork_choice_store::GossipId;
use serde::Serialize;
use strum::IntoStaticStr;

pub enum Origin {
    Api,
    Gossip(GossipId),
}

pub enum PoolAdditionOutcome {
    Accept,
    Ignore,
    Reject(PoolRejectionReason, Error),
}

impl PoolAdditionOutcome {
    #[must_use]
    pub const fn is_publishable(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

#[expect(clippy::enum_variant_names)]
#[derive(Clone, Copy, Debug, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum PoolRejectionReason {
    InvalidAttestation,
    InvalidAttesterSlashing,
    InvalidProposerSlashing,
    InvalidVoluntaryExit,
}
