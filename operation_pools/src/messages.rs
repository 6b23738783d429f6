use fork_choice_store::GossipId;
use futures::channel::mpsc::UnboundedSender;
use log::debug;
use types::containers::{AttesterSlashing, ProposerSlashing, SignedVoluntaryExit};

use crate::misc::PoolRejectionReason;

pub enum PoolToP2pMessage {
    Accept(GossipId),
    Ignore(GossipId),
    Reject(GossipId, PoolRejectionReason),
    PublishAttesterSlashing(Box<AttesterSlashing>),
    PublishProposerSlashing(Box<ProposerSlashing>),
    PublishVoluntaryExit(Box<SignedVoluntaryExit>),
}

impl PoolToP2pMessage {
    pub(crate) fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to p2p failed because the receiver was dropped");
        }
    }
}
