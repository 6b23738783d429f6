use std::sync::{mpsc::Sender, Arc};

use fork_choice_store::{BlockOrigin, Store};
use types::containers::SignedBeaconBlock;

use crate::{messages::MutatorMessage, wait::Wait};

// Block validation runs the state transition, which dominates processing
// time, so it runs on blocking executor threads against a snapshot. The
// mutator revalidates cheaply-checkable conditions when applying.
pub struct BlockTask<W> {
    pub store_snapshot: Arc<Store>,
    pub mutator_tx: Sender<MutatorMessage<W>>,
    pub wait_group: W,
    pub block: Arc<SignedBeaconBlock>,
    pub origin: BlockOrigin,
}

impl<W: Wait> BlockTask<W> {
    pub fn run(self) {
        let Self {
            store_snapshot,
            mutator_tx,
            wait_group,
            block,
            origin,
        } = self;

        let result = store_snapshot.validate_block(block);

        MutatorMessage::Block {
            wait_group,
            result,
            origin,
        }
        .send(&mutator_tx);
    }
}
