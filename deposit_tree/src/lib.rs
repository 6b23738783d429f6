//! The deposit contract Merkle tree.
//!
//! Mirrors the incremental Merkle tree maintained by the deposit contract on
//! the execution chain: a binary tree of fixed depth whose first
//! `deposit_count` leaves are `DepositData` roots and whose remaining leaves
//! are zero. The tree root with the leaf count mixed in must match
//! `Eth1Data.deposit_root`, and the proofs produced here are the ones
//! included in blocks alongside each deposit.
//!
//! Leaves are retained so that proofs can be generated against any past tree
//! size. The whole tree is rebuilt per operation; deposit volume is low
//! enough that this has never shown up in profiles.

use std::sync::LazyLock;

use sha2::{Digest as _, Sha256};
use ssz_derive::{Decode, Encode};
use thiserror::Error;
use tree_hash::TreeHash as _;
use types::{
    consts::DEPOSIT_CONTRACT_TREE_DEPTH,
    containers::DepositData,
    primitives::{DepositIndex, ExecutionBlockNumber, H256},
};

static ZERO_HASHES: LazyLock<[H256; DEPOSIT_CONTRACT_TREE_DEPTH + 1]> = LazyLock::new(|| {
    let mut hashes = [H256::ZERO; DEPOSIT_CONTRACT_TREE_DEPTH + 1];

    for depth in 1..=DEPOSIT_CONTRACT_TREE_DEPTH {
        hashes[depth] = hash_pair(hashes[depth - 1], hashes[depth - 1]);
    }

    hashes
});

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum Error {
    #[error("deposit index {index} does not match deposit count {deposit_count}")]
    IndexOutOfOrder {
        index: DepositIndex,
        deposit_count: DepositIndex,
    },
    #[error("deposit tree is full")]
    Full,
    #[error("no deposit at index {index} with {deposit_count} deposits")]
    MissingDeposit {
        index: DepositIndex,
        deposit_count: DepositIndex,
    },
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Encode, Decode)]
pub struct DepositTree {
    leaves: Vec<H256>,
    pub last_added_block_number: ExecutionBlockNumber,
}

impl DepositTree {
    #[must_use]
    pub fn deposit_count(&self) -> DepositIndex {
        self.leaves.len() as DepositIndex
    }

    /// Appends a deposit. `index` must equal the current deposit count;
    /// deposit logs are only ever applied in order.
    pub fn push(&mut self, index: DepositIndex, data: &DepositData) -> Result<(), Error> {
        let deposit_count = self.deposit_count();

        if index != deposit_count {
            return Err(Error::IndexOutOfOrder {
                index,
                deposit_count,
            });
        }

        if deposit_count >= max_deposits() {
            return Err(Error::Full);
        }

        self.leaves.push(data.tree_hash_root());

        Ok(())
    }

    /// The tree root with the deposit count mixed in, as committed to by
    /// `Eth1Data.deposit_root`.
    #[must_use]
    pub fn root(&self) -> H256 {
        self.root_at_count(self.deposit_count())
    }

    /// The root the tree had when it contained `deposit_count` deposits.
    #[must_use]
    pub fn root_at_count(&self, deposit_count: DepositIndex) -> H256 {
        let leaves = &self.leaves[..(deposit_count as usize).min(self.leaves.len())];
        mix_in_length(merkle_root(leaves), deposit_count)
    }

    /// A bottom-up inclusion proof for the deposit at `index` in the tree of
    /// `deposit_count` deposits. The last element is the mixed-in length
    /// chunk, making the proof `DEPOSIT_CONTRACT_TREE_DEPTH + 1` long.
    pub fn proof(
        &self,
        index: DepositIndex,
        deposit_count: DepositIndex,
    ) -> Result<Vec<H256>, Error> {
        if index >= deposit_count || deposit_count > self.deposit_count() {
            return Err(Error::MissingDeposit {
                index,
                deposit_count,
            });
        }

        let mut proof = Vec::with_capacity(DEPOSIT_CONTRACT_TREE_DEPTH + 1);
        let mut layer = self.leaves[..deposit_count as usize].to_vec();
        let mut position = index as usize;

        for depth in 0..DEPOSIT_CONTRACT_TREE_DEPTH {
            let sibling = if position % 2 == 0 {
                layer.get(position + 1).copied().unwrap_or(ZERO_HASHES[depth])
            } else {
                layer[position - 1]
            };

            proof.push(sibling);
            layer = next_layer(&layer, depth);
            position /= 2;
        }

        proof.push(length_chunk(deposit_count));

        Ok(proof)
    }
}

/// Checks a proof produced by [`DepositTree::proof`] against a deposit root.
#[must_use]
pub fn is_valid_proof(leaf: H256, proof: &[H256], index: DepositIndex, root: H256) -> bool {
    if proof.len() != DEPOSIT_CONTRACT_TREE_DEPTH + 1 {
        return false;
    }

    let mut node = leaf;
    let mut position = index;

    for sibling in &proof[..DEPOSIT_CONTRACT_TREE_DEPTH] {
        node = if position % 2 == 0 {
            hash_pair(node, *sibling)
        } else {
            hash_pair(*sibling, node)
        };

        position /= 2;
    }

    hash_pair(node, proof[DEPOSIT_CONTRACT_TREE_DEPTH]) == root
}

const fn max_deposits() -> DepositIndex {
    1 << DEPOSIT_CONTRACT_TREE_DEPTH
}

fn merkle_root(leaves: &[H256]) -> H256 {
    if leaves.is_empty() {
        return ZERO_HASHES[DEPOSIT_CONTRACT_TREE_DEPTH];
    }

    let mut layer = leaves.to_vec();

    for depth in 0..DEPOSIT_CONTRACT_TREE_DEPTH {
        layer = next_layer(&layer, depth);
    }

    layer[0]
}

fn next_layer(layer: &[H256], depth: usize) -> Vec<H256> {
    layer
        .chunks(2)
        .map(|pair| match *pair {
            [left, right] => hash_pair(left, right),
            [left] => hash_pair(left, ZERO_HASHES[depth]),
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}

fn mix_in_length(root: H256, length: DepositIndex) -> H256 {
    hash_pair(root, length_chunk(length))
}

fn length_chunk(length: DepositIndex) -> H256 {
    let mut chunk = H256::ZERO;
    chunk.0[..8].copy_from_slice(&length.to_le_bytes());
    chunk
}

fn hash_pair(left: H256, right: H256) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    H256::from_slice(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use bls::PublicKeyBytes;
    use test_case::test_case;

    use super::*;

    fn deposit_data(seed: u8) -> DepositData {
        DepositData {
            pubkey: PublicKeyBytes([seed; bls::PUBLIC_KEY_LENGTH]),
            withdrawal_credentials: H256::repeat_byte(seed),
            amount: 32_000_000_000,
            ..DepositData::default()
        }
    }

    fn tree_with_deposits(count: u64) -> DepositTree {
        let mut tree = DepositTree::default();

        for index in 0..count {
            tree.push(index, &deposit_data(index as u8))
                .expect("indices are pushed in order");
        }

        tree
    }

    #[test]
    fn rejects_out_of_order_deposits() {
        let mut tree = tree_with_deposits(2);

        assert_eq!(
            tree.push(5, &deposit_data(5)),
            Err(Error::IndexOutOfOrder {
                index: 5,
                deposit_count: 2,
            }),
        );
    }

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(3)]
    #[test_case(7)]
    fn proofs_verify_against_the_root(count: u64) {
        let tree = tree_with_deposits(count);
        let root = tree.root();

        for index in 0..count {
            let proof = tree.proof(index, count).expect("deposit is present");
            let leaf = deposit_data(index as u8).tree_hash_root();

            assert!(
                is_valid_proof(leaf, &proof, index, root),
                "proof for deposit {index} of {count} must verify",
            );
        }
    }

    #[test]
    fn proofs_verify_against_past_roots() {
        let tree = tree_with_deposits(5);
        let past_root = tree.root_at_count(3);

        let proof = tree.proof(1, 3).expect("deposit is present");
        let leaf = deposit_data(1).tree_hash_root();

        assert!(is_valid_proof(leaf, &proof, 1, past_root));
        assert!(!is_valid_proof(leaf, &proof, 1, tree.root()));
    }

    #[test]
    fn empty_tree_has_the_zero_root() {
        let tree = DepositTree::default();

        assert_eq!(
            tree.root(),
            mix_in_length(
                hash_pair(
                    ZERO_HASHES[DEPOSIT_CONTRACT_TREE_DEPTH - 1],
                    ZERO_HASHES[DEPOSIT_CONTRACT_TREE_DEPTH - 1],
                ),
                0,
            ),
        );
    }
}
