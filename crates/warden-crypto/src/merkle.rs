//! Merkle-batched signatures — the amortized half of the Cryptographic
//! Envelope (`spec.md` §4.1).
//!
//! A replica accumulates message digests in a FIFO and signs their Merkle
//! root once the batch reaches `SIG_THRESHOLD` entries or a timer fires
//! (the timer itself lives in `warden-vsr`, keyed by the `TimerId` this
//! batch is constructed under — see `warden-vsr::timers`). Each batched
//! message then carries a `MerkleProof` of at most `MAX_MERKLE_DIGESTS`
//! sibling hashes plus the one signature over the root.

use sha1::{Digest as _, Sha1};
use warden_types::Digest;

use crate::error::{CryptoError, Result};

/// `ceil(log2(SIG_THRESHOLD))` for `SIG_THRESHOLD = 64` (`spec.md` §6).
pub const MAX_MERKLE_DIGESTS: usize = 6;

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha1::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    let out = hasher.finalize();
    let mut buf = [0u8; 20];
    buf.copy_from_slice(&out);
    Digest::new(buf)
}

/// A FIFO of pending leaf digests awaiting a batch signature.
#[derive(Debug, Default)]
pub struct MerkleBatch {
    leaves: Vec<Digest>,
}

impl MerkleBatch {
    pub fn new() -> Self {
        Self { leaves: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Appends a digest to the batch, returning its leaf index.
    pub fn push(&mut self, leaf: Digest) -> usize {
        self.leaves.push(leaf);
        self.leaves.len() - 1
    }

    /// True once the batch has reached `threshold` entries (SIG_THRESHOLD).
    pub fn is_full(&self, threshold: usize) -> bool {
        self.leaves.len() >= threshold
    }

    /// Drains the batch into a built tree, ready for a single root
    /// signature. Returns `None` for an empty batch (nothing to sign).
    pub fn take(&mut self) -> Option<MerkleTree> {
        if self.leaves.is_empty() {
            return None;
        }
        let leaves = std::mem::take(&mut self.leaves);
        Some(MerkleTree::build(leaves))
    }
}

/// A built Merkle tree over one batch of leaf digests.
///
/// Levels are stored bottom-up; an odd node at a level is carried forward
/// unchanged (duplicated-last-node padding is avoided — it would let a
/// Byzantine batch producer create ambiguous trees for odd leaf counts).
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    fn build(leaves: Vec<Digest>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().unwrap().len() > 1 {
            let prev = levels.last().unwrap();
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            let mut i = 0;
            while i < prev.len() {
                if i + 1 < prev.len() {
                    next.push(hash_pair(&prev[i], &prev[i + 1]));
                } else {
                    next.push(prev[i]);
                }
                i += 2;
            }
            levels.push(next);
        }
        Self { levels }
    }

    pub fn root(&self) -> Digest {
        self.levels.last().unwrap()[0]
    }

    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Builds the sibling-path proof for `leaf_index`.
    pub fn proof(&self, leaf_index: usize) -> Result<MerkleProof> {
        if leaf_index >= self.levels[0].len() {
            return Err(CryptoError::InvalidMerkleProof);
        }
        let mut siblings = Vec::with_capacity(MAX_MERKLE_DIGESTS);
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = index ^ 1;
            if let Some(&sibling) = level.get(sibling_index) {
                siblings.push(sibling);
            }
            index /= 2;
        }
        if siblings.len() > MAX_MERKLE_DIGESTS {
            return Err(CryptoError::MerkleProofTooLarge {
                got: siblings.len(),
                max: MAX_MERKLE_DIGESTS,
            });
        }
        Ok(MerkleProof {
            leaf_index,
            siblings,
        })
    }
}

/// Sibling digests plus a leaf index, carried on each batched outbound
/// message alongside the batch-root signature.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub siblings: Vec<Digest>,
}

impl MerkleProof {
    /// Recomputes the root from `leaf` and the sibling path, and checks it
    /// against `expected_root`. This is the verification half of CE for
    /// batched messages: the root's RSA signature is checked separately
    /// via `RsaVerifyingKey::verify_digest`.
    pub fn verify(&self, leaf: Digest, expected_root: Digest) -> Result<()> {
        let hash = self.recompute_root(leaf)?;
        if hash == expected_root {
            Ok(())
        } else {
            Err(CryptoError::InvalidMerkleProof)
        }
    }

    /// Walks `leaf` up the sibling path and returns the root it implies,
    /// without comparing against any expected value. The caller checks the
    /// root's signature separately (a batched wire message carries the
    /// proof and the root signature, not the root itself).
    pub fn recompute_root(&self, leaf: Digest) -> Result<Digest> {
        if self.siblings.len() > MAX_MERKLE_DIGESTS {
            return Err(CryptoError::MerkleProofTooLarge {
                got: self.siblings.len(),
                max: MAX_MERKLE_DIGESTS,
            });
        }
        let mut hash = leaf;
        let mut index = self.leaf_index;
        for sibling in &self.siblings {
            hash = if index % 2 == 0 {
                hash_pair(&hash, sibling)
            } else {
                hash_pair(sibling, &hash)
            };
            index /= 2;
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Digest {
        let mut buf = [0u8; 20];
        buf[0] = n;
        Digest::new(buf)
    }

    #[test]
    fn single_leaf_tree_root_is_the_leaf() {
        let tree = MerkleTree::build(vec![leaf(1)]);
        assert_eq!(tree.root(), leaf(1));
        let proof = tree.proof(0).unwrap();
        assert!(proof.siblings.is_empty());
        proof.verify(leaf(1), tree.root()).unwrap();
    }

    #[test]
    fn every_leaf_proof_verifies_against_the_root() {
        let leaves: Vec<_> = (0..13u8).map(leaf).collect();
        let tree = MerkleTree::build(leaves.clone());
        for (i, l) in leaves.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            assert!(proof.siblings.len() <= MAX_MERKLE_DIGESTS);
            proof.verify(*l, tree.root()).unwrap();
        }
    }

    #[test]
    fn tampered_leaf_fails_verification() {
        let leaves: Vec<_> = (0..8u8).map(leaf).collect();
        let tree = MerkleTree::build(leaves);
        let proof = tree.proof(3).unwrap();
        assert!(proof.verify(leaf(99), tree.root()).is_err());
    }

    #[test]
    fn batch_signals_full_at_threshold() {
        let mut batch = MerkleBatch::new();
        for i in 0..63u8 {
            batch.push(leaf(i));
            assert!(!batch.is_full(64));
        }
        batch.push(leaf(63));
        assert!(batch.is_full(64));
        let tree = batch.take().unwrap();
        assert_eq!(tree.len(), 64);
        assert!(batch.is_empty());
    }
}
