//! Proof verification
//!
//! Pure and total: reconstruction never touches a store and never fails,
//! it either produces the implied root hash or `None` for input that
//! could not have been produced by a prover. Callers compare the result
//! against a known root.

use super::{Proof, Step};
use crate::tree::{
    hash::{
        branch_hash, key_path, leaf_hash, merkle_root_16, merkle_root_from_proof_16, value_hash,
        CryptoHash, BRANCH_WIDTH, NULL_HASH,
    },
    nibbles::{Nibbles, MAX_PREFIX_NIBBLES},
};

impl Proof {
    /// Reconstructs the root hash this proof implies for `key`.
    ///
    /// With `including_item` the subject is a leaf holding `key` and
    /// `value` (which is then required); without it, the subject position
    /// is empty and `value` is ignored. The two modes yield the roots of
    /// two tries differing by exactly that one key: present with that
    /// value, and absent. Given the proof and the absent-root, the
    /// present-root is therefore computable without the trie, and vice
    /// versa.
    pub fn verify(
        &self,
        key: &[u8],
        value: Option<&[u8]>,
        including_item: bool,
    ) -> Option<CryptoHash> {
        let path_bytes = key_path(key);
        let target = if including_item {
            leaf_hash(&path_bytes, &value_hash(value?))
        } else {
            NULL_HASH
        };
        let path = Nibbles::from_path(&path_bytes);
        self.walk(&path, 0, 0, target, including_item)
    }

    /// Folds the steps deepest-first: the recursion computes the hash of
    /// the subtree below the current step, then rebuilds this step's
    /// branch around it.
    fn walk(
        &self,
        path: &Nibbles,
        index: usize,
        cursor: usize,
        target: CryptoHash,
        including: bool,
    ) -> Option<CryptoHash> {
        let Some(step) = self.steps.get(index) else {
            // past the last step sits the subject itself
            return Some(target);
        };
        match step {
            Step::Branch { skip, neighbors } => {
                let nibble_at = cursor.checked_add(*skip)?;
                if nibble_at >= path.len() {
                    return None;
                }
                let nibble = path.at(nibble_at);
                let below = self.walk(path, index + 1, nibble_at + 1, target, including)?;
                let merkle = merkle_root_from_proof_16(nibble, &below, neighbors);
                Some(branch_hash(&path.slice_range(cursor, nibble_at), &merkle))
            }
            Step::Fork { skip, neighbor } => {
                if index + 1 != self.steps.len() {
                    return None;
                }
                let nibble_at = cursor.checked_add(*skip)?;
                if nibble_at >= path.len()
                    || neighbor.nibble > 15
                    || neighbor.nibble == path.at(nibble_at)
                    || skip + 1 + neighbor.prefix.len() > MAX_PREFIX_NIBBLES
                {
                    return None;
                }
                if including {
                    // the branch splits: subject and demoted branch side
                    // by side under the shared prefix
                    let mut slots = [NULL_HASH; BRANCH_WIDTH];
                    slots[path.at(nibble_at) as usize] = target;
                    slots[neighbor.nibble as usize] =
                        branch_hash(&neighbor.prefix, &neighbor.root);
                    Some(branch_hash(
                        &path.slice_range(cursor, nibble_at),
                        &merkle_root_16(&slots),
                    ))
                } else {
                    // the branch as it stands, prefix unsplit
                    let mut prefix = path.slice_range(cursor, nibble_at);
                    prefix.push(neighbor.nibble);
                    prefix.extend(&neighbor.prefix);
                    Some(branch_hash(&prefix, &neighbor.root))
                }
            }
            Step::Leaf { skip, neighbor } => {
                if index + 1 != self.steps.len() {
                    return None;
                }
                let nibble_at = cursor.checked_add(*skip)?;
                if nibble_at >= path.len() {
                    return None;
                }
                let neighbor_path = Nibbles::from_path(&neighbor.path);
                if neighbor_path.at(nibble_at) == path.at(nibble_at) {
                    return None;
                }
                let neighbor_hash = leaf_hash(&neighbor.path, &neighbor.value_hash);
                if including {
                    // the leaf splits into a two-leaf branch
                    let mut slots = [NULL_HASH; BRANCH_WIDTH];
                    slots[path.at(nibble_at) as usize] = target;
                    slots[neighbor_path.at(nibble_at) as usize] = neighbor_hash;
                    Some(branch_hash(
                        &path.slice_range(cursor, nibble_at),
                        &merkle_root_16(&slots),
                    ))
                } else {
                    // the leaf alone occupies this position
                    Some(neighbor_hash)
                }
            }
        }
    }
}
