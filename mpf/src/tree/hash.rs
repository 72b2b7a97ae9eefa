use blake2::{digest::consts::U32, Blake2b, Digest};

use super::nibbles::Nibbles;

/// The length of a `Hash` (in bytes).
pub const HASH_LENGTH: usize = 32;

/// A zero-filled `Hash`. Denotes an empty (sub-)trie; never produced by the
/// hash function itself.
pub const NULL_HASH: CryptoHash = [0; HASH_LENGTH];

/// A cryptographic hash digest.
pub type CryptoHash = [u8; HASH_LENGTH];

/// Number of child slots in a branch, one per nibble.
pub const BRANCH_WIDTH: usize = 16;

/// Depth of the binary Merkle tree spanning a branch's child slots.
pub const MERKLE_DEPTH: usize = 4;

/// Byte length of the Merkle neighbors recorded by a branch proof step:
/// one sibling hash per Merkle level.
pub const NEIGHBORS_LENGTH: usize = MERKLE_DEPTH * HASH_LENGTH;

type Blake2b256 = Blake2b<U32>;

/// Hashes a byte string with blake2b-256.
pub fn digest(bytes: &[u8]) -> CryptoHash {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Hashes the concatenation of two digests.
pub fn combine(left: &CryptoHash, right: &CryptoHash) -> CryptoHash {
    let mut hasher = Blake2b256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// The routing path of a key: its digest, read as 64 nibbles.
pub fn key_path(key: &[u8]) -> CryptoHash {
    digest(key)
}

/// Pre-hash of a stored value.
pub fn value_hash(value: &[u8]) -> CryptoHash {
    digest(value)
}

/// Hashes a leaf given the full path of its key and the pre-hash of its
/// value.
///
/// The result is Hash(path, Hash(value)): both inputs are 32 bytes, so a
/// leaf commits to its key (through the path) and its value in constant
/// size, independently of where in the trie it sits.
pub fn leaf_hash(path: &CryptoHash, value_hash: &CryptoHash) -> CryptoHash {
    combine(path, value_hash)
}

/// Hashes a branch given its prefix and the Merkle root of its 16 child
/// slots.
pub fn branch_hash(prefix: &Nibbles, merkle_root: &CryptoHash) -> CryptoHash {
    let mut hasher = Blake2b256::new();
    hasher.update(prefix.hashing_form());
    hasher.update(merkle_root);
    hasher.finalize().into()
}

/// Computes the root of the fixed 4-level binary Merkle tree over a
/// branch's 16 child-slot hashes. Empty slots contribute [`NULL_HASH`].
pub fn merkle_root_16(slots: &[CryptoHash; BRANCH_WIDTH]) -> CryptoHash {
    let mut level = slots.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| combine(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Computes the Merkle neighbors of the slot selected by `nibble`: the 4
/// sibling subtree hashes a verifier needs to rebuild the branch's Merkle
/// root from that slot alone, widest level first (the 8-slot sibling root
/// down to the adjacent slot).
pub fn merkle_proof_16(slots: &[CryptoHash; BRANCH_WIDTH], nibble: u8) -> [u8; NEIGHBORS_LENGTH] {
    debug_assert!((nibble as usize) < BRANCH_WIDTH);

    let mut levels: Vec<Vec<CryptoHash>> = Vec::with_capacity(MERKLE_DEPTH);
    let mut level = slots.to_vec();
    while level.len() > 1 {
        levels.push(level.clone());
        level = level
            .chunks(2)
            .map(|pair| combine(&pair[0], &pair[1]))
            .collect();
    }

    let mut neighbors = [0u8; NEIGHBORS_LENGTH];
    let index = nibble as usize;
    for (out, level) in levels.iter().rev().enumerate() {
        // At the level with 2^(out+1) nodes, our subtree is the one the
        // slot index selects by its high bits; the neighbor is its sibling.
        let shift = MERKLE_DEPTH - 1 - out;
        let sibling = (index >> shift) ^ 1;
        neighbors[out * HASH_LENGTH..(out + 1) * HASH_LENGTH].copy_from_slice(&level[sibling]);
    }
    neighbors
}

/// Rebuilds a branch's Merkle root from the hash sitting in the slot
/// selected by `nibble` and the neighbors recorded by [`merkle_proof_16`].
pub fn merkle_root_from_proof_16(
    nibble: u8,
    slot: &CryptoHash,
    neighbors: &[u8; NEIGHBORS_LENGTH],
) -> CryptoHash {
    debug_assert!((nibble as usize) < BRANCH_WIDTH);

    let index = nibble as usize;
    let mut acc = *slot;
    for level in 0..MERKLE_DEPTH {
        // Neighbors are stored widest level first; consume them from the
        // back, pairing at the adjacent slot upward.
        let offset = (MERKLE_DEPTH - 1 - level) * HASH_LENGTH;
        let mut neighbor = NULL_HASH;
        neighbor.copy_from_slice(&neighbors[offset..offset + HASH_LENGTH]);
        acc = if (index >> level) & 1 == 1 {
            combine(&neighbor, &acc)
        } else {
            combine(&acc, &neighbor)
        };
    }
    acc
}
