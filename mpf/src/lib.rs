//! # Merkle Patricia Forestry
//!
//! An authenticated key/value store: a radix-16 Patricia trie whose branch
//! nodes are themselves miniature Merkle trees over their sixteen child
//! slots. The whole mapping is committed to by one 32-byte root hash, and
//! a proof logarithmic in the number of items convinces a verifier that a
//! key is present with a value, or absent, without access to the data.
//!
//! The same proof serves double duty: it witnesses *inclusion* against the
//! root holding the key and *exclusion* against the root lacking it, so an
//! insertion's new root can be computed from the old root and a proof
//! alone.
//!
//! Keys are routed by the 64 nibbles of their blake2b-256 digest. Nodes
//! live in an asynchronous backing store and page in on demand; [`save`]
//! writes the working set back and prunes it to hash references.
//!
//! ```no_run
//! # async fn demo() -> Result<(), mpf::Error> {
//! use mpf::{storage::MemoryStore, Trie};
//!
//! let mut trie = Trie::new(MemoryStore::new());
//! trie.insert(b"apple", "\u{1f34e}".as_bytes()).await?;
//! let root = trie.save().await?;
//!
//! let proof = trie.prove(b"apple").await?;
//! assert_eq!(proof.verify(b"apple", Some("\u{1f34e}".as_bytes()), true), Some(root));
//! # Ok(())
//! # }
//! ```
//!
//! [`save`]: Trie::save

pub mod error;
pub mod proofs;
pub mod tree;
pub mod trie;

#[cfg(test)]
mod proptests;

pub use mpf_storage as storage;

pub use crate::{
    error::Error,
    proofs::{ForkNeighbor, LeafNeighbor, Proof, Step},
    tree::{
        hash::{CryptoHash, HASH_LENGTH, NULL_HASH},
        nibbles::Nibbles,
        BranchNode, LeafNode, Link, Node,
    },
    trie::Trie,
};
