// MIT LICENSE
//
// Copyright (c) 2021 Dash Core Group
//
// Permission is hereby granted, free of charge, to any
// person obtaining a copy of this software and associated
// documentation files (the "Software"), to deal in the
// Software without restriction, including without
// limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software
// is furnished to do so, subject to the following
// conditions:
//
// The above copyright notice and this permission notice
// shall be included in all copies or substantial portions
// of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF
// ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED
// TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A
// PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT
// SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY
// CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR
// IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Forestry trie engine
//!
//! The [`Trie`] handle owns the in-memory root and a backing store. Every
//! operation that may touch the store first materializes the nodes along
//! the key's path (the only suspension points), then performs pure
//! synchronous tree surgery, rehashing mutated nodes on the way back up.
//! Nodes not on the path stay pruned as hash references.

mod paging;

use tracing::trace;

use mpf_storage::Store;

use crate::{
    error::Error,
    proofs::{ForkNeighbor, LeafNeighbor, Proof, Step},
    tree::{
        hash::{key_path, merkle_proof_16, value_hash, CryptoHash},
        nibbles::{Nibbles, MAX_PREFIX_NIBBLES},
        BranchNode, LeafNode, Link, Node,
    },
};

/// An authenticated key/value store committed to by a single 32-byte root
/// hash.
///
/// Mutations update the in-memory representation in place; nothing reaches
/// the backing store until [`save`](Trie::save). At most one mutation may
/// be in flight at a time: a mutation entered while another one was
/// cancelled mid-flight fails fast with [`Error::ConcurrentMutation`], and
/// the handle must be discarded and reloaded.
pub struct Trie<S> {
    pub(crate) root: Link,
    pub(crate) store: S,
    pub(crate) in_flight: bool,
}

impl<S: Store> Trie<S> {
    /// Creates an empty trie over the given store.
    pub fn new(store: S) -> Self {
        Trie {
            root: Link::Empty,
            store,
            in_flight: false,
        }
    }

    /// Builds a trie by inserting every entry in order. The resulting root
    /// hash depends only on the set of entries, not on their order.
    pub async fn from_entries<I, K, V>(store: S, entries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut trie = Self::new(store);
        for (key, value) in entries {
            trie.insert(key.as_ref(), value.as_ref()).await?;
        }
        Ok(trie)
    }

    /// The root hash committing to the full content; all zeroes for an
    /// empty trie.
    pub fn root_hash(&self) -> CryptoHash {
        self.root.hash()
    }

    /// Whether the trie holds no items.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// A reference to the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The link holding the in-memory root: empty, loaded, or a hash
    /// reference for a trie opened by [`load`](Trie::load).
    pub fn root_link(&self) -> &Link {
        &self.root
    }

    /// Looks up the value stored under `key`, materializing pruned nodes
    /// along its path as needed.
    pub async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        self.check_available()?;
        let path = Nibbles::from_path(&key_path(key));
        self.materialize_path(&path).await?;
        Ok(lookup(&self.root, &path, key).map(|leaf| leaf.value().to_vec()))
    }

    /// Inserts `key`/`value`, replacing any existing value under the same
    /// key, and recomputes the hashes along the touched path.
    pub async fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.begin_mutation()?;
        let path = Nibbles::from_path(&key_path(key));
        if let Err(error) = self.materialize_path(&path).await {
            // nothing has been mutated yet
            self.in_flight = false;
            return Err(error);
        }
        let root = self.root.take();
        let new_root = insert_in(root, &path, 0, key, value)?;
        self.root = new_root;
        self.in_flight = false;
        Ok(())
    }

    /// Removes `key` if present. Removing an absent key leaves the trie
    /// unchanged and is not an error.
    pub async fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        self.begin_mutation()?;
        let path = Nibbles::from_path(&key_path(key));
        if let Err(error) = self.materialize_path(&path).await {
            self.in_flight = false;
            return Err(error);
        }
        if let Err(error) = self.materialize_collapse_sibling(&path, key).await {
            self.in_flight = false;
            return Err(error);
        }
        let root = self.root.take();
        let (new_root, _removed) = delete_in(root, &path, 0, key)?;
        self.root = new_root;
        self.in_flight = false;
        Ok(())
    }

    /// The node governing the given path prefix, if any: the walk follows
    /// the prefix nibble-by-nibble and also succeeds when it ends inside a
    /// node's own prefix run. Materializes pruned nodes along the way.
    pub async fn child_at(&mut self, prefix: &Nibbles) -> Result<Option<&Node>, Error> {
        self.check_available()?;
        self.materialize_path(prefix).await?;
        Ok(find_at(&self.root, prefix))
    }

    /// Builds a proof for `key` against the current content. The proof
    /// verifies in inclusion mode against the root of the trie holding
    /// `key`, and in exclusion mode against the root of the trie without
    /// it; the two differ by exactly that one key.
    pub async fn prove(&mut self, key: &[u8]) -> Result<Proof, Error> {
        self.check_available()?;
        let path = Nibbles::from_path(&key_path(key));
        self.materialize_path(&path).await?;
        self.materialize_collapse_sibling(&path, key).await?;
        let steps = prove_steps(&self.root, &path, key)?;
        Ok(Proof::from_steps(steps))
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.in_flight {
            return Err(Error::ConcurrentMutation);
        }
        Ok(())
    }

    fn begin_mutation(&mut self) -> Result<(), Error> {
        self.check_available()?;
        self.in_flight = true;
        Ok(())
    }

    /// Swaps hash references for materialized nodes along `path`, walking
    /// until the path is exhausted, diverges, or reaches a leaf. These
    /// fetches are the operation's only suspension points.
    async fn materialize_path(&mut self, path: &Nibbles) -> Result<(), Error> {
        let Trie { root, store, .. } = self;
        let mut link: &mut Link = root;
        let mut depth = 0usize;
        loop {
            materialize_link(store, &mut *link, depth).await?;
            let branch = match link {
                Link::Loaded(node) => match node.as_mut() {
                    Node::Branch(branch) => branch,
                    Node::Leaf(_) => return Ok(()),
                },
                _ => return Ok(()),
            };
            let rest = &path.as_slice()[depth..];
            let matched = branch.prefix.common_prefix_with(rest);
            if matched < branch.prefix.len() || depth + matched >= path.len() {
                return Ok(());
            }
            let nibble = path.at(depth + matched) as usize;
            depth += matched + 1;
            link = &mut branch.children[nibble];
        }
    }

    /// When `key` sits in a branch with exactly one sibling, deleting it
    /// collapses the branch into that sibling, and building the proof of
    /// `key` describes the collapsed shape. Both need the sibling's node,
    /// not just its hash, so fetch it up front.
    async fn materialize_collapse_sibling(
        &mut self,
        path: &Nibbles,
        key: &[u8],
    ) -> Result<(), Error> {
        let Trie { root, store, .. } = self;
        let mut link: &mut Link = root;
        let mut depth = 0usize;
        loop {
            let branch = match link {
                Link::Loaded(node) => match node.as_mut() {
                    Node::Branch(branch) => branch,
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            };
            let rest = &path.as_slice()[depth..];
            let matched = branch.prefix.common_prefix_with(rest);
            if matched < branch.prefix.len() || depth + matched >= path.len() {
                return Ok(());
            }
            let nibble = path.at(depth + matched) as usize;
            let child_is_key = matches!(
                branch.children[nibble].node(),
                Some(Node::Leaf(leaf)) if leaf.key() == key
            );
            if child_is_key {
                if let Some(sibling) = branch.lone_sibling(nibble) {
                    let consumed = depth + branch.prefix.len() + 1;
                    materialize_link(store, &mut branch.children[sibling], consumed).await?;
                }
                return Ok(());
            }
            depth += matched + 1;
            link = &mut branch.children[nibble];
        }
    }
}

impl<S> std::fmt::Display for Trie<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.root {
            Link::Empty => writeln!(f, "empty trie"),
            Link::Reference { hash } => writeln!(f, "#{}.. (not loaded)", hex::encode(&hash[..4])),
            Link::Loaded(node) => node.format(f, 0),
        }
    }
}

/// Fetches and verifies a node from the store. `depth` is the number of
/// path nibbles consumed above its position.
pub(crate) async fn fetch_node<S: Store>(
    store: &S,
    hash: &CryptoHash,
    depth: usize,
) -> Result<Node, Error> {
    let bytes = store
        .get(hash)
        .await?
        .ok_or_else(|| Error::CorruptNode(format!("missing node {}", hex::encode(hash))))?;
    let node = Node::decode(&bytes, depth)?;
    if node.hash() != *hash {
        return Err(Error::CorruptNode(format!(
            "node stored under {} hashes to {}",
            hex::encode(hash),
            hex::encode(node.hash())
        )));
    }
    trace!(hash = %hex::encode(hash), depth, "materialized node");
    Ok(node)
}

/// Replaces a reference link with its materialized node, in place.
pub(crate) async fn materialize_link<S: Store>(
    store: &S,
    link: &mut Link,
    depth: usize,
) -> Result<(), Error> {
    if link.is_reference() {
        let hash = link.hash();
        let node = fetch_node(store, &hash, depth).await?;
        *link = Link::Loaded(Box::new(node));
    }
    Ok(())
}

/// Pure lookup over materialized nodes. A reference on the path reads as
/// absent; the caller is expected to have materialized the path first.
fn lookup<'a>(root: &'a Link, path: &Nibbles, key: &[u8]) -> Option<&'a LeafNode> {
    let mut link = root;
    let mut depth = 0usize;
    loop {
        match link.node()? {
            Node::Leaf(leaf) => return (leaf.key() == key).then_some(leaf),
            Node::Branch(branch) => {
                let rest = &path.as_slice()[depth..];
                let matched = branch.prefix.common_prefix_with(rest);
                if matched < branch.prefix.len() || depth + matched >= path.len() {
                    return None;
                }
                let nibble = path.at(depth + matched) as usize;
                depth += matched + 1;
                link = &branch.children[nibble];
            }
        }
    }
}

/// Pure prefix descent for [`Trie::child_at`].
fn find_at<'a>(root: &'a Link, prefix: &Nibbles) -> Option<&'a Node> {
    let mut link = root;
    let mut depth = 0usize;
    loop {
        let node = link.node()?;
        let rest = &prefix.as_slice()[depth..];
        match node {
            Node::Leaf(leaf) => {
                let matched = leaf.suffix().common_prefix_with(rest);
                return (matched == rest.len()).then_some(node);
            }
            Node::Branch(branch) => {
                let matched = branch.prefix.common_prefix_with(rest);
                if matched == rest.len() {
                    // the requested prefix ends at or inside this branch
                    return Some(node);
                }
                if matched < branch.prefix.len() {
                    return None;
                }
                let nibble = prefix.at(depth + matched) as usize;
                depth += matched + 1;
                link = &branch.children[nibble];
            }
        }
    }
}

/// Pure recursive insertion over a materialized path, returning the new
/// subtree with its hashes recomputed bottom-up.
fn insert_in(
    link: Link,
    path: &Nibbles,
    depth: usize,
    key: &[u8],
    value: &[u8],
) -> Result<Link, Error> {
    match link {
        Link::Empty => Ok(Link::Loaded(Box::new(Node::Leaf(LeafNode::new(
            key.to_vec(),
            value.to_vec(),
            depth,
        ))))),
        Link::Reference { .. } => Err(Error::InvariantViolation(
            "pruned node on a mutation path".to_string(),
        )),
        Link::Loaded(mut boxed) => match boxed.as_mut() {
            Node::Leaf(leaf) => {
                if leaf.key() == key {
                    leaf.set_value(value.to_vec());
                    return Ok(Link::Loaded(boxed));
                }
                let new_suffix = path.slice(depth);
                let split = leaf.suffix().common_prefix_len(&new_suffix);
                if split == new_suffix.len() {
                    return Err(Error::InvariantViolation(
                        "two distinct keys share a full path".to_string(),
                    ));
                }
                if split > MAX_PREFIX_NIBBLES {
                    // agreeing on all but the last path nibble is as good
                    // as a collision
                    return Err(Error::InvariantViolation(format!(
                        "leaf split needs a branch prefix of {split} nibbles",
                    )));
                }
                let prefix = new_suffix.slice_range(0, split);
                let old_nibble = leaf.suffix().at(split) as usize;
                let new_nibble = new_suffix.at(split) as usize;
                let child_depth = depth + split + 1;
                leaf.shorten_suffix(split + 1);

                let mut children = BranchNode::empty_children();
                children[old_nibble] = Link::Loaded(boxed);
                children[new_nibble] = Link::Loaded(Box::new(Node::Leaf(LeafNode::new(
                    key.to_vec(),
                    value.to_vec(),
                    child_depth,
                ))));
                Ok(Link::Loaded(Box::new(Node::Branch(BranchNode::new(
                    prefix, children,
                )))))
            }
            Node::Branch(branch) => {
                let rest = &path.as_slice()[depth..];
                let matched = branch.prefix.common_prefix_with(rest);
                if matched == branch.prefix.len() {
                    if depth + matched >= path.len() {
                        return Err(Error::InvariantViolation(
                            "branch below the path's end".to_string(),
                        ));
                    }
                    let nibble = path.at(depth + matched) as usize;
                    let child = branch.children[nibble].take();
                    branch.children[nibble] =
                        insert_in(child, path, depth + matched + 1, key, value)?;
                    branch.rehash();
                    Ok(Link::Loaded(boxed))
                } else {
                    // the key diverges inside the prefix: split the branch,
                    // demoting it below a new two-child parent
                    let parent_prefix = branch.prefix.slice_range(0, matched);
                    let demoted_nibble = branch.prefix.at(matched) as usize;
                    let new_nibble = path.at(depth + matched) as usize;
                    let child_depth = depth + matched + 1;
                    branch.prefix = branch.prefix.slice(matched + 1);
                    branch.rehash();

                    let mut children = BranchNode::empty_children();
                    children[demoted_nibble] = Link::Loaded(boxed);
                    children[new_nibble] = Link::Loaded(Box::new(Node::Leaf(LeafNode::new(
                        key.to_vec(),
                        value.to_vec(),
                        child_depth,
                    ))));
                    Ok(Link::Loaded(Box::new(Node::Branch(BranchNode::new(
                        parent_prefix,
                        children,
                    )))))
                }
            }
        },
    }
}

/// Pure recursive deletion over a materialized path. Returns the new
/// subtree and whether a leaf was removed.
fn delete_in(link: Link, path: &Nibbles, depth: usize, key: &[u8]) -> Result<(Link, bool), Error> {
    match link {
        Link::Empty => Ok((Link::Empty, false)),
        Link::Reference { .. } => Err(Error::InvariantViolation(
            "pruned node on a mutation path".to_string(),
        )),
        Link::Loaded(mut boxed) => match boxed.as_mut() {
            Node::Leaf(leaf) => {
                if leaf.key() == key {
                    Ok((Link::Empty, true))
                } else {
                    Ok((Link::Loaded(boxed), false))
                }
            }
            Node::Branch(branch) => {
                let rest = &path.as_slice()[depth..];
                let matched = branch.prefix.common_prefix_with(rest);
                if matched < branch.prefix.len() {
                    return Ok((Link::Loaded(boxed), false));
                }
                if depth + matched >= path.len() {
                    return Err(Error::InvariantViolation(
                        "branch below the path's end".to_string(),
                    ));
                }
                let nibble = path.at(depth + matched) as usize;
                let child = branch.children[nibble].take();
                let (new_child, removed) = delete_in(child, path, depth + matched + 1, key)?;
                branch.children[nibble] = new_child;
                if !removed {
                    return Ok((Link::Loaded(boxed), false));
                }
                if !branch.children[nibble].is_empty() {
                    // the subtree restructured below; the slot stays occupied
                    branch.rehash();
                    return Ok((Link::Loaded(boxed), true));
                }
                match branch.child_count() {
                    0 => Ok((Link::Empty, true)),
                    1 => {
                        let sibling_index = branch.lone_sibling(nibble).ok_or_else(|| {
                            Error::InvariantViolation("lost sibling during collapse".to_string())
                        })?;
                        let sibling = branch.children[sibling_index].take();
                        let Link::Loaded(mut sibling_node) = sibling else {
                            return Err(Error::InvariantViolation(
                                "collapse sibling not materialized".to_string(),
                            ));
                        };
                        // merge the branch into its survivor: its prefix, the
                        // survivor's slot nibble, then the survivor's own run
                        let mut joined = branch.prefix.clone();
                        joined.push(sibling_index as u8);
                        match sibling_node.as_mut() {
                            Node::Leaf(leaf) => leaf.lengthen_suffix(joined),
                            Node::Branch(lower) => {
                                joined.extend(&lower.prefix);
                                lower.prefix = joined;
                                lower.rehash();
                            }
                        }
                        Ok((Link::Loaded(sibling_node), true))
                    }
                    _ => {
                        branch.rehash();
                        Ok((Link::Loaded(boxed), true))
                    }
                }
            }
        },
    }
}

/// Walks from the root toward `key`, recording what a verifier needs at
/// each traversed branch. The walk describes the trie *without* the key:
/// when the key is present below a branch with a single sibling, the step
/// records the shape that branch collapses into, so that the proof also
/// verifies against the post-deletion root.
fn prove_steps(root: &Link, path: &Nibbles, key: &[u8]) -> Result<Vec<Step>, Error> {
    let mut steps = Vec::new();
    let mut link = root;
    let mut depth = 0usize;
    loop {
        let node = match link {
            Link::Empty => return Ok(steps),
            Link::Reference { .. } => {
                return Err(Error::InvariantViolation(
                    "pruned node on a proof path".to_string(),
                ))
            }
            Link::Loaded(node) => node.as_ref(),
        };
        match node {
            Node::Leaf(leaf) => {
                if leaf.key() == key {
                    // the target's own hash is the verifier's starting point
                    return Ok(steps);
                }
                let rest = path.slice(depth);
                let skip = leaf.suffix().common_prefix_len(&rest);
                if skip == rest.len() {
                    return Err(Error::InvariantViolation(
                        "two distinct keys share a full path".to_string(),
                    ));
                }
                steps.push(Step::Leaf {
                    skip,
                    neighbor: LeafNeighbor {
                        path: *leaf.path(),
                        value_hash: value_hash(leaf.value()),
                    },
                });
                return Ok(steps);
            }
            Node::Branch(branch) => {
                let rest = &path.as_slice()[depth..];
                let matched = branch.prefix.common_prefix_with(rest);
                if matched < branch.prefix.len() {
                    steps.push(Step::Fork {
                        skip: matched,
                        neighbor: ForkNeighbor {
                            nibble: branch.prefix.at(matched),
                            prefix: branch.prefix.slice(matched + 1),
                            root: branch.merkle_root(),
                        },
                    });
                    return Ok(steps);
                }
                if depth + matched >= path.len() {
                    return Err(Error::InvariantViolation(
                        "branch below the path's end".to_string(),
                    ));
                }
                let nibble = path.at(depth + matched);
                let child = &branch.children[nibble as usize];
                let child_is_key =
                    matches!(child.node(), Some(Node::Leaf(leaf)) if leaf.key() == key);
                if child_is_key {
                    if let Some(sibling_index) = branch.lone_sibling(nibble as usize) {
                        let sibling = branch.children[sibling_index].node().ok_or_else(|| {
                            Error::InvariantViolation(
                                "collapse sibling not materialized".to_string(),
                            )
                        })?;
                        let skip = branch.prefix.len();
                        match sibling {
                            Node::Leaf(leaf) => steps.push(Step::Leaf {
                                skip,
                                neighbor: LeafNeighbor {
                                    path: *leaf.path(),
                                    value_hash: value_hash(leaf.value()),
                                },
                            }),
                            Node::Branch(lower) => steps.push(Step::Fork {
                                skip,
                                neighbor: ForkNeighbor {
                                    nibble: sibling_index as u8,
                                    prefix: lower.prefix().clone(),
                                    root: lower.merkle_root(),
                                },
                            }),
                        }
                        return Ok(steps);
                    }
                }
                steps.push(Step::Branch {
                    skip: matched,
                    neighbors: merkle_proof_16(&branch.children_hashes(), nibble),
                });
                if child_is_key || child.is_empty() {
                    return Ok(steps);
                }
                depth += matched + 1;
                link = child;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use mpf_storage::{Error as StorageError, MemoryStore, StorageBatch, Store};

    use super::*;

    /// A store whose operations never resolve, for exercising suspension
    /// behavior.
    struct PendingStore;

    #[async_trait]
    impl Store for PendingStore {
        async fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
            std::future::pending().await
        }

        async fn put(&self, _key: &[u8], _value: &[u8]) -> Result<(), StorageError> {
            std::future::pending().await
        }

        async fn delete(&self, _key: &[u8]) -> Result<(), StorageError> {
            std::future::pending().await
        }

        async fn exists(&self, _key: &[u8]) -> Result<bool, StorageError> {
            std::future::pending().await
        }

        async fn batch(&self, _batch: StorageBatch) -> Result<(), StorageError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn mutation_entered_mid_flight_fails_fast() {
        let mut trie = Trie::new(MemoryStore::new());
        trie.in_flight = true;
        assert!(matches!(
            trie.insert(b"apple", b"1").await,
            Err(Error::ConcurrentMutation)
        ));
        assert!(matches!(
            trie.delete(b"apple").await,
            Err(Error::ConcurrentMutation)
        ));
        assert!(matches!(
            trie.get(b"apple").await,
            Err(Error::ConcurrentMutation)
        ));
        assert!(matches!(
            trie.prove(b"apple").await,
            Err(Error::ConcurrentMutation)
        ));
        assert!(matches!(
            trie.save().await,
            Err(Error::ConcurrentMutation)
        ));
    }

    #[tokio::test]
    async fn cancelled_mutation_poisons_the_handle() {
        // A root reference forces the mutation to suspend at the store
        // before any surgery; dropping it there models cancellation.
        let mut trie = Trie {
            root: Link::Reference { hash: [1; 32] },
            store: PendingStore,
            in_flight: false,
        };
        {
            let insert = trie.insert(b"apple", b"1");
            tokio::select! {
                biased;
                _ = insert => unreachable!("pending store cannot complete"),
                _ = std::future::ready(()) => {}
            }
        }
        assert!(matches!(
            trie.get(b"apple").await,
            Err(Error::ConcurrentMutation)
        ));
    }

    #[tokio::test]
    async fn failed_materialization_leaves_the_handle_usable() {
        // The store holds a root pointer to a node it does not have.
        let store = MemoryStore::new();
        store
            .put(mpf_storage::ROOT_KEY, &[7; 32])
            .await
            .expect("seed root pointer");
        let mut trie = Trie::load(store).await.expect("load");

        assert!(matches!(
            trie.insert(b"apple", b"1").await,
            Err(Error::CorruptNode(_))
        ));
        // nothing was mutated, so the handle is not poisoned
        assert!(matches!(
            trie.insert(b"apple", b"1").await,
            Err(Error::CorruptNode(_))
        ));
    }
}
