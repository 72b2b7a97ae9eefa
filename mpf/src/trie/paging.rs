//! Paging
//!
//! Movement of nodes between memory and the backing store: bulk
//! materialization of pruned subtrees, post-order persistence with
//! pruning on save, and reopening a trie from its stored root pointer.

use std::{future::Future, pin::Pin};

use tracing::trace;

use mpf_storage::{StorageBatch, Store, ROOT_KEY};

use super::{materialize_link, Trie};
use crate::{
    error::Error,
    tree::{
        hash::{CryptoHash, NULL_HASH},
        Link, Node,
    },
};

type BoxedResult<'a> = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

impl<S: Store> Trie<S> {
    /// Reopens a trie from the store's root pointer. The returned handle
    /// holds a bare reference to the root node; nodes materialize on first
    /// use. An absent pointer yields the empty trie.
    pub async fn load(store: S) -> Result<Self, Error> {
        let root = match store.get(ROOT_KEY).await? {
            None => Link::Empty,
            Some(bytes) => {
                let hash: CryptoHash = bytes.as_slice().try_into().map_err(|_| {
                    Error::CorruptNode(format!("root pointer of {} bytes", bytes.len()))
                })?;
                if hash == NULL_HASH {
                    Link::Empty
                } else {
                    Link::Reference { hash }
                }
            }
        };
        trace!(root = %hex::encode(root.hash()), "loaded trie");
        Ok(Trie {
            root,
            store,
            in_flight: false,
        })
    }

    /// Materializes every pruned node within `depth` levels of the root;
    /// `0` is a no-op and `usize::MAX` loads the entire tree.
    pub async fn fetch_children(&mut self, depth: usize) -> Result<(), Error> {
        self.check_available()?;
        let Trie { root, store, .. } = self;
        fetch_subtree(store, root, 0, depth).await
    }

    /// Persists every loaded node whose hash is not yet in the store,
    /// post-order, together with the root pointer, as one atomic batch;
    /// then prunes the root's children back to hash references. Returns
    /// the root hash. Saving twice in a row leaves the store untouched the
    /// second time.
    pub async fn save(&mut self) -> Result<CryptoHash, Error> {
        self.check_available()?;
        let root_hash = self.root.hash();

        let mut writes = Vec::new();
        if let Some(node) = self.root.node() {
            collect_writes(node, &mut writes);
        }

        let mut batch = StorageBatch::new();
        for (hash, bytes) in writes {
            if !self.store.exists(&hash).await? {
                batch.put(hash.to_vec(), bytes);
            }
        }
        if root_hash == NULL_HASH {
            batch.delete(ROOT_KEY.to_vec());
        } else {
            batch.put(ROOT_KEY.to_vec(), root_hash.to_vec());
        }
        let written = batch.len();
        self.store.batch(batch).await?;
        trace!(written, root = %hex::encode(root_hash), "saved trie");

        // Keep the root node as the working set; everything below it goes
        // back to references now that the store holds it.
        if let Link::Loaded(node) = &mut self.root {
            if let Node::Branch(branch) = node.as_mut() {
                for child in branch.children.iter_mut() {
                    *child = child.take().into_reference();
                }
            }
        }
        Ok(root_hash)
    }

    /// Number of key/value pairs in the trie. Materializes the whole tree.
    pub async fn len(&mut self) -> Result<u64, Error> {
        self.fetch_children(usize::MAX).await?;
        Ok(self.root.node().map(Node::loaded_len).unwrap_or(0))
    }
}

fn fetch_subtree<'a, S: Store>(
    store: &'a S,
    link: &'a mut Link,
    consumed: usize,
    depth: usize,
) -> BoxedResult<'a> {
    Box::pin(async move {
        if depth == 0 {
            return Ok(());
        }
        materialize_link(store, &mut *link, consumed).await?;
        if let Link::Loaded(node) = link {
            if let Node::Branch(branch) = node.as_mut() {
                let child_consumed = consumed + branch.prefix.len() + 1;
                for child in branch.children.iter_mut() {
                    if !child.is_empty() {
                        fetch_subtree(store, child, child_consumed, depth - 1).await?;
                    }
                }
            }
        }
        Ok(())
    })
}

/// Post-order traversal of the loaded portion, collecting each node's
/// `(hash, encoding)` pair, children before parents.
fn collect_writes(node: &Node, out: &mut Vec<(CryptoHash, Vec<u8>)>) {
    if let Node::Branch(branch) = node {
        for child in branch.children.iter() {
            if let Some(child_node) = child.node() {
                collect_writes(child_node, out);
            }
        }
    }
    out.push((node.hash(), node.encode()));
}
