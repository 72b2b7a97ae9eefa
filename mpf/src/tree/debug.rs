//! Tree rendering
//!
//! An indented, human-oriented rendering of the loaded portion of a trie.
//! Pruned children print as abbreviated hashes; nothing is fetched.

use std::fmt;

use super::{Link, Node};

fn short_hash(hash: &[u8]) -> String {
    hex::encode(&hash[..4])
}

impl Node {
    pub(crate) fn format(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        match self {
            Node::Leaf(leaf) => {
                writeln!(
                    f,
                    "{pad}leaf {} #{} value={} bytes",
                    leaf.suffix,
                    short_hash(&leaf.hash),
                    leaf.value.len()
                )
            }
            Node::Branch(branch) => {
                writeln!(
                    f,
                    "{pad}branch \"{}\" #{}",
                    branch.prefix,
                    short_hash(&branch.hash)
                )?;
                for (index, child) in branch.children.iter().enumerate() {
                    match child {
                        Link::Empty => {}
                        Link::Loaded(node) => {
                            writeln!(f, "{pad} {index:x}:")?;
                            node.format(f, indent + 4)?;
                        }
                        Link::Reference { hash } => {
                            writeln!(f, "{pad} {index:x}: #{}..", short_hash(hash))?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.format(f, 0)
    }
}
