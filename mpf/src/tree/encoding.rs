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

//! Node encoding
//!
//! The persisted byte form of a node. The encoding is canonical: encoding
//! a decoded node yields the original bytes, and two equal nodes encode
//! identically, which is what lets the store key nodes by their hash.
//!
//! - Leaf: `0x00`, varint key length, key, varint value length, value.
//! - Branch: `0x01`, prefix nibble count, packed prefix, a little-endian
//!   `u16` bitmap of occupied slots, then the child hashes of occupied
//!   slots in ascending slot order.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use integer_encoding::{VarInt, VarIntReader, VarIntWriter};

use super::{
    hash::{CryptoHash, HASH_LENGTH, NULL_HASH},
    nibbles::{Nibbles, MAX_PREFIX_NIBBLES},
    BranchNode, LeafNode, Link, Node,
};
use crate::error::Error;

const LEAF_TAG: u8 = 0x00;
const BRANCH_TAG: u8 = 0x01;

fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptNode(message.into())
}

fn read_exact_vec(input: &mut &[u8], len: usize, what: &str) -> Result<Vec<u8>, Error> {
    if input.len() < len {
        return Err(corrupt(format!("truncated {what}")));
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head.to_vec())
}

fn read_u8(input: &mut &[u8], what: &str) -> Result<u8, Error> {
    let byte = read_exact_vec(input, 1, what)?;
    Ok(byte[0])
}

fn read_len(input: &mut &[u8], what: &str) -> Result<usize, Error> {
    let len: u64 = input
        .read_varint()
        .map_err(|_| corrupt(format!("bad {what} length")))?;
    usize::try_from(len).map_err(|_| corrupt(format!("oversized {what}")))
}

impl Node {
    /// Encodes the node into its canonical byte form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoding_length());
        // writing to a Vec is infallible so it's ok to unwrap
        self.encode_into(&mut out).unwrap();
        out
    }

    /// Encodes the node into the given writer.
    pub fn encode_into<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        match self {
            Node::Leaf(leaf) => {
                out.write_all(&[LEAF_TAG])?;
                out.write_varint(leaf.key.len() as u64)?;
                out.write_all(&leaf.key)?;
                out.write_varint(leaf.value.len() as u64)?;
                out.write_all(&leaf.value)?;
            }
            Node::Branch(branch) => {
                debug_assert!(branch.prefix.len() <= MAX_PREFIX_NIBBLES);
                out.write_all(&[BRANCH_TAG])?;
                out.write_all(&[branch.prefix.len() as u8])?;
                out.write_all(&branch.prefix.packed())?;

                let mut bitmap = 0u16;
                for (index, child) in branch.children.iter().enumerate() {
                    if !child.is_empty() {
                        bitmap |= 1 << index;
                    }
                }
                out.write_u16::<LittleEndian>(bitmap)?;

                for child in branch.children.iter() {
                    if !child.is_empty() {
                        out.write_all(&child.hash())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Byte length of the canonical encoding.
    pub fn encoding_length(&self) -> usize {
        match self {
            Node::Leaf(leaf) => {
                1 + (leaf.key.len() as u64).required_space()
                    + leaf.key.len()
                    + (leaf.value.len() as u64).required_space()
                    + leaf.value.len()
            }
            Node::Branch(branch) => {
                1 + 1
                    + Nibbles::packed_len(branch.prefix.len())
                    + 2
                    + branch.child_count() * HASH_LENGTH
            }
        }
    }

    /// Decodes a node from its canonical byte form. `depth` is the number
    /// of path nibbles consumed above the node's position, which fixes a
    /// decoded leaf's suffix. Children of a decoded branch come back as
    /// hash references.
    pub fn decode(bytes: &[u8], depth: usize) -> Result<Node, Error> {
        let mut input = bytes;
        let node = match read_u8(&mut input, "node tag")? {
            LEAF_TAG => {
                let key_len = read_len(&mut input, "key")?;
                let key = read_exact_vec(&mut input, key_len, "key")?;
                let value_len = read_len(&mut input, "value")?;
                let value = read_exact_vec(&mut input, value_len, "value")?;
                Node::Leaf(LeafNode::new(key, value, depth))
            }
            BRANCH_TAG => {
                let count = read_u8(&mut input, "prefix count")? as usize;
                if count > MAX_PREFIX_NIBBLES {
                    return Err(corrupt(format!("branch prefix of {count} nibbles")));
                }
                let packed =
                    read_exact_vec(&mut input, Nibbles::packed_len(count), "branch prefix")?;
                let prefix = Nibbles::from_packed(count, &packed)
                    .ok_or_else(|| corrupt("non-canonical prefix padding"))?;

                let bitmap_bytes = read_exact_vec(&mut input, 2, "slot bitmap")?;
                let bitmap = u16::from_le_bytes([bitmap_bytes[0], bitmap_bytes[1]]);
                if bitmap.count_ones() < 2 {
                    return Err(Error::InvariantViolation(format!(
                        "stored branch with {} children",
                        bitmap.count_ones()
                    )));
                }

                let mut children = BranchNode::empty_children();
                for (index, child) in children.iter_mut().enumerate() {
                    if bitmap & (1 << index) != 0 {
                        let bytes = read_exact_vec(&mut input, HASH_LENGTH, "child hash")?;
                        let mut hash: CryptoHash = NULL_HASH;
                        hash.copy_from_slice(&bytes);
                        if hash == NULL_HASH {
                            return Err(corrupt("occupied slot holds the empty hash"));
                        }
                        *child = Link::Reference { hash };
                    }
                }
                Node::Branch(BranchNode::new(prefix, children))
            }
            tag => return Err(corrupt(format!("unknown node tag {tag:#04x}"))),
        };
        if !input.is_empty() {
            return Err(corrupt(format!(
                "{} trailing bytes after node",
                input.len()
            )));
        }
        Ok(node)
    }
}
