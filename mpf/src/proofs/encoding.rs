//! Proof encoding
//!
//! The compact binary form of a proof: steps in walk order, each a tag
//! byte, a varint `skip`, then the step's fixed-width neighbor fields.
//! Parsing is strict; anything ill-formed is [`Error::ProofMalformed`].

use std::io::Write;

use integer_encoding::{VarIntReader, VarIntWriter};

use super::{ForkNeighbor, LeafNeighbor, Proof, Step};
use crate::{
    error::Error,
    tree::{
        hash::{CryptoHash, NEIGHBORS_LENGTH},
        nibbles::Nibbles,
    },
};

const BRANCH_STEP_TAG: u8 = 0x00;
const FORK_STEP_TAG: u8 = 0x01;
const LEAF_STEP_TAG: u8 = 0x02;

fn malformed(message: impl Into<String>) -> Error {
    Error::ProofMalformed(message.into())
}

fn read_bytes<const N: usize>(input: &mut &[u8], what: &str) -> Result<[u8; N], Error> {
    if input.len() < N {
        return Err(malformed(format!("truncated {what}")));
    }
    let (head, tail) = input.split_at(N);
    *input = tail;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

fn read_skip(input: &mut &[u8]) -> Result<usize, Error> {
    let skip: u64 = input
        .read_varint()
        .map_err(|_| malformed("bad skip varint"))?;
    usize::try_from(skip).map_err(|_| malformed("oversized skip"))
}

impl Step {
    fn encode_into<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        match self {
            Step::Branch { skip, neighbors } => {
                out.write_all(&[BRANCH_STEP_TAG])?;
                out.write_varint(*skip as u64)?;
                out.write_all(neighbors)?;
            }
            Step::Fork { skip, neighbor } => {
                out.write_all(&[FORK_STEP_TAG])?;
                out.write_varint(*skip as u64)?;
                out.write_all(&[neighbor.nibble])?;
                out.write_all(&[neighbor.prefix.len() as u8])?;
                out.write_all(&neighbor.prefix.packed())?;
                out.write_all(&neighbor.root)?;
            }
            Step::Leaf { skip, neighbor } => {
                out.write_all(&[LEAF_STEP_TAG])?;
                out.write_varint(*skip as u64)?;
                out.write_all(&neighbor.path)?;
                out.write_all(&neighbor.value_hash)?;
            }
        }
        Ok(())
    }

    fn decode(input: &mut &[u8]) -> Result<Step, Error> {
        let [tag] = read_bytes::<1>(input, "step tag")?;
        let skip = read_skip(input)?;
        match tag {
            BRANCH_STEP_TAG => {
                let neighbors: [u8; NEIGHBORS_LENGTH] = read_bytes(input, "branch neighbors")?;
                Ok(Step::Branch { skip, neighbors })
            }
            FORK_STEP_TAG => {
                let [nibble] = read_bytes::<1>(input, "fork nibble")?;
                if nibble > 15 {
                    return Err(malformed(format!("fork nibble {nibble}")));
                }
                let [count] = read_bytes::<1>(input, "fork prefix count")?;
                let packed_len = Nibbles::packed_len(count as usize);
                if input.len() < packed_len {
                    return Err(malformed("truncated fork prefix"));
                }
                let (packed, rest) = input.split_at(packed_len);
                let prefix = Nibbles::from_packed(count as usize, packed)
                    .ok_or_else(|| malformed("non-canonical fork prefix"))?;
                *input = rest;
                let root: CryptoHash = read_bytes(input, "fork root")?;
                Ok(Step::Fork {
                    skip,
                    neighbor: ForkNeighbor {
                        nibble,
                        prefix,
                        root,
                    },
                })
            }
            LEAF_STEP_TAG => {
                let path: CryptoHash = read_bytes(input, "leaf path")?;
                let value_hash: CryptoHash = read_bytes(input, "leaf value hash")?;
                Ok(Step::Leaf {
                    skip,
                    neighbor: LeafNeighbor { path, value_hash },
                })
            }
            tag => Err(malformed(format!("unknown step tag {tag:#04x}"))),
        }
    }
}

impl Proof {
    /// Serializes the proof to its compact binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.steps.len() * (2 + NEIGHBORS_LENGTH));
        for step in &self.steps {
            // writing to a Vec is infallible so it's ok to unwrap
            step.encode_into(&mut out).unwrap();
        }
        out
    }

    /// Parses a proof from its compact binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Proof, Error> {
        let mut input = bytes;
        let mut steps = Vec::new();
        while !input.is_empty() {
            steps.push(Step::decode(&mut input)?);
        }
        Ok(Proof { steps })
    }
}
