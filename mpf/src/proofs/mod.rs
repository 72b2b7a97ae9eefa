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

//! Proofs
//!
//! A proof is the ordered list of steps met while walking from the root
//! toward a key. Each step records the Merkle neighbors a verifier needs
//! to rebuild the parent from the child on the path, but never the subject
//! itself, which is what lets one proof verify both the root that holds
//! the key and the root that lacks it.

mod encoding;
mod verify;

use serde::{Deserialize, Serialize};

use crate::tree::{
    hash::{CryptoHash, NEIGHBORS_LENGTH},
    nibbles::Nibbles,
};

/// The single extant subtree recorded by a [`Step::Fork`]: how the branch
/// the walk diverged inside would look demoted below the hypothetical
/// split point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkNeighbor {
    /// Slot the demoted branch would occupy below the split.
    pub nibble: u8,
    /// The demoted branch's remaining prefix.
    pub prefix: Nibbles,
    /// The Merkle root over the demoted branch's sixteen slots.
    #[serde(with = "hex_array")]
    pub root: CryptoHash,
}

/// The existing leaf recorded by a [`Step::Leaf`]: enough to rebuild its
/// hash without revealing its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNeighbor {
    /// The neighbor leaf's full hashed path.
    #[serde(with = "hex_array")]
    pub path: CryptoHash,
    /// The pre-hash of the neighbor leaf's value.
    #[serde(with = "hex_array")]
    pub value_hash: CryptoHash,
}

/// One step of a proof walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// A branch the walk descends into. `skip` is the length of the
    /// branch's prefix; `neighbors` are the four sibling hashes of the
    /// Merkle-of-16, widest level first.
    Branch {
        skip: usize,
        #[serde(with = "hex_array")]
        neighbors: [u8; NEIGHBORS_LENGTH],
    },
    /// The walk diverged inside a branch's prefix after `skip` shared
    /// nibbles; inserting the key here would split the branch.
    Fork { skip: usize, neighbor: ForkNeighbor },
    /// The walk ended at an existing leaf on a different key, after `skip`
    /// shared nibbles of suffix.
    Leaf { skip: usize, neighbor: LeafNeighbor },
}

/// A proof of one key's presence or absence, verifiable against a root
/// hash.
///
/// An empty step list is meaningful: it describes a trie that is empty
/// without the subject key and a single leaf with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proof {
    steps: Vec<Step>,
}

impl Proof {
    pub(crate) fn from_steps(steps: Vec<Step>) -> Self {
        Proof { steps }
    }

    /// The proof's steps, root first.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the proof has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

pub(crate) mod hex_array {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| de::Error::custom(format!("expected {N} bytes, got {len}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_form_is_tagged_lowercase_hex() {
        let step = Step::Leaf {
            skip: 3,
            neighbor: LeafNeighbor {
                path: [0xab; 32],
                value_hash: [0x01; 32],
            },
        };
        let json = serde_json::to_value(&step).expect("serializable");
        assert_eq!(json["type"], "leaf");
        assert_eq!(json["skip"], 3);
        assert_eq!(json["neighbor"]["path"], "ab".repeat(32));
        assert_eq!(json["neighbor"]["value_hash"], "01".repeat(32));

        let back: Step = serde_json::from_value(json).expect("deserializable");
        assert_eq!(back, step);
    }

    #[test]
    fn json_roundtrip_all_step_kinds() {
        let proof = Proof::from_steps(vec![
            Step::Branch {
                skip: 0,
                neighbors: [7; NEIGHBORS_LENGTH],
            },
            Step::Fork {
                skip: 2,
                neighbor: ForkNeighbor {
                    nibble: 0xc,
                    prefix: "a1f".parse().expect("valid nibbles"),
                    root: [9; 32],
                },
            },
        ]);
        let json = serde_json::to_string(&proof).expect("serializable");
        let back: Proof = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(back, proof);
    }

    #[test]
    fn json_rejects_wrong_hash_length() {
        let json = format!(r#"[{{"type":"leaf","skip":0,"neighbor":{{"path":"abcd","value_hash":"{}"}}}}]"#, "01".repeat(32));
        assert!(serde_json::from_str::<Proof>(&json).is_err());
    }
}
