//! Nibble paths
//!
//! Keys are routed through the trie by the nibbles of their hashed path,
//! four bits at a time, so every branch can fan out sixteen ways. Branch
//! prefixes and leaf suffixes are runs of nibbles that are not, in general,
//! byte aligned.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::hash::CryptoHash;

/// Number of nibbles in a full key path (64 for a 32-byte digest).
pub const PATH_LENGTH: usize = 64;

/// Longest prefix a branch can carry: two below the full path, since a
/// branch must sit above at least one selecting nibble and one more level
/// of divergence.
pub const MAX_PREFIX_NIBBLES: usize = PATH_LENGTH - 2;

/// An owned sequence of nibbles (4-bit values).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Nibbles {
    data: Vec<u8>,
}

impl Nibbles {
    /// Creates an empty nibble sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// The full 64-nibble routing path of a hashed key, most significant
    /// nibble first.
    pub fn from_path(path: &CryptoHash) -> Self {
        let mut data = Vec::with_capacity(PATH_LENGTH);
        for byte in path {
            data.push(byte >> 4);
            data.push(byte & 0x0f);
        }
        Nibbles { data }
    }

    /// Creates a sequence from raw nibble values.
    pub fn from_nibbles(nibbles: Vec<u8>) -> Self {
        debug_assert!(nibbles.iter().all(|nibble| *nibble < 16));
        Nibbles { data: nibbles }
    }

    /// Decodes the packed form produced by [`packed`](Self::packed):
    /// `count` nibbles, high nibble first, an odd count leaving the final
    /// low nibble zero. Returns `None` when the byte length is wrong or the
    /// padding nibble is not zero, so that the packed form stays canonical.
    pub fn from_packed(count: usize, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::packed_len(count) {
            return None;
        }
        if count % 2 == 1 && bytes.last().is_some_and(|last| last & 0x0f != 0) {
            return None;
        }
        let mut data = Vec::with_capacity(count);
        for byte in bytes {
            data.push(byte >> 4);
            data.push(byte & 0x0f);
        }
        data.truncate(count);
        Some(Nibbles { data })
    }

    /// Byte length of the packed form of `count` nibbles.
    pub fn packed_len(count: usize) -> usize {
        count.div_ceil(2)
    }

    /// Packs the nibbles two per byte, high nibble first; an odd length is
    /// left-justified with a zero low nibble on the final byte.
    pub fn packed(&self) -> Vec<u8> {
        self.data
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
            .collect()
    }

    /// The form a nibble run contributes to a branch hash: one length byte
    /// (disambiguating odd lengths from their zero-padded packing) followed
    /// by the packed nibbles.
    pub fn hashing_form(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + Self::packed_len(self.data.len()));
        out.push(self.data.len() as u8);
        out.extend(self.packed());
        out
    }

    /// Number of nibbles.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The nibble at `index`. Panics when out of bounds.
    pub fn at(&self, index: usize) -> u8 {
        self.data[index]
    }

    /// The nibbles from `start` onward, as a new sequence.
    pub fn slice(&self, start: usize) -> Self {
        Nibbles {
            data: self.data[start..].to_vec(),
        }
    }

    /// The nibbles in `start..end`, as a new sequence.
    pub fn slice_range(&self, start: usize, end: usize) -> Self {
        Nibbles {
            data: self.data[start..end].to_vec(),
        }
    }

    /// Length of the longest common prefix with another sequence.
    pub fn common_prefix_len(&self, other: &Nibbles) -> usize {
        self.common_prefix_with(other.as_slice())
    }

    /// Length of the longest common prefix with a raw nibble slice.
    pub fn common_prefix_with(&self, other: &[u8]) -> usize {
        self.data
            .iter()
            .zip(other.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Appends a single nibble.
    pub fn push(&mut self, nibble: u8) {
        debug_assert!(nibble < 16);
        self.data.push(nibble);
    }

    /// Appends another sequence.
    pub fn extend(&mut self, other: &Nibbles) {
        self.data.extend_from_slice(&other.data);
    }

    /// The raw nibble values.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Display for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for nibble in &self.data {
            write!(f, "{nibble:x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nibbles({self})")
    }
}

/// Parses a run of hex digits, one nibble each; an odd count is fine.
impl FromStr for Nibbles {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .map(|c| {
                c.to_digit(16)
                    .map(|d| d as u8)
                    .ok_or_else(|| format!("invalid nibble character {c:?}"))
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Nibbles::from_nibbles)
    }
}

impl Serialize for Nibbles {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Nibbles {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_expands_to_64_nibbles() {
        let mut path = [0u8; 32];
        path[0] = 0xab;
        path[31] = 0x0f;
        let nibbles = Nibbles::from_path(&path);
        assert_eq!(nibbles.len(), PATH_LENGTH);
        assert_eq!(nibbles.at(0), 0xa);
        assert_eq!(nibbles.at(1), 0xb);
        assert_eq!(nibbles.at(63), 0xf);
    }

    #[test]
    fn packed_roundtrip_even_and_odd() {
        for raw in [vec![], vec![0xa], vec![1, 2, 3], vec![1, 2, 3, 4]] {
            let nibbles = Nibbles::from_nibbles(raw.clone());
            let packed = nibbles.packed();
            assert_eq!(packed.len(), Nibbles::packed_len(raw.len()));
            let back = Nibbles::from_packed(raw.len(), &packed).expect("canonical packing");
            assert_eq!(back, nibbles);
        }
    }

    #[test]
    fn packed_rejects_nonzero_padding() {
        // 3 nibbles packed into 2 bytes must leave the last low nibble 0.
        assert!(Nibbles::from_packed(3, &[0x12, 0x34]).is_none());
        assert!(Nibbles::from_packed(3, &[0x12, 0x30]).is_some());
        assert!(Nibbles::from_packed(4, &[0x12]).is_none());
    }

    #[test]
    fn hashing_form_disambiguates_odd_lengths() {
        let odd = Nibbles::from_nibbles(vec![1, 2, 3]);
        let padded = Nibbles::from_nibbles(vec![1, 2, 3, 0]);
        assert_eq!(odd.packed(), padded.packed());
        assert_ne!(odd.hashing_form(), padded.hashing_form());
        assert_eq!(odd.hashing_form(), vec![3, 0x12, 0x30]);
    }

    #[test]
    fn common_prefix() {
        let a = Nibbles::from_nibbles(vec![1, 2, 3, 4, 5]);
        let b = Nibbles::from_nibbles(vec![1, 2, 3, 6, 7]);
        assert_eq!(a.common_prefix_len(&b), 3);
        assert_eq!(a.common_prefix_with(&[1, 2]), 2);
        assert_eq!(a.common_prefix_with(&[]), 0);
    }

    #[test]
    fn display_and_parse() {
        let nibbles: Nibbles = "a0f3".parse().expect("valid hex digits");
        assert_eq!(nibbles.as_slice(), &[0xa, 0x0, 0xf, 0x3]);
        assert_eq!(nibbles.to_string(), "a0f3");
        assert!("xyz".parse::<Nibbles>().is_err());
    }
}
