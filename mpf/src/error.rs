//! Errors

/// Errors surfaced by the trie engine.
///
/// Key absence is never an error: lookups return `None`. Proof
/// verification is likewise total and reports mismatches through its
/// return value; `ProofMalformed` only arises when parsing a serialized
/// proof.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store failed an operation. The in-memory trie is
    /// consistent when the failure happened before any mutation step, and
    /// must be reloaded otherwise.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] mpf_storage::Error),

    /// A mutation was started while another was still in flight on the
    /// same handle. Fatal for the handle: discard it and reload from the
    /// store.
    #[error("concurrent mutation on trie handle")]
    ConcurrentMutation,

    /// A fetched blob failed to decode, or its content does not hash to
    /// the key it was stored under.
    #[error("corrupt node: {0}")]
    CorruptNode(String),

    /// The tree violated a structural invariant: a branch with fewer than
    /// two children, or two distinct keys hashing to the same path.
    /// Indicates a bug or store tampering.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A serialized proof could not be parsed.
    #[error("malformed proof: {0}")]
    ProofMalformed(String),
}
