//! Typed failure values returned by the core.
//!
//! The scheduler layer above this crate decides between retry, alert and
//! shutdown; the variants here preserve that triage: `StoreUnavailable` is
//! retryable, `VersionMismatch` and `ChainMismatch` require intervention,
//! everything else rejects the offending input.

use crate::engine::CircuitError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Source data rejected: range overflow, invariant violation, unsorted
    /// or duplicate asset indices. Never silently coerced.
    #[error("invalid input data: {0}")]
    InvalidInput(String),

    /// Malformed tier table: odd length, non-monotone boundaries, ratio
    /// above 100 percent or boundary above the tier cap.
    #[error("invalid tier table: {0}")]
    InvalidTierTable(String),

    /// Account-tree operation failed.
    #[error("account tree: {0}")]
    Tree(String),

    /// Tree version disagrees with the recorded batch height at startup.
    /// Requires manual intervention; never retried.
    #[error("account tree version {tree_version} behind recorded height (want {expected})")]
    VersionMismatch { tree_version: u64, expected: u64 },

    /// Witness blob failed to decode or re-encode.
    #[error("witness serialization: {0}")]
    WitnessCodec(String),

    /// Requested store row does not exist.
    #[error("not found")]
    NotFound,

    /// Backing store unreachable or failed; retryable with backoff.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The assembled witness does not satisfy the circuit. Always an
    /// assembler bug; surfaces from the proving backend.
    #[error(transparent)]
    Circuit(#[from] CircuitError),

    /// Proof-chain verification failed: the published state is not backed
    /// by the proof sequence. Irrecoverable.
    #[error("proof chain mismatch: {0}")]
    ChainMismatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
