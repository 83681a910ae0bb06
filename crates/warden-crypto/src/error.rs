//! Cryptographic error taxonomy.
//!
//! These map onto the "Authentication-invalid" and "Fatal" kinds of the
//! core's error taxonomy; callers in `warden-vsr` decide propagation
//! (drop-and-count vs. halt) per that taxonomy, not this crate.

use warden_types::ReplicaId;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("RSA signature verification failed")]
    InvalidSignature,

    #[error("Merkle proof verification failed")]
    InvalidMerkleProof,

    #[error("Merkle proof carries {got} sibling digests, more than MAX_MERKLE_DIGESTS ({max})")]
    MerkleProofTooLarge { got: usize, max: usize },

    #[error("threshold combine needs at least {need} shares, got {got}")]
    InsufficientShares { got: usize, need: usize },

    #[error("combined threshold signature failed verification against the site key")]
    CombineVerificationFailed,

    #[error("share from replica {0} failed its zero-knowledge proof")]
    FaultyShare(ReplicaId),

    #[error("malformed key material: {0}")]
    MalformedKey(String),

    #[error("no safe prime found within the search budget")]
    PrimeGenerationExhausted,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
