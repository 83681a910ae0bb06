//! Cryptographic Envelope and threshold-signature primitives for the
//! replication core (`spec.md` §4.1).
//!
//! Two independent signature schemes live here:
//! - [`rsa_envelope`] / [`merkle`]: per-message and Merkle-batched RSA
//!   signatures, used by every replica to authenticate everything it sends.
//! - [`threshold`]: Shoup threshold-RSA, used to produce one site-wide
//!   certificate from `k+f+1` replicas' shares.
//!
//! [`primes`] and [`bigint_ext`] are support modules for [`threshold`]'s key
//! dealing and combining math.

pub mod bigint_ext;
pub mod error;
pub mod merkle;
pub mod primes;
pub mod rsa_envelope;
pub mod threshold;

pub use error::{CryptoError, Result};
pub use merkle::{MerkleBatch, MerkleProof, MerkleTree, MAX_MERKLE_DIGESTS};
pub use rsa_envelope::{digest_bytes, RsaSigningKey, RsaVerifyingKey, RSA_MODULUS_BITS, RSA_SIGNATURE_LEN};
pub use threshold::{
    combine, deal, blame, CombinedSignature, ThresholdKeyShare, ThresholdPublicKey, ThresholdShare,
    THRESHOLD_ELEMENT_LEN,
};
