//! # warden-types: Core types for the replication core
//!
//! Shared value types used across every `warden-*` crate:
//! - Identity ([`ReplicaId`], [`Incarnation`], [`SiteId`])
//! - Membership generation ([`Gcn`])
//! - Ordering ([`View`], [`GlobalSeq`], [`PoSeqPair`])
//! - Digests ([`Digest`])
//!
//! All types here are plain values: no I/O, no crypto, no protocol logic.
//! That lives in `warden-crypto` and `warden-vsr`.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

pub mod wire;
pub use wire::{WireError, WireHeader, WIRE_HEADER_LEN};

// ============================================================================
// Replica identity
// ============================================================================

/// Which replica sent or is addressed by a message.
///
/// Replica ids are `1..=N`, matching the `spec.md` §3 convention (id 0 is
/// reserved for "no replica" / unset fields on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Zero-based index into an `N`-length per-replica vector.
    pub fn as_index(self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self((index + 1) as u32)
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl From<u32> for ReplicaId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ReplicaId> for u32 {
    fn from(id: ReplicaId) -> Self {
        id.0
    }
}

/// Monotone per-replica lifetime counter (`spec.md` §3 "Incarnation").
///
/// Bumped on every proactive-recovery or crash-recovery restart. The pair
/// `(ReplicaId, Incarnation)` uniquely identifies a process lifetime; no
/// replica ever reuses a pair after recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Incarnation(u32);

impl Incarnation {
    pub const FIRST: Self = Self(1);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Incarnation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inc{}", self.0)
    }
}

/// Identifies the single site (cluster) a replica belongs to.
///
/// Used to scope threshold-signature public keys; out of scope for
/// cross-site federation per `spec.md` §1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(u32);

impl SiteId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

// ============================================================================
// Global configuration number
// ============================================================================

/// Monotone identifier of a membership and key-rotation generation
/// (`spec.md` §3 "Global Configuration Number").
///
/// Keys and identities are only valid within the `Gcn` that installed them;
/// messages carrying a smaller `Gcn` are rejected (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Gcn(u32);

impl Gcn {
    pub const FIRST: Self = Self(0);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Gcn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gcn{}", self.0)
    }
}

// ============================================================================
// View (leader reign)
// ============================================================================

/// The reign of a particular leader (`spec.md` GLOSSARY "View").
///
/// Incremented on every view change, including nested ones; the leader for
/// a view is `(view.as_u32() % n) + 1` in replica-id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct View(u32);

impl View {
    pub const FIRST: Self = Self(0);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The leader replica for this view, given `n` replicas.
    pub fn leader(self, n: u32) -> ReplicaId {
        ReplicaId::new(self.0 % n + 1)
    }
}

impl Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Global ordering sequence number
// ============================================================================

/// Global agreement slot number assigned by ORD (`spec.md` §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct GlobalSeq(u32);

impl GlobalSeq {
    pub const FIRST: Self = Self(1);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for GlobalSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

// ============================================================================
// PO-Sequence Pair
// ============================================================================

/// Per-origin local ordering key (`spec.md` §3 "PO-Sequence Pair").
///
/// Ordered lexicographically on `(incarnation, seq_num)`: the incarnation
/// component only changes across recovery, at which point `seq_num` resets
/// to 1 (`spec.md` §4.2 "Ordering and tie-breaks").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoSeqPair {
    pub incarnation: Incarnation,
    pub seq_num: u32,
}

impl PoSeqPair {
    pub const fn new(incarnation: Incarnation, seq_num: u32) -> Self {
        Self {
            incarnation,
            seq_num,
        }
    }

    /// The zero value for a fresh incarnation: no requests seen yet.
    pub const fn zero(incarnation: Incarnation) -> Self {
        Self {
            incarnation,
            seq_num: 0,
        }
    }

    /// The first valid sequence pair for a fresh incarnation.
    pub const fn first(incarnation: Incarnation) -> Self {
        Self {
            incarnation,
            seq_num: 1,
        }
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self {
            incarnation: self.incarnation,
            seq_num: self.seq_num + 1,
        }
    }
}

impl Display for PoSeqPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.incarnation, self.seq_num)
    }
}

// ============================================================================
// Digest
// ============================================================================

/// A SHA-1 digest, the Merkle-tree leaf/node hash of `spec.md` §4.1/§6.
///
/// SHA-1 (not a stronger hash) is used deliberately: it's what the wire
/// format this spec is distilled from uses, and the signed Merkle root over
/// the batch — not the per-leaf hash — is what carries forgery resistance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 20]);

impl Digest {
    pub const ZERO: Self = Self([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn po_seq_pair_orders_lexicographically() {
        let inc1 = Incarnation::new(1);
        let inc2 = Incarnation::new(2);
        assert!(PoSeqPair::new(inc1, 100) < PoSeqPair::new(inc2, 1));
        assert!(PoSeqPair::new(inc1, 1) < PoSeqPair::new(inc1, 2));
    }

    #[test]
    fn view_leader_rotates_through_replicas() {
        assert_eq!(View::new(0).leader(4), ReplicaId::new(1));
        assert_eq!(View::new(1).leader(4), ReplicaId::new(2));
        assert_eq!(View::new(4).leader(4), ReplicaId::new(1));
    }

    #[test]
    fn replica_id_index_round_trips() {
        for raw in 1..=10u32 {
            let id = ReplicaId::new(raw);
            assert_eq!(ReplicaId::from_index(id.as_index()), id);
        }
    }

    #[test]
    fn gcn_and_incarnation_are_monotone_on_next() {
        let g = Gcn::FIRST;
        assert!(g.next() > g);
        let inc = Incarnation::FIRST;
        assert!(inc.next() > inc);
    }
}
