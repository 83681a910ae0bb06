//! Reconciliation: fills PO gaps a slow or partitioned replica never got
//! directly, without hitting every peer (`spec.md` §4.5).
//!
//! Senders are chosen by rank, not broadcast: once at least `f+k+1`
//! replicas hold a PO-Certificate for a slot, the lowest-id `2f+k+1` of
//! them forward it to peers who haven't acknowledged yet — raw, or split
//! across `reed-solomon-erasure` shares when the payload is large enough
//! that erasure coding saves more bandwidth than it costs in bookkeeping.

use std::collections::{BTreeMap, HashMap};

use reed_solomon_erasure::galois_8::ReedSolomon;
use warden_types::{PoSeqPair, ReplicaId};

use crate::message::{PoRequest, ReconEncoding, ReconPart};

/// Below this payload size, raw retransmission beats the shard-header
/// overhead of erasure coding.
pub const ERASURE_MIN_PAYLOAD_BYTES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReconError {
    #[error("failed to encode request for reconciliation")]
    Encode,
    #[error("failed to decode a reconciled request")]
    Decode,
}

type Result<T> = std::result::Result<T, ReconError>;

/// Decides which replicas currently holding `(origin, seq)` get to act as
/// RECON senders for it.
pub struct ReconState {
    local: ReplicaId,
    quorum_f_k_1: u32,
    quorum_2f_k_1: u32,
    /// `f+1` shares decode the original payload; parameterized by the
    /// deployment's actual fault bound rather than a fixed constant
    /// (`spec.md` §4.5 "Encoding").
    data_shards: usize,
    total_shards: usize,
}

impl ReconState {
    pub fn new(local: ReplicaId, quorum_f_k_1: u32, quorum_2f_k_1: u32, f: u32) -> Self {
        let data_shards = (f + 1) as usize;
        let total_shards = (quorum_2f_k_1 as usize).max(data_shards + 1);
        Self { local, quorum_f_k_1, quorum_2f_k_1, data_shards, total_shards }
    }

    /// `holders` is every replica currently known to have a PO-Certificate
    /// for the slot in question. Fewer than `f+k+1` holders means nobody
    /// is eligible to fan out yet; among eligible holders, only the
    /// lowest-id `2f+k+1` become senders (`spec.md` §4.5 "Sender
    /// selection").
    pub fn is_designated_sender(&self, holders: &[ReplicaId]) -> bool {
        if (holders.len() as u32) < self.quorum_f_k_1 {
            return false;
        }
        let mut sorted: Vec<ReplicaId> = holders.to_vec();
        sorted.sort();
        sorted.iter().take(self.quorum_2f_k_1 as usize).any(|&id| id == self.local)
    }

    /// Builds the parts this replica sends to a peer that hasn't
    /// acknowledged `(origin, seq)` yet.
    pub fn build_parts(&self, origin: ReplicaId, seq: PoSeqPair, request: &PoRequest, use_erasure: bool) -> Result<Vec<ReconPart>> {
        let payload = postcard::to_allocvec(request).map_err(|_| ReconError::Encode)?;
        if !use_erasure || payload.len() < ERASURE_MIN_PAYLOAD_BYTES {
            return Ok(vec![ReconPart { origin, seq, sender: self.local, encoding: ReconEncoding::Raw, data: payload }]);
        }
        let shards = encode_erasure(&payload, self.data_shards, self.total_shards)?;
        Ok(shards
            .into_iter()
            .enumerate()
            .map(|(index, data)| ReconPart {
                origin,
                seq,
                sender: self.local,
                encoding: ReconEncoding::ErasureShare {
                    share_index: index as u32,
                    shard_count: self.total_shards as u32,
                    data_shards: self.data_shards as u32,
                },
                data,
            })
            .collect())
    }
}

fn encode_erasure(payload: &[u8], data_shards: usize, total_shards: usize) -> Result<Vec<Vec<u8>>> {
    let mut framed = (payload.len() as u32).to_le_bytes().to_vec();
    framed.extend_from_slice(payload);
    let shard_size = framed.len().div_ceil(data_shards).max(1);
    let mut shards: Vec<Vec<u8>> = (0..total_shards).map(|_| vec![0u8; shard_size]).collect();
    for (index, chunk) in framed.chunks(shard_size).enumerate() {
        shards[index][..chunk.len()].copy_from_slice(chunk);
    }
    let rs = ReedSolomon::new(data_shards, total_shards - data_shards).map_err(|_| ReconError::Encode)?;
    rs.encode(&mut shards).map_err(|_| ReconError::Encode)?;
    Ok(shards)
}

fn decode_erasure(mut shards: Vec<Option<Vec<u8>>>, data_shards: usize) -> Result<Vec<u8>> {
    let total_shards = shards.len();
    let rs = ReedSolomon::new(data_shards, total_shards - data_shards).map_err(|_| ReconError::Decode)?;
    rs.reconstruct(&mut shards).map_err(|_| ReconError::Decode)?;
    let mut framed = Vec::new();
    for shard in shards.into_iter().take(data_shards) {
        framed.extend(shard.ok_or(ReconError::Decode)?);
    }
    if framed.len() < 4 {
        return Err(ReconError::Decode);
    }
    let len = u32::from_le_bytes(framed[0..4].try_into().unwrap()) as usize;
    framed.get(4..4 + len).map(<[u8]>::to_vec).ok_or(ReconError::Decode)
}

/// Reassembles requests from whichever `ReconPart`s arrive, in any order,
/// from any subset of the designated senders.
#[derive(Default)]
pub struct ReconCollector {
    pending: HashMap<(u32, u32), PendingShares>,
}

struct PendingShares {
    shard_count: u32,
    data_shards: u32,
    shares: BTreeMap<u32, Vec<u8>>,
}

impl ReconCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds in one received part. Returns the reassembled request once
    /// enough shares (or the single raw part) have arrived.
    pub fn accept(&mut self, part: ReconPart) -> Result<Option<PoRequest>> {
        match part.encoding {
            ReconEncoding::Raw => {
                let request = postcard::from_bytes(&part.data).map_err(|_| ReconError::Decode)?;
                Ok(Some(request))
            }
            ReconEncoding::ErasureShare { share_index, shard_count, data_shards } => {
                let key = (part.origin.as_u32(), part.seq.seq_num);
                let entry = self.pending.entry(key).or_insert_with(|| PendingShares { shard_count, data_shards, shares: BTreeMap::new() });
                entry.shares.insert(share_index, part.data);
                if entry.shares.len() < entry.data_shards as usize {
                    return Ok(None);
                }
                let mut shards: Vec<Option<Vec<u8>>> = vec![None; entry.shard_count as usize];
                for (&index, data) in &entry.shares {
                    shards[index as usize] = Some(data.clone());
                }
                let decoded = decode_erasure(shards, entry.data_shards as usize)?;
                self.pending.remove(&key);
                let request = postcard::from_bytes(&decoded).map_err(|_| ReconError::Decode)?;
                Ok(Some(request))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::Incarnation;

    fn sample_request(origin: ReplicaId, seq: u32, payload_bytes: usize) -> PoRequest {
        PoRequest { origin, seq: PoSeqPair::new(Incarnation::FIRST, seq), updates: vec![vec![7u8; payload_bytes]] }
    }

    #[test]
    fn only_the_lowest_id_quorum_among_eligible_holders_sends() {
        let recon = ReconState::new(ReplicaId::new(2), 2, 3, 1);
        let holders = vec![ReplicaId::new(1), ReplicaId::new(2), ReplicaId::new(4)];
        assert!(recon.is_designated_sender(&holders));
        let too_few = vec![ReplicaId::new(2)];
        assert!(!recon.is_designated_sender(&too_few));
    }

    #[test]
    fn raw_part_round_trips() {
        let recon = ReconState::new(ReplicaId::new(1), 2, 3, 1);
        let request = sample_request(ReplicaId::new(1), 1, 16);
        let parts = recon.build_parts(ReplicaId::new(1), request.seq, &request, false).unwrap();
        assert_eq!(parts.len(), 1);
        let mut collector = ReconCollector::new();
        let decoded = collector.accept(parts.into_iter().next().unwrap()).unwrap().unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn erasure_coded_parts_tolerate_missing_shards() {
        let f = 3;
        let recon = ReconState::new(ReplicaId::new(1), 5, 6, f);
        let request = sample_request(ReplicaId::new(3), 9, 1024);
        let mut parts = recon.build_parts(ReplicaId::new(1), request.seq, &request, true).unwrap();
        assert_eq!(parts.len(), 6, "quorum_2f_k_1=6 sizes the shard count for this deployment");
        parts.remove(1);
        parts.remove(3);
        let mut collector = ReconCollector::new();
        let mut decoded = None;
        for part in parts {
            if let Some(request) = collector.accept(part).unwrap() {
                decoded = Some(request);
            }
        }
        assert_eq!(decoded.unwrap(), request);
    }

    /// A deployment with a larger fault bound needs a larger decode
    /// threshold; the wire-carried `data_shards` makes that self-describing
    /// rather than pinned to a fixed constant (`spec.md` §4.5 "Encoding").
    #[test]
    fn decode_threshold_scales_with_the_deployments_fault_bound() {
        let f = 2;
        let recon = ReconState::new(ReplicaId::new(1), 3, 5, f);
        let request = sample_request(ReplicaId::new(2), 4, 1024);
        let parts = recon.build_parts(ReplicaId::new(1), request.seq, &request, true).unwrap();
        match parts[0].encoding {
            ReconEncoding::ErasureShare { data_shards, .. } => assert_eq!(data_shards, f + 1),
            ReconEncoding::Raw => panic!("expected erasure-coded parts"),
        }
    }
}
