//! Pre-Order layer (`spec.md` §4.2).
//!
//! For each client update originating at replica `r`, PO guarantees at
//! least `2f+k+1` correct replicas hold the update before ORD may treat it
//! as eligible. Each origin's requests are stored in a per-origin log keyed
//! by `seq_num` within the origin's current incarnation; an incarnation
//! bump (recovery) starts that origin's log over at `seq_num = 1`.

use std::collections::{BTreeMap, HashSet};

use warden_kernel::{Propagation, WardenError};
use warden_types::{Incarnation, PoSeqPair, ReplicaId};

use crate::message::{ClientUpdate, PoAck, PoAckEntry, PoAru, PoRequest, ProofMatrix};

/// State for one (origin, seq) pair (`spec.md` §3 "PO-Slot").
#[derive(Debug, Clone)]
pub struct PoSlot {
    pub seq: PoSeqPair,
    pub request: Option<PoRequest>,
    acks: HashSet<ReplicaId>,
    pub certificate_formed: bool,
}

impl PoSlot {
    fn empty(seq: PoSeqPair) -> Self {
        Self {
            seq,
            request: None,
            acks: HashSet::new(),
            certificate_formed: false,
        }
    }
}

/// Everything PO tracks for one origin replica.
#[derive(Debug, Clone)]
struct OriginLog {
    incarnation: Incarnation,
    slots: BTreeMap<u32, PoSlot>,
    /// The largest seq for which a contiguous run of PO-Certificates exists
    /// (`spec.md` §3 "PO-ARU" `cum_ack[j]`).
    cum_ack: PoSeqPair,
    /// The local garbage-collection white-line: slots at or below this are
    /// never recreated or mutated.
    white_line: u32,
}

impl OriginLog {
    fn new(incarnation: Incarnation) -> Self {
        Self {
            incarnation,
            slots: BTreeMap::new(),
            cum_ack: PoSeqPair::zero(incarnation),
            white_line: 0,
        }
    }

    /// The largest contiguous seq for which the request itself (not
    /// necessarily a certificate) is held (`spec.md` §4.2 `eligible_prefix`).
    fn contiguous_held_prefix(&self) -> u32 {
        let mut seq = self.white_line;
        loop {
            match self.slots.get(&(seq + 1)) {
                Some(slot) if slot.request.is_some() => seq += 1,
                _ => return seq,
            }
        }
    }

    /// Recomputes `cum_ack` as the largest contiguous run of certificates.
    fn advance_cum_ack(&mut self) {
        let mut seq = self.cum_ack.seq_num;
        loop {
            match self.slots.get(&(seq + 1)) {
                Some(slot) if slot.certificate_formed => seq += 1,
                _ => break,
            }
        }
        if seq > self.cum_ack.seq_num {
            self.cum_ack = PoSeqPair::new(self.incarnation, seq);
        }
    }
}

/// The Pre-Order layer's full state for one replica.
pub struct PoState {
    local: ReplicaId,
    n: u32,
    quorum_2f_k_1: u32,
    max_po_in_flight: u32,
    origins: Vec<OriginLog>,
    /// Acks this replica owes but hasn't yet broadcast.
    pending_acks: Vec<PoAckEntry>,
}

impl PoState {
    pub fn new(local: ReplicaId, n: u32, quorum_2f_k_1: u32, max_po_in_flight: u32, local_incarnation: Incarnation) -> Self {
        let mut origins = Vec::with_capacity(n as usize);
        for index in 0..n {
            let id = ReplicaId::from_index(index as usize);
            let incarnation = if id == local { local_incarnation } else { Incarnation::FIRST };
            origins.push(OriginLog::new(incarnation));
        }
        Self {
            local,
            n,
            quorum_2f_k_1,
            max_po_in_flight,
            origins,
            pending_acks: Vec::new(),
        }
    }

    fn origin_mut(&mut self, origin: ReplicaId) -> &mut OriginLog {
        &mut self.origins[origin.as_index()]
    }

    fn origin(&self, origin: ReplicaId) -> &OriginLog {
        &self.origins[origin.as_index()]
    }

    /// `submit(update)`: assigns the next PO-Sequence Pair at this replica
    /// and returns the signed-ready `PoRequest` to disseminate.
    pub fn submit(&mut self, updates: Vec<ClientUpdate>) -> Result<PoRequest, WardenError> {
        let log = self.origin_mut(self.local);
        let in_flight = log.slots.values().filter(|slot| !slot.certificate_formed).count() as u32;
        if in_flight >= self.max_po_in_flight {
            return Err(WardenError::ResourceExhausted {
                reason: format!("{} PO-Requests in flight at origin {}", in_flight, self.local),
            });
        }
        let next_seq = log.slots.keys().next_back().copied().unwrap_or(log.white_line) + 1;
        let seq = PoSeqPair::new(log.incarnation, next_seq);
        let request = PoRequest {
            origin: self.local,
            seq,
            updates,
        };
        let mut slot = PoSlot::empty(seq);
        slot.request = Some(request.clone());
        log.slots.insert(next_seq, slot);
        Ok(request)
    }

    /// Step 1 of the PO protocol: store an incoming `PoRequest`, queueing an
    /// ack entry if it extends this origin's held prefix.
    pub fn on_request(&mut self, request: PoRequest) -> Result<(), WardenError> {
        let digest = crate::message::Envelope::body_digest(&crate::message::MessageBody::PoRequest(request.clone()))
            .map_err(|_| WardenError::ProtocolInvalid {
                sender: request.origin,
                view: 0,
                reason: "PO-Request body failed to encode".into(),
            })?;
        let log = self.origin_mut(request.origin);
        if request.seq.incarnation > log.incarnation {
            *log = OriginLog::new(request.seq.incarnation);
        } else if request.seq.incarnation < log.incarnation {
            return Err(WardenError::Stale {
                reason: format!("PO-Request from stale incarnation {}", request.seq.incarnation),
            });
        }
        if request.seq.seq_num <= log.white_line {
            return Err(WardenError::Stale {
                reason: format!("seq {} at or below white line {}", request.seq.seq_num, log.white_line),
            });
        }
        let slot = log.slots.entry(request.seq.seq_num).or_insert_with(|| PoSlot::empty(request.seq));
        if slot.request.is_none() {
            slot.request = Some(request.clone());
        }
        self.pending_acks.push(PoAckEntry {
            origin: request.origin,
            seq: request.seq,
            digest,
        });
        Ok(())
    }

    /// Step 2: drains queued ack entries into a signed-ready bundle, per
    /// `PO_PERIODICALLY` or the unacked-threshold trigger.
    pub fn drain_pending_acks(&mut self) -> Option<PoAck> {
        if self.pending_acks.is_empty() {
            return None;
        }
        Some(PoAck {
            acker: self.local,
            entries: std::mem::take(&mut self.pending_acks),
        })
    }

    /// Step 3: records acks from a peer's bundle, forming a PO-Certificate
    /// once `2f+k+1` distinct ackers have been observed for a slot.
    pub fn on_ack(&mut self, ack: PoAck) {
        for entry in ack.entries {
            let log = self.origin_mut(entry.origin);
            if entry.seq.incarnation != log.incarnation || entry.seq.seq_num <= log.white_line {
                continue;
            }
            let slot = log.slots.entry(entry.seq.seq_num).or_insert_with(|| PoSlot::empty(entry.seq));
            slot.acks.insert(ack.acker);
            if !slot.certificate_formed && slot.acks.len() as u32 >= self.quorum_2f_k_1 {
                slot.certificate_formed = true;
            }
        }
        for origin_index in 0..self.n as usize {
            self.origins[origin_index].advance_cum_ack();
        }
    }

    /// `aru_vector()`: this replica's PO-ARU, one `cum_ack` per origin.
    pub fn aru_vector(&self) -> PoAru {
        PoAru {
            reporter: self.local,
            cum_ack: self.origins.iter().map(|log| log.cum_ack).collect(),
        }
    }

    /// `eligible_prefix()`: for each origin, the largest contiguous seq for
    /// which the request itself is held locally.
    pub fn eligible_prefix(&self) -> Vec<PoSeqPair> {
        self.origins
            .iter()
            .map(|log| PoSeqPair::new(log.incarnation, log.contiguous_held_prefix()))
            .collect()
    }

    /// Step 4/5: folds a peer's PO-ARU or a forwarded row into the sparse
    /// Proof Matrix this replica is accumulating toward the leader.
    pub fn merge_aru(&self, matrix: &mut ProofMatrix, aru: PoAru) {
        if let Some(existing) = matrix.rows.iter_mut().find(|row| row.reporter == aru.reporter) {
            *existing = aru;
        } else {
            matrix.rows.push(aru);
        }
    }

    /// Builds the Proof Matrix this replica currently holds, including its
    /// own row, ready to forward to the leader.
    pub fn build_proof_matrix(&self, known_rows: &[PoAru]) -> ProofMatrix {
        let mut matrix = ProofMatrix { rows: known_rows.to_vec() };
        self.merge_aru(&mut matrix, self.aru_vector());
        matrix
    }

    /// Garbage collection (`spec.md` §3 invariant): slots up to and
    /// including `up_to` are discarded for `origin` once it is safe.
    pub fn collect_garbage(&mut self, origin: ReplicaId, up_to: u32) {
        let log = self.origin_mut(origin);
        log.white_line = log.white_line.max(up_to);
        log.slots.retain(|&seq, _| seq > log.white_line);
    }

    pub fn cum_ack(&self, origin: ReplicaId) -> PoSeqPair {
        self.origin(origin).cum_ack
    }

    /// The request held for `(origin, seq)`, if any (used when re-deriving
    /// a slot's client updates for execution or catchup).
    pub fn request_at(&self, origin: ReplicaId, seq: PoSeqPair) -> Option<&PoRequest> {
        self.origin(origin).slots.get(&seq.seq_num).and_then(|slot| slot.request.as_ref())
    }

    /// Replicas that have acked `(origin, seq)`, i.e. plausible RECON
    /// senders for it (`spec.md` §4.5 "sender-selection rule").
    pub fn ackers_of(&self, origin: ReplicaId, seq: PoSeqPair) -> Vec<ReplicaId> {
        self.origin(origin)
            .slots
            .get(&seq.seq_num)
            .map(|slot| slot.acks.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Resets this replica's own-origin log to a fresh incarnation with
    /// `seq_num` back at 1, retaining nothing from the previous incarnation
    /// (`spec.md` §4.7(d): proactive recovery resets pre-order state for
    /// the recovering replica's own identity).
    pub fn reset_own_incarnation(&mut self, incarnation: Incarnation) {
        self.origins[self.local.as_index()] = OriginLog::new(incarnation);
    }

    /// Jumps every origin's `cum_ack` forward to at least `made_eligible[j]`
    /// without ever moving it backwards (`spec.md` §4.6 "jump the ARU").
    pub fn jump_aru(&mut self, made_eligible: &[PoSeqPair]) {
        for (index, &target) in made_eligible.iter().enumerate() {
            let Some(log) = self.origins.get_mut(index) else { break };
            if target > log.cum_ack {
                log.white_line = log.white_line.max(target.seq_num);
                log.cum_ack = target;
            }
        }
    }

    pub fn quorum(&self) -> u32 {
        self.quorum_2f_k_1
    }

    pub fn propagation_for(error: &WardenError) -> Propagation {
        error.propagation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(local: ReplicaId, n: u32, quorum: u32) -> PoState {
        PoState::new(local, n, quorum, 20, Incarnation::FIRST)
    }

    #[test]
    fn submit_assigns_strictly_increasing_seq_numbers() {
        let mut po = state(ReplicaId::new(1), 4, 3);
        let a = po.submit(vec![vec![1]]).unwrap();
        let b = po.submit(vec![vec![2]]).unwrap();
        assert_eq!(a.seq.seq_num, 1);
        assert_eq!(b.seq.seq_num, 2);
    }

    #[test]
    fn certificate_forms_once_quorum_acks_observed() {
        let mut po = state(ReplicaId::new(1), 4, 3);
        let request = po.submit(vec![vec![9]]).unwrap();
        po.on_request(request.clone()).unwrap();
        let digest = crate::message::Envelope::body_digest(&crate::message::MessageBody::PoRequest(request.clone())).unwrap();
        for acker in [2u32, 3, 4] {
            po.on_ack(PoAck {
                acker: ReplicaId::new(acker),
                entries: vec![PoAckEntry {
                    origin: request.origin,
                    seq: request.seq,
                    digest,
                }],
            });
        }
        assert_eq!(po.cum_ack(request.origin), request.seq);
    }

    #[test]
    fn cum_ack_never_decreases_as_acks_arrive_out_of_order() {
        let mut po = state(ReplicaId::new(1), 4, 3);
        let r1 = po.submit(vec![vec![1]]).unwrap();
        let r2 = po.submit(vec![vec![2]]).unwrap();
        po.on_request(r1.clone()).unwrap();
        po.on_request(r2.clone()).unwrap();
        let d1 = crate::message::Envelope::body_digest(&crate::message::MessageBody::PoRequest(r1.clone())).unwrap();
        let d2 = crate::message::Envelope::body_digest(&crate::message::MessageBody::PoRequest(r2.clone())).unwrap();
        // Ack slot 2 before slot 1: cum_ack must stay at 0 until slot 1 closes the gap.
        for acker in [2u32, 3, 4] {
            po.on_ack(PoAck {
                acker: ReplicaId::new(acker),
                entries: vec![PoAckEntry { origin: r1.origin, seq: r2.seq, digest: d2 }],
            });
        }
        assert_eq!(po.cum_ack(r1.origin).seq_num, 0);
        for acker in [2u32, 3, 4] {
            po.on_ack(PoAck {
                acker: ReplicaId::new(acker),
                entries: vec![PoAckEntry { origin: r1.origin, seq: r1.seq, digest: d1 }],
            });
        }
        assert_eq!(po.cum_ack(r1.origin).seq_num, 2);
    }

    #[test]
    fn submit_applies_backpressure_past_max_in_flight() {
        let mut po = PoState::new(ReplicaId::new(1), 4, 3, 2, Incarnation::FIRST);
        po.submit(vec![vec![1]]).unwrap();
        po.submit(vec![vec![2]]).unwrap();
        assert!(matches!(po.submit(vec![vec![3]]), Err(WardenError::ResourceExhausted { .. })));
    }

    #[test]
    fn stale_requests_below_white_line_are_rejected() {
        let mut po = state(ReplicaId::new(1), 4, 3);
        let request = po.submit(vec![vec![1]]).unwrap();
        po.on_request(request.clone()).unwrap();
        po.collect_garbage(request.origin, 1);
        let err = po.on_request(request).unwrap_err();
        assert_eq!(err.propagation(), Propagation::DropAndCount);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        /// `cum_ack` is the largest *contiguous* run of certificates, so
        /// acking slots out of order or repeatedly must never move it
        /// backwards, and it can only ever land on a seq some ack actually
        /// named (`spec.md` §8 "PO monotonicity").
        proptest! {
            #[test]
            fn cum_ack_is_monotone_under_any_ack_interleaving(
                seq_count in 1u32..8,
                ack_order in prop::collection::vec(0usize..8, 1..40),
            ) {
                let origin = ReplicaId::new(1);
                let mut po = state(origin, 4, 3);
                let mut requests = Vec::new();
                for i in 0..seq_count {
                    requests.push(po.submit(vec![vec![i as u8]]).unwrap());
                }
                for request in &requests {
                    po.on_request(request.clone()).unwrap();
                }
                let digests: Vec<_> = requests
                    .iter()
                    .map(|r| crate::message::Envelope::body_digest(&crate::message::MessageBody::PoRequest(r.clone())).unwrap())
                    .collect();

                let mut prev = po.cum_ack(origin);
                for &raw_index in &ack_order {
                    let index = raw_index % requests.len();
                    for acker in [2u32, 3, 4] {
                        po.on_ack(PoAck {
                            acker: ReplicaId::new(acker),
                            entries: vec![PoAckEntry {
                                origin,
                                seq: requests[index].seq,
                                digest: digests[index],
                            }],
                        });
                    }
                    let now = po.cum_ack(origin);
                    prop_assert!(now >= prev);
                    prop_assert!(now.seq_num == 0 || requests.iter().any(|r| r.seq.seq_num == now.seq_num));
                    prev = now;
                }
            }
        }
    }
}
