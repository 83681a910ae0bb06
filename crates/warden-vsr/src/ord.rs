//! Ordering layer: rotating-leader three-phase agreement (`spec.md` §4.3).
//!
//! A global slot walks VOID → PRE-PREPARED → PREPARED → COMMITTED →
//! EXECUTED (→ RECONCILED → GARBAGE). Only the current view's leader may
//! originate a Pre-Prepare; every transition past it needs `2f+k+1`
//! matching Prepare/Commit votes.

use std::collections::BTreeMap;

use warden_kernel::WardenError;
use warden_types::{Digest, Gcn, GlobalSeq, PoSeqPair, ReplicaId, View};

use crate::message::{Commit, Envelope, MessageBody, Prepare, PrePrepare, ProofMatrix};

/// State for one global sequence number (`spec.md` §3 "Ord-Slot").
#[derive(Debug, Clone, Default)]
pub struct OrdSlot {
    pub view: View,
    pub complete_pp: Option<PrePrepare>,
    pub digest: Option<Digest>,
    prepares: BTreeMap<ReplicaId, Digest>,
    commits: BTreeMap<ReplicaId, Digest>,
    pub prepared: bool,
    pub committed: bool,
    pub executed: bool,
    pub made_eligible: Vec<PoSeqPair>,
    pub reconciled: bool,
}

impl OrdSlot {
    fn vote_count(votes: &BTreeMap<ReplicaId, Digest>, digest: Digest) -> u32 {
        votes.values().filter(|d| **d == digest).count() as u32
    }
}

pub struct OrdState {
    local: ReplicaId,
    n: u32,
    quorum_2f_k_1: u32,
    pub view: View,
    pub gcn: Gcn,
    slots: BTreeMap<u32, OrdSlot>,
    pub last_executed: GlobalSeq,
    /// `made_eligible` vector of the most recently executed slot; the
    /// baseline for the next slot's eligibility computation.
    prev_made_eligible: Vec<PoSeqPair>,
}

impl OrdState {
    pub fn new(local: ReplicaId, n: u32, quorum_2f_k_1: u32, initial_eligible: Vec<PoSeqPair>) -> Self {
        Self {
            local,
            n,
            quorum_2f_k_1,
            view: View::FIRST,
            gcn: Gcn::FIRST,
            slots: BTreeMap::new(),
            last_executed: GlobalSeq::new(0),
            prev_made_eligible: initial_eligible,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.view.leader(self.n) == self.local
    }

    fn slot_mut(&mut self, seq: GlobalSeq) -> &mut OrdSlot {
        self.slots.entry(seq.as_u32()).or_default()
    }

    pub fn slot(&self, seq: GlobalSeq) -> Option<&OrdSlot> {
        self.slots.get(&seq.as_u32())
    }

    /// Selects, for origin `j`, the value at the descending position
    /// `2f+k+1` of the N reporters' `cum_ack[j]` claims (`spec.md` §4.3
    /// "Eligibility computation").
    fn select_eligible_value(&self, matrix: &ProofMatrix, origin_index: usize) -> PoSeqPair {
        let mut values: Vec<PoSeqPair> = matrix
            .rows
            .iter()
            .map(|row| row.cum_ack.get(origin_index).copied().unwrap_or(PoSeqPair::zero(warden_types::Incarnation::new(0))))
            .collect();
        while values.len() < self.n as usize {
            values.push(PoSeqPair::zero(warden_types::Incarnation::new(0)));
        }
        values.sort_by(|a, b| b.cmp(a));
        let position = (self.quorum_2f_k_1 as usize).saturating_sub(1).min(values.len() - 1);
        values[position]
    }

    fn compute_made_eligible(&self, matrix: &ProofMatrix) -> Vec<PoSeqPair> {
        (0..self.n as usize).map(|j| self.select_eligible_value(matrix, j)).collect()
    }

    /// Leader duty: builds a Pre-Prepare from the highest Proof Matrix held
    /// (`spec.md` §4.3 "Leader duty").
    pub fn build_pre_prepare(&self, seq: GlobalSeq, matrix: ProofMatrix) -> PrePrepare {
        PrePrepare {
            view: self.view,
            seq,
            gcn: self.gcn,
            matrix,
            last_executed: self.prev_made_eligible.clone(),
        }
    }

    /// Accepts a Pre-Prepare from the current view's leader. Returns the
    /// `Prepare` this replica should broadcast in response.
    pub fn on_pre_prepare(&mut self, sender: ReplicaId, pp: PrePrepare) -> Result<Prepare, WardenError> {
        if pp.view != self.view {
            return Err(WardenError::Stale {
                reason: format!("Pre-Prepare view {} != current view {}", pp.view, self.view),
            });
        }
        if pp.gcn != self.gcn {
            return Err(WardenError::Stale {
                reason: format!("Pre-Prepare gcn {} != current gcn {}", pp.gcn, self.gcn),
            });
        }
        if sender != self.view.leader(self.n) {
            return Err(WardenError::ProtocolInvalid {
                sender,
                view: self.view.as_u32(),
                reason: "Pre-Prepare from non-leader".into(),
            });
        }
        let digest = Envelope::body_digest(&MessageBody::PrePrepare(pp.clone()))
            .map_err(|_| WardenError::ProtocolInvalid { sender, view: self.view.as_u32(), reason: "Pre-Prepare body failed to encode".into() })?;
        let made_eligible = self.compute_made_eligible(&pp.matrix);
        let seq = pp.seq;
        let slot = self.slot_mut(seq);
        if let Some(existing) = &slot.complete_pp {
            if existing.view == pp.view && slot.digest != Some(digest) {
                return Err(WardenError::ProtocolInvalid {
                    sender,
                    view: self.view.as_u32(),
                    reason: format!("conflicting Pre-Prepare for (view={}, seq={seq})", pp.view),
                });
            }
        }
        slot.view = pp.view;
        slot.complete_pp = Some(pp);
        slot.digest = Some(digest);
        slot.made_eligible = made_eligible;
        slot.prepares.insert(self.local, digest);
        Ok(Prepare {
            view: self.view,
            seq,
            gcn: self.gcn,
            pre_prepare_digest: digest,
            signer: self.local,
        })
    }

    /// Records a Prepare vote; returns the Commit to broadcast once
    /// `2f+k+1` matching Prepares (including this replica's own) exist.
    pub fn on_prepare(&mut self, prepare: Prepare) -> Result<Option<Commit>, WardenError> {
        if prepare.view != self.view || prepare.gcn != self.gcn {
            return Err(WardenError::Stale { reason: "Prepare for a stale view/gcn".into() });
        }
        let slot = self.slot_mut(prepare.seq);
        slot.prepares.insert(prepare.signer, prepare.pre_prepare_digest);
        if slot.prepared || OrdSlot::vote_count(&slot.prepares, prepare.pre_prepare_digest) < self.quorum_2f_k_1 {
            return Ok(None);
        }
        slot.prepared = true;
        slot.commits.insert(self.local, prepare.pre_prepare_digest);
        Ok(Some(Commit {
            view: self.view,
            seq: prepare.seq,
            gcn: self.gcn,
            pre_prepare_digest: prepare.pre_prepare_digest,
            signer: self.local,
        }))
    }

    /// Records a Commit vote; a slot becomes `committed` once `2f+k+1`
    /// matching Commits exist.
    pub fn on_commit(&mut self, commit: Commit) -> Result<(), WardenError> {
        if commit.view != self.view || commit.gcn != self.gcn {
            return Err(WardenError::Stale { reason: "Commit for a stale view/gcn".into() });
        }
        let slot = self.slot_mut(commit.seq);
        if let Some(digest) = slot.digest {
            if digest != commit.pre_prepare_digest {
                return Err(WardenError::ProtocolInvalid {
                    sender: commit.signer,
                    view: self.view.as_u32(),
                    reason: "Commit evidence diverges from Prepare digest".into(),
                });
            }
        }
        slot.commits.insert(commit.signer, commit.pre_prepare_digest);
        if !slot.committed && OrdSlot::vote_count(&slot.commits, commit.pre_prepare_digest) >= self.quorum_2f_k_1 {
            slot.committed = true;
        }
        Ok(())
    }

    /// Execution order: drains every contiguously-committed slot in
    /// ascending order, returning `(seq, ranges)` where `ranges[j]` is the
    /// inclusive `(origin, seq_num)` span newly eligible this slot, already
    /// sorted ascending `(origin, PO-Sequence Pair)` (`spec.md` §4.3
    /// "Execution order").
    pub fn try_execute(&mut self) -> Vec<(GlobalSeq, Vec<(ReplicaId, PoSeqPair, PoSeqPair)>)> {
        let mut delivered = Vec::new();
        loop {
            let next = GlobalSeq::new(self.last_executed.as_u32() + 1);
            let Some(slot) = self.slots.get_mut(&next.as_u32()) else { break };
            if !slot.committed || slot.executed {
                break;
            }
            let mut ranges = Vec::new();
            for (index, cur) in slot.made_eligible.iter().enumerate() {
                let prev = self.prev_made_eligible.get(index).copied().unwrap_or(PoSeqPair::zero(cur.incarnation));
                let effective_prev_seq = if cur.incarnation > prev.incarnation { 0 } else { prev.seq_num };
                if cur.incarnation >= prev.incarnation && cur.seq_num > effective_prev_seq {
                    let origin = ReplicaId::from_index(index);
                    let start = PoSeqPair::new(cur.incarnation, effective_prev_seq + 1);
                    ranges.push((origin, start, *cur));
                }
            }
            ranges.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
            self.prev_made_eligible = slot.made_eligible.clone();
            slot.executed = true;
            self.last_executed = next;
            delivered.push((next, ranges));
        }
        delivered
    }

    pub fn collect_garbage(&mut self, before: GlobalSeq) {
        self.slots.retain(|&seq, _| seq > before.as_u32());
    }

    /// Fast-forwards past a validated catchup certificate chain, without
    /// replaying the Pre-Prepare/Prepare/Commit rounds it proves happened
    /// (`spec.md` §4.6 "validate then jump"). Returns the `made_eligible`
    /// vector the target slot carries, for `PoState::jump_aru` to apply, or
    /// `None` if `pre_prepare.seq` doesn't actually advance this replica.
    pub fn jump_to(&mut self, pre_prepare: &PrePrepare) -> Option<Vec<PoSeqPair>> {
        if pre_prepare.seq <= self.last_executed {
            return None;
        }
        let made_eligible = self.compute_made_eligible(&pre_prepare.matrix);
        self.slots.retain(|&seq, _| seq > pre_prepare.seq.as_u32());
        self.last_executed = pre_prepare.seq;
        self.prev_made_eligible = made_eligible.clone();
        Some(made_eligible)
    }

    /// Fast-forwards past a catchup checkpoint, whose `up_to` has no
    /// accompanying Pre-Prepare to derive eligibility from — the
    /// checkpoint's own `fast_forward_aru` becomes the new baseline
    /// directly (`spec.md` §4.6 "checkpoint plus fast-forward ARU").
    pub fn jump_to_checkpoint(&mut self, up_to: GlobalSeq, fast_forward_aru: Vec<PoSeqPair>) {
        if up_to > self.last_executed {
            self.slots.retain(|&seq, _| seq > up_to.as_u32());
            self.last_executed = up_to;
            self.prev_made_eligible = fast_forward_aru;
        }
    }

    /// Discards speculative, not-yet-executed Ord-Slot state when crossing
    /// into a new generation: only the already-executed prefix survives,
    /// bridged forward under the new roster (`spec.md` §4.8).
    pub fn discard_in_flight_above_committed(&mut self) {
        let executed = self.last_executed.as_u32();
        self.slots.retain(|&seq, _| seq <= executed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PoAru;
    use warden_types::Incarnation;

    fn matrix_with(cum_ack: Vec<PoSeqPair>, reporter_count: usize) -> ProofMatrix {
        ProofMatrix {
            rows: (1..=reporter_count as u32)
                .map(|id| PoAru { reporter: ReplicaId::new(id), cum_ack: cum_ack.clone() })
                .collect(),
        }
    }

    #[test]
    fn eligibility_picks_the_quorum_position_descending() {
        let ord = OrdState::new(ReplicaId::new(1), 4, 3, vec![PoSeqPair::zero(Incarnation::FIRST); 4]);
        let values = vec![
            PoSeqPair::new(Incarnation::FIRST, 5),
            PoSeqPair::new(Incarnation::FIRST, 3),
            PoSeqPair::new(Incarnation::FIRST, 7),
            PoSeqPair::new(Incarnation::FIRST, 1),
        ];
        // Sorted descending: 7,5,3,1 -> position 3 (quorum=3) is 3.
        let matrix = ProofMatrix {
            rows: values
                .iter()
                .enumerate()
                .map(|(i, _)| PoAru {
                    reporter: ReplicaId::from_index(i),
                    cum_ack: vec![values[i]; 4],
                })
                .collect(),
        };
        let picked = ord.select_eligible_value(&matrix, 0);
        assert_eq!(picked.seq_num, 3);
    }

    #[test]
    fn full_round_commits_and_executes_a_slot() {
        let n = 4;
        let quorum = 3;
        let eligible = vec![PoSeqPair::new(Incarnation::FIRST, 1); n as usize];
        let matrix = matrix_with(eligible.clone(), n as usize);

        let mut replicas: Vec<OrdState> = (1..=n)
            .map(|id| OrdState::new(ReplicaId::new(id), n, quorum, vec![PoSeqPair::zero(Incarnation::FIRST); n as usize]))
            .collect();

        let pp = replicas[0].build_pre_prepare(GlobalSeq::new(1), matrix);
        let mut prepares = Vec::new();
        for replica in &mut replicas {
            prepares.push(replica.on_pre_prepare(ReplicaId::new(1), pp.clone()).unwrap());
        }
        let mut commits = Vec::new();
        for replica in &mut replicas {
            for prepare in &prepares {
                if let Some(commit) = replica.on_prepare(*prepare).unwrap() {
                    commits.push(commit);
                }
            }
        }
        for replica in &mut replicas {
            for commit in &commits {
                replica.on_commit(*commit).unwrap();
            }
        }
        for replica in &mut replicas {
            let delivered = replica.try_execute();
            assert_eq!(delivered.len(), 1);
            assert_eq!(delivered[0].0, GlobalSeq::new(1));
        }
    }

    #[test]
    fn conflicting_pre_prepare_for_same_view_seq_is_protocol_invalid() {
        let mut ord = OrdState::new(ReplicaId::new(2), 4, 3, vec![PoSeqPair::zero(Incarnation::FIRST); 4]);
        let matrix_a = matrix_with(vec![PoSeqPair::new(Incarnation::FIRST, 1); 4], 4);
        let matrix_b = matrix_with(vec![PoSeqPair::new(Incarnation::FIRST, 2); 4], 4);
        let pp_a = ord.build_pre_prepare(GlobalSeq::new(1), matrix_a);
        ord.on_pre_prepare(ReplicaId::new(1), pp_a).unwrap();
        let pp_b = ord.build_pre_prepare(GlobalSeq::new(1), matrix_b);
        let err = ord.on_pre_prepare(ReplicaId::new(1), pp_b).unwrap_err();
        assert!(matches!(err, WardenError::ProtocolInvalid { .. }));
    }
}
