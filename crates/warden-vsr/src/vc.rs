//! Suspect & View-Change: detects an unresponsive or equivocating leader
//! and rotates to the next one (`spec.md` §4.4).
//!
//! Two quorum rounds: first `2f+k+1` matching `TatMeasure` challenges trip
//! the view change, then `2f+k+1` `ViewChangeReport`s let the next leader
//! assemble a `NewLeaderProof` and broadcast `StartView`. Reused Marzullo
//! machinery ([`crate::marzullo`]) turns raw ping RTTs into the acceptable
//! bound a TAT measurement is judged against.

use std::collections::{BTreeMap, HashMap, HashSet};

use warden_kernel::WardenError;
use warden_types::{GlobalSeq, ReplicaId, View};

use crate::marzullo::{self, Bound, Tuple};
use crate::message::{NewLeaderProof, SlotEvidence, StartView, TatMeasure, ViewChangeReport};

pub struct VcState {
    local: ReplicaId,
    n: u32,
    quorum_2f_k_1: u32,
    /// `K_Lat` from `spec.md` §6, loaded from `warden_config::TimerConfig`:
    /// the multiplier applied to the Marzullo-derived RTT midpoint to
    /// obtain the acceptable time-to-arrival bound.
    k_lat: f64,
    pub view: View,
    rtt_samples: BTreeMap<ReplicaId, i64>,
    tat_votes: HashMap<(ReplicaId, View), HashSet<ReplicaId>>,
    pending_reports: HashMap<View, BTreeMap<ReplicaId, ViewChangeReport>>,
}

impl VcState {
    pub fn new(local: ReplicaId, n: u32, quorum_2f_k_1: u32, k_lat: f64) -> Self {
        Self {
            local,
            n,
            quorum_2f_k_1,
            k_lat,
            view: View::FIRST,
            rtt_samples: BTreeMap::new(),
            tat_votes: HashMap::new(),
            pending_reports: HashMap::new(),
        }
    }

    pub fn record_rtt_sample(&mut self, peer: ReplicaId, rtt_nanos: i64) {
        self.rtt_samples.insert(peer, rtt_nanos);
    }

    /// The acceptable TAT bound: `K_Lat` times the Marzullo midpoint of the
    /// currently-held per-peer RTT snapshot, widened by `tolerance_nanos`
    /// around each sample before the sweep.
    pub fn acceptable_bound(&self, tolerance_nanos: i64) -> Option<i64> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        let mut tuples: Vec<Tuple> = Vec::with_capacity(self.rtt_samples.len() * 2);
        for (&peer, &rtt) in &self.rtt_samples {
            tuples.push(Tuple { source: peer, offset: rtt - tolerance_nanos, bound: Bound::Lower });
            tuples.push(Tuple { source: peer, offset: rtt + tolerance_nanos, bound: Bound::Upper });
        }
        let interval = marzullo::smallest_interval(&mut tuples);
        Some((interval.midpoint() as f64 * self.k_lat) as i64)
    }

    /// Builds the challenge this replica broadcasts once a leader's TAT
    /// exceeds the acceptable bound.
    pub fn challenge(&self, suspected_leader: ReplicaId) -> TatMeasure {
        TatMeasure { challenger: self.local, suspected_leader, view: self.view }
    }

    /// Records a peer's challenge. Returns `Some(next_view)` once
    /// `2f+k+1` replicas have challenged the same leader in the same view.
    pub fn on_tat_measure(&mut self, measure: TatMeasure) -> Option<View> {
        if measure.view != self.view {
            return None;
        }
        let votes = self.tat_votes.entry((measure.suspected_leader, measure.view)).or_default();
        votes.insert(measure.challenger);
        if votes.len() as u32 >= self.quorum_2f_k_1 {
            Some(measure.view.next())
        } else {
            None
        }
    }

    /// Builds this replica's report for the proposed `new_view`.
    pub fn build_report(&self, new_view: View, last_executed: GlobalSeq, evidence: Vec<SlotEvidence>) -> ViewChangeReport {
        ViewChangeReport { replica: self.local, new_view, last_executed, evidence }
    }

    /// Folds evidence from every report for the same slot, preferring a
    /// Commit certificate over Prepare-only agreement (`spec.md` §4.4
    /// "Safety": Commit evidence always wins over Prepare-only evidence).
    fn adopt_evidence(reports: &[ViewChangeReport]) -> Vec<SlotEvidence> {
        let mut by_seq: BTreeMap<u32, SlotEvidence> = BTreeMap::new();
        for report in reports {
            for ev in &report.evidence {
                by_seq
                    .entry(ev.seq.as_u32())
                    .and_modify(|existing| {
                        if ev.has_commit && !existing.has_commit {
                            *existing = *ev;
                        } else if ev.has_commit == existing.has_commit && ev.view > existing.view {
                            *existing = *ev;
                        }
                    })
                    .or_insert(*ev);
            }
        }
        by_seq.into_values().collect()
    }

    /// As the prospective new leader, accumulates `ViewChangeReport`s for
    /// `new_view`; once `2f+k+1` arrive, assembles the proof to broadcast.
    pub fn on_view_change_report(&mut self, report: ViewChangeReport) -> Result<Option<NewLeaderProof>, WardenError> {
        if report.new_view.leader(self.n) != self.local {
            return Ok(None);
        }
        let bucket = self.pending_reports.entry(report.new_view).or_default();
        bucket.insert(report.replica, report);
        if (bucket.len() as u32) < self.quorum_2f_k_1 {
            return Ok(None);
        }
        let new_view = bucket.values().next().map(|r| r.new_view).unwrap();
        let reports: Vec<ViewChangeReport> = bucket.values().cloned().collect();
        let evidence = Self::adopt_evidence(&reports);
        Ok(Some(NewLeaderProof { new_leader: self.local, new_view, reports }))
    }

    /// Verifies and installs a `NewLeaderProof`, returning the `StartView`
    /// to broadcast to the rest of the cluster.
    pub fn on_new_leader_proof(&mut self, proof: NewLeaderProof) -> Result<StartView, WardenError> {
        if proof.new_view <= self.view {
            return Err(WardenError::Stale { reason: format!("NewLeaderProof for view {} <= current {}", proof.new_view, self.view) });
        }
        if proof.new_view.leader(self.n) != proof.new_leader {
            return Err(WardenError::ProtocolInvalid {
                sender: proof.new_leader,
                view: proof.new_view.as_u32(),
                reason: "NewLeaderProof claims a leader who does not own that view".into(),
            });
        }
        if (proof.reports.len() as u32) < self.quorum_2f_k_1 {
            return Err(WardenError::ProtocolInvalid {
                sender: proof.new_leader,
                view: proof.new_view.as_u32(),
                reason: "NewLeaderProof carries fewer than quorum reports".into(),
            });
        }
        let adopted = Self::adopt_evidence(&proof.reports);
        self.install_view(proof.new_view);
        Ok(StartView { new_view: proof.new_view, adopted })
    }

    /// Installs a `StartView` broadcast from the new leader.
    pub fn on_start_view(&mut self, start: StartView) -> Result<(), WardenError> {
        if start.new_view <= self.view {
            return Err(WardenError::Stale { reason: format!("StartView for view {} <= current {}", start.new_view, self.view) });
        }
        self.install_view(start.new_view);
        Ok(())
    }

    fn install_view(&mut self, new_view: View) {
        self.view = new_view;
        self.tat_votes.retain(|(_, view), _| *view >= new_view);
        self.pending_reports.retain(|view, _| *view >= new_view);
    }

    /// Called when `SUSPECT_VC` fires again while a view change is already
    /// pending: each nested escalation targets the next view past whatever
    /// was last proposed.
    pub fn escalate(&self, currently_proposed: View) -> View {
        currently_proposed.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::Digest;

    fn digest(n: u8) -> Digest {
        let mut buf = [0u8; 20];
        buf[0] = n;
        Digest::new(buf)
    }

    #[test]
    fn quorum_of_tat_measures_proposes_the_next_view() {
        let mut vc = VcState::new(ReplicaId::new(1), 4, 3, 2.5);
        let suspect = ReplicaId::new(2);
        assert!(vc.on_tat_measure(TatMeasure { challenger: ReplicaId::new(1), suspected_leader: suspect, view: View::FIRST }).is_none());
        assert!(vc.on_tat_measure(TatMeasure { challenger: ReplicaId::new(3), suspected_leader: suspect, view: View::FIRST }).is_none());
        let next = vc.on_tat_measure(TatMeasure { challenger: ReplicaId::new(4), suspected_leader: suspect, view: View::FIRST });
        assert_eq!(next, Some(View::FIRST.next()));
    }

    #[test]
    fn adopt_evidence_prefers_commit_over_prepare_only() {
        let prepare_only = ViewChangeReport {
            replica: ReplicaId::new(1),
            new_view: View::new(1),
            last_executed: GlobalSeq::new(5),
            evidence: vec![SlotEvidence { seq: GlobalSeq::new(6), view: View::FIRST, digest: digest(1), has_commit: false }],
        };
        let with_commit = ViewChangeReport {
            replica: ReplicaId::new(2),
            new_view: View::new(1),
            last_executed: GlobalSeq::new(5),
            evidence: vec![SlotEvidence { seq: GlobalSeq::new(6), view: View::FIRST, digest: digest(2), has_commit: true }],
        };
        let adopted = VcState::adopt_evidence(&[prepare_only, with_commit]);
        assert_eq!(adopted.len(), 1);
        assert!(adopted[0].has_commit);
        assert_eq!(adopted[0].digest, digest(2));
    }

    #[test]
    fn new_leader_proof_for_a_stale_view_is_rejected() {
        let mut vc = VcState::new(ReplicaId::new(2), 4, 3, 2.5);
        vc.install_view(View::new(5));
        let proof = NewLeaderProof { new_leader: View::new(5).leader(4), new_view: View::new(5), reports: vec![] };
        let err = vc.on_new_leader_proof(proof).unwrap_err();
        assert!(matches!(err, WardenError::Stale { .. }));
    }

    #[test]
    fn quorum_of_reports_yields_a_proof_only_for_the_rightful_leader() {
        let new_view = View::FIRST.next();
        let leader = new_view.leader(4);
        let mut vc = VcState::new(leader, 4, 3, 2.5);
        let mut proof = None;
        for id in 1..=4u32 {
            let report = ViewChangeReport {
                replica: ReplicaId::new(id),
                new_view,
                last_executed: GlobalSeq::new(1),
                evidence: vec![],
            };
            proof = vc.on_view_change_report(report).unwrap();
            if proof.is_some() {
                break;
            }
        }
        let proof = proof.expect("quorum of 3 out of 4 reports must assemble a proof");
        assert_eq!(proof.new_leader, leader);
        assert!(proof.reports.len() >= 3);
    }
}
