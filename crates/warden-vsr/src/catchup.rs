//! Catchup & Jump: lets a replica that fell behind rejoin without waiting
//! for RECON to trickle-fill every gap (`spec.md` §4.6).
//!
//! A lagging replica periodically advertises its executed-upto ARU; an
//! ahead peer answers, rate-limited, with either chained commit
//! certificates or — past `CATCHUP_HISTORY` — a checkpoint plus a
//! fast-forward ARU. `CATCHUP_MOVEON` rotates to the next responder if the
//! current one goes quiet; `CATCHUP_EPSILON` is a short settle window
//! before jumping, so an almost-arrived certificate isn't wastefully
//! superseded by a jump.

use std::time::Duration;

use warden_kernel::WardenError;
use warden_types::{GlobalSeq, PoSeqPair, ReplicaId};

use crate::message::{CatchupCertificates, CatchupCheckpoint, CatchupRequest, CommitCertificate};

/// Tracks a caught-up replica's rate-limited obligation to answer
/// `CatchupRequest`s.
pub struct CatchupResponder {
    period: Duration,
    last_response_at: Option<std::time::Instant>,
}

impl CatchupResponder {
    pub fn new(period: Duration) -> Self {
        Self { period, last_response_at: None }
    }

    /// True if enough time has passed since the last response to answer
    /// again (`spec.md` §4.6 "CATCHUP_PERIOD" rate limit).
    pub fn may_respond_at(&self, now: std::time::Instant) -> bool {
        match self.last_response_at {
            None => true,
            Some(last) => now.duration_since(last) >= self.period,
        }
    }

    pub fn mark_responded(&mut self, now: std::time::Instant) {
        self.last_response_at = Some(now);
    }
}

/// Tracks a lagging replica's outstanding request to a chosen helper.
pub struct CatchupRequester {
    local: ReplicaId,
    helpers: Vec<ReplicaId>,
    current_helper_index: usize,
    moveon: Duration,
    epsilon: Duration,
    waiting_since: Option<std::time::Instant>,
}

impl CatchupRequester {
    pub fn new(local: ReplicaId, helpers: Vec<ReplicaId>, moveon: Duration, epsilon: Duration) -> Self {
        Self { local, helpers, current_helper_index: 0, moveon, epsilon, waiting_since: None }
    }

    pub fn current_helper(&self) -> Option<ReplicaId> {
        self.helpers.get(self.current_helper_index).copied()
    }

    pub fn build_request(&mut self, now: std::time::Instant, executed_upto: GlobalSeq) -> CatchupRequest {
        self.waiting_since.get_or_insert(now);
        CatchupRequest { requester: self.local, executed_upto }
    }

    /// Called from the periodic timer. If the current helper has gone
    /// silent for `CATCHUP_MOVEON`, rotates to the next helper in the list
    /// (`spec.md` §4.6: "If the current helper falls silent for
    /// CATCHUP_MOVEON, the next responder is tried").
    pub fn tick(&mut self, now: std::time::Instant) {
        if let Some(since) = self.waiting_since {
            if now.duration_since(since) >= self.moveon && !self.helpers.is_empty() {
                self.current_helper_index = (self.current_helper_index + 1) % self.helpers.len();
                self.waiting_since = Some(now);
            }
        }
    }

    pub fn on_progress(&mut self) {
        self.waiting_since = None;
    }

    /// Whether `CATCHUP_EPSILON` has elapsed since the request was sent,
    /// i.e. it's safe to jump ARU now without likely discarding in-flight
    /// certificates that were already about to land.
    pub fn settled(&self, now: std::time::Instant) -> bool {
        self.waiting_since.is_none_or(|since| now.duration_since(since) >= self.epsilon)
    }
}

/// Validates a chain of commit certificates starting at `from + 1`,
/// returning the highest contiguous `GlobalSeq` the chain actually proves
/// (`spec.md` §4.6 "validates chained commit certificates up to the
/// caller's target").
pub fn validate_chain(certificates: &[CommitCertificate], from: GlobalSeq, quorum_2f_k_1: u32) -> Result<GlobalSeq, WardenError> {
    let mut sorted: Vec<&CommitCertificate> = certificates.iter().collect();
    sorted.sort_by_key(|cert| cert.pre_prepare.seq.as_u32());

    let mut highest = from;
    for cert in sorted {
        if cert.pre_prepare.seq.as_u32() != highest.as_u32() + 1 {
            break;
        }
        if (cert.commit_signers.len() as u32) < quorum_2f_k_1 {
            let sender = cert.commit_signers.first().copied().unwrap_or(ReplicaId::new(0));
            return Err(WardenError::ProtocolInvalid {
                sender,
                view: cert.pre_prepare.view.as_u32(),
                reason: format!("commit certificate for seq {} carries fewer than quorum signers", cert.pre_prepare.seq),
            });
        }
        highest = cert.pre_prepare.seq;
    }
    Ok(highest)
}

/// Builds a `CatchupCertificates` response covering `(from, up_to]`, or
/// `None` if the gap exceeds `catchup_history` and a checkpoint should be
/// sent instead.
pub fn build_certificates_response(available: &[CommitCertificate], from: GlobalSeq, up_to: GlobalSeq, catchup_history: u32) -> Option<CatchupCertificates> {
    if up_to.as_u32().saturating_sub(from.as_u32()) > catchup_history {
        return None;
    }
    let certificates: Vec<CommitCertificate> = available
        .iter()
        .filter(|cert| cert.pre_prepare.seq.as_u32() > from.as_u32() && cert.pre_prepare.seq.as_u32() <= up_to.as_u32())
        .cloned()
        .collect();
    Some(CatchupCertificates { certificates })
}

/// Builds the checkpoint response once the gap exceeds history.
pub fn build_checkpoint_response(up_to: GlobalSeq, snapshot_digest: warden_types::Digest, snapshot: Vec<u8>, fast_forward_aru: Vec<PoSeqPair>) -> CatchupCheckpoint {
    CatchupCheckpoint {
        checkpoint: crate::message::Checkpoint { up_to, snapshot_digest, snapshot },
        fast_forward_aru,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PrePrepare;
    use warden_types::{Gcn, Incarnation, View};

    fn certificate(seq: u32, signers: u32) -> CommitCertificate {
        CommitCertificate {
            pre_prepare: PrePrepare {
                view: View::FIRST,
                seq: GlobalSeq::new(seq),
                gcn: Gcn::FIRST,
                matrix: crate::message::ProofMatrix::default(),
                last_executed: vec![],
            },
            commit_signers: (1..=signers).map(ReplicaId::new).collect(),
        }
    }

    #[test]
    fn validate_chain_stops_at_first_gap() {
        let certs = vec![certificate(1, 3), certificate(2, 3), certificate(4, 3)];
        let highest = validate_chain(&certs, GlobalSeq::new(0), 3).unwrap();
        assert_eq!(highest, GlobalSeq::new(2));
    }

    #[test]
    fn validate_chain_rejects_undersigned_certificate() {
        let certs = vec![certificate(1, 1)];
        let err = validate_chain(&certs, GlobalSeq::new(0), 3).unwrap_err();
        assert!(matches!(err, WardenError::ProtocolInvalid { .. }));
    }

    #[test]
    fn gap_within_history_gets_certificates_not_a_checkpoint() {
        let certs = vec![certificate(1, 3), certificate(2, 3)];
        let response = build_certificates_response(&certs, GlobalSeq::new(0), GlobalSeq::new(2), 10);
        assert!(response.is_some());
        assert_eq!(response.unwrap().certificates.len(), 2);
    }

    #[test]
    fn gap_beyond_history_falls_back_to_checkpoint() {
        let certs = vec![certificate(1, 3)];
        let response = build_certificates_response(&certs, GlobalSeq::new(0), GlobalSeq::new(50), 10);
        assert!(response.is_none());
    }

    #[test]
    fn requester_rotates_helper_after_moveon_elapses() {
        let mut requester = CatchupRequester::new(
            ReplicaId::new(1),
            vec![ReplicaId::new(2), ReplicaId::new(3)],
            Duration::from_millis(10),
            Duration::from_millis(1),
        );
        let t0 = std::time::Instant::now();
        let _ = requester.build_request(t0, GlobalSeq::new(0));
        assert_eq!(requester.current_helper(), Some(ReplicaId::new(2)));
        requester.tick(t0 + Duration::from_millis(20));
        assert_eq!(requester.current_helper(), Some(ReplicaId::new(3)));
    }
}
