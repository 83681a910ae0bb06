//! Stable timer identities for the cooperative event loop (`spec.md` §5, §9).
//!
//! "Coroutine-style batched I/O ... is a cooperative scheduler with
//! tasks-as-closures keyed by a stable timer id; the timer id is used for
//! both cancellation and idempotent re-queue." The kernel only needs the
//! identity, not the scheduler itself (that lives in `warden-vsr::replica`,
//! the imperative shell).

use std::fmt;

use warden_types::ReplicaId;

/// Which recurring or one-shot timer this is, independent of which replica
/// or origin it's scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TimerKind {
    /// Signature-batch flush, bounded by `SIG_MIN`/`SIG_MAX`.
    SigBatch,
    /// Periodic PO-Ack / PO-ARU / Proof-Matrix send.
    PoPeriodic,
    /// Leader's periodic Pre-Prepare construction.
    PrePrepare,
    /// Periodic RTT ping used to derive the TAT-acceptable bound.
    SuspectPing,
    /// Periodic TAT measurement against the current leader.
    SuspectTatMeasure,
    /// More aggressive suspicion timeout while a view change is pending.
    SuspectVc,
    /// Retransmission backoff for an outstanding request.
    Retrans,
    /// Proactive-recovery restart schedule.
    RecoveryPeriod,
    /// Periodic catchup-request emission.
    CatchupRequestPeriodically,
    /// Helper silence before trying the next catchup responder.
    CatchupMoveon,
    /// Grace window before jumping ARU.
    CatchupEpsilon,
    /// Cold-boot bootstrap-leader commit deadline.
    SystemResetTimeout,
    /// Minimum wait before a bootstrap leader proposes.
    SystemResetMinWait,
}

/// A stable identity for one scheduled timer instance. Timers scoped to a
/// specific peer or origin (e.g. per-origin `Retrans`) carry that replica
/// in `scope`; globally-scoped timers (e.g. `PrePrepare`) leave it `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TimerId {
    pub kind: TimerKind,
    pub scope: Option<ReplicaId>,
}

impl TimerId {
    pub const fn global(kind: TimerKind) -> Self {
        Self { kind, scope: None }
    }

    pub const fn scoped(kind: TimerKind, scope: ReplicaId) -> Self {
        Self {
            kind,
            scope: Some(scope),
        }
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Some(scope) => write!(f, "{:?}@{scope}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_and_scoped_timer_ids_for_the_same_kind_are_distinct() {
        let global = TimerId::global(TimerKind::PrePrepare);
        let scoped = TimerId::scoped(TimerKind::Retrans, ReplicaId::new(3));
        assert_ne!(global, TimerId::global(TimerKind::Retrans));
        assert_eq!(scoped.scope, Some(ReplicaId::new(3)));
    }

    #[test]
    fn timer_ids_with_the_same_kind_and_scope_are_equal() {
        let a = TimerId::scoped(TimerKind::Retrans, ReplicaId::new(2));
        let b = TimerId::scoped(TimerKind::Retrans, ReplicaId::new(2));
        assert_eq!(a, b);
    }
}
