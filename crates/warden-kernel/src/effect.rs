//! Effects produced by the pure protocol state machine in `warden-vsr`.
//!
//! The kernel principle carried over from the teacher's FCIS split: state
//! transitions are pure functions `(State, Event) -> (State, Vec<Effect>)`.
//! Effects describe I/O the imperative shell must perform; they are never
//! executed by the code that produces them. Message bodies are opaque,
//! already-CE-signed bytes — `Effect` has no dependency on wire message
//! types, so `warden-kernel` stays below `warden-vsr` in the crate graph.

use std::time::Duration;

use warden_types::{GlobalSeq, ReplicaId};

use crate::timer::TimerId;

/// A side effect the event loop (`warden-vsr::replica`) must carry out.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Effect {
    /// Send already-signed bytes to one peer.
    Send { to: ReplicaId, bytes: Vec<u8> },

    /// Send already-signed bytes to every peer.
    Broadcast { bytes: Vec<u8> },

    /// Arm a timer, replacing any existing one with the same id.
    SetTimer { id: TimerId, after: Duration },

    /// Cancel a timer if armed. Idempotent.
    CancelTimer { id: TimerId },

    /// Deliver executed client updates for global slot `seq`, in the order
    /// produced by ORD's eligibility computation (`spec.md` §4.3).
    DeliverToClient {
        seq: GlobalSeq,
        updates: Vec<Vec<u8>>,
    },

    /// Persist the incarnation journal `{current_id, current_incarnation,
    /// current_gcn}` (`spec.md` §6's "Persisted state layout").
    PersistIncarnationJournal {
        replica: ReplicaId,
        incarnation: u32,
        gcn: u32,
    },

    /// Persist a checkpoint snapshot, superseding all slots it covers for
    /// garbage-collection purposes.
    PersistCheckpoint { up_to: GlobalSeq, snapshot: Vec<u8> },

    /// A `Fatal` error (`spec.md` §7) was detected; flush best-effort and
    /// terminate the process.
    Halt { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerKind;

    #[test]
    fn set_timer_and_cancel_timer_round_trip_through_serde() {
        let effect = Effect::SetTimer {
            id: TimerId::global(TimerKind::PrePrepare),
            after: Duration::from_micros(20_000),
        };
        let encoded = serde_json::to_vec(&effect).unwrap();
        let decoded: Effect = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(effect, decoded);
    }
}
