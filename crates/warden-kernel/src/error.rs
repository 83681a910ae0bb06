//! The core's error taxonomy (`spec.md` §7), shared by every `warden-vsr`
//! layer so propagation policy is decided once, here, rather than
//! per-component.

use std::fmt;

use warden_types::ReplicaId;

/// One of the six error kinds `spec.md` §7 names, each with a fixed
/// propagation policy a caller must respect:
///
/// - [`AuthenticationInvalid`](WardenError::AuthenticationInvalid) and
///   [`Stale`](WardenError::Stale): drop silently and count; never surface
///   past the component that detected them.
/// - [`ProtocolInvalid`](WardenError::ProtocolInvalid): log, and treat the
///   sender as suspected Byzantine for the current view (surfaced to VC).
/// - [`ResourceExhausted`](WardenError::ResourceExhausted): apply
///   backpressure to the client endpoint; never drop already-accepted work.
/// - [`Recovery`](WardenError::Recovery): request a checkpoint jump.
/// - [`Fatal`](WardenError::Fatal): halt the process after best-effort flush.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WardenError {
    #[error("authentication invalid from {sender}: {reason}")]
    AuthenticationInvalid { sender: ReplicaId, reason: String },

    #[error("protocol invalid from {sender} in view {view}: {reason}")]
    ProtocolInvalid {
        sender: ReplicaId,
        view: u32,
        reason: String,
    },

    #[error("stale: {reason}")]
    Stale { reason: String },

    #[error("resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    #[error("recovery needed: {reason}")]
    Recovery { reason: String },

    #[error("fatal: {reason}")]
    Fatal { reason: String },
}

/// The propagation policy attached to each [`WardenError`] kind, so callers
/// can match on policy instead of re-deriving it from the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Drop silently; only a counter should observe this.
    DropAndCount,
    /// Surface to Suspect & View-Change as evidence against the sender.
    SuspectSender,
    /// Apply backpressure upstream; do not drop accepted work.
    Backpressure,
    /// Request a catchup jump.
    RequestCatchup,
    /// Flush best-effort, then halt the process.
    Halt,
}

impl WardenError {
    pub fn propagation(&self) -> Propagation {
        match self {
            WardenError::AuthenticationInvalid { .. } | WardenError::Stale { .. } => {
                Propagation::DropAndCount
            }
            WardenError::ProtocolInvalid { .. } => Propagation::SuspectSender,
            WardenError::ResourceExhausted { .. } => Propagation::Backpressure,
            WardenError::Recovery { .. } => Propagation::RequestCatchup,
            WardenError::Fatal { .. } => Propagation::Halt,
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Propagation::DropAndCount => "drop-and-count",
            Propagation::SuspectSender => "suspect-sender",
            Propagation::Backpressure => "backpressure",
            Propagation::RequestCatchup => "request-catchup",
            Propagation::Halt => "halt",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_and_stale_errors_drop_and_count() {
        let auth = WardenError::AuthenticationInvalid {
            sender: ReplicaId::new(3),
            reason: "bad signature".into(),
        };
        let stale = WardenError::Stale {
            reason: "gcn behind".into(),
        };
        assert_eq!(auth.propagation(), Propagation::DropAndCount);
        assert_eq!(stale.propagation(), Propagation::DropAndCount);
    }

    #[test]
    fn protocol_invalid_suspects_the_sender() {
        let err = WardenError::ProtocolInvalid {
            sender: ReplicaId::new(4),
            view: 7,
            reason: "conflicting pre-prepare".into(),
        };
        assert_eq!(err.propagation(), Propagation::SuspectSender);
    }

    #[test]
    fn fatal_errors_halt() {
        let err = WardenError::Fatal {
            reason: "incarnation journal corrupt".into(),
        };
        assert_eq!(err.propagation(), Propagation::Halt);
    }
}
