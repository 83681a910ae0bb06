//! Reconfiguration: membership and key rotation driven by a signed
//! `ReconfigArtifact` (`spec.md` §4.8).
//!
//! A higher `Gcn` always wins; anything carrying an older generation is
//! rejected outright rather than merged. Crossing into a new generation
//! discards ordering and pre-order state except the already-committed
//! prefix, which is bridged forward via a `Checkpoint` rather than
//! replayed under the old roster's keys.

use warden_crypto::RsaVerifyingKey;
use warden_kernel::WardenError;
use warden_types::Gcn;

use crate::message::{Checkpoint, ReconfigArtifact, RosterMember};

pub struct ReconfigState {
    pub gcn: Gcn,
    pub roster: Vec<RosterMember>,
}

impl ReconfigState {
    pub fn new(gcn: Gcn, roster: Vec<RosterMember>) -> Self {
        Self { gcn, roster }
    }

    /// Validates and installs a reconfiguration artifact. Rejects anything
    /// at or below the current generation (`spec.md` §4.8: "rejection of
    /// smaller-gcn messages").
    pub fn install(&mut self, artifact: ReconfigArtifact) -> Result<(), WardenError> {
        if artifact.gcn <= self.gcn {
            return Err(WardenError::Stale {
                reason: format!("ReconfigArtifact gcn {} <= current gcn {}", artifact.gcn, self.gcn),
            });
        }
        if artifact.roster.is_empty() {
            return Err(WardenError::ProtocolInvalid {
                sender: self.roster.first().map(|m| m.replica).unwrap_or(warden_types::ReplicaId::new(0)),
                view: 0,
                reason: "ReconfigArtifact carries an empty roster".into(),
            });
        }
        self.gcn = artifact.gcn;
        self.roster = artifact.roster;
        Ok(())
    }

    pub fn verifying_key_for(&self, replica: warden_types::ReplicaId) -> Option<Result<RsaVerifyingKey, warden_crypto::CryptoError>> {
        self.roster
            .iter()
            .find(|member| member.replica == replica)
            .map(|member| RsaVerifyingKey::from_pkcs1_pem(&member.verifying_key_pem))
    }

    /// Whether a message stamped with `gcn` should be accepted at all, or
    /// dropped as belonging to a generation this replica has moved past.
    pub fn accepts_gcn(&self, gcn: Gcn) -> bool {
        gcn == self.gcn
    }
}

/// Bridges the committed prefix across a generation boundary: everything
/// at or below `checkpoint.up_to` survives; Ord-Slot and pre-order state
/// above it is discarded along with the old roster (`spec.md` §4.8).
pub fn bridge_checkpoint(checkpoint: &Checkpoint) -> warden_types::GlobalSeq {
    checkpoint.up_to
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::ReplicaId;

    fn member(id: u32) -> RosterMember {
        RosterMember { replica: ReplicaId::new(id), verifying_key_pem: String::new() }
    }

    #[test]
    fn lower_or_equal_gcn_is_rejected() {
        let mut state = ReconfigState::new(Gcn::new(5), vec![member(1)]);
        let artifact = ReconfigArtifact { gcn: Gcn::new(5), roster: vec![member(1)], site_public_key: sample_public_key() };
        let err = state.install(artifact).unwrap_err();
        assert!(matches!(err, WardenError::Stale { .. }));
    }

    #[test]
    fn higher_gcn_replaces_the_roster() {
        let mut state = ReconfigState::new(Gcn::new(5), vec![member(1)]);
        let artifact = ReconfigArtifact { gcn: Gcn::new(6), roster: vec![member(1), member(2)], site_public_key: sample_public_key() };
        state.install(artifact).unwrap();
        assert_eq!(state.gcn, Gcn::new(6));
        assert_eq!(state.roster.len(), 2);
    }

    fn sample_public_key() -> warden_crypto::ThresholdPublicKey {
        warden_crypto::ThresholdPublicKey {
            site: warden_types::SiteId::new(1),
            n: num_bigint::BigUint::from(15u32),
            e: num_bigint::BigUint::from(3u32),
            v: num_bigint::BigUint::from(2u32),
            verification_keys: vec![],
            num_replicas: 4,
            threshold: 3,
        }
    }
}
