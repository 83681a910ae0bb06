//! External collaborators the core consumes but never drives itself
//! (`spec.md` §6). The hosting binary (`warden-cli`, or a test harness)
//! implements these and polls them on its own schedule; `Replica` only
//! ever hands back `Vec<Effect>` for the caller to carry out against
//! whichever of these it holds.

use std::path::Path;

use warden_crypto::{CryptoError, RsaSigningKey, ThresholdKeyShare};
use warden_types::{Gcn, Incarnation, ReplicaId};

use crate::message::{ClientUpdate, ReconfigArtifact, RosterMember};

/// Replica-to-replica overlay. Delivery is best-effort; the core assumes
/// neither ordering nor reliability from it (`spec.md` §6).
pub trait OverlayTransport {
    /// Sends to one replica, or broadcasts when `to` is `None`.
    fn send(&mut self, to: Option<ReplicaId>, bytes: Vec<u8>);

    /// Non-blocking receive: `None` when nothing is waiting.
    fn try_recv(&mut self) -> Option<(ReplicaId, Vec<u8>)>;
}

/// Local IPC stream of signed client updates. The core hands accepted
/// deliveries back via [`ClientEndpoint::deliver`] once a slot executes.
pub trait ClientEndpoint {
    /// Non-blocking receive of a freshly-submitted update, already
    /// signature-checked by the endpoint itself before it reaches the core.
    fn try_recv_update(&mut self) -> Option<ClientUpdate>;

    /// Hands back the ordered updates executed for one global slot.
    fn deliver(&mut self, updates: Vec<ClientUpdate>);
}

/// Subscription to signed configuration artifacts: `(gcn, roster, site
/// public key, per-replica public keys)` (`spec.md` §6), bundled as a
/// [`ReconfigArtifact`] — the same type RC installs when one arrives over
/// the replica-to-replica overlay as a
/// [`crate::message::MessageBody::ReconfigArtifact`] envelope. This trait
/// is for the out-of-band bootstrap copy a replica needs before it has a
/// roster to verify any envelope against in the first place.
pub trait ConfigurationManager {
    /// Non-blocking receive of the next artifact, or `None` if none is
    /// waiting.
    fn try_recv_artifact(&mut self) -> Option<ReconfigArtifact>;
}

/// Read-only at boot, read-write across recovery (`spec.md` §6).
pub trait KeyStore {
    /// Signing key plus threshold share, both in PEM/serialized form,
    /// loaded once at startup.
    fn load_keys(&self) -> Result<(RsaSigningKey, ThresholdKeyShare), CryptoError>;

    /// The per-replica verifying-key roster this replica boots with.
    fn load_roster(&self) -> Result<Vec<RosterMember>, CryptoError>;

    /// The small incarnation journal `{current_id, current_incarnation,
    /// current_gcn}` recovery reads to refuse duplicate incarnations.
    fn load_journal(&self) -> Result<Option<IncarnationJournal>, CryptoError>;

    /// Persists the journal after a fresh incarnation is announced.
    /// Must be durable before the corresponding `NewIncarnation` is sent,
    /// or a crash could replay an already-used incarnation number.
    fn persist_journal(&self, journal: &IncarnationJournal) -> Result<(), CryptoError>;
}

/// `spec.md` §6 "Persisted state layout" (c): the fact this replica needs
/// to refuse duplicate incarnations across a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncarnationJournal {
    pub current_id: ReplicaId,
    pub current_incarnation: Incarnation,
    pub current_gcn: Gcn,
}

/// A [`KeyStore`] backed by plain files under a directory, matching
/// `warden_config::KeyConfig`'s path layout. PEM for the RSA signing key,
/// `postcard` for the threshold share and incarnation journal — the same
/// split `warden-config` draws between human-edited deployment files and
/// opaque binary state.
pub struct FileKeyStore {
    pub signing_key_path: std::path::PathBuf,
    pub threshold_share_path: std::path::PathBuf,
    pub roster_path: std::path::PathBuf,
    pub journal_path: std::path::PathBuf,
}

impl FileKeyStore {
    pub fn new(signing_key_path: impl AsRef<Path>, threshold_share_path: impl AsRef<Path>, roster_path: impl AsRef<Path>, journal_path: impl AsRef<Path>) -> Self {
        Self {
            signing_key_path: signing_key_path.as_ref().to_path_buf(),
            threshold_share_path: threshold_share_path.as_ref().to_path_buf(),
            roster_path: roster_path.as_ref().to_path_buf(),
            journal_path: journal_path.as_ref().to_path_buf(),
        }
    }
}

impl KeyStore for FileKeyStore {
    fn load_keys(&self) -> Result<(RsaSigningKey, ThresholdKeyShare), CryptoError> {
        let pem = std::fs::read_to_string(&self.signing_key_path)
            .map_err(|e| CryptoError::MalformedKey(format!("reading signing key: {e}")))?;
        let signing_key = RsaSigningKey::from_pkcs1_pem(&pem)?;
        let share_bytes = std::fs::read(&self.threshold_share_path)
            .map_err(|e| CryptoError::MalformedKey(format!("reading threshold share: {e}")))?;
        let share: ThresholdKeyShare =
            postcard::from_bytes(&share_bytes).map_err(|_| CryptoError::MalformedKey("malformed threshold share file".into()))?;
        Ok((signing_key, share))
    }

    fn load_roster(&self) -> Result<Vec<RosterMember>, CryptoError> {
        let bytes = std::fs::read(&self.roster_path).map_err(|e| CryptoError::MalformedKey(format!("reading roster: {e}")))?;
        postcard::from_bytes(&bytes).map_err(|_| CryptoError::MalformedKey("malformed roster file".into()))
    }

    fn load_journal(&self) -> Result<Option<IncarnationJournal>, CryptoError> {
        if !self.journal_path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.journal_path).map_err(|e| CryptoError::MalformedKey(format!("reading incarnation journal: {e}")))?;
        if bytes.len() != 12 {
            return Err(CryptoError::MalformedKey("incarnation journal has the wrong length".into()));
        }
        let current_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let current_incarnation = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let current_gcn = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        Ok(Some(IncarnationJournal {
            current_id: ReplicaId::new(current_id),
            current_incarnation: Incarnation::new(current_incarnation),
            current_gcn: Gcn::new(current_gcn),
        }))
    }

    fn persist_journal(&self, journal: &IncarnationJournal) -> Result<(), CryptoError> {
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&journal.current_id.as_u32().to_le_bytes());
        bytes.extend_from_slice(&journal.current_incarnation.as_u32().to_le_bytes());
        bytes.extend_from_slice(&journal.current_gcn.as_u32().to_le_bytes());
        std::fs::write(&self.journal_path, bytes).map_err(|e| CryptoError::MalformedKey(format!("writing incarnation journal: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("signing.pem"), dir.path().join("share.bin"), dir.path().join("roster.bin"), dir.path().join("journal.bin"));
        assert!(store.load_journal().unwrap().is_none());
        let journal = IncarnationJournal { current_id: ReplicaId::new(1), current_incarnation: Incarnation::new(3), current_gcn: Gcn::new(7) };
        store.persist_journal(&journal).unwrap();
        assert_eq!(store.load_journal().unwrap(), Some(journal));
    }
}
