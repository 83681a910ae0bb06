//! [`PeerKeyDirectory`] backed by an in-memory roster of PEM verifying
//! keys, the shape a real deployment would instead read through
//! [`warden_vsr::ConfigurationManager`]/[`warden_vsr::KeyStore`].

use std::collections::HashMap;

use warden_crypto::RsaVerifyingKey;
use warden_types::ReplicaId;
use warden_vsr::PeerKeyDirectory;

pub struct RosterKeyDirectory {
    keys: HashMap<ReplicaId, RsaVerifyingKey>,
}

impl RosterKeyDirectory {
    pub fn new(keys: HashMap<ReplicaId, RsaVerifyingKey>) -> Self {
        Self { keys }
    }
}

impl PeerKeyDirectory for RosterKeyDirectory {
    fn verifying_key(&self, replica: ReplicaId) -> Option<RsaVerifyingKey> {
        self.keys.get(&replica).cloned()
    }
}
