//! Deployment configuration for a replication-core replica.
//!
//! Hierarchical configuration loading from multiple sources, in increasing
//! precedence order:
//! 1. Built-in defaults
//! 2. `~/.config/warden/config.toml` (user defaults)
//! 3. `warden.toml` (deployment-tracked configuration)
//! 4. `warden.local.toml` (gitignored, local overrides)
//! 5. Environment variables (`WARDEN_*`)
//!
//! Everything the core reads to come up as one replica in an `N = 3f+2k+1`
//! deployment lives here: identity, fault-tolerance parameters, the roster
//! of peer endpoints, timer constants (`spec.md` §6), and on-disk paths for
//! persisted state and key material. None of this crate's types are on the
//! hot path — they are read once at startup and handed to `warden-vsr`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_types::{ReplicaId, SiteId};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Top-level deployment configuration for one replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub identity: IdentityConfig,
    pub fault_tolerance: FaultToleranceConfig,
    pub roster: RosterConfig,
    pub timers: TimerConfig,
    pub storage: StorageConfig,
    pub keys: KeyConfig,
    pub network: NetworkConfig,
}

/// Which replica this process is, and which site it belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub replica_id: ReplicaId,
    pub site: SiteId,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            replica_id: ReplicaId::new(1),
            site: SiteId::new(1),
        }
    }
}

/// `N = 3f + 2k + 1` (`spec.md` §2): `f` Byzantine faults and `k`
/// simultaneously-unavailable correct replicas the deployment tolerates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultToleranceConfig {
    pub f: u32,
    pub k: u32,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self { f: 1, k: 0 }
    }
}

impl FaultToleranceConfig {
    /// `N = 3f + 2k + 1`, the total number of replicas in the deployment.
    pub fn num_replicas(&self) -> u32 {
        3 * self.f + 2 * self.k + 1
    }

    /// `2f + k + 1`: the quorum size for PO-Certificates, Prepare/Commit
    /// counting, view-change Reports, and TAT-Measure view-change triggers.
    pub fn quorum_2f_k_1(&self) -> u32 {
        2 * self.f + self.k + 1
    }

    /// `f + k + 1`: the rank used to read `made_eligible` off a sorted
    /// Proof Matrix column, and the RECON sender-selection threshold.
    /// Also the minimum number of threshold-signature shares `Combine`
    /// needs.
    pub fn rank_f_k_1(&self) -> u32 {
        self.f + self.k + 1
    }
}

/// One peer's network address in the replica-to-replica overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub replica_id: ReplicaId,
    pub address: String,
}

/// The full deployment roster. Rotates with `Gcn` on reconfiguration
/// (`spec.md` §4.8); this is the roster the process boots with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub entries: Vec<RosterEntry>,
}

impl RosterConfig {
    pub fn address_of(&self, replica: ReplicaId) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.replica_id == replica)
            .map(|e| e.address.as_str())
    }
}

/// On-disk paths for persisted log, checkpoints, and client IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".warden/data"),
        }
    }
}

/// PEM and share file locations for this replica's key material. Key
/// *generation* is an external collaborator (`spec.md` §1 non-goal); this
/// config only names where the core should load already-dealt material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub signing_key_path: PathBuf,
    pub threshold_share_path: PathBuf,
    pub threshold_public_key_path: PathBuf,
    pub peer_verifying_keys_dir: PathBuf,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            signing_key_path: PathBuf::from(".warden/keys/signing.pem"),
            threshold_share_path: PathBuf::from(".warden/keys/threshold_share.bin"),
            threshold_public_key_path: PathBuf::from(".warden/keys/threshold_public.bin"),
            peer_verifying_keys_dir: PathBuf::from(".warden/keys/peers"),
        }
    }
}

/// Bind addresses for the replica overlay and the local client endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub client_endpoint: String,
    pub max_packet_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7070".to_string(),
            client_endpoint: "0.0.0.0:7071".to_string(),
            // PRIME_MAX_PACKET_SIZE, spec.md §6.
            max_packet_size: 32_000,
        }
    }
}

/// Timer and threshold constants driving the cooperative event loop
/// (`spec.md` §6, §9). Stored at microsecond precision to match the
/// spec's `(seconds, microseconds)` constants exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub sig_min_micros: u64,
    pub sig_max_micros: u64,
    pub sig_threshold: usize,
    pub pre_prepare_micros: u64,
    pub po_periodically_micros: u64,
    pub suspect_ping_micros: u64,
    pub suspect_tat_measure_micros: u64,
    pub suspect_vc_micros: u64,
    pub retrans_micros: u64,
    pub recovery_period_micros: u64,
    pub catchup_request_periodically_micros: u64,
    pub catchup_moveon_micros: u64,
    pub catchup_epsilon_micros: u64,
    pub system_reset_timeout_micros: u64,
    pub system_reset_min_wait_micros: u64,
    /// TAT acceptable-bound multiplier applied to the ping distribution.
    pub k_lat: f64,
    pub catchup_history: u32,
    pub max_po_in_flight: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            sig_min_micros: 1_000,
            sig_max_micros: 5_000,
            sig_threshold: 64,
            pre_prepare_micros: 20_000,
            po_periodically_micros: 2_000,
            suspect_ping_micros: 500_000,
            suspect_tat_measure_micros: 20_000,
            suspect_vc_micros: 500_000,
            retrans_micros: 2_000_000,
            recovery_period_micros: 10_000_000,
            catchup_request_periodically_micros: 10_000_000,
            catchup_moveon_micros: 100_000,
            catchup_epsilon_micros: 20_000,
            system_reset_timeout_micros: 10_000_000,
            system_reset_min_wait_micros: 2_000_000,
            k_lat: 2.5,
            catchup_history: 10,
            max_po_in_flight: 20,
        }
    }
}

macro_rules! duration_accessor {
    ($name:ident, $field:ident) => {
        pub fn $name(&self) -> Duration {
            Duration::from_micros(self.$field)
        }
    };
}

impl TimerConfig {
    duration_accessor!(sig_min, sig_min_micros);
    duration_accessor!(sig_max, sig_max_micros);
    duration_accessor!(pre_prepare, pre_prepare_micros);
    duration_accessor!(po_periodically, po_periodically_micros);
    duration_accessor!(suspect_ping, suspect_ping_micros);
    duration_accessor!(suspect_tat_measure, suspect_tat_measure_micros);
    duration_accessor!(suspect_vc, suspect_vc_micros);
    duration_accessor!(retrans, retrans_micros);
    duration_accessor!(recovery_period, recovery_period_micros);
    duration_accessor!(catchup_request_periodically, catchup_request_periodically_micros);
    duration_accessor!(catchup_moveon, catchup_moveon_micros);
    duration_accessor!(catchup_epsilon, catchup_epsilon_micros);
    duration_accessor!(system_reset_timeout, system_reset_timeout_micros);
    duration_accessor!(system_reset_min_wait, system_reset_min_wait_micros);
}

impl WardenConfig {
    /// Load configuration from default locations.
    pub fn load() -> anyhow::Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific deployment directory.
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// A config suitable for `warden-cli`'s in-process simulation: four
    /// replicas, `f=1`, `k=0`, no unavailable replicas tolerated.
    pub fn local_simulation() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();
        if self.storage.data_dir.is_relative() {
            self.storage.data_dir = base.join(&self.storage.data_dir);
        }
        if self.keys.signing_key_path.is_relative() {
            self.keys.signing_key_path = base.join(&self.keys.signing_key_path);
        }
        if self.keys.threshold_share_path.is_relative() {
            self.keys.threshold_share_path = base.join(&self.keys.threshold_share_path);
        }
        if self.keys.threshold_public_key_path.is_relative() {
            self.keys.threshold_public_key_path = base.join(&self.keys.threshold_public_key_path);
        }
        if self.keys.peer_verifying_keys_dir.is_relative() {
            self.keys.peer_verifying_keys_dir = base.join(&self.keys.peer_verifying_keys_dir);
        }
    }

    /// Checks internal consistency: the roster must name exactly `N`
    /// replicas including this one, per `spec.md` §2.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.fault_tolerance.num_replicas();
        if !self.roster.entries.is_empty() && self.roster.entries.len() as u32 != n {
            return Err(ConfigError::ValidationError(format!(
                "roster has {} entries, but f={} k={} requires N={}",
                self.roster.entries.len(),
                self.fault_tolerance.f,
                self.fault_tolerance.k,
                n
            )));
        }
        if !self.roster.entries.is_empty()
            && self
                .roster
                .entries
                .iter()
                .all(|e| e.replica_id != self.identity.replica_id)
        {
            return Err(ConfigError::ValidationError(format!(
                "this replica's id {} is not present in its own roster",
                self.identity.replica_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WardenConfig::default();
        assert_eq!(config.fault_tolerance.f, 1);
        assert_eq!(config.fault_tolerance.num_replicas(), 4);
        assert_eq!(config.timers.sig_threshold, 64);
        assert_eq!(config.timers.sig_min(), Duration::from_micros(1_000));
    }

    #[test]
    fn quorum_formulas_match_the_fault_model() {
        let ft = FaultToleranceConfig { f: 2, k: 1 };
        assert_eq!(ft.num_replicas(), 9);
        assert_eq!(ft.quorum_2f_k_1(), 6);
        assert_eq!(ft.rank_f_k_1(), 4);
    }

    #[test]
    fn validate_rejects_a_roster_of_the_wrong_size() {
        let mut config = WardenConfig::default();
        config.roster.entries.push(RosterEntry {
            replica_id: ReplicaId::new(1),
            address: "127.0.0.1:7070".into(),
        });
        assert!(config.validate().is_err(), "N=4 needs 4 roster entries, not 1");
    }

    #[test]
    fn validate_accepts_an_empty_roster_as_unconfigured() {
        let config = WardenConfig::default();
        config.validate().expect("empty roster defers validation to the caller");
    }

    #[test]
    fn test_path_resolution() {
        let mut config = WardenConfig::default();
        config.resolve_paths("/srv/warden");
        assert_eq!(config.storage.data_dir, PathBuf::from("/srv/warden/.warden/data"));
    }
}
