//! Byzantine-tolerant, rotating-leader replication core for Warden's SCADA
//! control plane (`spec.md` §4).
//!
//! Layered as the original protocol describes it: [`po`] certifies that a
//! client update has been pre-ordered by a quorum before [`ord`] ever
//! assigns it a global position; [`vc`] watches the leader's turnaround
//! time and drives view changes when it slips; [`recon`] fills PO gaps
//! without broadcasting to everyone; [`catchup`] and [`recovery`] bring a
//! replica that fell behind or restarted back into the fold; [`reconfig`]
//! swaps the roster under a new generation number. [`replica`] is the
//! imperative shell that wires all of it to wall-clock timers and an
//! `Envelope`-based wire format.

pub mod catchup;
pub mod interfaces;
pub mod marzullo;
pub mod message;
pub mod ord;
pub mod po;
pub mod recon;
pub mod reconfig;
pub mod recovery;
pub mod replica;
pub mod vc;


pub use interfaces::{ClientEndpoint, ConfigurationManager, FileKeyStore, IncarnationJournal, KeyStore, OverlayTransport};
pub use replica::{PeerKeyDirectory, Replica};
