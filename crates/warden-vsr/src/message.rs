//! Wire messages for the replication core (`spec.md` §3, §4, §6).
//!
//! Every message is carried inside an [`Envelope`]: a sender id, a body, and
//! a [`SignatureBlock`] that is either a direct RSA signature over the
//! body's digest or a Merkle inclusion proof plus the batch-root signature
//! (`spec.md` §4.1). [`WireHeader`] (re-exported from `warden_types::wire`)
//! is the bit-exact prefix every encoded envelope carries on the link;
//! the envelope body itself uses `postcard` for canonical encoding, as the
//! teacher's `Message` does.

use serde::{Deserialize, Serialize};
use warden_crypto::{MerkleProof, RsaSigningKey, RsaVerifyingKey, ThresholdPublicKey, ThresholdShare, RSA_SIGNATURE_LEN};
use warden_types::{Digest, Gcn, GlobalSeq, Incarnation, PoSeqPair, ReplicaId, View, WireHeader, WIRE_HEADER_LEN};

/// A client update is an opaque, already client-signed byte blob
/// (`spec.md` §3 "Client Update"); the core validates it via CE but never
/// interprets its contents.
pub type ClientUpdate = Vec<u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("failed to encode message body")]
    Encode,
    #[error("failed to decode message body")]
    Decode,
    #[error(transparent)]
    Wire(#[from] warden_types::WireError),
}

pub type Result<T> = std::result::Result<T, MessageError>;

/// Discriminant placed in [`WireHeader::msg_type`]. Order is append-only so
/// a numeric value is never reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageKind {
    PoRequest = 1,
    PoAck = 2,
    PoAru = 3,
    ProofMatrix = 4,
    PrePrepare = 5,
    Prepare = 6,
    Commit = 7,
    TatMeasure = 8,
    ViewChangeReport = 9,
    NewLeaderProof = 10,
    StartView = 11,
    ReconPart = 12,
    CatchupRequest = 13,
    CatchupCertificates = 14,
    CatchupCheckpoint = 15,
    NewIncarnation = 16,
    NewIncarnationAck = 17,
    BootstrapShare = 18,
    ReconfigArtifact = 19,
    Ping = 20,
    Pong = 21,
}

// ============================================================================
// PO — Pre-Order layer (`spec.md` §4.2)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoRequest {
    pub origin: ReplicaId,
    pub seq: PoSeqPair,
    pub updates: Vec<ClientUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoAckEntry {
    pub origin: ReplicaId,
    pub seq: PoSeqPair,
    pub digest: Digest,
}

/// A batched acknowledgement bundle; CE signs the bundle's digest (or
/// batches it further into a Merkle root), never per-entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoAck {
    pub acker: ReplicaId,
    pub entries: Vec<PoAckEntry>,
}

/// One replica's acknowledged-upto vector, indexed by `ReplicaId::as_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoAru {
    pub reporter: ReplicaId,
    pub cum_ack: Vec<PoSeqPair>,
}

/// The N-by-N matrix of `PoAru` rows a replica forwards to the leader
/// (`spec.md` §3 "Proof Matrix"). Rows are sparse: a replica forwards only
/// the `PoAru`s it currently holds, not a full N rows every time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProofMatrix {
    pub rows: Vec<PoAru>,
}

impl ProofMatrix {
    pub fn row_for(&self, reporter: ReplicaId) -> Option<&PoAru> {
        self.rows.iter().find(|row| row.reporter == reporter)
    }
}

// ============================================================================
// ORD — rotating-leader three-phase agreement (`spec.md` §4.3)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view: View,
    pub seq: GlobalSeq,
    pub gcn: Gcn,
    pub matrix: ProofMatrix,
    /// What the *previous* slot made eligible, one entry per origin.
    pub last_executed: Vec<PoSeqPair>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub view: View,
    pub seq: GlobalSeq,
    pub gcn: Gcn,
    pub pre_prepare_digest: Digest,
    pub signer: ReplicaId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub view: View,
    pub seq: GlobalSeq,
    pub gcn: Gcn,
    pub pre_prepare_digest: Digest,
    pub signer: ReplicaId,
}

// ============================================================================
// VC — suspect & view-change (`spec.md` §4.4)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TatMeasure {
    pub challenger: ReplicaId,
    pub suspected_leader: ReplicaId,
    pub view: View,
}

/// Evidence one replica holds for slot `seq`: either a full Commit
/// certificate's digest or just Prepare-level agreement
/// (`spec.md` §4.4 "Safety").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEvidence {
    pub seq: GlobalSeq,
    pub view: View,
    pub digest: Digest,
    pub has_commit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChangeReport {
    pub replica: ReplicaId,
    pub new_view: View,
    pub last_executed: GlobalSeq,
    pub evidence: Vec<SlotEvidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLeaderProof {
    pub new_leader: ReplicaId,
    pub new_view: View,
    pub reports: Vec<ViewChangeReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartView {
    pub new_view: View,
    pub adopted: Vec<SlotEvidence>,
}

// ============================================================================
// RECON — reconciliation (`spec.md` §4.5)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconEncoding {
    Raw,
    /// `data_shards` makes the decode threshold self-describing on the
    /// wire, since a deployment's fault bound `f` (and thus `f+1`) isn't
    /// otherwise available to whoever collects the shares.
    ErasureShare { share_index: u32, shard_count: u32, data_shards: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconPart {
    pub origin: ReplicaId,
    pub seq: PoSeqPair,
    pub sender: ReplicaId,
    pub encoding: ReconEncoding,
    pub data: Vec<u8>,
}

// ============================================================================
// CU — catchup & jump (`spec.md` §4.6)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchupRequest {
    pub requester: ReplicaId,
    pub executed_upto: GlobalSeq,
}

/// A single committed slot, carried during catchup together with the
/// signers whose Commit the requester already trusted at capture time (CE
/// verification happened once, on original receipt; catchup forwards the
/// identities rather than re-attaching N signatures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCertificate {
    pub pre_prepare: PrePrepare,
    pub commit_signers: Vec<ReplicaId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchupCertificates {
    pub certificates: Vec<CommitCertificate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub up_to: GlobalSeq,
    pub snapshot_digest: Digest,
    pub snapshot: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchupCheckpoint {
    pub checkpoint: Checkpoint,
    pub fast_forward_aru: Vec<PoSeqPair>,
}

// ============================================================================
// PR — proactive recovery (`spec.md` §4.7)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIncarnation {
    pub replica: ReplicaId,
    pub incarnation: Incarnation,
    pub gcn: Gcn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIncarnationAck {
    pub acker: ReplicaId,
    pub replica: ReplicaId,
    pub incarnation: Incarnation,
}

/// A bootstrap-leader's collected threshold share of the cold-boot ordinal
/// (`spec.md` §4.7 "System-reset variant").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapShare {
    pub replica: ReplicaId,
    pub share: ThresholdShare,
}

// ============================================================================
// RC — reconfiguration (`spec.md` §4.8)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterMember {
    pub replica: ReplicaId,
    pub verifying_key_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconfigArtifact {
    pub gcn: Gcn,
    pub roster: Vec<RosterMember>,
    pub site_public_key: ThresholdPublicKey,
}

// ============================================================================
// Envelope
// ============================================================================

/// Liveness pings used to build the RTT samples `vc::estimate_tat_bound`
/// feeds into Marzullo's algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub sender: ReplicaId,
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub sender: ReplicaId,
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageBody {
    PoRequest(PoRequest),
    PoAck(PoAck),
    PoAru(PoAru),
    ProofMatrix(ProofMatrix),
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(Commit),
    TatMeasure(TatMeasure),
    ViewChangeReport(ViewChangeReport),
    NewLeaderProof(NewLeaderProof),
    StartView(StartView),
    ReconPart(ReconPart),
    CatchupRequest(CatchupRequest),
    CatchupCertificates(CatchupCertificates),
    CatchupCheckpoint(CatchupCheckpoint),
    NewIncarnation(NewIncarnation),
    NewIncarnationAck(NewIncarnationAck),
    BootstrapShare(BootstrapShare),
    ReconfigArtifact(ReconfigArtifact),
    Ping(Ping),
    Pong(Pong),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::PoRequest(_) => MessageKind::PoRequest,
            Self::PoAck(_) => MessageKind::PoAck,
            Self::PoAru(_) => MessageKind::PoAru,
            Self::ProofMatrix(_) => MessageKind::ProofMatrix,
            Self::PrePrepare(_) => MessageKind::PrePrepare,
            Self::Prepare(_) => MessageKind::Prepare,
            Self::Commit(_) => MessageKind::Commit,
            Self::TatMeasure(_) => MessageKind::TatMeasure,
            Self::ViewChangeReport(_) => MessageKind::ViewChangeReport,
            Self::NewLeaderProof(_) => MessageKind::NewLeaderProof,
            Self::StartView(_) => MessageKind::StartView,
            Self::ReconPart(_) => MessageKind::ReconPart,
            Self::CatchupRequest(_) => MessageKind::CatchupRequest,
            Self::CatchupCertificates(_) => MessageKind::CatchupCertificates,
            Self::CatchupCheckpoint(_) => MessageKind::CatchupCheckpoint,
            Self::NewIncarnation(_) => MessageKind::NewIncarnation,
            Self::NewIncarnationAck(_) => MessageKind::NewIncarnationAck,
            Self::BootstrapShare(_) => MessageKind::BootstrapShare,
            Self::ReconfigArtifact(_) => MessageKind::ReconfigArtifact,
            Self::Ping(_) => MessageKind::Ping,
            Self::Pong(_) => MessageKind::Pong,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| MessageError::Encode)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(|_| MessageError::Decode)
    }
}

/// CE's signature block (`spec.md` §4.1 contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignatureBlock {
    Direct([u8; RSA_SIGNATURE_LEN]),
    Batched {
        proof: MerkleProof,
        root_signature: [u8; RSA_SIGNATURE_LEN],
    },
}

/// A fully CE-signed message, ready to hand to the overlay transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: ReplicaId,
    pub body: MessageBody,
    pub signature: SignatureBlock,
}

impl Envelope {
    /// Digest CE signs: the hash of the canonically-encoded body.
    pub fn body_digest(body: &MessageBody) -> Result<Digest> {
        let bytes = body.encode()?;
        Ok(warden_crypto::digest_bytes(&bytes))
    }

    /// Signs `body` directly with the replica's per-message RSA key
    /// (the non-batched half of CE).
    pub fn sign_direct(sender: ReplicaId, body: MessageBody, key: &RsaSigningKey) -> Result<Self> {
        let digest = Self::body_digest(&body)?;
        let sig = key.sign_digest(&digest).map_err(|_| MessageError::Encode)?;
        Ok(Self {
            sender,
            body,
            signature: SignatureBlock::Direct(sig),
        })
    }

    /// Attaches a pre-computed Merkle inclusion proof and batch-root
    /// signature (the batched half of CE; the batch itself is built by the
    /// signature-FIFO scheduler, not by this type).
    pub fn sign_batched(
        sender: ReplicaId,
        body: MessageBody,
        proof: MerkleProof,
        root_signature: [u8; RSA_SIGNATURE_LEN],
    ) -> Self {
        Self {
            sender,
            body,
            signature: SignatureBlock::Batched { proof, root_signature },
        }
    }

    /// Authenticates the envelope against the claimed sender's verifying
    /// key (`spec.md` §4.1: "Every inbound message is authenticated before
    /// any state-mutating logic sees it"). Failure here is always
    /// `AuthenticationInvalid` at the caller and must be dropped silently,
    /// never propagated further (`spec.md` §7).
    pub fn verify(&self, vk: &RsaVerifyingKey) -> std::result::Result<(), warden_crypto::CryptoError> {
        let digest = Self::body_digest(&self.body).map_err(|_| warden_crypto::CryptoError::InvalidSignature)?;
        match &self.signature {
            SignatureBlock::Direct(sig) => vk.verify_digest(&digest, sig),
            SignatureBlock::Batched { proof, root_signature } => {
                let root = proof.recompute_root(digest)?;
                vk.verify_digest(&root, root_signature)
            }
        }
    }

    /// Encodes the envelope body and prefixes the bit-exact wire header
    /// (`spec.md` §6). `sequence_on_link`/`control_link_id` are the
    /// overlay's concerns, threaded through by the embedding transport.
    pub fn to_wire(&self, sequence_on_link: u32, control_link_id: u32) -> Result<Vec<u8>> {
        let ack_len = match &self.body {
            MessageBody::PoAck(ack) => ack.entries.len().min(u16::MAX as usize) as u16,
            _ => 0,
        };
        let payload = postcard::to_allocvec(self).map_err(|_| MessageError::Encode)?;
        let header = WireHeader {
            msg_type: self.body.kind() as u32,
            sender_id: self.sender.as_u32(),
            length: payload.len().min(u16::MAX as usize) as u16,
            ack_len,
            sequence_on_link,
            control_link_id,
            sender_is_big_endian: cfg!(target_endian = "big"),
        };
        let mut out = Vec::with_capacity(WIRE_HEADER_LEN + payload.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parses a header-prefixed wire packet back into an envelope.
    pub fn from_wire(bytes: &[u8]) -> Result<(WireHeader, Self)> {
        let header = WireHeader::from_bytes(bytes)?;
        let payload = &bytes[WIRE_HEADER_LEN..];
        let envelope: Self = postcard::from_bytes(payload).map_err(|_| MessageError::Decode)?;
        Ok((header, envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::Incarnation;

    fn sample_prepare() -> MessageBody {
        MessageBody::Prepare(Prepare {
            view: View::new(3),
            seq: GlobalSeq::new(10),
            gcn: Gcn::FIRST,
            pre_prepare_digest: Digest::ZERO,
            signer: ReplicaId::new(2),
        })
    }

    #[test]
    fn direct_signature_round_trips_through_wire_encoding() {
        let key = RsaSigningKey::generate().unwrap();
        let envelope = Envelope::sign_direct(ReplicaId::new(2), sample_prepare(), &key).unwrap();
        let bytes = envelope.to_wire(7, 1).unwrap();
        let (header, decoded) = Envelope::from_wire(&bytes).unwrap();
        assert_eq!(header.msg_type, MessageKind::Prepare as u32);
        assert_eq!(header.sender_id, 2);
        decoded.verify(&key.verifying_key()).unwrap();
    }

    #[test]
    fn verify_rejects_a_body_tampered_after_signing() {
        let key = RsaSigningKey::generate().unwrap();
        let mut envelope = Envelope::sign_direct(ReplicaId::new(1), sample_prepare(), &key).unwrap();
        envelope.body = MessageBody::Prepare(Prepare {
            view: View::new(4),
            seq: GlobalSeq::new(10),
            gcn: Gcn::FIRST,
            pre_prepare_digest: Digest::ZERO,
            signer: ReplicaId::new(2),
        });
        assert!(envelope.verify(&key.verifying_key()).is_err());
    }

    #[test]
    fn batched_signature_verifies_via_merkle_inclusion() {
        let key = RsaSigningKey::generate().unwrap();
        let body = sample_prepare();
        let digest = Envelope::body_digest(&body).unwrap();
        let mut batch = warden_crypto::MerkleBatch::new();
        let other_leaf = warden_crypto::digest_bytes(b"sibling");
        let idx = batch.push(digest);
        batch.push(other_leaf);
        let tree = batch.take().unwrap();
        let proof = tree.proof(idx).unwrap();
        let root_sig = key.sign_digest(&tree.root()).unwrap();
        let envelope = Envelope::sign_batched(ReplicaId::new(2), body, proof, root_sig);
        envelope.verify(&key.verifying_key()).unwrap();
    }

    #[test]
    fn po_request_digest_is_stable_across_encodings() {
        let body = MessageBody::PoRequest(PoRequest {
            origin: ReplicaId::new(1),
            seq: PoSeqPair::first(Incarnation::FIRST),
            updates: vec![vec![0xAA, 0xBB]],
        });
        let a = Envelope::body_digest(&body).unwrap();
        let b = Envelope::body_digest(&body).unwrap();
        assert_eq!(a, b);
    }
}
