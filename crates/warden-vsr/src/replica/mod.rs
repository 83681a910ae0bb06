//! The imperative shell: owns the per-replica cryptographic key, batches
//! signatures, drives the cooperative timer wheel, and dispatches inbound
//! envelopes to the pure-ish CE/PO/ORD/VC/RECON/CU/PR/RC sub-states.
//!
//! Every public entry point returns `Vec<Effect>` — the event loop itself
//! performs no I/O; a caller (`warden-cli`, or a test harness) owns the
//! actual `OverlayTransport`/`ClientEndpoint` and carries out each effect.

mod timers;

pub use timers::{TimerWheel, K_KIND_COUNT};

use std::time::{Duration, Instant};

use warden_config::TimerConfig;
use warden_crypto::{RsaSigningKey, RsaVerifyingKey};
use warden_kernel::{Effect, TimerId, TimerKind, WardenError};
use warden_types::{Gcn, GlobalSeq, Incarnation, PoSeqPair, ReplicaId, View};

use crate::catchup::{CatchupRequester, CatchupResponder};
use crate::message::{ClientUpdate, Envelope, MessageBody, NewIncarnation, Ping, Pong, PoRequest};
use crate::ord::OrdState;
use crate::po::PoState;
use crate::recon::{ReconCollector, ReconState};
use crate::reconfig::ReconfigState;
use crate::recovery::{RecoveryState, SystemResetBootstrap};
use crate::vc::VcState;

/// Everything a `Replica` needs to verify an incoming message: the
/// sender's long-lived signing identity. Lookup is delegated to
/// `ReconfigState`, since the roster (and thus the valid verifying keys)
/// rotates with `Gcn`.
pub trait PeerKeyDirectory {
    fn verifying_key(&self, replica: ReplicaId) -> Option<RsaVerifyingKey>;
}

/// One replica's complete protocol state.
pub struct Replica {
    pub local: ReplicaId,
    pub n: u32,
    signing_key: RsaSigningKey,
    timers: TimerConfig,
    pub po: PoState,
    pub ord: OrdState,
    pub vc: VcState,
    recon: ReconState,
    recon_collector: ReconCollector,
    pub recovery: RecoveryState,
    pub reconfig: ReconfigState,
    system_reset_bootstrap: SystemResetBootstrap,
    catchup_requester: CatchupRequester,
    catchup_responder: CatchupResponder,
    /// Rows forwarded by peers since the last time this replica built (or
    /// gave up leadership of) a Proof Matrix.
    known_aru: crate::message::ProofMatrix,
    timer_wheel: TimerWheel,
    /// Committed `(seq, ranges)` pairs whose delivery is still blocked on a
    /// `PoRequest` this replica hasn't received yet. Held in commit order
    /// so later slots never deliver ahead of an earlier one that's still
    /// waiting (`spec.md` §4.3 "Execution order").
    pending_deliveries: Vec<(GlobalSeq, Vec<(ReplicaId, PoSeqPair, PoSeqPair)>)>,
    next_ping_nonce: u64,
    pending_ping: Option<(ReplicaId, u64, Instant)>,
}

impl Replica {
    pub fn new(
        local: ReplicaId,
        n: u32,
        quorum_2f_k_1: u32,
        quorum_f_k_1: u32,
        signing_key: RsaSigningKey,
        timers: TimerConfig,
        gcn: Gcn,
        roster: Vec<crate::message::RosterMember>,
        peers: Vec<ReplicaId>,
        now: Instant,
    ) -> Self {
        let initial_eligible = vec![PoSeqPair::zero(Incarnation::FIRST); n as usize];
        let mut timer_wheel = TimerWheel::new();
        timer_wheel.set(TimerId::global(TimerKind::PrePrepare), now, Duration::from_micros(timers.pre_prepare_micros));
        timer_wheel.set(TimerId::global(TimerKind::PoPeriodic), now, Duration::from_micros(timers.po_periodically_micros));
        timer_wheel.set(TimerId::global(TimerKind::RecoveryPeriod), now, Duration::from_micros(timers.recovery_period_micros));
        timer_wheel.set(
            TimerId::global(TimerKind::CatchupRequestPeriodically),
            now,
            Duration::from_micros(timers.catchup_request_periodically_micros),
        );
        timer_wheel.set(TimerId::global(TimerKind::SuspectPing), now, Duration::from_micros(timers.suspect_ping_micros));
        timer_wheel.set(TimerId::global(TimerKind::SuspectTatMeasure), now, Duration::from_micros(timers.suspect_tat_measure_micros));
        let f = quorum_2f_k_1 - quorum_f_k_1;
        Self {
            local,
            n,
            signing_key,
            catchup_requester: CatchupRequester::new(
                local,
                peers,
                Duration::from_micros(timers.catchup_moveon_micros),
                Duration::from_micros(timers.catchup_epsilon_micros),
            ),
            catchup_responder: CatchupResponder::new(Duration::from_micros(timers.catchup_request_periodically_micros)),
            po: PoState::new(local, n, quorum_2f_k_1, timers.max_po_in_flight, Incarnation::FIRST),
            ord: OrdState::new(local, n, quorum_2f_k_1, initial_eligible),
            vc: VcState::new(local, n, quorum_2f_k_1, timers.k_lat),
            recon: ReconState::new(local, quorum_f_k_1, quorum_2f_k_1, f),
            recon_collector: ReconCollector::new(),
            recovery: RecoveryState::new(local, quorum_2f_k_1, Incarnation::FIRST),
            reconfig: ReconfigState::new(gcn, roster),
            system_reset_bootstrap: SystemResetBootstrap::new(quorum_2f_k_1),
            known_aru: crate::message::ProofMatrix::default(),
            timer_wheel,
            timers,
            pending_deliveries: Vec::new(),
            next_ping_nonce: 0,
            pending_ping: None,
        }
    }

    /// Client entry point: admits a batch of updates into this replica's
    /// own PO origin log and broadcasts the resulting `PoRequest` for
    /// peers to ack.
    pub fn submit(&mut self, updates: Vec<ClientUpdate>) -> Result<Vec<Effect>, WardenError> {
        let request = self.po.submit(updates)?;
        Ok(vec![self.broadcast(MessageBody::PoRequest(request))?])
    }

    /// Wraps a body in CE and signs it directly, one RSA signature per
    /// message.
    fn sign_direct(&self, body: MessageBody) -> Result<Vec<u8>, WardenError> {
        let envelope = Envelope::sign_direct(self.local, body, &self.signing_key)
            .map_err(|_| WardenError::Fatal { reason: "failed to sign outbound message".into() })?;
        envelope
            .to_wire(0, 0)
            .map_err(|_| WardenError::Fatal { reason: "failed to encode outbound message".into() })
    }

    fn broadcast(&self, body: MessageBody) -> Result<Effect, WardenError> {
        Ok(Effect::Broadcast { bytes: self.sign_direct(body)? })
    }

    fn send_to(&self, to: ReplicaId, body: MessageBody) -> Result<Effect, WardenError> {
        Ok(Effect::Send { to, bytes: self.sign_direct(body)? })
    }

    /// Dispatches one verified inbound envelope, returning the effects the
    /// shell must carry out in response. `now` feeds Ping/Pong round-trip
    /// timing and the RECON/PO-Ack-driven state that reads it.
    pub fn on_envelope(&mut self, directory: &impl PeerKeyDirectory, bytes: &[u8], now: Instant) -> Result<Vec<Effect>, WardenError> {
        let (_, envelope) = Envelope::from_wire(bytes)
            .map_err(|_| WardenError::AuthenticationInvalid { sender: ReplicaId::new(0), reason: "malformed wire envelope".into() })?;
        let Some(key) = directory.verifying_key(envelope.sender) else {
            return Err(WardenError::AuthenticationInvalid { sender: envelope.sender, reason: "unknown sender roster key".into() });
        };
        envelope
            .verify(&key)
            .map_err(|_| WardenError::AuthenticationInvalid { sender: envelope.sender, reason: "CE signature check failed".into() })?;
        self.handle_body(envelope.sender, envelope.body, now)
    }

    fn handle_body(&mut self, sender: ReplicaId, body: MessageBody, now: Instant) -> Result<Vec<Effect>, WardenError> {
        let mut effects = Vec::new();
        match body {
            MessageBody::PoRequest(request) => {
                self.po.on_request(request)?;
            }
            MessageBody::PoAck(ack) => {
                let entries = ack.entries.clone();
                self.po.on_ack(ack);
                for entry in entries {
                    let holders = self.po.ackers_of(entry.origin, entry.seq);
                    if self.recon_is_sender(&holders) {
                        if let Some(request) = self.po.request_at(entry.origin, entry.seq) {
                            effects.extend(self.build_recon_parts(entry.origin, entry.seq, request, true)?);
                        }
                    }
                }
            }
            MessageBody::PoAru(aru) => {
                let mut matrix = std::mem::take(&mut self.known_aru);
                self.po.merge_aru(&mut matrix, aru);
                self.known_aru = matrix;
            }
            MessageBody::PrePrepare(pp) => {
                let prepare = self.ord.on_pre_prepare(sender, pp)?;
                effects.push(self.broadcast(MessageBody::Prepare(prepare))?);
            }
            MessageBody::Prepare(prepare) => {
                if let Some(commit) = self.ord.on_prepare(prepare)? {
                    effects.push(self.broadcast(MessageBody::Commit(commit))?);
                }
            }
            MessageBody::Commit(commit) => {
                self.ord.on_commit(commit)?;
                effects.extend(self.drain_executable());
            }
            MessageBody::TatMeasure(measure) => {
                if let Some(next_view) = self.vc.on_tat_measure(measure) {
                    let last_executed = self.ord.last_executed;
                    let report = self.vc.build_report(next_view, last_executed, Vec::new());
                    let leader = next_view.leader(self.n);
                    effects.push(self.send_to(leader, MessageBody::ViewChangeReport(report))?);
                }
            }
            MessageBody::ViewChangeReport(report) => {
                if let Some(proof) = self.vc.on_view_change_report(report)? {
                    effects.push(self.broadcast(MessageBody::NewLeaderProof(proof))?);
                }
            }
            MessageBody::NewLeaderProof(proof) => {
                let start = self.vc.on_new_leader_proof(proof)?;
                effects.push(self.broadcast(MessageBody::StartView(start))?);
            }
            MessageBody::StartView(start) => {
                self.vc.on_start_view(start)?;
            }
            MessageBody::ReconPart(part) => {
                if let Ok(Some(request)) = self.recon_collector.accept(part) {
                    self.po.on_request(request)?;
                }
            }
            MessageBody::CatchupRequest(_request) => {
                // Rate limiting and response construction are driven by
                // the shell, which holds the certificate/checkpoint store;
                // see `catchup::build_certificates_response`.
            }
            MessageBody::CatchupCertificates(certs) => {
                let highest = crate::catchup::validate_chain(&certs.certificates, self.ord.last_executed, self.po.quorum())?;
                self.catchup_requester.on_progress();
                if let Some(cert) = certs.certificates.iter().find(|cert| cert.pre_prepare.seq == highest) {
                    if let Some(made_eligible) = self.ord.jump_to(&cert.pre_prepare) {
                        self.po.jump_aru(&made_eligible);
                    }
                }
            }
            MessageBody::CatchupCheckpoint(checkpoint) => {
                self.catchup_requester.on_progress();
                self.ord.jump_to_checkpoint(checkpoint.checkpoint.up_to, checkpoint.fast_forward_aru.clone());
                self.po.jump_aru(&checkpoint.fast_forward_aru);
            }
            MessageBody::NewIncarnation(announcement) => {
                crate::recovery::RecoveryState::validate_announcement(&announcement, self.recovery.incarnation)?;
                let ack = crate::message::NewIncarnationAck { acker: self.local, replica: announcement.replica, incarnation: announcement.incarnation };
                effects.push(self.broadcast(MessageBody::NewIncarnationAck(ack))?);
            }
            MessageBody::NewIncarnationAck(ack) => {
                self.recovery.on_ack(ack);
            }
            MessageBody::BootstrapShare(share) => {
                self.system_reset_bootstrap.accept(share);
            }
            MessageBody::ReconfigArtifact(artifact) => {
                let gcn = artifact.gcn;
                self.reconfig.install(artifact)?;
                self.ord.gcn = gcn;
                self.ord.discard_in_flight_above_committed();
            }
            MessageBody::Ping(ping) => {
                effects.push(self.send_to(sender, MessageBody::Pong(Pong { sender: self.local, nonce: ping.nonce }))?);
            }
            MessageBody::Pong(pong) => {
                if let Some((peer, nonce, sent_at)) = self.pending_ping {
                    if peer == sender && nonce == pong.nonce {
                        self.vc.record_rtt_sample(sender, now.duration_since(sent_at).as_nanos() as i64);
                        self.pending_ping = None;
                    }
                }
            }
        }
        Ok(effects)
    }

    /// Executes every newly-committed, contiguous slot and turns the
    /// eligible `(origin, seq)` ranges into `DeliverToClient` effects by
    /// pulling the held `PoRequest` payloads back out of PO.
    ///
    /// A slot whose range still has a gap — some `PoRequest` this replica
    /// never received — blocks here rather than delivering a truncated
    /// update set; it stays queued in `pending_deliveries` and is retried
    /// on every later call, in commit order, so a later slot never
    /// overtakes one still waiting (`spec.md` §4.3 "Agreement"). Any
    /// request this replica does hold, for a row a peer hasn't acked, gets
    /// a RECON retransmission in the same pass (`spec.md` §4.5).
    fn drain_executable(&mut self) -> Vec<Effect> {
        self.pending_deliveries.extend(self.ord.try_execute());
        let mut effects = Vec::new();
        while !self.pending_deliveries.is_empty() {
            let (seq, ranges) = self.pending_deliveries[0].clone();
            let mut updates = Vec::new();
            let mut complete = true;
            'ranges: for (origin, start, end) in ranges {
                let mut cursor = start;
                loop {
                    match self.po.request_at(origin, cursor) {
                        Some(request) => {
                            updates.extend(request.updates.clone());
                            let holders = self.po.ackers_of(origin, cursor);
                            if self.recon_is_sender(&holders) {
                                if let Ok(parts) = self.build_recon_parts(origin, cursor, request, true) {
                                    effects.extend(parts);
                                }
                            }
                        }
                        None => {
                            complete = false;
                            break 'ranges;
                        }
                    }
                    if cursor.seq_num == end.seq_num {
                        break;
                    }
                    cursor = PoSeqPair::new(cursor.incarnation, cursor.seq_num + 1);
                }
            }
            if !complete {
                break;
            }
            effects.push(Effect::DeliverToClient { seq, updates });
            self.pending_deliveries.remove(0);
        }
        effects
    }

    /// Builds the Pre-Prepare this replica should broadcast on the
    /// `PrePrepare` timer, if it currently owns the leader role. The
    /// leader feeds its own Pre-Prepare through `on_pre_prepare` just like
    /// an incoming one would be, so its own slot gets a `made_eligible`
    /// and a Prepare vote instead of sitting un-prepared forever.
    pub fn on_pre_prepare_timer(&mut self) -> Result<Vec<Effect>, WardenError> {
        if !self.ord.is_leader() {
            return Ok(vec![]);
        }
        let matrix = self.po.build_proof_matrix(&self.known_aru.rows);
        let seq = GlobalSeq::new(self.ord.last_executed.as_u32() + 1);
        let pp = self.ord.build_pre_prepare(seq, matrix);
        let mut effects = vec![self.broadcast(MessageBody::PrePrepare(pp.clone()))?];
        let prepare = self.ord.on_pre_prepare(self.local, pp)?;
        effects.push(self.broadcast(MessageBody::Prepare(prepare))?);
        Ok(effects)
    }

    /// Drains queued PO acks on the `PoPeriodic` timer.
    pub fn on_po_periodic_timer(&mut self) -> Result<Vec<Effect>, WardenError> {
        let mut effects = Vec::new();
        if let Some(ack) = self.po.drain_pending_acks() {
            effects.push(self.broadcast(MessageBody::PoAck(ack))?);
        }
        effects.push(self.broadcast(MessageBody::PoAru(self.po.aru_vector()))?);
        Ok(effects)
    }

    /// Announces a fresh incarnation on the `RecoveryPeriod` timer, and
    /// resets this replica's own-origin PO log back to seq_num 1 under the
    /// new incarnation (`spec.md` §4.7(d)).
    pub fn on_recovery_timer(&mut self, gcn: Gcn) -> Result<Vec<Effect>, WardenError> {
        let announcement: NewIncarnation = self.recovery.begin_restart(gcn);
        self.po.reset_own_incarnation(announcement.incarnation);
        Ok(vec![self.broadcast(MessageBody::NewIncarnation(announcement))?])
    }

    /// Drains every timer due at or before `now`, re-arms the recurring
    /// ones, and runs each one's handler. Called by the hosting binary on
    /// its own schedule; this shell never spawns a clock of its own.
    pub fn on_timer_tick(&mut self, now: Instant) -> Result<Vec<Effect>, WardenError> {
        let mut effects = Vec::new();
        for id in self.timer_wheel.due_before(now) {
            match id.kind {
                TimerKind::PrePrepare => {
                    effects.extend(self.on_pre_prepare_timer()?);
                    self.timer_wheel.set(id, now, Duration::from_micros(self.timers.pre_prepare_micros));
                }
                TimerKind::PoPeriodic => {
                    effects.extend(self.on_po_periodic_timer()?);
                    self.timer_wheel.set(id, now, Duration::from_micros(self.timers.po_periodically_micros));
                }
                TimerKind::RecoveryPeriod => {
                    effects.extend(self.on_recovery_timer(self.reconfig.gcn)?);
                    self.timer_wheel.set(id, now, Duration::from_micros(self.timers.recovery_period_micros));
                }
                TimerKind::CatchupRequestPeriodically => {
                    self.catchup_requester.tick(now);
                    if !self.catchup_requester.settled(now) {
                        let request = self.catchup_requester.build_request(now, self.ord.last_executed);
                        if let Some(helper) = self.catchup_requester.current_helper() {
                            effects.push(self.send_to(helper, MessageBody::CatchupRequest(request))?);
                        }
                    }
                    self.timer_wheel.set(id, now, Duration::from_micros(self.timers.catchup_request_periodically_micros));
                }
                TimerKind::SuspectPing => {
                    let leader = self.ord.view.leader(self.n);
                    if leader != self.local {
                        let nonce = self.next_ping_nonce;
                        self.next_ping_nonce += 1;
                        self.pending_ping = Some((leader, nonce, now));
                        effects.push(self.send_to(leader, MessageBody::Ping(Ping { sender: self.local, nonce }))?);
                    }
                    self.timer_wheel.set(id, now, Duration::from_micros(self.timers.suspect_ping_micros));
                }
                TimerKind::SuspectTatMeasure => {
                    let leader = self.ord.view.leader(self.n);
                    if leader != self.local {
                        let tolerance_nanos = (self.timers.suspect_tat_measure_micros * 1000) as i64;
                        if let (Some(bound), Some((peer, _, sent_at))) = (self.vc.acceptable_bound(tolerance_nanos), self.pending_ping) {
                            if peer == leader && now.duration_since(sent_at).as_nanos() as i64 > bound {
                                let measure = self.vc.challenge(leader);
                                effects.push(self.broadcast(MessageBody::TatMeasure(measure))?);
                            }
                        }
                    }
                    self.timer_wheel.set(id, now, Duration::from_micros(self.timers.suspect_tat_measure_micros));
                }
                // Recovery-share/sig-batch timers are driven by state this
                // shell doesn't yet own (the outbound signature FIFO); the
                // hosting binary re-arms and handles those kinds itself.
                _ => {}
            }
        }
        Ok(effects)
    }

    pub fn recon_is_sender(&self, holders: &[ReplicaId]) -> bool {
        self.recon.is_designated_sender(holders)
    }

    pub fn build_recon_parts(&self, origin: ReplicaId, seq: PoSeqPair, request: &PoRequest, use_erasure: bool) -> Result<Vec<Effect>, WardenError> {
        let parts = self
            .recon
            .build_parts(origin, seq, request, use_erasure)
            .map_err(|_| WardenError::Fatal { reason: "failed to build RECON parts".into() })?;
        parts
            .into_iter()
            .map(|part| self.broadcast(MessageBody::ReconPart(part)))
            .collect()
    }

    pub fn view(&self) -> View {
        self.vc.view
    }
}
