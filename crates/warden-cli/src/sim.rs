//! In-process cluster simulation: wires a [`Network`] of [`Replica`]s
//! together, submits a handful of client updates, and drains ticks until
//! every replica has executed them (or the tick budget runs out).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use warden_config::TimerConfig;
use warden_crypto::RsaSigningKey;
use warden_types::{Gcn, ReplicaId};
use warden_vsr::message::RosterMember;
use warden_vsr::Replica;

use crate::directory::RosterKeyDirectory;
use crate::network::Network;

pub fn run(f: u32, k: u32, ticks: u32, client_updates: u32) -> Result<()> {
    let n = 3 * f + 2 * k + 1;
    let quorum_2f_k_1 = 2 * f + k + 1;
    let quorum_f_k_1 = f + k + 1;

    let mut signing_keys = Vec::with_capacity(n as usize);
    let mut roster = Vec::with_capacity(n as usize);
    for index in 0..n {
        let replica = ReplicaId::from_index(index as usize);
        let key = RsaSigningKey::generate()?;
        let verifying_key_pem = key.verifying_key().to_pkcs1_pem()?;
        roster.push(RosterMember { replica, verifying_key_pem });
        signing_keys.push((replica, key));
    }

    let directory = RosterKeyDirectory::new(
        roster
            .iter()
            .map(|member| Ok((member.replica, warden_crypto::RsaVerifyingKey::from_pkcs1_pem(&member.verifying_key_pem)?)))
            .collect::<Result<HashMap<_, _>, warden_crypto::CryptoError>>()?,
    );

    let mut timers = TimerConfig::default();
    // Tighten the defaults so a short simulation run still fires Pre-Prepare
    // and PO-periodic timers a useful number of times.
    timers.pre_prepare_micros = 2_000;
    timers.po_periodically_micros = 1_000;

    let network = Network::new(n);
    let start = Instant::now();
    let mut replicas: Vec<Replica> = signing_keys
        .into_iter()
        .map(|(replica, key)| {
            let peers: Vec<ReplicaId> = (0..n).map(|i| ReplicaId::from_index(i as usize)).filter(|&p| p != replica).collect();
            Replica::new(replica, n, quorum_2f_k_1, quorum_f_k_1, key, timers, Gcn::FIRST, roster.clone(), peers, start)
        })
        .collect();
    let handles: Vec<_> = (0..n).map(|i| network.handle_for(ReplicaId::from_index(i as usize))).collect();

    // Submit client updates against the first replica's PO origin log.
    let mut submit_effects = Vec::new();
    for i in 0..client_updates {
        let update = format!("update-{i}").into_bytes();
        submit_effects.extend(replicas[0].submit(vec![update])?);
    }
    route(&handles, 0, submit_effects);

    let mut delivered = 0usize;
    for tick in 0..ticks {
        let now = start + Duration::from_micros(u64::from(tick) * 500);
        for (index, replica) in replicas.iter_mut().enumerate() {
            while let Some((sender, bytes)) = handles[index].try_recv() {
                let effects = match replica.on_envelope(&directory, &bytes, now) {
                    Ok(effects) => effects,
                    Err(err) => {
                        tracing::debug!(replica = index, %sender, %err, "dropped an inbound message");
                        continue;
                    }
                };
                delivered += count_deliveries(&effects);
                route(&handles, index, effects);
            }
            let effects = replica.on_timer_tick(now)?;
            delivered += count_deliveries(&effects);
            route(&handles, index, effects);
        }
    }

    tracing::info!(n, ticks, client_updates, delivered, "simulation finished");
    println!("simulated {n} replicas for {ticks} ticks; {delivered} DeliverToClient effects observed across the cluster");
    Ok(())
}

fn count_deliveries(effects: &[warden_kernel::Effect]) -> usize {
    effects.iter().filter(|e| matches!(e, warden_kernel::Effect::DeliverToClient { .. })).count()
}

fn route(handles: &[crate::network::NetworkHandle], from: usize, effects: Vec<warden_kernel::Effect>) {
    for effect in effects {
        match effect {
            warden_kernel::Effect::Send { to, bytes } => handles[from].send(Some(to), bytes),
            warden_kernel::Effect::Broadcast { bytes } => handles[from].send(None, bytes),
            warden_kernel::Effect::DeliverToClient { seq, updates } => {
                tracing::info!(replica = from, seq = seq.as_u32(), count = updates.len(), "delivered executed updates");
            }
            warden_kernel::Effect::Halt { reason } => {
                tracing::error!(replica = from, reason, "replica halted");
            }
            warden_kernel::Effect::SetTimer { .. } | warden_kernel::Effect::CancelTimer { .. } | warden_kernel::Effect::PersistIncarnationJournal { .. } | warden_kernel::Effect::PersistCheckpoint { .. } => {}
        }
    }
}
