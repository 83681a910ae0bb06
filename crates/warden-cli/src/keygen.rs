//! Dev-only key dealing: generates per-replica signing keys and threshold
//! shares for a local deployment and writes them where
//! [`warden_vsr::FileKeyStore`] expects to find them.
//!
//! Real key dealing happens out-of-band per `spec.md` §1's non-goals; this
//! exists purely so `simulate` (and a human poking at a local cluster) has
//! somewhere to get keys from without a real dealer ceremony.

use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use warden_crypto::{threshold, RsaSigningKey};
use warden_types::{ReplicaId, SiteId};
use warden_vsr::message::RosterMember;

/// Bits per safe prime factor for the dealt threshold-RSA modulus. Small
/// relative to a production deployment, chosen so local dealing finishes
/// in a reasonable time; not a wire-format constant.
const DEV_THRESHOLD_PRIME_BITS: u32 = 256;

pub fn run(out_dir: &Path, f: u32, k: u32) -> Result<()> {
    let n = 3 * f + 2 * k + 1;
    let threshold_count = f + k + 1;
    std::fs::create_dir_all(out_dir).context("creating key output directory")?;

    let mut rng = OsRng;
    let (public, shares) = threshold::deal(SiteId::new(1), n, threshold_count, DEV_THRESHOLD_PRIME_BITS, &mut rng)
        .context("dealing threshold-RSA key shares")?;

    let mut roster = Vec::with_capacity(n as usize);
    let mut signing_pems = Vec::with_capacity(n as usize);
    for index in 0..n {
        let replica = ReplicaId::from_index(index as usize);
        let signing_key = RsaSigningKey::generate().context("generating per-replica RSA signing key")?;
        let verifying_key_pem = signing_key.verifying_key().to_pkcs1_pem().context("encoding verifying key as PEM")?;
        roster.push(RosterMember { replica, verifying_key_pem });
        signing_pems.push((replica, signing_key.to_pkcs1_pem().context("encoding signing key as PEM")?));
    }

    let roster_bytes = postcard::to_allocvec(&roster).context("encoding roster")?;
    std::fs::write(out_dir.join("roster.postcard"), roster_bytes)?;
    let public_bytes = postcard::to_allocvec(&public).context("encoding site public key")?;
    std::fs::write(out_dir.join("site_public_key.postcard"), public_bytes)?;

    for (share, (replica, signing_pem)) in shares.into_iter().zip(signing_pems.into_iter()) {
        let replica_dir = out_dir.join(format!("replica-{}", replica.as_u32()));
        std::fs::create_dir_all(&replica_dir)?;
        std::fs::write(replica_dir.join("signing.pem"), signing_pem)?;
        let share_bytes = postcard::to_allocvec(&share).context("encoding threshold share")?;
        std::fs::write(replica_dir.join("threshold_share.postcard"), share_bytes)?;
    }

    tracing::info!(n, threshold = threshold_count, dir = %out_dir.display(), "dealt key material for a local deployment");
    Ok(())
}
