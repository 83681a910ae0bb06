//! Threshold-RSA signatures — the site-certificate half of the
//! Cryptographic Envelope (`spec.md` §4.1).
//!
//! Grounded on `tc_wrapper.c`'s `TC_Generate_Sig_Share` / `TC_Combine_Shares`
//! / `TC_Verify_Signature` / `TC_Check_Share`, which wrap Shoup's practical
//! threshold-RSA scheme ("Practical Threshold Signatures", Eurocrypt 2000).
//! `n_replicas` replicas each hold one share of an RSA private exponent `d`
//! dealt as a degree-`(t-1)` polynomial (`t = k+f+1`); any `t` shares
//! combine into a classical RSA signature verifiable against one site
//! public key, and each share carries a non-interactive zero-knowledge
//! proof used by [`blame`] to name a faulty signer when combine fails.

use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_traits::{One, Zero};
use rand::RngCore;
use sha1::{Digest as _, Sha1};
use warden_types::{Digest, ReplicaId, SiteId};

use crate::bigint_ext::{extended_gcd, mod_inverse};
use crate::error::{CryptoError, Result};
use crate::primes::generate_safe_prime;

/// Wire width of both threshold shares and the combined signature
/// (`spec.md` §6: "128-byte big-endian modular integer, zero-left-padded").
pub const THRESHOLD_ELEMENT_LEN: usize = 128;

/// Extra random bits layered onto Shamir coefficients / proof blinding so
/// the statistical hiding Shoup's scheme relies on holds even at the small
/// modulus sizes used in tests.
const SECURITY_SLACK_BITS: u64 = 80;

fn factorial(n: u32) -> BigUint {
    (1..=n).fold(BigUint::one(), |acc, x| acc * BigUint::from(x))
}

fn biguint_to_be_padded(value: &BigUint, len: usize) -> Result<[u8; THRESHOLD_ELEMENT_LEN]> {
    let raw = value.to_bytes_be();
    if raw.len() > len {
        return Err(CryptoError::MalformedKey(format!(
            "value needs {} bytes, wire width is {}",
            raw.len(),
            len
        )));
    }
    let mut out = [0u8; THRESHOLD_ELEMENT_LEN];
    out[len - raw.len()..len].copy_from_slice(&raw);
    Ok(out)
}

/// Hashes a digest into an element of `QR_n` (the quadratic-residue
/// subgroup of `Z*_n`), expanding the 20-byte SHA-1 digest with a counter
/// until it exceeds `n`'s bit length, then squaring to land in `QR_n`.
fn hash_to_qr(digest: &Digest, n: &BigUint) -> BigUint {
    let target_bytes = n.bits().div_ceil(8) as usize + 4;
    let mut buf = Vec::with_capacity(target_bytes + 20);
    let mut counter: u32 = 0;
    while buf.len() < target_bytes {
        let mut hasher = Sha1::new();
        hasher.update(digest.as_bytes());
        hasher.update(counter.to_le_bytes());
        buf.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    buf.truncate(target_bytes);
    let raw = BigUint::from_bytes_be(&buf) % n;
    (&raw * &raw) % n
}

fn fiat_shamir_challenge(parts: &[&BigUint]) -> BigUint {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.to_bytes_be());
    }
    BigUint::from_bytes_be(&hasher.finalize())
}

fn modpow_signed(base: &BigUint, exponent: &BigInt, modulus: &BigUint) -> Result<BigUint> {
    if exponent.sign() == Sign::Minus {
        let base_signed = BigInt::from_biguint(Sign::Plus, base.clone());
        let modulus_signed = BigInt::from_biguint(Sign::Plus, modulus.clone());
        let inv = mod_inverse(&base_signed, &modulus_signed)
            .ok_or_else(|| CryptoError::MalformedKey("share not invertible mod n".into()))?;
        let inv = inv.to_biguint().expect("reduced mod positive modulus is non-negative");
        let magnitude = (-exponent).to_biguint().expect("negated negative is non-negative");
        Ok(inv.modpow(&magnitude, modulus))
    } else {
        let magnitude = exponent.to_biguint().expect("non-negative BigInt has a BigUint form");
        Ok(base.modpow(&magnitude, modulus))
    }
}

// ============================================================================
// Site public key and per-replica shares
// ============================================================================

/// The site's public key and the dealing parameters needed to combine and
/// verify threshold signatures. Shared (read-only, via `Clone`) by every
/// replica at a site; rotates with `Gcn` on reconfiguration (`spec.md`
/// §4.8).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThresholdPublicKey {
    pub site: SiteId,
    pub n: BigUint,
    pub e: BigUint,
    /// Generator of `QR_n` used by the Shoup NIZK proof.
    pub v: BigUint,
    /// `verification_keys[i]` is `v^{share_i}`, indexed by `ReplicaId::as_index`.
    pub verification_keys: Vec<BigUint>,
    pub num_replicas: u32,
    /// `t = k + f + 1`, the minimum number of shares `Combine` needs.
    pub threshold: u32,
}

impl ThresholdPublicKey {
    fn delta(&self) -> BigUint {
        factorial(self.num_replicas)
    }

    /// Verifies a combined signature against this site's public key
    /// (`spec.md` §4.1 `Verify`).
    pub fn verify(&self, signature: &CombinedSignature, digest: &Digest) -> Result<()> {
        let sig = BigUint::from_bytes_be(&signature.0);
        let expected = hash_to_qr(digest, &self.n);
        if sig.modpow(&self.e, &self.n) == expected {
            Ok(())
        } else {
            Err(CryptoError::CombineVerificationFailed)
        }
    }
}

/// One replica's share of the site's threshold-RSA private exponent.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThresholdKeyShare {
    pub replica: ReplicaId,
    share: BigUint,
    pub public: ThresholdPublicKey,
}

impl ThresholdKeyShare {
    /// `GenShare(digest) -> share` (`spec.md` §4.1), with the accompanying
    /// Shoup NIZK proof attached so [`blame`] can later check it without
    /// rerunning the protocol.
    pub fn gen_share(&self, digest: &Digest, rng: &mut impl RngCore) -> ThresholdShare {
        let n = &self.public.n;
        let h = hash_to_qr(digest, n);
        let two_delta = BigUint::from(2u32) * self.public.delta();
        let h_base = h.modpow(&two_delta, n); // h^{2Δ} mod n
        let x_i = h_base.modpow(&self.share, n); // h^{2Δ s_i} mod n

        let blind_bits = n.bits() + SECURITY_SLACK_BITS;
        let r = rng.gen_biguint(blind_bits);
        let v_prime = self.public.v.modpow(&r, n);
        let x_prime = h_base.modpow(&r, n);
        let v_i = &self.public.verification_keys[self.replica.as_index()];
        let c = fiat_shamir_challenge(&[&self.public.v, v_i, &h_base, &x_i, &v_prime, &x_prime]);
        let z = r + &c * &self.share;

        ThresholdShare {
            replica: self.replica,
            x_i,
            proof: ShoupProof { v_prime, x_prime, z },
        }
    }
}

/// A Shoup non-interactive zero-knowledge proof that a share's contribution
/// `x_i` and its public verification key `v_i` were produced from the same
/// secret exponent (equality of discrete logs, base `v` vs. base `h^{2Δ}`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ShoupProof {
    v_prime: BigUint,
    x_prime: BigUint,
    z: BigUint,
}

/// One replica's contribution toward a combined signature, produced by
/// `GenShare` and consumed by [`combine`] / [`blame`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThresholdShare {
    pub replica: ReplicaId,
    x_i: BigUint,
    proof: ShoupProof,
}

impl ThresholdShare {
    /// Wire encoding of this share's contribution (the proof travels
    /// alongside it in the enclosing wire message, not in this width).
    pub fn x_i_bytes(&self) -> Result<[u8; THRESHOLD_ELEMENT_LEN]> {
        biguint_to_be_padded(&self.x_i, THRESHOLD_ELEMENT_LEN)
    }

    fn verify_proof(&self, public: &ThresholdPublicKey, digest: &Digest) -> bool {
        let n = &public.n;
        let h = hash_to_qr(digest, n);
        let two_delta = BigUint::from(2u32) * public.delta();
        let h_base = h.modpow(&two_delta, n);
        let Some(v_i) = public.verification_keys.get(self.replica.as_index()) else {
            return false;
        };
        let c = fiat_shamir_challenge(&[
            &public.v,
            v_i,
            &h_base,
            &self.x_i,
            &self.proof.v_prime,
            &self.proof.x_prime,
        ]);

        let lhs_v = public.v.modpow(&self.proof.z, n);
        let rhs_v = (&self.proof.v_prime * v_i.modpow(&c, n)) % n;
        let lhs_x = h_base.modpow(&self.proof.z, n);
        let rhs_x = (&self.proof.x_prime * self.x_i.modpow(&c, n)) % n;

        lhs_v == rhs_v && lhs_x == rhs_x
    }
}

/// A combined, classically-verifiable RSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CombinedSignature(pub [u8; THRESHOLD_ELEMENT_LEN]);

/// `Combine({shares}, digest) -> sig` (`spec.md` §4.1).
///
/// Requires at least `public.threshold` shares; uses exactly the first
/// `threshold` of them (sorted by replica id) so the Lagrange
/// interpolation set is well-defined even if more were supplied.
pub fn combine(
    public: &ThresholdPublicKey,
    shares: &[ThresholdShare],
    digest: &Digest,
) -> Result<CombinedSignature> {
    let threshold = public.threshold as usize;
    if shares.len() < threshold {
        return Err(CryptoError::InsufficientShares {
            got: shares.len(),
            need: threshold,
        });
    }
    let mut sorted: Vec<&ThresholdShare> = shares.iter().collect();
    sorted.sort_by_key(|s| s.replica.as_u32());
    sorted.truncate(threshold);

    let n = &public.n;
    let delta = BigInt::from_biguint(Sign::Plus, public.delta());

    let indices: Vec<i64> = sorted.iter().map(|s| i64::from(s.replica.as_u32())).collect();

    let mut w = BigUint::one();
    for (k, share) in sorted.iter().enumerate() {
        let i = indices[k];
        let mut num = delta.clone();
        let mut den = BigInt::one();
        for (m, &j) in indices.iter().enumerate() {
            if m == k {
                continue;
            }
            num *= BigInt::from(-j);
            den *= BigInt::from(i - j);
        }
        let (remainder, lambda_i) = {
            let q = &num / &den;
            (&num - &q * &den, q)
        };
        if remainder != BigInt::zero() {
            return Err(CryptoError::MalformedKey(
                "Lagrange coefficient did not divide evenly; Delta too small for this replica count".into(),
            ));
        }
        let exponent = BigInt::from(2) * lambda_i;
        let contribution = modpow_signed(&share.x_i, &exponent, n)?;
        w = (&w * &contribution) % n;
    }

    let e_prime = BigInt::from(4) * &delta * &delta;
    let e_signed = BigInt::from_biguint(Sign::Plus, public.e.clone());
    let (gcd, a, b) = extended_gcd(&e_prime, &e_signed);
    if gcd != BigInt::one() && gcd != -BigInt::one() {
        return Err(CryptoError::MalformedKey(
            "public exponent not coprime with 4*Delta^2; key was dealt incorrectly".into(),
        ));
    }
    let (a, b) = if gcd.sign() == Sign::Minus { (-a, -b) } else { (a, b) };

    let h = hash_to_qr(digest, n);
    let w_to_a = modpow_signed(&w, &a, n)?;
    let h_to_b = modpow_signed(&h, &b, n)?;
    let sig = (&w_to_a * &h_to_b) % n;

    let bytes = biguint_to_be_padded(&sig, THRESHOLD_ELEMENT_LEN)?;
    let combined = CombinedSignature(bytes);

    if public.verify(&combined, digest).is_ok() {
        Ok(combined)
    } else {
        Err(CryptoError::CombineVerificationFailed)
    }
}

/// The blame sub-protocol (`spec.md` §4.1): run only after `Combine`
/// succeeds numerically but the result fails `Verify`, or after `Combine`
/// itself reports a malformed combination. Checks each share's Shoup proof
/// and returns the first replica whose proof doesn't check out.
pub fn blame(public: &ThresholdPublicKey, shares: &[ThresholdShare], digest: &Digest) -> CryptoError {
    for share in shares {
        if !share.verify_proof(public, digest) {
            return CryptoError::FaultyShare(share.replica);
        }
    }
    CryptoError::CombineVerificationFailed
}

// ============================================================================
// Dealing (test / local-simulation support only — production keys are
// provisioned externally, per `spec.md` §1's "key generation utilities"
// non-goal, and loaded via `KeyStore`).
// ============================================================================

/// Deals a fresh threshold key set for `num_replicas` replicas requiring
/// `threshold` (`k+f+1`) shares to combine.
pub fn deal(
    site: SiteId,
    num_replicas: u32,
    threshold: u32,
    prime_bits: u32,
    rng: &mut impl RngCore,
) -> Result<(ThresholdPublicKey, Vec<ThresholdKeyShare>)> {
    let (p, p_prime) = generate_safe_prime(prime_bits, 100_000, rng)
        .ok_or(CryptoError::PrimeGenerationExhausted)?;
    let (q, q_prime) = loop {
        let candidate = generate_safe_prime(prime_bits, 100_000, rng)
            .ok_or(CryptoError::PrimeGenerationExhausted)?;
        if candidate.0 != p {
            break candidate;
        }
    };
    let n = &p * &q;
    let m = &p_prime * &q_prime;
    let m_signed = BigInt::from_biguint(Sign::Plus, m.clone());

    let delta = factorial(num_replicas);
    let e_prime = BigInt::from(4) * &delta * &delta;

    let mut e = BigUint::from(65_537u32);
    let e_signed = loop {
        let candidate_signed = BigInt::from_biguint(Sign::Plus, e.clone());
        let coprime_to_m = extended_gcd(&candidate_signed, &m_signed).0.magnitude() == &BigUint::one();
        let coprime_to_delta = extended_gcd(&candidate_signed, &e_prime).0.magnitude() == &BigUint::one();
        if coprime_to_m && coprime_to_delta {
            break candidate_signed;
        }
        e += 2u32;
    };
    let d_signed = mod_inverse(&e_signed, &m_signed)
        .ok_or_else(|| CryptoError::MalformedKey("failed to invert e mod m".into()))?;
    let d = d_signed.to_biguint().expect("inverse mod positive modulus is non-negative");

    // Shamir-share d as the constant term of a degree-(threshold-1)
    // polynomial with non-negative coefficients, Shoup §3.
    let coeff_bits = n.bits() + 2 * SECURITY_SLACK_BITS;
    let mut coefficients = vec![d.clone()];
    for _ in 1..threshold {
        coefficients.push(rng.gen_biguint(coeff_bits));
    }

    let shares: Vec<BigUint> = (1..=num_replicas)
        .map(|i| {
            let x = BigUint::from(i);
            let mut acc = BigUint::zero();
            let mut pow = BigUint::one();
            for coeff in &coefficients {
                acc += coeff * &pow;
                pow *= &x;
            }
            acc
        })
        .collect();

    // Generator of QR_n: square a random unit.
    let v = loop {
        let candidate = rng.gen_biguint_below(&n);
        if candidate > BigUint::zero() {
            break (&candidate * &candidate) % &n;
        }
    };
    let verification_keys: Vec<BigUint> = shares.iter().map(|s| v.modpow(s, &n)).collect();

    let public = ThresholdPublicKey {
        site,
        n,
        e,
        v,
        verification_keys,
        num_replicas,
        threshold,
    };

    let key_shares = shares
        .into_iter()
        .enumerate()
        .map(|(idx, share)| ThresholdKeyShare {
            replica: ReplicaId::from_index(idx),
            share,
            public: public.clone(),
        })
        .collect();

    Ok((public, key_shares))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn test_digest(tag: &[u8]) -> Digest {
        let mut hasher = Sha1::new();
        hasher.update(tag);
        let out = hasher.finalize();
        let mut buf = [0u8; 20];
        buf.copy_from_slice(&out);
        Digest::new(buf)
    }

    // 4 replicas, f=1, k=0 -> threshold = k+f+1 = 2.
    fn small_deployment(seed: u64) -> (ThresholdPublicKey, Vec<ThresholdKeyShare>, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let (public, shares) = deal(SiteId::new(1), 4, 2, 24, &mut rng).unwrap();
        (public, shares, rng)
    }

    #[test]
    fn threshold_shares_combine_into_a_verifiable_signature() {
        let (public, shares, mut rng) = small_deployment(7);
        let digest = test_digest(b"pre-prepare view=1 seq=42");

        let contributions: Vec<ThresholdShare> = shares[..2]
            .iter()
            .map(|s| s.gen_share(&digest, &mut rng))
            .collect();

        let sig = combine(&public, &contributions, &digest).expect("combine should succeed");
        public.verify(&sig, &digest).expect("verify should accept a genuine combine");
    }

    #[test]
    fn combine_rejects_too_few_shares() {
        let (public, shares, mut rng) = small_deployment(8);
        let digest = test_digest(b"only-one-share");
        let contributions = vec![shares[0].gen_share(&digest, &mut rng)];
        let err = combine(&public, &contributions, &digest).unwrap_err();
        assert!(matches!(err, CryptoError::InsufficientShares { .. }));
    }

    #[test]
    fn any_quorum_of_shares_reconstructs_the_same_signature() {
        let (public, shares, mut rng) = small_deployment(9);
        let digest = test_digest(b"quorum-independence");

        let first_pair: Vec<_> = shares[0..2].iter().map(|s| s.gen_share(&digest, &mut rng)).collect();
        let other_pair: Vec<_> = shares[2..4].iter().map(|s| s.gen_share(&digest, &mut rng)).collect();

        let sig_a = combine(&public, &first_pair, &digest).unwrap();
        let sig_b = combine(&public, &other_pair, &digest).unwrap();
        assert_eq!(sig_a, sig_b, "every valid quorum must reconstruct the identical signature");
    }

    #[test]
    fn blame_identifies_a_share_with_a_forged_proof() {
        let (public, shares, mut rng) = small_deployment(10);
        let digest = test_digest(b"forged-share");

        let good = shares[0].gen_share(&digest, &mut rng);
        let mut forged = shares[1].gen_share(&digest, &mut rng);
        forged.x_i += BigUint::one(); // corrupt the contribution after proving it honestly

        let err = blame(&public, &[good, forged], &digest);
        assert!(matches!(err, CryptoError::FaultyShare(r) if r == shares[1].replica));
    }
}
