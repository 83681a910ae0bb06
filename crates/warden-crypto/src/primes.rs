//! Safe-prime generation for threshold-RSA key dealing.
//!
//! `spec.md` treats key generation as an external collaborator ("key
//! generation utilities" are explicitly out of scope, §1) — in production
//! the site modulus and shares arrive pre-dealt via `KeyStore`. This module
//! exists so tests and local simulation (`warden-cli`) can stand up a
//! working threshold key set without that external tool.
//!
//! Shoup's threshold-RSA scheme requires *safe* primes `p = 2p' + 1`,
//! `q = 2q' + 1` so the order of the quadratic-residue group `QR_n` is the
//! product of two primes `p'q'`, giving the combiner a group with no small
//! subgroups to exploit.

use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::RngCore;

/// Miller-Rabin primality test with random witnesses.
pub fn is_probable_prime(n: &BigUint, rounds: u32, rng: &mut impl RngCore) -> bool {
    let zero = BigUint::ZERO;
    let one = BigUint::one();
    let two = &one + &one;

    if *n == two || *n == BigUint::from(3u32) {
        return true;
    }
    if *n < two || (n % &two) == zero {
        return false;
    }

    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut r = 0u32;
    while (&d % &two) == zero {
        d /= &two;
        r += 1;
    }

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..r.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Searches for a safe prime pair `(p, p')` with `p = 2p' + 1`, both prime,
/// and `p'` having exactly `bits` bits.
///
/// Returns `None` if no safe prime is found within `max_attempts` (callers
/// should retry with a fresh RNG draw, or treat exhaustion as fatal setup
/// failure per `spec.md` §7's "Fatal" kind for key-store corruption).
pub fn generate_safe_prime(
    bits: u32,
    max_attempts: u32,
    rng: &mut impl RngCore,
) -> Option<(BigUint, BigUint)> {
    let one = BigUint::one();
    let two = &one + &one;
    for _ in 0..max_attempts {
        let mut candidate = rng.gen_biguint(u64::from(bits));
        // Force the top bit and low bit so the search stays in range and odd.
        candidate.set_bit(u64::from(bits) - 1, true);
        candidate.set_bit(0, true);

        if !is_probable_prime(&candidate, 24, rng) {
            continue;
        }
        let p = &two * &candidate + &one;
        if is_probable_prime(&p, 24, rng) {
            return Some((p, candidate));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn small_known_primes_are_detected() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for p in [2u32, 3, 5, 7, 11, 13, 97, 997] {
            assert!(is_probable_prime(&BigUint::from(p), 16, &mut rng), "{p} should be prime");
        }
    }

    #[test]
    fn small_known_composites_are_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        for n in [4u32, 9, 15, 21, 100, 998] {
            assert!(!is_probable_prime(&BigUint::from(n), 16, &mut rng), "{n} should be composite");
        }
    }

    #[test]
    fn safe_prime_search_finds_a_consistent_pair() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let (p, p_prime) = generate_safe_prime(24, 20_000, &mut rng)
            .expect("a 24-bit safe prime should exist within budget");
        assert!(is_probable_prime(&p, 32, &mut rng));
        assert!(is_probable_prime(&p_prime, 32, &mut rng));
        assert_eq!(p, BigUint::from(2u32) * &p_prime + BigUint::one());
    }
}
