//! Small big-integer helpers shared by the threshold-RSA combiner.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Zero};

/// Returns `(gcd, x, y)` such that `a*x + b*y = gcd`.
pub fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let result = a.extended_gcd(b);
    (result.gcd, result.x, result.y)
}

/// The modular inverse of `a` mod `modulus`, or `None` if they aren't
/// coprime.
pub fn mod_inverse(a: &BigInt, modulus: &BigInt) -> Option<BigInt> {
    let (gcd, x, _) = extended_gcd(a, modulus);
    if gcd != BigInt::one() && gcd != -BigInt::one() {
        return None;
    }
    let x = if gcd.is_negative() { -x } else { x };
    Some(((x % modulus) + modulus) % modulus)
}

trait IsNegative {
    fn is_negative(&self) -> bool;
}

impl IsNegative for BigInt {
    fn is_negative(&self) -> bool {
        *self < BigInt::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_gcd_satisfies_bezout_identity() {
        let a = BigInt::from(240);
        let b = BigInt::from(46);
        let (g, x, y) = extended_gcd(&a, &b);
        assert_eq!(g, BigInt::from(2));
        assert_eq!(&a * &x + &b * &y, g);
    }

    #[test]
    fn mod_inverse_round_trips() {
        let a = BigInt::from(3);
        let m = BigInt::from(55);
        let inv = mod_inverse(&a, &m).unwrap();
        assert_eq!((&a * &inv) % &m, BigInt::one());
    }

    #[test]
    fn mod_inverse_is_none_when_not_coprime() {
        assert!(mod_inverse(&BigInt::from(6), &BigInt::from(9)).is_none());
    }
}
