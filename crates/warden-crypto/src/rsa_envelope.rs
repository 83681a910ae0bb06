//! Per-message RSA signatures — the non-batched half of the Cryptographic
//! Envelope (`spec.md` §4.1).
//!
//! Every outbound message carries either a direct RSA signature (this
//! module) or a Merkle-batched one (`crate::merkle`). Both ultimately use
//! PKCS#1 v1.5 signing of a precomputed digest, matching the original
//! `OPENSSL_RSA_*` wrapper this spec is distilled from: the core signs a
//! fixed-size hash, never the raw message bytes, so batching can swap a
//! per-message hash for a Merkle-root hash transparently.

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest as _, Sha1};
use warden_types::Digest;

use crate::error::{CryptoError, Result};

/// 1024-bit RSA signatures are 128 bytes, matching `spec.md` §6's wire
/// invariant ("either 128-byte RSA signature, or a Merkle proof ...").
pub const RSA_SIGNATURE_LEN: usize = 128;

/// The modulus size the core's keys are generated at.
pub const RSA_MODULUS_BITS: usize = 1024;

fn padding() -> Pkcs1v15Sign {
    Pkcs1v15Sign::new::<Sha1>()
}

/// A replica's per-message RSA signing key.
pub struct RsaSigningKey {
    inner: RsaPrivateKey,
}

impl std::fmt::Debug for RsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSigningKey").field("inner", &"<redacted>").finish()
    }
}

impl RsaSigningKey {
    /// Generates a fresh key pair. Called once per incarnation by
    /// Proactive Recovery (`spec.md` §4.7); never by CE itself.
    pub fn generate() -> Result<Self> {
        let inner = RsaPrivateKey::new(&mut OsRng, RSA_MODULUS_BITS)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn from_pkcs1_pem(pem: &str) -> Result<Self> {
        let inner = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn to_pkcs1_pem(&self) -> Result<String> {
        self.inner
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map(|z| z.to_string())
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }

    pub fn verifying_key(&self) -> RsaVerifyingKey {
        RsaVerifyingKey {
            inner: self.inner.to_public_key(),
        }
    }

    /// Signs a 20-byte digest (a per-message hash, or a Merkle batch root).
    pub fn sign_digest(&self, digest: &Digest) -> Result<[u8; RSA_SIGNATURE_LEN]> {
        let sig = self
            .inner
            .sign(padding(), digest.as_bytes())
            .map_err(|_| CryptoError::InvalidSignature)?;
        let mut out = [0u8; RSA_SIGNATURE_LEN];
        if sig.len() != RSA_SIGNATURE_LEN {
            return Err(CryptoError::MalformedKey(format!(
                "unexpected signature length {}",
                sig.len()
            )));
        }
        out.copy_from_slice(&sig);
        Ok(out)
    }
}

/// A replica's public verification key, used to check other replicas'
/// per-message signatures.
#[derive(Clone)]
pub struct RsaVerifyingKey {
    inner: RsaPublicKey,
}

impl RsaVerifyingKey {
    pub fn from_pkcs1_pem(pem: &str) -> Result<Self> {
        let inner = RsaPublicKey::from_pkcs1_pem(pem)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn to_pkcs1_pem(&self) -> Result<String> {
        self.inner
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }

    /// Verifies a digest's signature. Failure here is always silent-drop
    /// per `spec.md` §4.1/§7 — the caller counts it, never logs the full
    /// message or retries.
    pub fn verify_digest(&self, digest: &Digest, signature: &[u8]) -> Result<()> {
        self.inner
            .verify(padding(), digest.as_bytes(), signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Hashes arbitrary bytes into the 20-byte digest space CE signs over.
pub fn digest_bytes(bytes: &[u8]) -> Digest {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut buf = [0u8; 20];
    buf.copy_from_slice(&out);
    Digest::new(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let sk = RsaSigningKey::generate().unwrap();
        let vk = sk.verifying_key();
        let digest = digest_bytes(b"pre-prepare view=3 seq=10");
        let sig = sk.sign_digest(&digest).unwrap();
        assert_eq!(sig.len(), RSA_SIGNATURE_LEN);
        vk.verify_digest(&digest, &sig).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_digest() {
        let sk = RsaSigningKey::generate().unwrap();
        let vk = sk.verifying_key();
        let digest = digest_bytes(b"payload-a");
        let sig = sk.sign_digest(&digest).unwrap();
        let other = digest_bytes(b"payload-b");
        assert!(vk.verify_digest(&other, &sig).is_err());
    }

    #[test]
    fn pem_round_trip_preserves_key() {
        let sk = RsaSigningKey::generate().unwrap();
        let pem = sk.to_pkcs1_pem().unwrap();
        let reloaded = RsaSigningKey::from_pkcs1_pem(&pem).unwrap();
        let digest = digest_bytes(b"roster-update");
        let sig = reloaded.sign_digest(&digest).unwrap();
        sk.verifying_key().verify_digest(&digest, &sig).unwrap();
    }
}
