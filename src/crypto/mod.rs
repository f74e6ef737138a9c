//! Cryptographic primitives for the apuration pipeline

pub mod secure;
pub mod voting_lock;

use rand::RngCore;

pub use secure::{CertificationSigner, SecureSaltManager};
pub use voting_lock::{KeyedLocks, LockJanitor, LockStats};

/// Secure random nonce generator for vote fingerprints
pub struct NonceGenerator {
    rng: rand::rngs::ThreadRng,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// Generate a random 16-byte nonce
    pub fn generate_nonce(&mut self) -> [u8; 16] {
        let mut nonce = [0u8; 16];
        self.rng.fill_bytes(&mut nonce);
        nonce
    }
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cryptographic utilities
pub struct CryptoUtils;

impl CryptoUtils {
    /// Compare two hex fingerprints in constant time
    ///
    /// Strings of different length compare unequal without leaking where.
    pub fn fingerprints_match(a: &str, b: &str) -> bool {
        use subtle::ConstantTimeEq;
        if a.len() != b.len() {
            return false;
        }
        a.as_bytes().ct_eq(b.as_bytes()).into()
    }

    /// First 8 characters of a fingerprint, for logs
    pub fn short(fingerprint: &str) -> &str {
        fingerprint.get(..8).unwrap_or(fingerprint)
    }
}
