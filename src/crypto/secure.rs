//! Salted fingerprints, receipt codes and certification signatures
//!
//! Every derivation here is a keyed Blake3 hash: without the configured salt
//! a fingerprint cannot be linked back to a voter, and a receipt code cannot
//! be forged from a vote fingerprint.

use crate::config::SecurityConfig;
use crate::crypto::NonceGenerator;
use crate::types::Fingerprint;
use crate::{Result, crypto_error};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Number of hex characters of the receipt digest shown to voters
const RECEIPT_DIGEST_LEN: usize = 12;

/// Secure salt manager for voter and vote fingerprints
#[derive(Clone)]
pub struct SecureSaltManager {
    voter_key: Zeroizing<[u8; 32]>,
    receipt_key: Zeroizing<[u8; 32]>,
}

impl SecureSaltManager {
    /// Create salt manager from validated configuration
    ///
    /// Salts must decode to at least 32 bytes; the first 32 key the hash.
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let voter_salt = Zeroizing::new(config.voter_salt_bytes()?);
        let receipt_salt = Zeroizing::new(config.receipt_salt_bytes()?);

        Ok(Self {
            voter_key: Self::key_from_salt(&voter_salt, "voter")?,
            receipt_key: Self::key_from_salt(&receipt_salt, "receipt")?,
        })
    }

    /// Create for testing with secure random salts
    pub fn for_testing() -> Self {
        let mut rng = rand::thread_rng();
        let mut voter_key = Zeroizing::new([0u8; 32]);
        let mut receipt_key = Zeroizing::new([0u8; 32]);

        rng.fill_bytes(&mut *voter_key);
        rng.fill_bytes(&mut *receipt_key);

        Self {
            voter_key,
            receipt_key,
        }
    }

    fn key_from_salt(salt: &[u8], name: &str) -> Result<Zeroizing<[u8; 32]>> {
        let key: [u8; 32] = salt
            .get(..32)
            .and_then(|prefix| prefix.try_into().ok())
            .ok_or_else(|| crypto_error!("{} salt must be at least 32 bytes", name))?;
        Ok(Zeroizing::new(key))
    }

    /// Anonymized voter fingerprint, stable per (voter, election)
    pub fn voter_fingerprint(&self, voter_id: &Uuid, election_id: &Uuid) -> Fingerprint {
        let mut hasher = blake3::Hasher::new_keyed(&self.voter_key);
        hasher.update(b"apuration/voter/v1");
        hasher.update(voter_id.as_bytes());
        hasher.update(election_id.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Vote fingerprint over the choice, the cast time and a fresh nonce
    ///
    /// The nonce makes two identical choices cast in the same instant yield
    /// different fingerprints; callers still check uniqueness per election.
    pub fn vote_fingerprint(
        &self,
        election_id: &Uuid,
        slate_id: Option<&Uuid>,
        cast_at: DateTime<Utc>,
        nonce: &[u8; 16],
    ) -> Fingerprint {
        let mut hasher = blake3::Hasher::new_keyed(&self.receipt_key);
        hasher.update(b"apuration/vote/v1");
        hasher.update(election_id.as_bytes());
        match slate_id {
            Some(slate_id) => {
                hasher.update(&[1]);
                hasher.update(slate_id.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        hasher.update(&cast_at.timestamp_micros().to_le_bytes());
        hasher.update(nonce);
        hasher.finalize().to_hex().to_string()
    }

    /// Vote fingerprint with a freshly generated nonce
    pub fn fresh_vote_fingerprint(
        &self,
        election_id: &Uuid,
        slate_id: Option<&Uuid>,
        cast_at: DateTime<Utc>,
    ) -> Fingerprint {
        let nonce = NonceGenerator::new().generate_nonce();
        self.vote_fingerprint(election_id, slate_id, cast_at, &nonce)
    }

    /// Human-facing receipt code, `RCPT-YYYYMMDD-XXXXXXXXXXXX`
    pub fn receipt_code(&self, vote_fingerprint: &str, cast_at: DateTime<Utc>) -> String {
        let mut hasher = blake3::Hasher::new_keyed(&self.receipt_key);
        hasher.update(b"apuration/receipt/v1");
        hasher.update(vote_fingerprint.as_bytes());
        let digest = hasher.finalize().to_hex();

        format!(
            "RCPT-{}-{}",
            cast_at.format("%Y%m%d"),
            digest.as_str()[..RECEIPT_DIGEST_LEN].to_ascii_uppercase()
        )
    }
}

/// Ed25519 signer used to certify tally fingerprints
pub struct CertificationSigner {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl CertificationSigner {
    /// Build from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Build from configuration, generating an ephemeral key when none is set
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        match config.certification_seed()? {
            Some(seed) => {
                let seed = Zeroizing::new(seed);
                Ok(Self::from_seed(&seed))
            }
            None => {
                tracing::warn!("⚠️  No certification key configured, using an ephemeral key");
                Ok(Self::generate())
            }
        }
    }

    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn for_testing() -> Self {
        Self::generate()
    }

    /// Hex-encoded public key
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }

    /// Sign a tally fingerprint, returning the hex signature
    pub fn sign(&self, fingerprint: &str) -> String {
        let signature = self.signing_key.sign(fingerprint.as_bytes());
        hex::encode(signature.to_bytes())
    }

    /// Verify a hex signature over `fingerprint` against a hex public key
    pub fn verify(public_key_hex: &str, fingerprint: &str, signature_hex: &str) -> Result<()> {
        let mut public_key = [0u8; 32];
        hex::decode_to_slice(public_key_hex, &mut public_key)
            .map_err(|_| crypto_error!("Invalid public key encoding"))?;
        let verifying_key = VerifyingKey::from_bytes(&public_key)
            .map_err(|_| crypto_error!("Invalid public key"))?;

        let mut signature = [0u8; 64];
        hex::decode_to_slice(signature_hex, &mut signature)
            .map_err(|_| crypto_error!("Invalid signature encoding"))?;
        let signature = Ed25519Signature::from_bytes(&signature);

        verifying_key
            .verify(fingerprint.as_bytes(), &signature)
            .map_err(|_| crypto_error!("Signature verification failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_voter_fingerprint_is_stable_and_scoped() {
        let salts = SecureSaltManager::for_testing();
        let voter = Uuid::new_v4();
        let election = Uuid::new_v4();

        let fp1 = salts.voter_fingerprint(&voter, &election);
        let fp2 = salts.voter_fingerprint(&voter, &election);
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);

        // Different election, different fingerprint
        assert_ne!(fp1, salts.voter_fingerprint(&voter, &Uuid::new_v4()));

        // Different salt, different fingerprint
        let other = SecureSaltManager::for_testing();
        assert_ne!(fp1, other.voter_fingerprint(&voter, &election));
    }

    #[test]
    fn test_vote_fingerprint_depends_on_nonce() {
        let salts = SecureSaltManager::for_testing();
        let election = Uuid::new_v4();
        let slate = Uuid::new_v4();
        let now = Utc::now();

        let a = salts.vote_fingerprint(&election, Some(&slate), now, &[1u8; 16]);
        let b = salts.vote_fingerprint(&election, Some(&slate), now, &[2u8; 16]);
        let blank = salts.vote_fingerprint(&election, None, now, &[1u8; 16]);

        assert_ne!(a, b);
        assert_ne!(a, blank);
        assert_eq!(a, salts.vote_fingerprint(&election, Some(&slate), now, &[1u8; 16]));
    }

    #[test]
    fn test_receipt_code_format() {
        let salts = SecureSaltManager::for_testing();
        let cast_at = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();
        let fp = salts.fresh_vote_fingerprint(&Uuid::new_v4(), None, cast_at);

        let code = salts.receipt_code(&fp, cast_at);
        assert!(code.starts_with("RCPT-20260314-"));
        assert_eq!(code.len(), "RCPT-20260314-".len() + RECEIPT_DIGEST_LEN);
        assert!(
            code[14..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
        assert_eq!(code, salts.receipt_code(&fp, cast_at));
    }

    #[test]
    fn test_from_config() {
        let config = SecurityConfig::for_testing();
        let salts = SecureSaltManager::from_config(&config).unwrap();
        let again = SecureSaltManager::from_config(&config).unwrap();

        let voter = Uuid::new_v4();
        let election = Uuid::new_v4();
        assert_eq!(
            salts.voter_fingerprint(&voter, &election),
            again.voter_fingerprint(&voter, &election)
        );
    }

    #[test]
    fn test_certification_signature() {
        let signer = CertificationSigner::for_testing();
        let fingerprint = "ab".repeat(32);

        let signature = signer.sign(&fingerprint);
        CertificationSigner::verify(&signer.public_key_hex(), &fingerprint, &signature).unwrap();

        // Tampered message
        assert!(
            CertificationSigner::verify(&signer.public_key_hex(), &"cd".repeat(32), &signature)
                .is_err()
        );

        // Wrong key
        let other = CertificationSigner::for_testing();
        assert!(
            CertificationSigner::verify(&other.public_key_hex(), &fingerprint, &signature).is_err()
        );
    }

    #[test]
    fn test_signer_from_seed_is_deterministic() {
        let a = CertificationSigner::from_seed(&[9u8; 32]);
        let b = CertificationSigner::from_seed(&[9u8; 32]);
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(a.sign("fingerprint"), b.sign("fingerprint"));
    }
}
