//! Hybrid ML-KEM + X25519 key encapsulation
//!
//! When hybrid mode is enabled the session secret combines a lattice share
//! and a classical elliptic-curve share through HKDF, so the channel stays
//! confidential if either primitive alone is later broken.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::ChannelError;
use crate::kem::{KemAlgorithm, KemKeyPair, KemPublicKey};
use crate::secure_memory::SecureBytes;
use crate::utils;

const HYBRID_KDF_LABEL: &[u8] = b"pqchannel hybrid kem v1";

/// Key pair holding both the lattice and the classical component
pub struct HybridKemKeyPair {
    /// Post-quantum component
    pub kem: KemKeyPair,
    /// Classical X25519 secret
    classical_secret: StaticSecret,
}

/// Public half of a [`HybridKemKeyPair`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HybridKemPublicKey {
    /// Post-quantum public key
    pub kem_public: KemPublicKey,
    /// Classical X25519 public key
    pub classical_public: [u8; 32],
}

/// Ciphertext carrying both shares
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HybridCiphertext {
    /// Post-quantum KEM ciphertext
    pub kem_ciphertext: Vec<u8>,
    /// Ephemeral X25519 public key of the encapsulating side
    pub classical_ephemeral: [u8; 32],
}

impl HybridKemKeyPair {
    /// Generate a hybrid key pair for the given lattice parameter set
    pub fn generate(algorithm: KemAlgorithm) -> Result<Self, ChannelError> {
        let kem = KemKeyPair::generate(algorithm)?;
        let seed = utils::random_array_32()?;
        let classical_secret = StaticSecret::from(seed);
        Ok(Self {
            kem,
            classical_secret,
        })
    }

    /// Wrap an existing lattice key pair with a given classical secret.
    ///
    /// Used when the lattice component is a managed long-term key and the
    /// classical component is ephemeral per handshake.
    pub fn from_parts(kem: KemKeyPair, classical_secret: StaticSecret) -> Self {
        Self {
            kem,
            classical_secret,
        }
    }

    /// Extract the public half for sharing
    pub fn public_key(&self) -> HybridKemPublicKey {
        HybridKemPublicKey {
            kem_public: self.kem.public_key(),
            classical_public: X25519PublicKey::from(&self.classical_secret).to_bytes(),
        }
    }

    /// Decapsulate both shares and combine them
    ///
    /// The lattice share uses implicit rejection, so this never errors on a
    /// malformed KEM ciphertext; a bad classical share simply produces a
    /// non-matching combined secret. Either way the mismatch only surfaces
    /// at finished-message verification.
    pub fn decapsulate(&self, ciphertext: &HybridCiphertext) -> SecureBytes {
        let pq_secret = self.kem.decapsulate(&ciphertext.kem_ciphertext);
        let ephemeral = X25519PublicKey::from(ciphertext.classical_ephemeral);
        let classical_secret = self.classical_secret.diffie_hellman(&ephemeral);
        combine_secrets(pq_secret.as_bytes(), classical_secret.as_bytes())
    }
}

impl HybridKemPublicKey {
    /// Encapsulate against both components
    ///
    /// Returns the combined ciphertext and the locally derived session
    /// secret. The ephemeral X25519 secret is zeroed before returning.
    pub fn encapsulate(&self) -> Result<(HybridCiphertext, SecureBytes), ChannelError> {
        let (kem_ciphertext, pq_secret) = self.kem_public.encapsulate()?;

        let mut seed = utils::random_array_32()?;
        let ephemeral_secret = StaticSecret::from(seed);
        seed.zeroize();

        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
        let peer_public = X25519PublicKey::from(self.classical_public);
        let classical_secret = ephemeral_secret.diffie_hellman(&peer_public);

        let combined = combine_secrets(pq_secret.as_bytes(), classical_secret.as_bytes());

        Ok((
            HybridCiphertext {
                kem_ciphertext,
                classical_ephemeral: ephemeral_public.to_bytes(),
            },
            combined,
        ))
    }
}

/// Combine the lattice and classical shares with a domain-separated KDF
fn combine_secrets(pq_secret: &[u8], classical_secret: &[u8]) -> SecureBytes {
    let mut input = Vec::with_capacity(pq_secret.len() + classical_secret.len());
    input.extend_from_slice(pq_secret);
    input.extend_from_slice(classical_secret);

    let hk = Hkdf::<Sha256>::new(Some(HYBRID_KDF_LABEL), &input);
    let mut output = [0u8; 32];
    hk.expand(b"combined secret", &mut output)
        .expect("32 bytes is a valid HKDF-SHA256 output length");

    input.zeroize();
    let secret = SecureBytes::new(&output);
    output.zeroize();
    secret
}

impl std::fmt::Debug for HybridKemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridKemKeyPair")
            .field("algorithm", &self.kem.algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hybrid_round_trip() {
        let key_pair = HybridKemKeyPair::generate(KemAlgorithm::MlKem768).unwrap();
        let (ciphertext, secret_a) = key_pair.public_key().encapsulate().unwrap();
        let secret_b = key_pair.decapsulate(&ciphertext);
        assert_eq!(secret_a, secret_b);
        assert_eq!(secret_a.len(), 32);
    }

    #[test]
    fn test_tampered_classical_share_changes_secret() {
        let key_pair = HybridKemKeyPair::generate(KemAlgorithm::MlKem512).unwrap();
        let (mut ciphertext, secret_a) = key_pair.public_key().encapsulate().unwrap();

        ciphertext.classical_ephemeral[0] ^= 0x01;
        let secret_b = key_pair.decapsulate(&ciphertext);
        assert_ne!(secret_a, secret_b);
    }

    #[test]
    fn test_tampered_pq_share_changes_secret() {
        let key_pair = HybridKemKeyPair::generate(KemAlgorithm::MlKem512).unwrap();
        let (mut ciphertext, secret_a) = key_pair.public_key().encapsulate().unwrap();

        ciphertext.kem_ciphertext[0] ^= 0x01;
        let secret_b = key_pair.decapsulate(&ciphertext);
        assert_ne!(secret_a, secret_b);
    }

    #[test]
    fn test_combined_secret_differs_from_components() {
        let key_pair = HybridKemKeyPair::generate(KemAlgorithm::MlKem768).unwrap();
        let (ciphertext, combined) = key_pair.public_key().encapsulate().unwrap();
        let pq_only = key_pair.kem.decapsulate(&ciphertext.kem_ciphertext);
        assert_ne!(combined, pq_only);
    }
}
