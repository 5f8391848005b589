use oqs::kem::{Algorithm, Kem};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

use crate::error::{error_codes, ChannelError};
use crate::secure_memory::SecureBytes;
use crate::utils;

/// ML-KEM key pair for key encapsulation
///
/// The secret key and the implicit-rejection seed are zeroed when the
/// struct is dropped. Decapsulation never fails on malformed input: a
/// ciphertext that cannot be decapsulated yields a pseudorandom secret
/// derived from the rejection seed, so a peer probing with garbage learns
/// nothing until the finished-message check fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KemKeyPair {
    /// Public key for encapsulation
    pub public_key: Vec<u8>,
    /// Secret key for decapsulation
    pub secret_key: Vec<u8>,
    /// Seed for the implicit-rejection secret on undecapsulatable input
    pub rejection_seed: [u8; 32],
    /// The parameter set in use
    pub algorithm: KemAlgorithm,
}

impl Drop for KemKeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
        self.rejection_seed.zeroize();
    }
}

impl Zeroize for KemKeyPair {
    fn zeroize(&mut self) {
        self.secret_key.zeroize();
        self.rejection_seed.zeroize();
    }
}

/// Public-key-only view of a [`KemKeyPair`], safe to put on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KemPublicKey {
    /// Public key for encapsulation
    pub public_key: Vec<u8>,
    /// The parameter set in use
    pub algorithm: KemAlgorithm,
}

/// ML-KEM parameter sets, one per NIST security level
///
/// The wire carries the fixed-width code from [`KemAlgorithm::wire_code`],
/// never a free-text name.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum KemAlgorithm {
    /// ML-KEM-512 (NIST security level 1)
    MlKem512,
    /// ML-KEM-768 (NIST security level 3, recommended)
    MlKem768,
    /// ML-KEM-1024 (NIST security level 5)
    MlKem1024,
}

impl fmt::Display for KemAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KemAlgorithm::MlKem512 => write!(f, "ML-KEM-512"),
            KemAlgorithm::MlKem768 => write!(f, "ML-KEM-768"),
            KemAlgorithm::MlKem1024 => write!(f, "ML-KEM-1024"),
        }
    }
}

impl KemAlgorithm {
    /// Get the OQS algorithm for this parameter set
    ///
    /// liboqs still registers these under the pre-standardisation Kyber names.
    fn oqs_algorithm(&self) -> Algorithm {
        match self {
            KemAlgorithm::MlKem512 => Algorithm::Kyber512,
            KemAlgorithm::MlKem768 => Algorithm::Kyber768,
            KemAlgorithm::MlKem1024 => Algorithm::Kyber1024,
        }
    }

    /// Fixed-width wire identifier for this parameter set
    pub fn wire_code(&self) -> u16 {
        match self {
            KemAlgorithm::MlKem512 => 0x0101,
            KemAlgorithm::MlKem768 => 0x0102,
            KemAlgorithm::MlKem1024 => 0x0103,
        }
    }

    /// Resolve a wire identifier back to a parameter set
    pub fn from_wire_code(code: u16) -> Result<Self, ChannelError> {
        match code {
            0x0101 => Ok(KemAlgorithm::MlKem512),
            0x0102 => Ok(KemAlgorithm::MlKem768),
            0x0103 => Ok(KemAlgorithm::MlKem1024),
            other => Err(ChannelError::unsupported_algorithm(
                &format!("kem code 0x{:04x}", other),
                "unknown KEM wire code",
                crate::error::error_codes::KEM_UNSUPPORTED_ALGORITHM,
            )),
        }
    }

    /// NIST security level of this parameter set (1, 3, or 5)
    pub fn security_level(&self) -> u8 {
        match self {
            KemAlgorithm::MlKem512 => 1,
            KemAlgorithm::MlKem768 => 3,
            KemAlgorithm::MlKem1024 => 5,
        }
    }

    /// Public key size in bytes
    pub fn public_key_size(&self) -> usize {
        match self {
            KemAlgorithm::MlKem512 => 800,
            KemAlgorithm::MlKem768 => 1184,
            KemAlgorithm::MlKem1024 => 1568,
        }
    }

    /// Secret key size in bytes
    pub fn secret_key_size(&self) -> usize {
        match self {
            KemAlgorithm::MlKem512 => 1632,
            KemAlgorithm::MlKem768 => 2400,
            KemAlgorithm::MlKem1024 => 3168,
        }
    }

    /// Ciphertext size in bytes
    pub fn ciphertext_size(&self) -> usize {
        match self {
            KemAlgorithm::MlKem512 => 768,
            KemAlgorithm::MlKem768 => 1088,
            KemAlgorithm::MlKem1024 => 1568,
        }
    }

    /// Shared secret size in bytes (32 for every parameter set)
    pub fn shared_secret_size(&self) -> usize {
        32
    }
}

impl KemKeyPair {
    /// Generate a new key pair for the given parameter set
    ///
    /// Fails with `UnsupportedAlgorithm` when the parameter set is not
    /// compiled into the linked liboqs, and with `KeyGenerationError` when
    /// the entropy source is exhausted.
    pub fn generate(algorithm: KemAlgorithm) -> Result<Self, ChannelError> {
        let kem = Kem::new(algorithm.oqs_algorithm()).map_err(|e| {
            ChannelError::unsupported_algorithm(
                &algorithm.to_string(),
                &e.to_string(),
                error_codes::KEM_UNSUPPORTED_ALGORITHM,
            )
        })?;

        let (public_key, secret_key) = kem.keypair().map_err(|e| {
            ChannelError::key_generation(
                "kem keypair",
                &e.to_string(),
                error_codes::KEM_KEY_GENERATION_FAILED,
            )
        })?;

        Ok(Self {
            public_key: public_key.into_vec(),
            secret_key: secret_key.into_vec(),
            rejection_seed: utils::random_array_32()?,
            algorithm,
        })
    }

    /// Extract the public half for sharing
    pub fn public_key(&self) -> KemPublicKey {
        KemPublicKey {
            public_key: self.public_key.clone(),
            algorithm: self.algorithm,
        }
    }

    /// Decapsulate a ciphertext into a shared secret, with implicit rejection
    ///
    /// This never returns an error for malformed input. A ciphertext of the
    /// wrong length, or one the underlying KEM rejects, produces a
    /// deterministic pseudorandom secret bound to this key pair and the
    /// ciphertext bytes. The handshake then fails at finished-message
    /// verification, which is the intended and only failure signal.
    pub fn decapsulate(&self, ciphertext: &[u8]) -> SecureBytes {
        if ciphertext.len() != self.algorithm.ciphertext_size() {
            return self.rejection_secret(ciphertext);
        }

        let kem = match Kem::new(self.algorithm.oqs_algorithm()) {
            Ok(kem) => kem,
            Err(_) => return self.rejection_secret(ciphertext),
        };

        let sk = match kem.secret_key_from_bytes(&self.secret_key) {
            Some(sk) => sk,
            None => return self.rejection_secret(ciphertext),
        };
        let ct = match kem.ciphertext_from_bytes(ciphertext) {
            Some(ct) => ct,
            None => return self.rejection_secret(ciphertext),
        };

        match kem.decapsulate(&sk, &ct) {
            Ok(shared_secret) => SecureBytes::from_vec(shared_secret.into_vec()),
            Err(_) => self.rejection_secret(ciphertext),
        }
    }

    /// Verify that the public and secret halves belong together
    ///
    /// Performs one encapsulate/decapsulate round trip; useful after loading
    /// a key pair from a restored backup.
    pub fn verify_key_pair(&self) -> Result<(), ChannelError> {
        let (ciphertext, encapsulated) = self.public_key().encapsulate()?;
        let decapsulated = self.decapsulate(&ciphertext);
        if encapsulated == decapsulated {
            Ok(())
        } else {
            Err(ChannelError::key_generation(
                "kem key pair verification",
                "shared secrets do not match",
                error_codes::KEM_KEY_GENERATION_FAILED,
            ))
        }
    }

    /// Serialize the key pair to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChannelError> {
        bincode::serialize(self).map_err(|e| ChannelError::SerializationError(e.to_string()))
    }

    /// Deserialize a key pair from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ChannelError> {
        bincode::deserialize(data).map_err(|e| ChannelError::SerializationError(e.to_string()))
    }

    /// Deterministic pseudorandom secret for an undecapsulatable ciphertext
    fn rejection_secret(&self, ciphertext: &[u8]) -> SecureBytes {
        let mut hasher = Sha256::new();
        hasher.update(b"pqchannel implicit rejection v1");
        hasher.update(self.rejection_seed);
        hasher.update((ciphertext.len() as u64).to_be_bytes());
        hasher.update(ciphertext);
        SecureBytes::new(&hasher.finalize())
    }
}

impl KemPublicKey {
    /// Encapsulate a fresh shared secret against this public key
    ///
    /// Returns the ciphertext to send to the key's owner and the local copy
    /// of the shared secret. Fails with `InvalidPublicKey` if the key bytes
    /// have the wrong length or are rejected by the underlying KEM.
    pub fn encapsulate(&self) -> Result<(Vec<u8>, SecureBytes), ChannelError> {
        if self.public_key.len() != self.algorithm.public_key_size() {
            return Err(ChannelError::invalid_public_key(
                &self.algorithm.to_string(),
                &format!(
                    "expected {} bytes, got {}",
                    self.algorithm.public_key_size(),
                    self.public_key.len()
                ),
            ));
        }

        let kem = Kem::new(self.algorithm.oqs_algorithm()).map_err(|e| {
            ChannelError::unsupported_algorithm(
                &self.algorithm.to_string(),
                &e.to_string(),
                error_codes::KEM_UNSUPPORTED_ALGORITHM,
            )
        })?;

        let pk = kem.public_key_from_bytes(&self.public_key).ok_or_else(|| {
            ChannelError::invalid_public_key(&self.algorithm.to_string(), "malformed public key")
        })?;

        let (ciphertext, shared_secret) = kem.encapsulate(&pk).map_err(|e| {
            ChannelError::protocol(
                "encapsulate",
                &e.to_string(),
                error_codes::KEM_ENCAPSULATION_FAILED,
            )
        })?;

        Ok((
            ciphertext.into_vec(),
            SecureBytes::from_vec(shared_secret.into_vec()),
        ))
    }

    /// Short hex fingerprint of this public key
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update([self.algorithm.security_level()]);
        hasher.update(&self.public_key);
        utils::to_hex(&hasher.finalize()[0..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation_sizes() {
        let key_pair = KemKeyPair::generate(KemAlgorithm::MlKem768).unwrap();
        assert_eq!(
            key_pair.public_key.len(),
            KemAlgorithm::MlKem768.public_key_size()
        );
        assert_eq!(
            key_pair.secret_key.len(),
            KemAlgorithm::MlKem768.secret_key_size()
        );
    }

    #[test]
    fn test_encapsulate_decapsulate_round_trip() {
        for algorithm in [
            KemAlgorithm::MlKem512,
            KemAlgorithm::MlKem768,
            KemAlgorithm::MlKem1024,
        ] {
            let key_pair = KemKeyPair::generate(algorithm).unwrap();
            let (ciphertext, shared_secret) = key_pair.public_key().encapsulate().unwrap();

            assert_eq!(ciphertext.len(), algorithm.ciphertext_size());
            assert_eq!(shared_secret.len(), algorithm.shared_secret_size());

            let decapsulated = key_pair.decapsulate(&ciphertext);
            assert_eq!(shared_secret, decapsulated);
        }
    }

    #[test]
    fn test_implicit_rejection_on_malformed_ciphertext() {
        let key_pair = KemKeyPair::generate(KemAlgorithm::MlKem768).unwrap();

        // Wrong length: must not panic or error, must still return a secret.
        let short = key_pair.decapsulate(&[0u8; 10]);
        assert_eq!(short.len(), 32);

        // Same garbage twice gives the same rejection secret.
        let again = key_pair.decapsulate(&[0u8; 10]);
        assert_eq!(short, again);

        // Different garbage gives a different secret.
        let other = key_pair.decapsulate(&[1u8; 10]);
        assert_ne!(short, other);
    }

    #[test]
    fn test_tampered_ciphertext_yields_wrong_secret() {
        let key_pair = KemKeyPair::generate(KemAlgorithm::MlKem768).unwrap();
        let (mut ciphertext, shared_secret) = key_pair.public_key().encapsulate().unwrap();

        ciphertext[0] ^= 0xff;
        let decapsulated = key_pair.decapsulate(&ciphertext);
        assert_ne!(shared_secret, decapsulated);
    }

    #[test]
    fn test_encapsulate_rejects_wrong_length_key() {
        let bad = KemPublicKey {
            public_key: vec![0u8; 17],
            algorithm: KemAlgorithm::MlKem768,
        };
        let err = bad.encapsulate().unwrap_err();
        assert_eq!(err.error_type(), "InvalidPublicKey");
    }

    #[test]
    fn test_wire_codes_round_trip() {
        for algorithm in [
            KemAlgorithm::MlKem512,
            KemAlgorithm::MlKem768,
            KemAlgorithm::MlKem1024,
        ] {
            assert_eq!(
                KemAlgorithm::from_wire_code(algorithm.wire_code()).unwrap(),
                algorithm
            );
        }
        assert!(KemAlgorithm::from_wire_code(0xffff).is_err());
    }

    #[test]
    fn test_key_pair_verification() {
        let key_pair = KemKeyPair::generate(KemAlgorithm::MlKem512).unwrap();
        assert!(key_pair.verify_key_pair().is_ok());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let key_pair = KemKeyPair::generate(KemAlgorithm::MlKem768).unwrap();
        let pub_key = key_pair.public_key();
        assert_eq!(pub_key.fingerprint(), pub_key.fingerprint());
        assert_eq!(pub_key.fingerprint().len(), 16);
    }
}
