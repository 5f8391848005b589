use oqs::sig::{Algorithm, Sig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

use crate::error::{error_codes, ChannelError};
use crate::utils;

/// ML-DSA key pair for digital signatures
///
/// The secret key is zeroed when the struct is dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigKeyPair {
    /// Public key for signature verification
    pub public_key: Vec<u8>,
    /// Secret key for signature generation
    pub secret_key: Vec<u8>,
    /// The parameter set in use
    pub algorithm: SigAlgorithm,
}

impl Drop for SigKeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl Zeroize for SigKeyPair {
    fn zeroize(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Public-key-only view of a [`SigKeyPair`], safe to put on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SigPublicKey {
    /// Public key for signature verification
    pub public_key: Vec<u8>,
    /// The parameter set in use
    pub algorithm: SigAlgorithm,
}

/// ML-DSA parameter sets, one per NIST security level
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SigAlgorithm {
    /// ML-DSA-44 (NIST security level 2)
    MlDsa44,
    /// ML-DSA-65 (NIST security level 3, recommended)
    MlDsa65,
    /// ML-DSA-87 (NIST security level 5)
    MlDsa87,
}

impl fmt::Display for SigAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigAlgorithm::MlDsa44 => write!(f, "ML-DSA-44"),
            SigAlgorithm::MlDsa65 => write!(f, "ML-DSA-65"),
            SigAlgorithm::MlDsa87 => write!(f, "ML-DSA-87"),
        }
    }
}

impl SigAlgorithm {
    /// Get the OQS algorithm for this parameter set
    ///
    /// liboqs still registers these under the pre-standardisation
    /// Dilithium names.
    fn oqs_algorithm(&self) -> Algorithm {
        match self {
            SigAlgorithm::MlDsa44 => Algorithm::Dilithium2,
            SigAlgorithm::MlDsa65 => Algorithm::Dilithium3,
            SigAlgorithm::MlDsa87 => Algorithm::Dilithium5,
        }
    }

    /// Fixed-width wire identifier for this parameter set
    pub fn wire_code(&self) -> u16 {
        match self {
            SigAlgorithm::MlDsa44 => 0x0201,
            SigAlgorithm::MlDsa65 => 0x0202,
            SigAlgorithm::MlDsa87 => 0x0203,
        }
    }

    /// Resolve a wire identifier back to a parameter set
    pub fn from_wire_code(code: u16) -> Result<Self, ChannelError> {
        match code {
            0x0201 => Ok(SigAlgorithm::MlDsa44),
            0x0202 => Ok(SigAlgorithm::MlDsa65),
            0x0203 => Ok(SigAlgorithm::MlDsa87),
            other => Err(ChannelError::unsupported_algorithm(
                &format!("sig code 0x{:04x}", other),
                "unknown signature wire code",
                error_codes::SIG_UNSUPPORTED_ALGORITHM,
            )),
        }
    }

    /// NIST security level of this parameter set (2, 3, or 5)
    pub fn security_level(&self) -> u8 {
        match self {
            SigAlgorithm::MlDsa44 => 2,
            SigAlgorithm::MlDsa65 => 3,
            SigAlgorithm::MlDsa87 => 5,
        }
    }

    /// Public key size in bytes
    pub fn public_key_size(&self) -> usize {
        match self {
            SigAlgorithm::MlDsa44 => 1312,
            SigAlgorithm::MlDsa65 => 1952,
            SigAlgorithm::MlDsa87 => 2592,
        }
    }

    /// Secret key size in bytes
    pub fn secret_key_size(&self) -> usize {
        match self {
            SigAlgorithm::MlDsa44 => 2528,
            SigAlgorithm::MlDsa65 => 4000,
            SigAlgorithm::MlDsa87 => 4864,
        }
    }

    /// Signature size in bytes
    pub fn signature_size(&self) -> usize {
        match self {
            SigAlgorithm::MlDsa44 => 2420,
            SigAlgorithm::MlDsa65 => 3293,
            SigAlgorithm::MlDsa87 => 4595,
        }
    }
}

impl SigKeyPair {
    /// Generate a new key pair for the given parameter set
    pub fn generate(algorithm: SigAlgorithm) -> Result<Self, ChannelError> {
        let sig = Sig::new(algorithm.oqs_algorithm()).map_err(|e| {
            ChannelError::unsupported_algorithm(
                &algorithm.to_string(),
                &e.to_string(),
                error_codes::SIG_UNSUPPORTED_ALGORITHM,
            )
        })?;

        let (public_key, secret_key) = sig.keypair().map_err(|e| {
            ChannelError::key_generation(
                "sig keypair",
                &e.to_string(),
                error_codes::SIG_KEY_GENERATION_FAILED,
            )
        })?;

        Ok(Self {
            public_key: public_key.into_vec(),
            secret_key: secret_key.into_vec(),
            algorithm,
        })
    }

    /// Sign a message with this key pair's secret key
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let sig = Sig::new(self.algorithm.oqs_algorithm())
            .map_err(|e| ChannelError::OqsError(e.to_string()))?;

        let sk = sig.secret_key_from_bytes(&self.secret_key).ok_or_else(|| {
            ChannelError::protocol(
                "sign",
                "malformed secret key bytes",
                error_codes::SIG_SIGNING_FAILED,
            )
        })?;

        let signature = sig.sign(message, &sk).map_err(|e| {
            ChannelError::protocol("sign", &e.to_string(), error_codes::SIG_SIGNING_FAILED)
        })?;

        Ok(signature.into_vec())
    }

    /// Verify a signature with this key pair's public key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        self.public_key().verify(message, signature)
    }

    /// Extract the public half for sharing
    pub fn public_key(&self) -> SigPublicKey {
        SigPublicKey {
            public_key: self.public_key.clone(),
            algorithm: self.algorithm,
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
}

impl SigPublicKey {
    /// Verify a signature on a message using this public key
    ///
    /// Fails closed: malformed keys or signatures return `false`. The
    /// decision never surfaces as an error that a caller might mishandle
    /// into a verification bypass.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let sig = match Sig::new(self.algorithm.oqs_algorithm()) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        let pk = match sig.public_key_from_bytes(&self.public_key) {
            Some(pk) => pk,
            None => return false,
        };

        let parsed = match sig.signature_from_bytes(signature) {
            Some(parsed) => parsed,
            None => return false,
        };

        sig.verify(message, &parsed, &pk).is_ok()
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
    fn test_sign_verify_round_trip() {
        for algorithm in [
            SigAlgorithm::MlDsa44,
            SigAlgorithm::MlDsa65,
            SigAlgorithm::MlDsa87,
        ] {
            let key_pair = SigKeyPair::generate(algorithm).unwrap();
            let message = b"transcript binding bytes";
            let signature = key_pair.sign(message).unwrap();

            assert!(key_pair.public_key().verify(message, &signature));
        }
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let key_pair = SigKeyPair::generate(SigAlgorithm::MlDsa65).unwrap();
        let signature = key_pair.sign(b"original").unwrap();
        assert!(!key_pair.public_key().verify(b"tampered", &signature));
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let key_pair = SigKeyPair::generate(SigAlgorithm::MlDsa65).unwrap();
        let message = b"original";
        let mut signature = key_pair.sign(message).unwrap();
        signature[0] ^= 0x01;
        assert!(!key_pair.public_key().verify(message, &signature));
    }

    #[test]
    fn test_verify_fails_closed_on_garbage() {
        let key_pair = SigKeyPair::generate(SigAlgorithm::MlDsa44).unwrap();
        let pub_key = key_pair.public_key();

        // Malformed signature bytes: false, not a panic or an error.
        assert!(!pub_key.verify(b"message", &[0u8; 3]));
        assert!(!pub_key.verify(b"message", &[]));

        // Malformed public key: same.
        let bad = SigPublicKey {
            public_key: vec![0u8; 5],
            algorithm: SigAlgorithm::MlDsa44,
        };
        let signature = key_pair.sign(b"message").unwrap();
        assert!(!bad.verify(b"message", &signature));
    }

    #[test]
    fn test_wire_codes_round_trip() {
        for algorithm in [
            SigAlgorithm::MlDsa44,
            SigAlgorithm::MlDsa65,
            SigAlgorithm::MlDsa87,
        ] {
            assert_eq!(
                SigAlgorithm::from_wire_code(algorithm.wire_code()).unwrap(),
                algorithm
            );
        }
        assert!(SigAlgorithm::from_wire_code(0x0301).is_err());
    }
}
