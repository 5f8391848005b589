//! Lattice-based key encapsulation for channel establishment
//!
//! Wraps the ML-KEM parameter sets exposed by liboqs, with implicit-rejection
//! decapsulation and an optional hybrid mode that folds in an X25519 share.

mod hybrid;
#[allow(clippy::module_inception)]
mod kem;

pub use hybrid::{HybridCiphertext, HybridKemKeyPair, HybridKemPublicKey};
pub use kem::{KemAlgorithm, KemKeyPair, KemPublicKey};
