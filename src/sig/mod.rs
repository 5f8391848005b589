//! Lattice-based digital signatures for handshake authentication
//!
//! Wraps the ML-DSA (Dilithium) parameter sets exposed by liboqs.
//! Verification fails closed: malformed input yields `false`, never an
//! error path a caller could mistake for success.

#[allow(clippy::module_inception)]
mod sig;

pub use sig::{SigAlgorithm, SigKeyPair, SigPublicKey};
