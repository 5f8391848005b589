/*!
 * pqchannel: post-quantum secure channel establishment
 *
 * This crate implements the key-exchange subsystem of a quantum-safe
 * communication service: a four-message handshake authenticated with
 * post-quantum signatures, long-term key lifecycle management with
 * rotation and encrypted backups, and per-session key derivation.
 *
 * The main cryptographic algorithms used are:
 *
 * - ML-KEM (CRYSTALS-Kyber) for key encapsulation
 * - ML-DSA (CRYSTALS-Dilithium) for server and client authentication
 * - Optionally X25519 combined with ML-KEM in hybrid mode
 *
 * Session keys come out of HKDF-SHA256 keyed on the encapsulated secret
 * and salted with the handshake transcript, so every derived value is
 * bound to the exact messages exchanged.
 */

/// ML-KEM key encapsulation, plain and hybrid
pub mod kem;

/// ML-DSA digital signatures
pub mod sig;

/// Long-term key lifecycle: rotation, audit, encrypted backups
pub mod key_manager;

/// The four-message handshake state machine
pub mod handshake;

/// Session records and the session store contract
pub mod session;

/// Transport-facing service surface
pub mod api;

/// Environment-driven configuration
pub mod config;

/// Common error types for the channel subsystem
pub mod error;

/// Utilities for cryptographic operations
pub mod utils;

/// Secure memory handling utilities
pub mod secure_memory;

// Re-export main types for convenience
pub use api::ChannelService;
pub use config::ChannelConfig;
pub use error::{ChannelError, ChannelResult, PublicOutcome};
pub use handshake::HandshakeClient;
pub use handshake::HandshakeServer;
pub use handshake::HandshakeState;
pub use kem::KemAlgorithm;
pub use kem::KemKeyPair;
pub use kem::KemPublicKey;
pub use key_manager::KeyManager;
pub use key_manager::RotationReason;
pub use session::MemorySessionStore;
pub use session::SessionRecord;
pub use session::SessionStore;
pub use sig::SigAlgorithm;
pub use sig::SigKeyPair;
pub use sig::SigPublicKey;

/// Initialize the channel subsystem.
///
/// Call once before any other operation. Currently no backend setup is
/// required, but the entry point keeps the API stable should the
/// underlying libraries grow initialization requirements.
///
/// # Example
///
/// ```
/// use pqchannel::prelude::*;
///
/// fn main() -> Result<(), ChannelError> {
///     init()?;
///     Ok(())
/// }
/// ```
pub fn init() -> Result<(), ChannelError> {
    Ok(())
}

/// The types most integrations need, in one import
pub mod prelude {
    pub use crate::api::{ChannelService, HelloRequest, KeyExchangeRequest};
    pub use crate::config::ChannelConfig;
    pub use crate::error::{ChannelError, ChannelResult, PublicOutcome};
    pub use crate::handshake::{HandshakeClient, HandshakeServer, HandshakeState};
    pub use crate::init;
    pub use crate::kem::KemAlgorithm;
    pub use crate::key_manager::{KeyManager, RotationReason};
    pub use crate::session::{MemorySessionStore, SessionRecord, SessionStore};
    pub use crate::sig::SigAlgorithm;
}
