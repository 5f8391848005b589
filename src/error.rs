/*!
 * Error Handling for the PQChannel Secure-Channel Subsystem
 *
 * Provides structured error types for the KEM engine, signature engine,
 * key manager and handshake state machine, together with the collapse
 * rules that keep internal failure detail off the wire.
 */

use thiserror::Error;

/// Comprehensive error type for all secure-channel operations
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Unsupported algorithm: {algorithm} - {cause}")]
    UnsupportedAlgorithm {
        algorithm: String,
        cause: String,
        error_code: u32,
    },

    #[error("Invalid public key for {algorithm}: {cause}")]
    InvalidPublicKey {
        algorithm: String,
        cause: String,
        error_code: u32,
    },

    #[error("Key generation failed: {operation} - {cause}")]
    KeyGenerationError {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("No common algorithm: {detail}")]
    NoCommonAlgorithm { detail: String, error_code: u32 },

    #[error("Server authentication failed during {phase}")]
    ServerAuthenticationFailed { phase: String, error_code: u32 },

    #[error("Handshake integrity check failed during {phase}")]
    HandshakeIntegrityError { phase: String, error_code: u32 },

    #[error("Handshake timed out in state {state}")]
    HandshakeTimeout { state: String, error_code: u32 },

    #[error("Rotation policy violation: {policy} - {detail}")]
    RotationPolicyViolation {
        policy: String,
        detail: String,
        error_code: u32,
    },

    #[error("Key backup failed: {operation} - {cause}")]
    BackupError {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Key restore failed: {operation} - {cause}")]
    RestoreError {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Protocol error: {phase} - {cause}")]
    ProtocolError {
        phase: String,
        cause: String,
        error_code: u32,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("OQS library error: {0}")]
    OqsError(String),
}

/// Error code constants grouped by subsystem
pub mod error_codes {
    // KEM engine errors: 1000-1999
    pub const KEM_UNSUPPORTED_ALGORITHM: u32 = 1000;
    pub const KEM_KEY_GENERATION_FAILED: u32 = 1001;
    pub const KEM_ENCAPSULATION_FAILED: u32 = 1002;
    pub const KEM_INVALID_PUBLIC_KEY: u32 = 1003;
    pub const KEM_INVALID_KEY_ID: u32 = 1004;

    // Signature engine errors: 2000-2999
    pub const SIG_UNSUPPORTED_ALGORITHM: u32 = 2000;
    pub const SIG_KEY_GENERATION_FAILED: u32 = 2001;
    pub const SIG_SIGNING_FAILED: u32 = 2002;

    // Key manager errors: 3000-3999
    pub const ROTATION_THIRD_GENERATION: u32 = 3001;
    pub const BACKUP_NO_TARGET: u32 = 3002;
    pub const BACKUP_WRITE_FAILED: u32 = 3003;
    pub const BACKUP_ENCRYPTION_FAILED: u32 = 3004;
    pub const RESTORE_INTEGRITY_MISMATCH: u32 = 3005;
    pub const RESTORE_READ_FAILED: u32 = 3006;
    pub const ENTROPY_STARVATION: u32 = 3007;
    pub const KEYS_NOT_INSTALLED: u32 = 3008;

    // Handshake errors: 4000-4999
    pub const HANDSHAKE_NO_COMMON_ALGORITHM: u32 = 4001;
    pub const HANDSHAKE_SERVER_AUTH_FAILED: u32 = 4002;
    pub const HANDSHAKE_FINISHED_MISMATCH: u32 = 4003;
    pub const HANDSHAKE_TIMEOUT: u32 = 4004;
    pub const HANDSHAKE_STATE_INVALID: u32 = 4005;
    pub const HANDSHAKE_CLIENT_AUTH_FAILED: u32 = 4006;
}

/// What a failure looks like from the outside.
///
/// Every internal error collapses to one of two caller-visible outcomes so
/// that the wire never learns which exact check failed. The detail stays in
/// the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicOutcome {
    /// The handshake failed; the peer may retry.
    HandshakeFailed,
    /// This node cannot currently serve handshakes.
    ServiceUnavailable,
}

impl ChannelError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            ChannelError::UnsupportedAlgorithm { error_code, .. } => *error_code,
            ChannelError::InvalidPublicKey { error_code, .. } => *error_code,
            ChannelError::KeyGenerationError { error_code, .. } => *error_code,
            ChannelError::NoCommonAlgorithm { error_code, .. } => *error_code,
            ChannelError::ServerAuthenticationFailed { error_code, .. } => *error_code,
            ChannelError::HandshakeIntegrityError { error_code, .. } => *error_code,
            ChannelError::HandshakeTimeout { error_code, .. } => *error_code,
            ChannelError::RotationPolicyViolation { error_code, .. } => *error_code,
            ChannelError::BackupError { error_code, .. } => *error_code,
            ChannelError::RestoreError { error_code, .. } => *error_code,
            ChannelError::ProtocolError { error_code, .. } => *error_code,
            ChannelError::SerializationError(_) => 9001,
            ChannelError::IoError(_) => 9002,
            ChannelError::OqsError(_) => 9003,
        }
    }

    /// Collapse this error to its caller-visible outcome.
    ///
    /// Entropy starvation and key-manager faults mean the node cannot serve;
    /// everything else is a retryable handshake failure.
    pub fn public_outcome(&self) -> PublicOutcome {
        match self {
            ChannelError::KeyGenerationError { .. }
            | ChannelError::BackupError { .. }
            | ChannelError::RestoreError { .. }
            | ChannelError::RotationPolicyViolation { .. }
            | ChannelError::IoError(_)
            | ChannelError::OqsError(_) => PublicOutcome::ServiceUnavailable,
            _ => PublicOutcome::HandshakeFailed,
        }
    }

    /// Get the error category as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            ChannelError::UnsupportedAlgorithm { .. } => "UnsupportedAlgorithm",
            ChannelError::InvalidPublicKey { .. } => "InvalidPublicKey",
            ChannelError::KeyGenerationError { .. } => "KeyGenerationError",
            ChannelError::NoCommonAlgorithm { .. } => "NoCommonAlgorithm",
            ChannelError::ServerAuthenticationFailed { .. } => "ServerAuthenticationFailed",
            ChannelError::HandshakeIntegrityError { .. } => "HandshakeIntegrityError",
            ChannelError::HandshakeTimeout { .. } => "HandshakeTimeout",
            ChannelError::RotationPolicyViolation { .. } => "RotationPolicyViolation",
            ChannelError::BackupError { .. } => "BackupError",
            ChannelError::RestoreError { .. } => "RestoreError",
            ChannelError::ProtocolError { .. } => "ProtocolError",
            ChannelError::SerializationError(_) => "SerializationError",
            ChannelError::IoError(_) => "IoError",
            ChannelError::OqsError(_) => "OqsError",
        }
    }
}

/// Convenience constructors for common error types
impl ChannelError {
    pub fn unsupported_algorithm(algorithm: &str, cause: &str, error_code: u32) -> Self {
        ChannelError::UnsupportedAlgorithm {
            algorithm: algorithm.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn invalid_public_key(algorithm: &str, cause: &str) -> Self {
        ChannelError::InvalidPublicKey {
            algorithm: algorithm.to_string(),
            cause: cause.to_string(),
            error_code: error_codes::KEM_INVALID_PUBLIC_KEY,
        }
    }

    pub fn key_generation(operation: &str, cause: &str, error_code: u32) -> Self {
        ChannelError::KeyGenerationError {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn server_auth_failed(phase: &str) -> Self {
        ChannelError::ServerAuthenticationFailed {
            phase: phase.to_string(),
            error_code: error_codes::HANDSHAKE_SERVER_AUTH_FAILED,
        }
    }

    pub fn integrity(phase: &str) -> Self {
        ChannelError::HandshakeIntegrityError {
            phase: phase.to_string(),
            error_code: error_codes::HANDSHAKE_FINISHED_MISMATCH,
        }
    }

    pub fn timeout(state: &str) -> Self {
        ChannelError::HandshakeTimeout {
            state: state.to_string(),
            error_code: error_codes::HANDSHAKE_TIMEOUT,
        }
    }

    pub fn protocol(phase: &str, cause: &str, error_code: u32) -> Self {
        ChannelError::ProtocolError {
            phase: phase.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn backup(operation: &str, cause: &str, error_code: u32) -> Self {
        ChannelError::BackupError {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn restore(operation: &str, cause: &str, error_code: u32) -> Self {
        ChannelError::RestoreError {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::IoError(format!("IO operation failed: {}", err))
    }
}

impl From<oqs::Error> for ChannelError {
    fn from(err: oqs::Error) -> Self {
        ChannelError::OqsError(err.to_string())
    }
}

/// Result type alias for secure-channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_lookup() {
        let error = ChannelError::key_generation(
            "kem keypair",
            "entropy pool exhausted",
            error_codes::ENTROPY_STARVATION,
        );
        assert_eq!(error.error_code(), error_codes::ENTROPY_STARVATION);
        assert_eq!(error.error_type(), "KeyGenerationError");
    }

    #[test]
    fn test_crypto_failures_collapse_to_handshake_failed() {
        assert_eq!(
            ChannelError::server_auth_failed("server_hello").public_outcome(),
            PublicOutcome::HandshakeFailed
        );
        assert_eq!(
            ChannelError::integrity("server_finished").public_outcome(),
            PublicOutcome::HandshakeFailed
        );
        assert_eq!(
            ChannelError::timeout("KeyExchangeSent").public_outcome(),
            PublicOutcome::HandshakeFailed
        );
    }

    #[test]
    fn test_node_faults_collapse_to_service_unavailable() {
        let entropy = ChannelError::key_generation(
            "sig keypair",
            "getrandom failed",
            error_codes::ENTROPY_STARVATION,
        );
        assert_eq!(entropy.public_outcome(), PublicOutcome::ServiceUnavailable);

        let backup = ChannelError::backup(
            "backup_keys",
            "no backup target configured",
            error_codes::BACKUP_NO_TARGET,
        );
        assert_eq!(backup.public_outcome(), PublicOutcome::ServiceUnavailable);
    }
}
