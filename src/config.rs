//! Environment-driven configuration
//!
//! Every knob has a safe default; recognized environment variables
//! override them. Invalid values are rejected rather than silently
//! replaced, so a typo in an algorithm name cannot downgrade the channel.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::debug;

use crate::error::{error_codes, ChannelError, ChannelResult};
use crate::kem::KemAlgorithm;
use crate::key_manager::BackupTarget;
use crate::sig::SigAlgorithm;

const ENV_KEM_ALGORITHM: &str = "PQCHANNEL_KEM_ALGORITHM";
const ENV_SIG_ALGORITHM: &str = "PQCHANNEL_SIG_ALGORITHM";
const ENV_ROTATION_INTERVAL_DAYS: &str = "PQCHANNEL_ROTATION_INTERVAL_DAYS";
const ENV_KEY_VALIDITY_DAYS: &str = "PQCHANNEL_KEY_VALIDITY_DAYS";
const ENV_HANDSHAKE_TIMEOUT_SECS: &str = "PQCHANNEL_HANDSHAKE_TIMEOUT_SECS";
const ENV_SESSION_TTL_SECS: &str = "PQCHANNEL_SESSION_TTL_SECS";
const ENV_HYBRID_MODE: &str = "PQCHANNEL_HYBRID_MODE";
const ENV_BACKUP_DIR: &str = "PQCHANNEL_BACKUP_DIR";

/// Complete runtime configuration of the channel subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub kem_algorithm: KemAlgorithm,
    pub sig_algorithm: SigAlgorithm,
    pub rotation_interval_days: i64,
    pub key_validity_days: i64,
    pub handshake_timeout: Duration,
    pub session_ttl_secs: i64,
    pub hybrid_mode: bool,
    pub backup_dir: Option<PathBuf>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kem_algorithm: KemAlgorithm::MlKem768,
            sig_algorithm: SigAlgorithm::MlDsa65,
            rotation_interval_days: 30,
            key_validity_days: 37,
            handshake_timeout: Duration::from_secs(30),
            session_ttl_secs: 3600,
            hybrid_mode: false,
            backup_dir: default_backup_dir(),
        }
    }
}

/// Platform data directory for key backups, when one exists
pub fn default_backup_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("pqchannel").join("backups"))
}

impl ChannelConfig {
    /// Build the configuration from the environment over the defaults
    pub fn from_env() -> ChannelResult<Self> {
        let mut config = Self::default();

        if let Some(value) = read_env(ENV_KEM_ALGORITHM) {
            config.kem_algorithm = parse_kem_algorithm(&value)?;
        }
        if let Some(value) = read_env(ENV_SIG_ALGORITHM) {
            config.sig_algorithm = parse_sig_algorithm(&value)?;
        }
        if let Some(value) = read_env(ENV_ROTATION_INTERVAL_DAYS) {
            config.rotation_interval_days = parse_positive(ENV_ROTATION_INTERVAL_DAYS, &value)?;
        }
        if let Some(value) = read_env(ENV_KEY_VALIDITY_DAYS) {
            config.key_validity_days = parse_positive(ENV_KEY_VALIDITY_DAYS, &value)?;
        }
        if let Some(value) = read_env(ENV_HANDSHAKE_TIMEOUT_SECS) {
            let secs = parse_positive(ENV_HANDSHAKE_TIMEOUT_SECS, &value)?;
            config.handshake_timeout = Duration::from_secs(secs as u64);
        }
        if let Some(value) = read_env(ENV_SESSION_TTL_SECS) {
            config.session_ttl_secs = parse_positive(ENV_SESSION_TTL_SECS, &value)?;
        }
        if let Some(value) = read_env(ENV_HYBRID_MODE) {
            config.hybrid_mode = parse_bool(ENV_HYBRID_MODE, &value)?;
        }
        if let Some(value) = read_env(ENV_BACKUP_DIR) {
            config.backup_dir = Some(PathBuf::from(value));
        }

        // The validity window must cover the rotation interval, otherwise
        // the current key expires before it is ever rotated.
        if config.key_validity_days < config.rotation_interval_days {
            return Err(ChannelError::protocol(
                "config",
                &format!(
                    "{} ({}) must be at least {} ({})",
                    ENV_KEY_VALIDITY_DAYS,
                    config.key_validity_days,
                    ENV_ROTATION_INTERVAL_DAYS,
                    config.rotation_interval_days
                ),
                error_codes::HANDSHAKE_STATE_INVALID,
            ));
        }

        debug!(
            "configuration: {} / {}, hybrid {}",
            config.kem_algorithm, config.sig_algorithm, config.hybrid_mode
        );
        Ok(config)
    }

    /// Backup target under the configured directory, if one is set
    pub fn backup_target(&self, passphrase: &str) -> Option<BackupTarget> {
        self.backup_dir.as_ref().map(|dir| BackupTarget {
            dir: dir.clone(),
            passphrase: passphrase.to_string(),
        })
    }
}

fn read_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_kem_algorithm(value: &str) -> ChannelResult<KemAlgorithm> {
    match value.to_ascii_uppercase().as_str() {
        "ML-KEM-512" | "MLKEM512" => Ok(KemAlgorithm::MlKem512),
        "ML-KEM-768" | "MLKEM768" => Ok(KemAlgorithm::MlKem768),
        "ML-KEM-1024" | "MLKEM1024" => Ok(KemAlgorithm::MlKem1024),
        other => Err(ChannelError::unsupported_algorithm(
            other,
            "unrecognized kem algorithm name",
            error_codes::KEM_UNSUPPORTED_ALGORITHM,
        )),
    }
}

fn parse_sig_algorithm(value: &str) -> ChannelResult<SigAlgorithm> {
    match value.to_ascii_uppercase().as_str() {
        "ML-DSA-44" | "MLDSA44" => Ok(SigAlgorithm::MlDsa44),
        "ML-DSA-65" | "MLDSA65" => Ok(SigAlgorithm::MlDsa65),
        "ML-DSA-87" | "MLDSA87" => Ok(SigAlgorithm::MlDsa87),
        other => Err(ChannelError::unsupported_algorithm(
            other,
            "unrecognized signature algorithm name",
            error_codes::SIG_UNSUPPORTED_ALGORITHM,
        )),
    }
}

fn parse_positive(name: &str, value: &str) -> ChannelResult<i64> {
    match value.parse::<i64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ChannelError::protocol(
            "config",
            &format!("{} must be a positive integer, got {:?}", name, value),
            error_codes::HANDSHAKE_STATE_INVALID,
        )),
    }
}

fn parse_bool(name: &str, value: &str) -> ChannelResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ChannelError::protocol(
            "config",
            &format!("{} must be a boolean, got {:?}", name, other),
            error_codes::HANDSHAKE_STATE_INVALID,
        )),
    }
}
