//! Encrypted at-rest backups of the long-term key state.
//!
//! A backup captures both live generations of the KEM and signature keys
//! together with the rotation audit log, so a restored node resumes with
//! the exact lifecycle state it had when the backup was taken. The payload
//! is bincode-serialized and sealed with ChaCha20-Poly1305 under a key
//! derived from the operator passphrase with Argon2id.

use std::fs;
use std::path::PathBuf;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use argon2::{Argon2, Params};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::{error_codes, ChannelError, ChannelResult};
use crate::kem::KemAlgorithm;
use crate::key_manager::audit::AuditLog;
use crate::key_manager::manager::{Generations, KeyManager, ManagedKemKey, ManagedSigKey};
use crate::sig::SigAlgorithm;
use crate::utils;

const BACKUP_FORMAT_VERSION: u16 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

// Matches the low-resource Argon2id profile so restores work on
// constrained nodes too.
const ARGON2_MEMORY_KIB: u32 = 19456;
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;

/// Receipt for a completed backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupHandle {
    pub backup_id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// The plaintext payload sealed inside a backup file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupPayload {
    version: u16,
    kem_algorithm: KemAlgorithm,
    sig_algorithm: SigAlgorithm,
    kem: Generations<ManagedKemKey>,
    sig: Generations<ManagedSigKey>,
    audit: AuditLog,
}

/// On-disk envelope: everything needed to decrypt except the passphrase
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupEnvelope {
    backup_id: String,
    created_at: DateTime<Utc>,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

fn derive_backup_key(passphrase: &str, salt: &[u8]) -> ChannelResult<[u8; 32]> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_ITERATIONS, ARGON2_PARALLELISM, Some(32))
        .map_err(|e| {
            ChannelError::backup(
                "derive_backup_key",
                &format!("invalid argon2 parameters: {}", e),
                error_codes::BACKUP_ENCRYPTION_FAILED,
            )
        })?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| {
            ChannelError::backup(
                "derive_backup_key",
                &format!("key derivation failed: {}", e),
                error_codes::BACKUP_ENCRYPTION_FAILED,
            )
        })?;
    Ok(key)
}

impl KeyManager {
    /// Write an encrypted backup of the full key state to the configured
    /// backup directory.
    ///
    /// Fails with `BackupError` if no backup target is configured. The
    /// state snapshot is taken under the read lock, so a backup never
    /// captures a half-applied rotation.
    pub fn backup_keys(&self) -> ChannelResult<BackupHandle> {
        let target = self.backup_target.as_ref().ok_or_else(|| {
            ChannelError::backup(
                "backup_keys",
                "no backup target configured",
                error_codes::BACKUP_NO_TARGET,
            )
        })?;

        let payload = {
            let state = self.read_state();
            BackupPayload {
                version: BACKUP_FORMAT_VERSION,
                kem_algorithm: self.kem_algorithm(),
                sig_algorithm: self.sig_algorithm(),
                kem: state.kem.clone(),
                sig: state.sig.clone(),
                audit: state.audit.clone(),
            }
        };

        let mut plaintext = bincode::serialize(&payload)
            .map_err(|e| ChannelError::SerializationError(e.to_string()))?;

        let salt = utils::random_bytes(SALT_LEN)?;
        let nonce_bytes = utils::random_bytes(NONCE_LEN)?;
        let mut key = derive_backup_key(&target.passphrase, &salt)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|e| {
                ChannelError::backup(
                    "backup_keys",
                    &format!("encryption failed: {}", e),
                    error_codes::BACKUP_ENCRYPTION_FAILED,
                )
            });
        plaintext.zeroize();
        key.zeroize();
        let ciphertext = ciphertext?;

        let envelope = BackupEnvelope {
            backup_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            salt,
            nonce: nonce_bytes,
            ciphertext,
        };

        fs::create_dir_all(&target.dir).map_err(|e| {
            ChannelError::backup(
                "backup_keys",
                &format!("cannot create backup directory: {}", e),
                error_codes::BACKUP_WRITE_FAILED,
            )
        })?;

        let path = target
            .dir
            .join(format!("pqchannel-backup-{}.bin", envelope.backup_id));
        let bytes = bincode::serialize(&envelope)
            .map_err(|e| ChannelError::SerializationError(e.to_string()))?;
        fs::write(&path, bytes).map_err(|e| {
            ChannelError::backup(
                "backup_keys",
                &format!("cannot write {}: {}", path.display(), e),
                error_codes::BACKUP_WRITE_FAILED,
            )
        })?;

        info!("wrote key backup {} to {}", envelope.backup_id, path.display());
        Ok(BackupHandle {
            backup_id: envelope.backup_id,
            path,
            created_at: envelope.created_at,
        })
    }

    /// Restore key state from an encrypted backup file.
    ///
    /// All-or-nothing: the payload is decrypted, deserialized and checked
    /// against the configured algorithms before anything is installed. A
    /// wrong passphrase or a bit flip anywhere in the file fails the AEAD
    /// tag check and leaves the current state untouched.
    pub fn restore_keys(&self, path: &std::path::Path, passphrase: &str) -> ChannelResult<()> {
        let bytes = fs::read(path).map_err(|e| {
            ChannelError::restore(
                "restore_keys",
                &format!("cannot read {}: {}", path.display(), e),
                error_codes::RESTORE_READ_FAILED,
            )
        })?;
        let envelope: BackupEnvelope = bincode::deserialize(&bytes).map_err(|e| {
            ChannelError::restore(
                "restore_keys",
                &format!("malformed backup file: {}", e),
                error_codes::RESTORE_READ_FAILED,
            )
        })?;

        let mut key = derive_backup_key(passphrase, &envelope.salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_ref())
            .map_err(|_| {
                ChannelError::restore(
                    "restore_keys",
                    "authentication failed: wrong passphrase or corrupted backup",
                    error_codes::RESTORE_INTEGRITY_MISMATCH,
                )
            });
        key.zeroize();
        let mut plaintext = plaintext?;

        let payload: ChannelResult<BackupPayload> = bincode::deserialize(&plaintext)
            .map_err(|e| ChannelError::SerializationError(e.to_string()));
        plaintext.zeroize();
        let payload = payload?;

        if payload.version != BACKUP_FORMAT_VERSION {
            return Err(ChannelError::restore(
                "restore_keys",
                &format!("unsupported backup version {}", payload.version),
                error_codes::RESTORE_READ_FAILED,
            ));
        }
        if payload.kem_algorithm != self.kem_algorithm()
            || payload.sig_algorithm != self.sig_algorithm()
        {
            return Err(ChannelError::restore(
                "restore_keys",
                &format!(
                    "backup holds {}/{} keys, manager is configured for {}/{}",
                    payload.kem_algorithm,
                    payload.sig_algorithm,
                    self.kem_algorithm(),
                    self.sig_algorithm()
                ),
                error_codes::RESTORE_INTEGRITY_MISMATCH,
            ));
        }

        // Install the fully validated state in one swap.
        let mut state = self.write_state();
        state.kem = payload.kem;
        state.sig = payload.sig;
        state.audit = payload.audit;
        drop(state);

        info!("restored key state from {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_manager::audit::RotationReason;
    use crate::key_manager::manager::BackupTarget;

    fn manager_with_backup(dir: &std::path::Path) -> KeyManager {
        KeyManager::new(
            KemAlgorithm::MlKem512,
            SigAlgorithm::MlDsa44,
            30,
            37,
            Some(BackupTarget {
                dir: dir.to_path_buf(),
                passphrase: "correct horse battery staple".to_string(),
            }),
        )
    }

    #[test]
    fn test_backup_without_target_fails() {
        let manager = KeyManager::new(KemAlgorithm::MlKem512, SigAlgorithm::MlDsa44, 30, 37, None);
        manager.generate_kem_keypair().unwrap();
        manager.generate_sig_keypair().unwrap();

        let err = manager.backup_keys().unwrap_err();
        assert_eq!(err.error_code(), error_codes::BACKUP_NO_TARGET);
    }

    #[test]
    fn test_backup_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_backup(dir.path());
        manager.generate_kem_keypair().unwrap();
        manager.generate_sig_keypair().unwrap();
        manager
            .rotate_kem_key(RotationReason::Scheduled, "scheduler")
            .unwrap();

        let export_before = manager.export_public_keys().unwrap();
        let audit_before = manager.rotation_audit_log().total();
        let handle = manager.backup_keys().unwrap();
        assert!(handle.path.exists());

        // A fresh manager restored from the backup exposes bit-identical
        // public key material and the full audit history.
        let restored = manager_with_backup(dir.path());
        restored
            .restore_keys(&handle.path, "correct horse battery staple")
            .unwrap();

        let export_after = restored.export_public_keys().unwrap();
        assert_eq!(export_before, export_after);
        assert_eq!(restored.rotation_audit_log().total(), audit_before);

        // The restored retiring generation still serves decapsulation.
        let retiring_id = manager
            .read_state()
            .kem
            .retiring
            .as_ref()
            .unwrap()
            .key_id
            .clone();
        assert!(restored.decapsulation_key_for(&retiring_id).is_ok());
    }

    #[test]
    fn test_wrong_passphrase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_backup(dir.path());
        manager.generate_kem_keypair().unwrap();
        manager.generate_sig_keypair().unwrap();

        let handle = manager.backup_keys().unwrap();

        let restored = manager_with_backup(dir.path());
        let err = restored
            .restore_keys(&handle.path, "not the passphrase")
            .unwrap_err();
        assert_eq!(err.error_code(), error_codes::RESTORE_INTEGRITY_MISMATCH);
        // Failure is all-or-nothing.
        assert!(!restored.keys_installed());
    }

    #[test]
    fn test_tampered_backup_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_backup(dir.path());
        manager.generate_kem_keypair().unwrap();
        manager.generate_sig_keypair().unwrap();

        let handle = manager.backup_keys().unwrap();
        let mut bytes = fs::read(&handle.path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        fs::write(&handle.path, &bytes).unwrap();

        let restored = manager_with_backup(dir.path());
        let err = restored
            .restore_keys(&handle.path, "correct horse battery staple")
            .unwrap_err();
        assert!(
            err.error_code() == error_codes::RESTORE_INTEGRITY_MISMATCH
                || err.error_code() == error_codes::RESTORE_READ_FAILED
        );
        assert!(!restored.keys_installed());
    }

    #[test]
    fn test_restore_rejects_algorithm_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_backup(dir.path());
        manager.generate_kem_keypair().unwrap();
        manager.generate_sig_keypair().unwrap();
        let handle = manager.backup_keys().unwrap();

        let other = KeyManager::new(
            KemAlgorithm::MlKem768,
            SigAlgorithm::MlDsa65,
            30,
            37,
            None,
        );
        let err = other
            .restore_keys(&handle.path, "correct horse battery staple")
            .unwrap_err();
        assert_eq!(err.error_code(), error_codes::RESTORE_INTEGRITY_MISMATCH);
    }
}
