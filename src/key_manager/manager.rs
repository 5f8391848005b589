use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{error_codes, ChannelError, ChannelResult};
use crate::kem::{KemAlgorithm, KemKeyPair, KemPublicKey};
use crate::key_manager::audit::{AuditLog, AuditLogIter, KeyKind, RotationReason};
use crate::sig::{SigAlgorithm, SigKeyPair, SigPublicKey};
use crate::utils;

/// A long-term KEM keypair with its lifecycle metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedKemKey {
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub keypair: KemKeyPair,
}

/// A long-term signature keypair with its lifecycle metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedSigKey {
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub keypair: SigKeyPair,
}

/// Lifecycle metadata of a key, with no private material
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyMetadata {
    pub key_id: String,
    pub kind: KeyKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Public key material safe to expose externally
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeyExport {
    pub kem_key_id: String,
    pub kem_public: KemPublicKey,
    pub sig_key_id: String,
    pub sig_public: SigPublicKey,
}

/// Where encrypted key backups are written
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub dir: PathBuf,
    pub passphrase: String,
}

/// At most two live generations of one key kind: the current key offered
/// in new handshakes, and the retiring key kept valid for in-flight
/// sessions until its own expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Generations<T> {
    pub(crate) current: Option<Arc<T>>,
    pub(crate) retiring: Option<Arc<T>>,
}

impl<T> Default for Generations<T> {
    fn default() -> Self {
        Self {
            current: None,
            retiring: None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct KeyManagerState {
    pub(crate) kem: Generations<ManagedKemKey>,
    pub(crate) sig: Generations<ManagedSigKey>,
    pub(crate) audit: AuditLog,
}

/// Owner of this node's long-term KEM and signature keypairs.
///
/// One instance is shared by every concurrent handshake. Reads take the
/// shared side of the lock and always observe a complete generation pair;
/// rotation takes the exclusive side, swaps the slots and appends the audit
/// entry inside the same critical section, so audit order equals swap order.
pub struct KeyManager {
    state: RwLock<KeyManagerState>,
    kem_algorithm: KemAlgorithm,
    sig_algorithm: SigAlgorithm,
    rotation_interval: Duration,
    validity_window: Duration,
    pub(crate) backup_target: Option<BackupTarget>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("kem_algorithm", &self.kem_algorithm)
            .field("sig_algorithm", &self.sig_algorithm)
            .field("rotation_interval_days", &self.rotation_interval.num_days())
            .field("validity_window_days", &self.validity_window.num_days())
            .finish_non_exhaustive()
    }
}

/// Derive the deterministic key id from public material and creation time
pub(crate) fn derive_key_id(public_key: &[u8], created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hasher.update(created_at.to_rfc3339().as_bytes());
    utils::to_hex(&hasher.finalize()[0..8])
}

impl KeyManager {
    /// Create a key manager with empty key slots.
    ///
    /// `rotation_interval_days` is the scheduled rotation cadence;
    /// `validity_window_days` bounds how long any generation (including a
    /// retiring one) may be used after creation.
    pub fn new(
        kem_algorithm: KemAlgorithm,
        sig_algorithm: SigAlgorithm,
        rotation_interval_days: i64,
        validity_window_days: i64,
        backup_target: Option<BackupTarget>,
    ) -> Self {
        Self {
            state: RwLock::new(KeyManagerState::default()),
            kem_algorithm,
            sig_algorithm,
            rotation_interval: Duration::days(rotation_interval_days),
            validity_window: Duration::days(validity_window_days),
            backup_target,
        }
    }

    /// Generate and install a new current KEM keypair.
    ///
    /// Bootstrap operation: any previously installed current key is
    /// discarded without a grace window. Use [`KeyManager::rotate_kem_key`]
    /// for transitions that must keep in-flight sessions alive.
    pub fn generate_kem_keypair(&self) -> ChannelResult<KeyMetadata> {
        let keypair = KemKeyPair::generate(self.kem_algorithm)?;
        let managed = self.manage_kem(keypair);
        let metadata = kem_metadata(&managed);

        let mut state = self.write_state();
        let old_key_id = state.kem.current.as_ref().map(|k| k.key_id.clone());
        state.kem.current = Some(Arc::new(managed));
        state.audit.append(
            KeyKind::Kem,
            old_key_id,
            metadata.key_id.clone(),
            RotationReason::Manual,
            "local",
        );

        info!("installed kem key {}", metadata.key_id);
        Ok(metadata)
    }

    /// Generate and install a new current signature keypair
    pub fn generate_sig_keypair(&self) -> ChannelResult<KeyMetadata> {
        let keypair = SigKeyPair::generate(self.sig_algorithm)?;
        let managed = self.manage_sig(keypair);
        let metadata = sig_metadata(&managed);

        let mut state = self.write_state();
        let old_key_id = state.sig.current.as_ref().map(|k| k.key_id.clone());
        state.sig.current = Some(Arc::new(managed));
        state.audit.append(
            KeyKind::Signature,
            old_key_id,
            metadata.key_id.clone(),
            RotationReason::Manual,
            "local",
        );

        info!("installed signature key {}", metadata.key_id);
        Ok(metadata)
    }

    /// Atomically replace the current KEM key.
    ///
    /// The superseded key moves to the retiring slot and stays valid for
    /// decapsulation until its original expiry; it is never offered in new
    /// ServerHello messages. Fails with `RotationPolicyViolation` while an
    /// unexpired retiring generation exists, since only two generations may
    /// be live at once.
    pub fn rotate_kem_key(
        &self,
        reason: RotationReason,
        performed_by: &str,
    ) -> ChannelResult<KeyMetadata> {
        // Generate outside the lock; a failed generation must leave the
        // previous generation serving untouched.
        let keypair = KemKeyPair::generate(self.kem_algorithm)?;
        let managed = Arc::new(self.manage_kem(keypair));
        let metadata = kem_metadata(&managed);

        let mut state = self.write_state();

        let current = state.kem.current.take().ok_or_else(|| {
            ChannelError::protocol(
                "rotate_kem_key",
                "no current kem key installed",
                error_codes::KEYS_NOT_INSTALLED,
            )
        })?;

        if let Some(retiring) = &state.kem.retiring {
            if retiring.expires_at > Utc::now() {
                // Put the current key back before failing.
                let detail = format!(
                    "retiring key {} is valid until {}",
                    retiring.key_id, retiring.expires_at
                );
                state.kem.current = Some(current);
                warn!("kem rotation rejected: {}", detail);
                return Err(ChannelError::RotationPolicyViolation {
                    policy: "two live generations".to_string(),
                    detail,
                    error_code: error_codes::ROTATION_THIRD_GENERATION,
                });
            }
        }

        let old_key_id = current.key_id.clone();
        state.kem.retiring = Some(current);
        state.kem.current = Some(managed);
        state.audit.append(
            KeyKind::Kem,
            Some(old_key_id.clone()),
            metadata.key_id.clone(),
            reason,
            performed_by,
        );

        info!("rotated kem key {} -> {}", old_key_id, metadata.key_id);
        Ok(metadata)
    }

    /// Atomically replace the current signature key; same policy as
    /// [`KeyManager::rotate_kem_key`]
    pub fn rotate_sig_key(
        &self,
        reason: RotationReason,
        performed_by: &str,
    ) -> ChannelResult<KeyMetadata> {
        let keypair = SigKeyPair::generate(self.sig_algorithm)?;
        let managed = Arc::new(self.manage_sig(keypair));
        let metadata = sig_metadata(&managed);

        let mut state = self.write_state();

        let current = state.sig.current.take().ok_or_else(|| {
            ChannelError::protocol(
                "rotate_sig_key",
                "no current signature key installed",
                error_codes::KEYS_NOT_INSTALLED,
            )
        })?;

        if let Some(retiring) = &state.sig.retiring {
            if retiring.expires_at > Utc::now() {
                let detail = format!(
                    "retiring key {} is valid until {}",
                    retiring.key_id, retiring.expires_at
                );
                state.sig.current = Some(current);
                warn!("signature rotation rejected: {}", detail);
                return Err(ChannelError::RotationPolicyViolation {
                    policy: "two live generations".to_string(),
                    detail,
                    error_code: error_codes::ROTATION_THIRD_GENERATION,
                });
            }
        }

        let old_key_id = current.key_id.clone();
        state.sig.retiring = Some(current);
        state.sig.current = Some(managed);
        state.audit.append(
            KeyKind::Signature,
            Some(old_key_id.clone()),
            metadata.key_id.clone(),
            reason,
            performed_by,
        );

        info!("rotated signature key {} -> {}", old_key_id, metadata.key_id);
        Ok(metadata)
    }

    /// Current KEM key, if one is installed
    pub fn current_kem(&self) -> Option<Arc<ManagedKemKey>> {
        self.read_state().kem.current.clone()
    }

    /// Current signature key, if one is installed
    pub fn current_sig(&self) -> Option<Arc<ManagedSigKey>> {
        self.read_state().sig.current.clone()
    }

    /// Retiring KEM key, if one is still inside its grace window
    pub fn retiring_kem(&self) -> Option<Arc<ManagedKemKey>> {
        self.read_state()
            .kem
            .retiring
            .clone()
            .filter(|key| key.expires_at > Utc::now())
    }

    /// Resolve the KEM key a ServerHello advertised, for decapsulation.
    ///
    /// The current generation always resolves. The retiring generation
    /// resolves only inside its grace window; expired or unknown ids fail
    /// with `InvalidPublicKey`, so a handshake pinned to a dead key cannot
    /// complete.
    pub fn decapsulation_key_for(&self, key_id: &str) -> ChannelResult<Arc<ManagedKemKey>> {
        let state = self.read_state();

        if let Some(current) = &state.kem.current {
            if current.key_id == key_id {
                return Ok(current.clone());
            }
        }

        if let Some(retiring) = &state.kem.retiring {
            if retiring.key_id == key_id {
                if retiring.expires_at > Utc::now() {
                    return Ok(retiring.clone());
                }
                return Err(ChannelError::InvalidPublicKey {
                    algorithm: self.kem_algorithm.to_string(),
                    cause: format!("key {} expired at {}", key_id, retiring.expires_at),
                    error_code: error_codes::KEM_INVALID_KEY_ID,
                });
            }
        }

        Err(ChannelError::InvalidPublicKey {
            algorithm: self.kem_algorithm.to_string(),
            cause: format!("unknown key id {}", key_id),
            error_code: error_codes::KEM_INVALID_KEY_ID,
        })
    }

    /// Export the current public key material; safe to expose externally
    pub fn export_public_keys(&self) -> ChannelResult<PublicKeyExport> {
        let state = self.read_state();

        let kem = state.kem.current.as_ref().ok_or_else(|| {
            ChannelError::protocol(
                "export_public_keys",
                "no current kem key installed",
                error_codes::KEYS_NOT_INSTALLED,
            )
        })?;
        let sig = state.sig.current.as_ref().ok_or_else(|| {
            ChannelError::protocol(
                "export_public_keys",
                "no current signature key installed",
                error_codes::KEYS_NOT_INSTALLED,
            )
        })?;

        Ok(PublicKeyExport {
            kem_key_id: kem.key_id.clone(),
            kem_public: kem.keypair.public_key(),
            sig_key_id: sig.key_id.clone(),
            sig_public: sig.keypair.public_key(),
        })
    }

    /// Whether both long-term keypairs are installed
    pub fn keys_installed(&self) -> bool {
        let state = self.read_state();
        state.kem.current.is_some() && state.sig.current.is_some()
    }

    /// Whether the scheduled rotation interval has elapsed for the current
    /// KEM key
    pub fn kem_rotation_due(&self) -> bool {
        match self.current_kem() {
            Some(key) => Utc::now() - key.created_at >= self.rotation_interval,
            None => false,
        }
    }

    /// Snapshot the rotation audit log, ordered by timestamp ascending
    pub fn rotation_audit_log(&self) -> AuditLogIter {
        self.read_state().audit.iter_snapshot()
    }

    /// The configured KEM parameter set
    pub fn kem_algorithm(&self) -> KemAlgorithm {
        self.kem_algorithm
    }

    /// The configured signature parameter set
    pub fn sig_algorithm(&self) -> SigAlgorithm {
        self.sig_algorithm
    }

    fn manage_kem(&self, keypair: KemKeyPair) -> ManagedKemKey {
        let created_at = Utc::now();
        ManagedKemKey {
            key_id: derive_key_id(&keypair.public_key, created_at),
            created_at,
            expires_at: created_at + self.validity_window,
            keypair,
        }
    }

    fn manage_sig(&self, keypair: SigKeyPair) -> ManagedSigKey {
        let created_at = Utc::now();
        ManagedSigKey {
            key_id: derive_key_id(&keypair.public_key, created_at),
            created_at,
            expires_at: created_at + self.validity_window,
            keypair,
        }
    }

    pub(crate) fn read_state(&self) -> std::sync::RwLockReadGuard<'_, KeyManagerState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, KeyManagerState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn kem_metadata(key: &ManagedKemKey) -> KeyMetadata {
    KeyMetadata {
        key_id: key.key_id.clone(),
        kind: KeyKind::Kem,
        created_at: key.created_at,
        expires_at: key.expires_at,
    }
}

fn sig_metadata(key: &ManagedSigKey) -> KeyMetadata {
    KeyMetadata {
        key_id: key.key_id.clone(),
        kind: KeyKind::Signature,
        created_at: key.created_at,
        expires_at: key.expires_at,
    }
}
