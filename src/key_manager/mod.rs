/*!
 * Long-term key lifecycle management
 *
 * This module owns the node's long-term KEM and signature keypairs and
 * enforces the rotation policy: at most two generations of each kind are
 * live at once, and every rotation is recorded in an append-only audit
 * log. Encrypted backups capture the complete lifecycle state.
 */

mod audit;
mod backup;
mod manager;

pub use audit::{AuditLogIter, KeyKind, RotationAuditEntry, RotationReason};
pub use backup::BackupHandle;
pub use manager::{
    BackupTarget, KeyManager, KeyMetadata, ManagedKemKey, ManagedSigKey, PublicKeyExport,
};
