//! Append-only rotation audit log
//!
//! Every key transition appends exactly one entry; entries are never
//! mutated or deleted afterwards. Appends happen inside the key manager's
//! writer lock, so the log order matches the order of the atomic key swaps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which long-term key a rotation touched
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyKind {
    Kem,
    Signature,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Kem => write!(f, "kem"),
            KeyKind::Signature => write!(f, "signature"),
        }
    }
}

/// Why a rotation happened
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RotationReason {
    /// The configured rotation interval elapsed
    Scheduled,
    /// An operator requested the rotation
    Manual,
    /// The key is suspected compromised
    Compromise,
    /// Free-form reason recorded verbatim
    Other(String),
}

impl std::fmt::Display for RotationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationReason::Scheduled => write!(f, "scheduled"),
            RotationReason::Manual => write!(f, "manual"),
            RotationReason::Compromise => write!(f, "compromise"),
            RotationReason::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// One immutable record of a key transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RotationAuditEntry {
    /// Position in the serialized append order; strictly increasing, so no
    /// two entries can share an ordering slot even within one clock tick
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: KeyKind,
    /// `None` for the initial installation of a key
    pub old_key_id: Option<String>,
    pub new_key_id: String,
    pub reason: RotationReason,
    pub performed_by: String,
}

/// The append-only log itself; owned by the key manager behind its lock
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<RotationAuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry, assigning the next sequence number
    pub fn append(
        &mut self,
        kind: KeyKind,
        old_key_id: Option<String>,
        new_key_id: String,
        reason: RotationReason,
        performed_by: &str,
    ) -> &RotationAuditEntry {
        let entry = RotationAuditEntry {
            sequence: self.entries.len() as u64,
            timestamp: Utc::now(),
            kind,
            old_key_id,
            new_key_id,
            reason,
            performed_by: performed_by.to_string(),
        };
        self.entries.push(entry);
        self.entries.last().expect("entry was just pushed")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot the log into a lazy, restartable iterator
    ///
    /// The snapshot is taken once; later appends do not appear in an
    /// already-created iterator.
    pub fn iter_snapshot(&self) -> AuditLogIter {
        AuditLogIter {
            entries: Arc::new(self.entries.clone()),
            pos: 0,
        }
    }
}

/// Lazy, finite, restartable cursor over an audit-log snapshot,
/// ordered by append position (equivalently, timestamp ascending)
#[derive(Debug, Clone)]
pub struct AuditLogIter {
    entries: Arc<Vec<RotationAuditEntry>>,
    pos: usize,
}

impl AuditLogIter {
    /// Rewind to the start of the snapshot
    pub fn restart(&mut self) {
        self.pos = 0;
    }

    /// Number of entries in the snapshot
    pub fn total(&self) -> usize {
        self.entries.len()
    }
}

impl Iterator for AuditLogIter {
    type Item = RotationAuditEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.pos)?.clone();
        self.pos += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len() - self.pos;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> AuditLog {
        let mut log = AuditLog::new();
        log.append(
            KeyKind::Kem,
            None,
            "aaaa".to_string(),
            RotationReason::Manual,
            "ops",
        );
        log.append(
            KeyKind::Kem,
            Some("aaaa".to_string()),
            "bbbb".to_string(),
            RotationReason::Scheduled,
            "scheduler",
        );
        log.append(
            KeyKind::Signature,
            None,
            "cccc".to_string(),
            RotationReason::Manual,
            "ops",
        );
        log
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let log = sample_log();
        let sequences: Vec<u64> = log.iter_snapshot().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let log = sample_log();
        let mut iter = log.iter_snapshot();

        assert_eq!(iter.next().unwrap().new_key_id, "aaaa");
        assert_eq!(iter.next().unwrap().new_key_id, "bbbb");

        iter.restart();
        assert_eq!(iter.next().unwrap().new_key_id, "aaaa");
        assert_eq!(iter.count(), 2);
    }

    #[test]
    fn test_snapshot_does_not_see_later_appends() {
        let mut log = sample_log();
        let iter = log.iter_snapshot();

        log.append(
            KeyKind::Kem,
            Some("bbbb".to_string()),
            "dddd".to_string(),
            RotationReason::Compromise,
            "ops",
        );

        assert_eq!(iter.total(), 3);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let log = sample_log();
        let timestamps: Vec<_> = log.iter_snapshot().map(|e| e.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }
}
