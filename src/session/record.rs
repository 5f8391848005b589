use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::utils;

/// The terminal artifact of one completed handshake.
///
/// Holds the direction-separated traffic keys both sides derived. The
/// record references no long-term keypair; only derived material survives
/// the handshake. Key fields are zeroed on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionRecord {
    #[zeroize(skip)]
    pub session_id: [u8; 16],
    pub shared_secret: Vec<u8>,
    pub client_write_key: [u8; 32],
    pub server_write_key: [u8; 32],
    pub client_write_iv: [u8; 12],
    pub server_write_iv: [u8; 12],
    #[zeroize(skip)]
    pub established_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub peer_identity: Option<String>,
}

impl SessionRecord {
    /// Lowercase hex form of the session id
    pub fn session_id_hex(&self) -> String {
        utils::to_hex(&self.session_id)
    }

    /// Whether the session is past its expiry
    pub fn expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// The metadata view, with no key material
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            session_id: self.session_id_hex(),
            established_at: self.established_at,
            expires_at: self.expires_at,
            peer_identity: self.peer_identity.clone(),
        }
    }
}

// Key material must not leak through Debug output.
impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_id", &self.session_id_hex())
            .field("established_at", &self.established_at)
            .field("expires_at", &self.expires_at)
            .field("peer_identity", &self.peer_identity)
            .finish_non_exhaustive()
    }
}

/// What a status endpoint may safely expose about a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMetadata {
    pub session_id: String,
    pub established_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub peer_identity: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_record() -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: [7u8; 16],
            shared_secret: vec![1u8; 32],
            client_write_key: [2u8; 32],
            server_write_key: [3u8; 32],
            client_write_iv: [4u8; 12],
            server_write_iv: [5u8; 12],
            established_at: now,
            expires_at: now + Duration::hours(1),
            peer_identity: Some("client-17".to_string()),
        }
    }

    #[test]
    fn test_metadata_contains_no_key_material() {
        let record = sample_record();
        let metadata = record.metadata();
        let serialized = serde_json::to_string(&metadata).unwrap();

        assert_eq!(metadata.session_id, record.session_id_hex());
        assert!(!serialized.contains("shared_secret"));
        assert!(!serialized.contains("write_key"));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let record = sample_record();
        let debug = format!("{:?}", record);
        assert!(debug.contains(&record.session_id_hex()));
        assert!(!debug.contains("client_write_key"));
    }

    #[test]
    fn test_expiry() {
        let mut record = sample_record();
        assert!(!record.expired());
        record.expires_at = Utc::now() - Duration::seconds(1);
        assert!(record.expired());
    }
}
