//! Transport-facing service surface
//!
//! Wraps the handshake machinery behind request/response records whose
//! binary fields are canonical base64, suitable for a text transport.
//! Internal failure detail is logged locally and never crosses the wire:
//! every error collapses to one of the two [`PublicOutcome`] values, so a
//! probing peer cannot learn which check failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{error, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::{ChannelResult, PublicOutcome};
use crate::handshake::{
    ClientCertificate, ClientHello, ClientKeyExchange, HandshakeServer, ServerFinished,
};
use crate::key_manager::KeyManager;
use crate::session::{SessionMetadata, SessionStore};
use crate::utils;

/// First round trip: the client's opening message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloRequest {
    pub client_random: String,
    pub kem_preferences: Vec<u16>,
    pub sig_preferences: Vec<u16>,
    pub client_ephemeral_id: String,
}

/// First round trip: the server's signed answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    /// Correlates the follow-up key exchange with this exchange
    pub exchange_id: String,
    pub server_random: String,
    pub selected_kem: u16,
    pub selected_sig: u16,
    pub kem_key_id: String,
    pub kem_public: String,
    pub sig_public: String,
    pub classical_public: Option<String>,
    pub signature: String,
}

/// Optional client credential in transport form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateDto {
    pub identity: String,
    pub sig_algorithm: u16,
    pub sig_public: String,
    pub signature: String,
}

/// Second round trip: the client's key share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeRequest {
    pub exchange_id: String,
    pub kem_ciphertext: String,
    pub classical_ephemeral: Option<String>,
    pub client_certificate: Option<CertificateDto>,
}

/// Second round trip: the finished MAC closing the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeResponse {
    pub verify_data: String,
}

/// Health summary of the key material and session store; no secrets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysHealth {
    pub kem_algorithm: String,
    pub sig_algorithm: String,
    pub hybrid_mode: bool,
    pub keys_installed: bool,
    pub kem_rotation_due: bool,
    pub active_sessions: usize,
}

/// Service entry point wiring the key manager, the session store and the
/// per-attempt handshake instances together.
pub struct ChannelService {
    config: ChannelConfig,
    key_manager: Arc<KeyManager>,
    store: Arc<dyn SessionStore>,
    pending: Mutex<HashMap<String, (HandshakeServer, Instant)>>,
}

impl ChannelService {
    pub fn new(
        config: ChannelConfig,
        key_manager: Arc<KeyManager>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            config,
            key_manager,
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Handle the opening handshake message.
    ///
    /// Spawns one handshake instance for this attempt and parks it until
    /// the matching key exchange arrives.
    pub fn handshake_hello(&self, request: &HelloRequest) -> Result<HelloResponse, PublicOutcome> {
        self.prune_expired();

        let result = self.try_hello(request);
        result.map_err(|e| collapse("handshake_hello", e))
    }

    /// Handle the follow-up key exchange for a parked attempt
    pub fn handshake_key_exchange(
        &self,
        request: &KeyExchangeRequest,
    ) -> Result<KeyExchangeResponse, PublicOutcome> {
        self.prune_expired();

        let parked = {
            let mut pending = self.lock_pending();
            pending.remove(&request.exchange_id)
        };
        let (mut server, _) = match parked {
            Some(parked) => parked,
            None => {
                warn!("key exchange for unknown attempt {}", request.exchange_id);
                return Err(PublicOutcome::HandshakeFailed);
            }
        };

        let result = self.try_key_exchange(&mut server, request);
        result.map_err(|e| collapse("handshake_key_exchange", e))
    }

    /// Session metadata for status and debugging; never key material
    pub fn session_metadata(&self, session_id_hex: &str) -> Option<SessionMetadata> {
        let session_id = decode_session_id(session_id_hex)?;
        match self.store.get(&session_id) {
            Ok(record) => record.map(|r| r.metadata()),
            Err(e) => {
                error!("session store lookup failed: {}", e);
                None
            }
        }
    }

    /// Check that a session is live and the caller holds its keys.
    ///
    /// The proof is a keyed MAC over the session id under the client
    /// write key. Fails closed: any decode failure, missing session or
    /// expired record yields false.
    pub fn session_verify(&self, session_id_hex: &str, proof_base64: &str) -> bool {
        let session_id = match decode_session_id(session_id_hex) {
            Some(session_id) => session_id,
            None => return false,
        };
        let proof = match utils::decode_base64_strict(proof_base64) {
            Ok(proof) => proof,
            Err(_) => return false,
        };
        let record = match self.store.get(&session_id) {
            Ok(Some(record)) => record,
            _ => return false,
        };
        if record.expired() {
            return false;
        }
        let expected = blake3::keyed_hash(&record.client_write_key, &session_id);
        utils::constant_time_eq(expected.as_bytes(), &proof)
    }

    /// Current algorithm selection, key state and store statistics
    pub fn keys_health(&self) -> KeysHealth {
        let active_sessions = match self.store.count() {
            Ok(count) => count,
            Err(e) => {
                error!("session store count failed: {}", e);
                0
            }
        };
        KeysHealth {
            kem_algorithm: self.key_manager.kem_algorithm().to_string(),
            sig_algorithm: self.key_manager.sig_algorithm().to_string(),
            hybrid_mode: self.config.hybrid_mode,
            keys_installed: self.key_manager.keys_installed(),
            kem_rotation_due: self.key_manager.kem_rotation_due(),
            active_sessions,
        }
    }

    fn try_hello(&self, request: &HelloRequest) -> ChannelResult<HelloResponse> {
        let client_random = decode_array_32(&request.client_random)?;
        let hello = ClientHello {
            client_random,
            kem_preferences: request.kem_preferences.clone(),
            sig_preferences: request.sig_preferences.clone(),
            client_ephemeral_id: request.client_ephemeral_id.clone(),
        };

        let mut server = HandshakeServer::new(
            self.key_manager.clone(),
            self.store.clone(),
            vec![self.key_manager.kem_algorithm()],
            vec![self.key_manager.sig_algorithm()],
            self.config.hybrid_mode,
            self.config.handshake_timeout,
            self.config.session_ttl_secs,
        );
        let response = server.handle_client_hello(&hello)?;

        let exchange_id = Uuid::new_v4().to_string();
        {
            let mut pending = self.lock_pending();
            pending.insert(exchange_id.clone(), (server, Instant::now()));
        }

        Ok(HelloResponse {
            exchange_id,
            server_random: utils::encode_base64(&response.server_random),
            selected_kem: response.selected_kem,
            selected_sig: response.selected_sig,
            kem_key_id: response.kem_key_id,
            kem_public: utils::encode_base64(&response.kem_public),
            sig_public: utils::encode_base64(&response.sig_public),
            classical_public: response
                .classical_public
                .map(|share| utils::encode_base64(&share)),
            signature: utils::encode_base64(&response.signature),
        })
    }

    fn try_key_exchange(
        &self,
        server: &mut HandshakeServer,
        request: &KeyExchangeRequest,
    ) -> ChannelResult<KeyExchangeResponse> {
        let classical_ephemeral = match &request.classical_ephemeral {
            Some(encoded) => Some(decode_array_32(encoded)?),
            None => None,
        };
        let client_certificate = match &request.client_certificate {
            Some(dto) => Some(ClientCertificate {
                identity: dto.identity.clone(),
                sig_algorithm: dto.sig_algorithm,
                sig_public: utils::decode_base64_strict(&dto.sig_public)?,
                signature: utils::decode_base64_strict(&dto.signature)?,
            }),
            None => None,
        };
        let key_exchange = ClientKeyExchange {
            kem_ciphertext: utils::decode_base64_strict(&request.kem_ciphertext)?,
            classical_ephemeral,
            client_certificate,
        };

        let ServerFinished { verify_data } = server.handle_client_key_exchange(&key_exchange)?;
        Ok(KeyExchangeResponse {
            verify_data: utils::encode_base64(&verify_data),
        })
    }

    /// Drop parked attempts whose handshake timeout has passed
    fn prune_expired(&self) {
        let timeout = self.config.handshake_timeout;
        let mut pending = self.lock_pending();
        pending.retain(|_, (server, parked_at)| {
            if parked_at.elapsed() < timeout {
                return true;
            }
            server.cancel();
            false
        });
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, (HandshakeServer, Instant)>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ChannelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Log the internal detail, return only the public outcome
fn collapse(operation: &str, err: crate::error::ChannelError) -> PublicOutcome {
    let outcome = err.public_outcome();
    error!("{} failed: {} (outcome {:?})", operation, err, outcome);
    outcome
}

fn decode_array_32(encoded: &str) -> ChannelResult<[u8; 32]> {
    let bytes = utils::decode_base64_strict(encoded)?;
    let mut array = [0u8; 32];
    if bytes.len() != 32 {
        return Err(crate::error::ChannelError::SerializationError(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    array.copy_from_slice(&bytes);
    Ok(array)
}

fn decode_session_id(session_id_hex: &str) -> Option<[u8; 16]> {
    let bytes = utils::from_hex(session_id_hex).ok()?;
    if bytes.len() != 16 {
        return None;
    }
    let mut session_id = [0u8; 16];
    session_id.copy_from_slice(&bytes);
    Some(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kem::KemAlgorithm;
    use crate::session::MemorySessionStore;
    use crate::sig::SigAlgorithm;

    fn test_service() -> ChannelService {
        let config = ChannelConfig {
            kem_algorithm: KemAlgorithm::MlKem512,
            sig_algorithm: SigAlgorithm::MlDsa44,
            backup_dir: None,
            ..ChannelConfig::default()
        };
        let manager = KeyManager::new(
            config.kem_algorithm,
            config.sig_algorithm,
            config.rotation_interval_days,
            config.key_validity_days,
            None,
        );
        manager.generate_kem_keypair().unwrap();
        manager.generate_sig_keypair().unwrap();
        ChannelService::new(config, Arc::new(manager), Arc::new(MemorySessionStore::new()))
    }

    fn hello_request() -> HelloRequest {
        HelloRequest {
            client_random: utils::encode_base64(&[5u8; 32]),
            kem_preferences: vec![KemAlgorithm::MlKem512.wire_code()],
            sig_preferences: vec![SigAlgorithm::MlDsa44.wire_code()],
            client_ephemeral_id: "attempt-1".to_string(),
        }
    }

    #[test]
    fn test_hello_round_trip_over_base64() {
        let service = test_service();
        let response = service.handshake_hello(&hello_request()).unwrap();

        assert!(!response.exchange_id.is_empty());
        let server_random = utils::decode_base64_strict(&response.server_random).unwrap();
        assert_eq!(server_random.len(), 32);
        let kem_public = utils::decode_base64_strict(&response.kem_public).unwrap();
        assert_eq!(kem_public.len(), KemAlgorithm::MlKem512.public_key_size());
    }

    #[test]
    fn test_non_canonical_base64_is_rejected() {
        let service = test_service();
        let mut request = hello_request();
        // "QR==" decodes but does not re-encode to itself.
        request.client_random = "QR==".to_string();
        let err = service.handshake_hello(&request).unwrap_err();
        assert_eq!(err, PublicOutcome::HandshakeFailed);
    }

    #[test]
    fn test_failure_detail_never_crosses_the_boundary() {
        let service = test_service();
        // No common algorithm and a bad random produce the same outcome.
        let no_overlap = HelloRequest {
            kem_preferences: vec![KemAlgorithm::MlKem1024.wire_code()],
            ..hello_request()
        };
        let a = service.handshake_hello(&no_overlap).unwrap_err();
        let bad_random = HelloRequest {
            client_random: "!!!".to_string(),
            ..hello_request()
        };
        let b = service.handshake_hello(&bad_random).unwrap_err();
        assert_eq!(a, PublicOutcome::HandshakeFailed);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_exchange_id_fails_generically() {
        let service = test_service();
        let err = service
            .handshake_key_exchange(&KeyExchangeRequest {
                exchange_id: "no-such-attempt".to_string(),
                kem_ciphertext: utils::encode_base64(&[0u8; 768]),
                classical_ephemeral: None,
                client_certificate: None,
            })
            .unwrap_err();
        assert_eq!(err, PublicOutcome::HandshakeFailed);
    }

    #[test]
    fn test_session_endpoints_fail_closed() {
        let service = test_service();
        assert!(service.session_metadata("not hex").is_none());
        assert!(service.session_metadata("00112233445566778899aabbccddeeff").is_none());
        assert!(!service.session_verify("not hex", "AAAA"));
        assert!(!service.session_verify(
            "00112233445566778899aabbccddeeff",
            &utils::encode_base64(&[0u8; 32])
        ));
    }

    #[test]
    fn test_keys_health_reports_state() {
        let service = test_service();
        let health = service.keys_health();
        assert_eq!(health.kem_algorithm, "ML-KEM-512");
        assert_eq!(health.sig_algorithm, "ML-DSA-44");
        assert!(health.keys_installed);
        assert!(!health.kem_rotation_due);
        assert_eq!(health.active_sessions, 0);
    }
}
