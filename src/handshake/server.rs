//! Server side of the handshake

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::{error_codes, ChannelError, ChannelResult};
use crate::handshake::client::build_record;
use crate::handshake::derive::{derive_session_keys, finished_mac};
use crate::handshake::messages::{
    ClientHello, ClientKeyExchange, MessageType, ServerFinished, ServerHello,
};
use crate::handshake::transcript::Transcript;
use crate::handshake::HandshakeState;
use crate::kem::{HybridCiphertext, HybridKemKeyPair, KemAlgorithm};
use crate::key_manager::KeyManager;
use crate::session::SessionStore;
use crate::sig::{SigAlgorithm, SigPublicKey};
use crate::utils;

/// Drives one handshake attempt on the responding side.
///
/// Single use, one instance per incoming attempt. The key manager and the
/// session store are the only shared state; both are internally
/// synchronized.
pub struct HandshakeServer {
    state: HandshakeState,
    key_manager: Arc<KeyManager>,
    store: Arc<dyn SessionStore>,
    kem_supported: Vec<KemAlgorithm>,
    sig_supported: Vec<SigAlgorithm>,
    hybrid: bool,
    require_client_auth: bool,
    deadline: Instant,
    session_ttl: chrono::Duration,
    client_random: Option<[u8; 32]>,
    server_random: Option<[u8; 32]>,
    transcript: Transcript,
    kem_key_id: Option<String>,
    classical_secret: Option<StaticSecret>,
    session_id: Option<[u8; 16]>,
}

/// Pick the first server-preferred algorithm the client also offered.
///
/// Server preference order wins ties by construction.
pub fn negotiate<A: Copy + PartialEq>(
    server_preferences: &[A],
    client_codes: &[u16],
    wire_code: impl Fn(A) -> u16,
) -> Option<A> {
    server_preferences
        .iter()
        .copied()
        .find(|candidate| client_codes.contains(&wire_code(*candidate)))
}

impl HandshakeServer {
    pub fn new(
        key_manager: Arc<KeyManager>,
        store: Arc<dyn SessionStore>,
        kem_supported: Vec<KemAlgorithm>,
        sig_supported: Vec<SigAlgorithm>,
        hybrid: bool,
        timeout: Duration,
        session_ttl_secs: i64,
    ) -> Self {
        Self {
            state: HandshakeState::Start,
            key_manager,
            store,
            kem_supported,
            sig_supported,
            hybrid,
            require_client_auth: false,
            deadline: Instant::now() + timeout,
            session_ttl: chrono::Duration::seconds(session_ttl_secs),
            client_random: None,
            server_random: None,
            transcript: Transcript::new(),
            kem_key_id: None,
            classical_secret: None,
            session_id: None,
        }
    }

    /// Demand a verified client certificate in the key exchange
    pub fn require_client_auth(mut self) -> Self {
        self.require_client_auth = true;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Session id of the established session, once there is one
    pub fn session_id(&self) -> Option<[u8; 16]> {
        self.session_id
    }

    /// Negotiate algorithms and answer with a signed ServerHello.
    ///
    /// Fails with `NoCommonAlgorithm` when the preference lists do not
    /// overlap for either primitive.
    pub fn handle_client_hello(&mut self, hello: &ClientHello) -> ChannelResult<ServerHello> {
        self.expect_state(HandshakeState::Start)?;
        self.check_deadline()?;

        let selected_kem = match negotiate(&self.kem_supported, &hello.kem_preferences, |a| {
            a.wire_code()
        }) {
            Some(algorithm) => algorithm,
            None => {
                return Err(self.fail(ChannelError::NoCommonAlgorithm {
                    detail: "no mutually supported kem algorithm".to_string(),
                    error_code: error_codes::HANDSHAKE_NO_COMMON_ALGORITHM,
                }))
            }
        };
        let selected_sig = match negotiate(&self.sig_supported, &hello.sig_preferences, |a| {
            a.wire_code()
        }) {
            Some(algorithm) => algorithm,
            None => {
                return Err(self.fail(ChannelError::NoCommonAlgorithm {
                    detail: "no mutually supported signature algorithm".to_string(),
                    error_code: error_codes::HANDSHAKE_NO_COMMON_ALGORITHM,
                }))
            }
        };
        // Keys only exist for the manager's configured pair.
        if selected_kem != self.key_manager.kem_algorithm()
            || selected_sig != self.key_manager.sig_algorithm()
        {
            return Err(self.fail(ChannelError::NoCommonAlgorithm {
                detail: format!("no installed keys for {} / {}", selected_kem, selected_sig),
                error_code: error_codes::HANDSHAKE_NO_COMMON_ALGORITHM,
            }));
        }

        let export = match self.key_manager.export_public_keys() {
            Ok(export) => export,
            Err(e) => return Err(self.fail(e)),
        };
        let signing_key = match self.key_manager.current_sig() {
            Some(key) => key,
            None => {
                return Err(self.fail(ChannelError::protocol(
                    "client_hello",
                    "no current signature key installed",
                    error_codes::KEYS_NOT_INSTALLED,
                )))
            }
        };

        let serialized = hello.to_bytes().map_err(|e| self.fail(e))?;
        self.transcript.append(MessageType::ClientHello, &serialized);
        self.client_random = Some(hello.client_random);

        let server_random = match utils::random_array_32() {
            Ok(random) => random,
            Err(e) => return Err(self.fail(e)),
        };
        let classical_public = if self.hybrid {
            let mut seed = match utils::random_array_32() {
                Ok(seed) => seed,
                Err(e) => return Err(self.fail(e)),
            };
            let secret = StaticSecret::from(seed);
            seed.zeroize();
            let public = X25519PublicKey::from(&secret).to_bytes();
            self.classical_secret = Some(secret);
            Some(public)
        } else {
            None
        };

        let mut response = ServerHello {
            server_random,
            selected_kem: selected_kem.wire_code(),
            selected_sig: selected_sig.wire_code(),
            kem_key_id: export.kem_key_id.clone(),
            kem_public: export.kem_public.public_key,
            sig_public: export.sig_public.public_key,
            classical_public,
            signature: Vec::new(),
        };
        let signing_input = response.signing_input(&hello.client_random);
        response.signature = signing_key
            .keypair
            .sign(&signing_input)
            .map_err(|e| self.fail(e))?;

        let serialized = response.to_bytes().map_err(|e| self.fail(e))?;
        self.transcript.append(MessageType::ServerHello, &serialized);
        self.server_random = Some(server_random);
        self.kem_key_id = Some(export.kem_key_id);
        self.state = HandshakeState::HelloReceived;
        debug!(
            "negotiated {} / {} with key {} for attempt {}",
            selected_kem, selected_sig, response.kem_key_id, hello.client_ephemeral_id
        );
        Ok(response)
    }

    /// Decapsulate the client's share, persist the session and answer
    /// with the finished MAC.
    ///
    /// Decapsulation uses implicit rejection, so a garbage ciphertext
    /// still produces a response; the client's finished check is where
    /// the mismatch surfaces. The session record is stored before the
    /// finished message is handed back, never on any failure path.
    pub fn handle_client_key_exchange(
        &mut self,
        key_exchange: &ClientKeyExchange,
    ) -> ChannelResult<ServerFinished> {
        self.expect_state(HandshakeState::HelloReceived)?;
        self.check_deadline()?;

        let serialized = key_exchange.to_bytes().map_err(|e| self.fail(e))?;
        self.transcript
            .append(MessageType::ClientKeyExchange, &serialized);
        self.state = HandshakeState::KeyExchangeReceived;

        let key_id = match self.kem_key_id.clone() {
            Some(key_id) => key_id,
            None => {
                return Err(self.fail(ChannelError::protocol(
                    "client_key_exchange",
                    "no kem key id recorded",
                    error_codes::HANDSHAKE_STATE_INVALID,
                )))
            }
        };
        // The advertised generation may have rotated out of the current
        // slot meanwhile; the retiring grace window keeps it resolvable.
        let managed = match self.key_manager.decapsulation_key_for(&key_id) {
            Ok(managed) => managed,
            Err(e) => return Err(self.fail(e)),
        };

        let shared_secret = match (self.hybrid, self.classical_secret.take()) {
            (true, Some(classical_secret)) => {
                let classical_ephemeral = match key_exchange.classical_ephemeral {
                    Some(share) => share,
                    None => {
                        return Err(self.fail(ChannelError::protocol(
                            "client_key_exchange",
                            "hybrid handshake is missing the classical share",
                            error_codes::HANDSHAKE_STATE_INVALID,
                        )))
                    }
                };
                let hybrid_key =
                    HybridKemKeyPair::from_parts(managed.keypair.clone(), classical_secret);
                hybrid_key.decapsulate(&HybridCiphertext {
                    kem_ciphertext: key_exchange.kem_ciphertext.clone(),
                    classical_ephemeral,
                })
            }
            (false, _) => managed.keypair.decapsulate(&key_exchange.kem_ciphertext),
            (true, None) => {
                return Err(self.fail(ChannelError::protocol(
                    "client_key_exchange",
                    "classical secret already consumed",
                    error_codes::HANDSHAKE_STATE_INVALID,
                )))
            }
        };

        let peer_identity = match self.verify_client_certificate(key_exchange) {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail(e)),
        };

        let transcript_hash = self.transcript.current_hash();
        let keys = derive_session_keys(shared_secret.as_bytes(), &transcript_hash);
        let verify_data = finished_mac(&keys.finished_key, &transcript_hash);

        let record = build_record(&keys, shared_secret, self.session_ttl, peer_identity);
        let session_id = record.session_id;
        if let Err(e) = self.store.put(record) {
            return Err(self.fail(e));
        }

        self.session_id = Some(session_id);
        self.state = HandshakeState::Established;
        debug!(
            "handshake established, session {}",
            utils::to_hex(&session_id)
        );
        Ok(ServerFinished { verify_data })
    }

    /// Abort the attempt, zeroing all ephemeral secret material
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            warn!("handshake cancelled at {}", self.state);
            self.discard_ephemeral();
            self.state = HandshakeState::Failed;
        }
    }

    fn verify_client_certificate(
        &self,
        key_exchange: &ClientKeyExchange,
    ) -> ChannelResult<Option<String>> {
        let certificate = match &key_exchange.client_certificate {
            Some(certificate) => certificate,
            None if self.require_client_auth => {
                return Err(ChannelError::protocol(
                    "client_key_exchange",
                    "client certificate required but absent",
                    error_codes::HANDSHAKE_CLIENT_AUTH_FAILED,
                ))
            }
            None => return Ok(None),
        };

        let algorithm = SigAlgorithm::from_wire_code(certificate.sig_algorithm)?;
        let public_key = SigPublicKey {
            public_key: certificate.sig_public.clone(),
            algorithm,
        };
        let (client_random, server_random) = match (self.client_random, self.server_random) {
            (Some(client_random), Some(server_random)) => (client_random, server_random),
            _ => {
                return Err(ChannelError::protocol(
                    "client_key_exchange",
                    "randoms not recorded",
                    error_codes::HANDSHAKE_STATE_INVALID,
                ))
            }
        };
        let input = key_exchange.client_signing_input(&client_random, &server_random);
        if !public_key.verify(&input, &certificate.signature) {
            return Err(ChannelError::protocol(
                "client_key_exchange",
                "client certificate verification failed",
                error_codes::HANDSHAKE_CLIENT_AUTH_FAILED,
            ));
        }
        Ok(Some(certificate.identity.clone()))
    }

    fn expect_state(&mut self, expected: HandshakeState) -> ChannelResult<()> {
        if self.state == expected {
            return Ok(());
        }
        let detail = format!("expected {}, at {}", expected, self.state);
        Err(self.fail(ChannelError::protocol(
            "state_machine",
            &detail,
            error_codes::HANDSHAKE_STATE_INVALID,
        )))
    }

    fn check_deadline(&mut self) -> ChannelResult<()> {
        if Instant::now() < self.deadline {
            return Ok(());
        }
        let state = self.state.to_string();
        Err(self.fail(ChannelError::timeout(&state)))
    }

    fn fail(&mut self, err: ChannelError) -> ChannelError {
        warn!("server handshake failed at {}: {}", self.state, err);
        self.discard_ephemeral();
        self.state = HandshakeState::Failed;
        err
    }

    fn discard_ephemeral(&mut self) {
        // StaticSecret zeroes on drop.
        self.classical_secret = None;
    }
}

impl Drop for HandshakeServer {
    fn drop(&mut self) {
        self.discard_ephemeral();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;

    fn test_manager() -> Arc<KeyManager> {
        let manager = KeyManager::new(KemAlgorithm::MlKem512, SigAlgorithm::MlDsa44, 30, 37, None);
        manager.generate_kem_keypair().unwrap();
        manager.generate_sig_keypair().unwrap();
        Arc::new(manager)
    }

    fn test_server(manager: Arc<KeyManager>, store: Arc<MemorySessionStore>) -> HandshakeServer {
        HandshakeServer::new(
            manager,
            store,
            vec![KemAlgorithm::MlKem512],
            vec![SigAlgorithm::MlDsa44],
            false,
            Duration::from_secs(30),
            3600,
        )
    }

    #[test]
    fn test_server_preference_wins_ties() {
        let selected = negotiate(
            &[KemAlgorithm::MlKem1024, KemAlgorithm::MlKem768],
            &[
                KemAlgorithm::MlKem768.wire_code(),
                KemAlgorithm::MlKem1024.wire_code(),
            ],
            |a| a.wire_code(),
        );
        assert_eq!(selected, Some(KemAlgorithm::MlKem1024));
    }

    #[test]
    fn test_negotiation_picks_the_overlap() {
        // Client offers [512, 768], server prefers [768, 1024]: 768 wins.
        let selected = negotiate(
            &[KemAlgorithm::MlKem768, KemAlgorithm::MlKem1024],
            &[
                KemAlgorithm::MlKem512.wire_code(),
                KemAlgorithm::MlKem768.wire_code(),
            ],
            |a| a.wire_code(),
        );
        assert_eq!(selected, Some(KemAlgorithm::MlKem768));
    }

    #[test]
    fn test_no_overlap_yields_none() {
        let selected = negotiate(
            &[KemAlgorithm::MlKem1024],
            &[KemAlgorithm::MlKem512.wire_code()],
            |a| a.wire_code(),
        );
        assert_eq!(selected, None);
    }

    #[test]
    fn test_no_common_algorithm_fails_the_handshake() {
        let store = Arc::new(MemorySessionStore::new());
        let mut server = test_server(test_manager(), store.clone());

        let hello = ClientHello::new(
            [1u8; 32],
            &[KemAlgorithm::MlKem1024],
            &[SigAlgorithm::MlDsa44],
        );
        let err = server.handle_client_hello(&hello).unwrap_err();
        assert_eq!(err.error_type(), "NoCommonAlgorithm");
        assert_eq!(server.state(), HandshakeState::Failed);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_key_exchange_before_hello_is_rejected() {
        let store = Arc::new(MemorySessionStore::new());
        let mut server = test_server(test_manager(), store.clone());

        let err = server
            .handle_client_key_exchange(&ClientKeyExchange {
                kem_ciphertext: vec![0u8; 768],
                classical_ephemeral: None,
                client_certificate: None,
            })
            .unwrap_err();
        assert_eq!(err.error_code(), error_codes::HANDSHAKE_STATE_INVALID);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_server_hello_is_signed_over_both_randoms() {
        let manager = test_manager();
        let store = Arc::new(MemorySessionStore::new());
        let mut server = test_server(manager.clone(), store);

        let hello = ClientHello::new(
            [7u8; 32],
            &[KemAlgorithm::MlKem512],
            &[SigAlgorithm::MlDsa44],
        );
        let response = server.handle_client_hello(&hello).unwrap();

        let verifier = SigPublicKey {
            public_key: response.sig_public.clone(),
            algorithm: SigAlgorithm::MlDsa44,
        };
        let input = response.signing_input(&hello.client_random);
        assert!(verifier.verify(&input, &response.signature));
        // Binding to a different client random must break the signature.
        let other_input = response.signing_input(&[8u8; 32]);
        assert!(!verifier.verify(&other_input, &response.signature));
    }
}
