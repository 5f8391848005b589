//! Client side of the handshake

use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, warn};

use crate::error::{error_codes, ChannelError, ChannelResult};
use crate::handshake::derive::{derive_session_keys, finished_mac, SessionKeys};
use crate::handshake::messages::{
    ClientCertificate, ClientHello, ClientKeyExchange, MessageType, ServerFinished, ServerHello,
};
use crate::handshake::transcript::Transcript;
use crate::handshake::HandshakeState;
use crate::kem::{HybridKemPublicKey, KemAlgorithm, KemPublicKey};
use crate::secure_memory::SecureBytes;
use crate::session::SessionRecord;
use crate::sig::{SigAlgorithm, SigKeyPair, SigPublicKey};
use crate::utils;

/// Client credential for mutual authentication
#[derive(Debug)]
pub struct ClientCredential {
    pub identity: String,
    pub keypair: SigKeyPair,
}

/// Drives one handshake attempt from the initiating side.
///
/// Single use: after reaching a terminal state every further call fails
/// with a protocol error. Ephemeral secrets are zeroed on failure,
/// cancellation and drop.
pub struct HandshakeClient {
    state: HandshakeState,
    kem_preferences: Vec<KemAlgorithm>,
    sig_preferences: Vec<SigAlgorithm>,
    hybrid: bool,
    deadline: Instant,
    session_ttl: chrono::Duration,
    credential: Option<ClientCredential>,
    client_random: [u8; 32],
    server_random: Option<[u8; 32]>,
    transcript: Transcript,
    shared_secret: Option<SecureBytes>,
}

impl HandshakeClient {
    /// Set up a client attempt with ordered algorithm preferences.
    ///
    /// The timeout bounds the whole attempt from construction; exceeding
    /// it fails the handshake at the next message boundary.
    pub fn new(
        kem_preferences: Vec<KemAlgorithm>,
        sig_preferences: Vec<SigAlgorithm>,
        hybrid: bool,
        timeout: Duration,
        session_ttl_secs: i64,
    ) -> Self {
        Self {
            state: HandshakeState::Start,
            kem_preferences,
            sig_preferences,
            hybrid,
            deadline: Instant::now() + timeout,
            session_ttl: chrono::Duration::seconds(session_ttl_secs),
            credential: None,
            client_random: [0u8; 32],
            server_random: None,
            transcript: Transcript::new(),
            shared_secret: None,
        }
    }

    /// Attach a credential so the server can authenticate this client
    pub fn with_credential(mut self, credential: ClientCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Produce the opening ClientHello
    pub fn start(&mut self) -> ChannelResult<ClientHello> {
        self.expect_state(HandshakeState::Start)?;
        self.check_deadline()?;

        self.client_random = match utils::random_array_32() {
            Ok(random) => random,
            Err(e) => return Err(self.fail(e)),
        };
        let hello = ClientHello::new(
            self.client_random,
            &self.kem_preferences,
            &self.sig_preferences,
        );
        let serialized = hello.to_bytes().map_err(|e| self.fail(e))?;
        self.transcript.append(MessageType::ClientHello, &serialized);
        self.state = HandshakeState::HelloSent;
        debug!("client hello sent, {} kem preferences", hello.kem_preferences.len());
        Ok(hello)
    }

    /// Verify the server's response and produce the key exchange.
    ///
    /// Aborts with `ServerAuthenticationFailed` on a bad signature and
    /// with a protocol error if the server selected an algorithm this
    /// client never offered.
    pub fn handle_server_hello(&mut self, hello: &ServerHello) -> ChannelResult<ClientKeyExchange> {
        self.expect_state(HandshakeState::HelloSent)?;
        self.check_deadline()?;

        let selected_kem = hello.selected_kem_algorithm().map_err(|e| self.fail(e))?;
        let selected_sig = hello.selected_sig_algorithm().map_err(|e| self.fail(e))?;

        if !self.kem_preferences.contains(&selected_kem)
            || !self.sig_preferences.contains(&selected_sig)
        {
            return Err(self.fail(ChannelError::protocol(
                "server_hello",
                "server selected an algorithm the client never offered",
                error_codes::HANDSHAKE_STATE_INVALID,
            )));
        }
        if self.hybrid != hello.classical_public.is_some() {
            return Err(self.fail(ChannelError::protocol(
                "server_hello",
                "hybrid mode mismatch between client and server",
                error_codes::HANDSHAKE_STATE_INVALID,
            )));
        }

        let server_sig_key = SigPublicKey {
            public_key: hello.sig_public.clone(),
            algorithm: selected_sig,
        };
        let signing_input = hello.signing_input(&self.client_random);
        if !server_sig_key.verify(&signing_input, &hello.signature) {
            return Err(self.fail(ChannelError::server_auth_failed("server_hello")));
        }

        let serialized = hello.to_bytes().map_err(|e| self.fail(e))?;
        self.transcript.append(MessageType::ServerHello, &serialized);
        self.server_random = Some(hello.server_random);

        let kem_public = KemPublicKey {
            public_key: hello.kem_public.clone(),
            algorithm: selected_kem,
        };
        let (kem_ciphertext, classical_ephemeral, shared_secret) = match hello.classical_public {
            Some(classical_public) => {
                let hybrid_key = HybridKemPublicKey {
                    kem_public,
                    classical_public,
                };
                let (ciphertext, secret) = hybrid_key.encapsulate().map_err(|e| self.fail(e))?;
                (
                    ciphertext.kem_ciphertext,
                    Some(ciphertext.classical_ephemeral),
                    secret,
                )
            }
            None => {
                let (ciphertext, secret) = kem_public.encapsulate().map_err(|e| self.fail(e))?;
                (ciphertext, None, secret)
            }
        };

        let mut key_exchange = ClientKeyExchange {
            kem_ciphertext,
            classical_ephemeral,
            client_certificate: None,
        };
        if let Some(credential) = &self.credential {
            let input =
                key_exchange.client_signing_input(&self.client_random, &hello.server_random);
            let certificate = credential.keypair.sign(&input).map(|signature| ClientCertificate {
                identity: credential.identity.clone(),
                sig_algorithm: credential.keypair.algorithm.wire_code(),
                sig_public: credential.keypair.public_key.clone(),
                signature,
            });
            key_exchange.client_certificate = Some(certificate.map_err(|e| self.fail(e))?);
        }

        let serialized = key_exchange.to_bytes().map_err(|e| self.fail(e))?;
        self.transcript
            .append(MessageType::ClientKeyExchange, &serialized);
        self.shared_secret = Some(shared_secret);
        self.state = HandshakeState::KeyExchangeSent;
        debug!("key exchange sent with {}", selected_kem);
        Ok(key_exchange)
    }

    /// Verify the server's finished MAC and produce the session record.
    ///
    /// A mismatch means the two sides disagree on the transcript or the
    /// shared secret; nothing is returned and no session exists.
    pub fn handle_server_finished(
        &mut self,
        finished: &ServerFinished,
    ) -> ChannelResult<SessionRecord> {
        self.expect_state(HandshakeState::KeyExchangeSent)?;
        self.check_deadline()?;

        let transcript_hash = self.transcript.current_hash();
        let shared_secret = match self.shared_secret.take() {
            Some(secret) => secret,
            None => {
                return Err(self.fail(ChannelError::protocol(
                    "server_finished",
                    "no shared secret held",
                    error_codes::HANDSHAKE_STATE_INVALID,
                )))
            }
        };
        let keys = derive_session_keys(shared_secret.as_bytes(), &transcript_hash);

        let expected = finished_mac(&keys.finished_key, &transcript_hash);
        if !utils::constant_time_eq(&expected, &finished.verify_data) {
            return Err(self.fail(ChannelError::integrity("server_finished")));
        }

        let record = build_record(&keys, shared_secret, self.session_ttl, None);
        self.state = HandshakeState::Established;
        debug!("handshake established, session {}", record.session_id_hex());
        Ok(record)
    }

    /// Abort the attempt, zeroing all ephemeral secret material
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            warn!("handshake cancelled at {}", self.state);
            self.discard_ephemeral();
            self.state = HandshakeState::Failed;
        }
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
        warn!("client handshake failed at {}: {}", self.state, err);
        self.discard_ephemeral();
        self.state = HandshakeState::Failed;
        err
    }

    fn discard_ephemeral(&mut self) {
        // SecureBytes zeroes on drop.
        self.shared_secret = None;
    }
}

impl Drop for HandshakeClient {
    fn drop(&mut self) {
        self.discard_ephemeral();
    }
}

/// Assemble the session record both sides agree on
pub(crate) fn build_record(
    keys: &SessionKeys,
    shared_secret: SecureBytes,
    session_ttl: chrono::Duration,
    peer_identity: Option<String>,
) -> SessionRecord {
    let established_at = Utc::now();
    SessionRecord {
        session_id: keys.session_id,
        shared_secret: shared_secret.as_bytes().to_vec(),
        client_write_key: keys.client_write_key,
        server_write_key: keys.server_write_key,
        client_write_iv: keys.client_write_iv,
        server_write_iv: keys.server_write_iv,
        established_at,
        expires_at: established_at + session_ttl,
        peer_identity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> HandshakeClient {
        HandshakeClient::new(
            vec![KemAlgorithm::MlKem512],
            vec![SigAlgorithm::MlDsa44],
            false,
            Duration::from_secs(30),
            3600,
        )
    }

    #[test]
    fn test_start_transitions_to_hello_sent() {
        let mut client = test_client();
        assert_eq!(client.state(), HandshakeState::Start);
        let hello = client.start().unwrap();
        assert_eq!(client.state(), HandshakeState::HelloSent);
        assert_ne!(hello.client_random, [0u8; 32]);
    }

    #[test]
    fn test_start_twice_fails() {
        let mut client = test_client();
        client.start().unwrap();
        let err = client.start().unwrap_err();
        assert_eq!(err.error_code(), error_codes::HANDSHAKE_STATE_INVALID);
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_zero_timeout_fails_immediately() {
        let mut client = HandshakeClient::new(
            vec![KemAlgorithm::MlKem512],
            vec![SigAlgorithm::MlDsa44],
            false,
            Duration::ZERO,
            3600,
        );
        let err = client.start().unwrap_err();
        assert_eq!(err.error_type(), "HandshakeTimeout");
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_cancel_reaches_failed() {
        let mut client = test_client();
        client.start().unwrap();
        client.cancel();
        assert_eq!(client.state(), HandshakeState::Failed);
        assert!(client.shared_secret.is_none());
    }

    #[test]
    fn test_unsolicited_finished_is_rejected() {
        let mut client = test_client();
        client.start().unwrap();
        let err = client
            .handle_server_finished(&ServerFinished {
                verify_data: [0u8; 32],
            })
            .unwrap_err();
        assert_eq!(err.error_code(), error_codes::HANDSHAKE_STATE_INVALID);
    }
}
