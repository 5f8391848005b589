//! Wire-level handshake messages
//!
//! Every message is a structured record with explicit length-prefixed
//! byte fields. Algorithm identifiers travel as fixed-width u16 codes so
//! a downgrade cannot be smuggled through string confusion.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChannelError, ChannelResult};
use crate::kem::KemAlgorithm;
use crate::sig::SigAlgorithm;

/// Message type tags, bound into the transcript alongside each message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ClientHello = 0x01,
    ServerHello = 0x02,
    ClientKeyExchange = 0x03,
    ServerFinished = 0x04,
}

/// Opening message: fresh client randomness plus ordered algorithm
/// preference lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientHello {
    pub client_random: [u8; 32],
    /// KEM wire codes, most preferred first
    pub kem_preferences: Vec<u16>,
    /// Signature wire codes, most preferred first
    pub sig_preferences: Vec<u16>,
    /// Opaque correlation id, alive only for this handshake attempt
    pub client_ephemeral_id: String,
}

impl ClientHello {
    pub fn new(
        client_random: [u8; 32],
        kem_preferences: &[KemAlgorithm],
        sig_preferences: &[SigAlgorithm],
    ) -> Self {
        Self {
            client_random,
            kem_preferences: kem_preferences.iter().map(|a| a.wire_code()).collect(),
            sig_preferences: sig_preferences.iter().map(|a| a.wire_code()).collect(),
            client_ephemeral_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Server response: selected algorithm pair, current public keys and a
/// signature binding them to both randoms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerHello {
    pub server_random: [u8; 32],
    pub selected_kem: u16,
    pub selected_sig: u16,
    /// Id of the KEM key generation the server will decapsulate with
    pub kem_key_id: String,
    pub kem_public: Vec<u8>,
    pub sig_public: Vec<u8>,
    /// Present when the server runs in hybrid mode
    pub classical_public: Option<[u8; 32]>,
    pub signature: Vec<u8>,
}

impl ServerHello {
    /// The exact bytes the server signature covers.
    ///
    /// Binds both randoms, the selected algorithm codes and the public
    /// keys (classical share included), each variable field prefixed with
    /// its big-endian length.
    pub fn signing_input(&self, client_random: &[u8; 32]) -> Vec<u8> {
        let mut input = Vec::with_capacity(
            96 + self.kem_public.len() + self.sig_public.len() + self.kem_key_id.len(),
        );
        input.extend_from_slice(client_random);
        input.extend_from_slice(&self.server_random);
        input.extend_from_slice(&self.selected_kem.to_be_bytes());
        input.extend_from_slice(&self.selected_sig.to_be_bytes());
        push_prefixed(&mut input, self.kem_key_id.as_bytes());
        push_prefixed(&mut input, &self.kem_public);
        push_prefixed(&mut input, &self.sig_public);
        match &self.classical_public {
            Some(classical) => push_prefixed(&mut input, classical),
            None => push_prefixed(&mut input, &[]),
        }
        input
    }

    pub fn selected_kem_algorithm(&self) -> ChannelResult<KemAlgorithm> {
        KemAlgorithm::from_wire_code(self.selected_kem)
    }

    pub fn selected_sig_algorithm(&self) -> ChannelResult<SigAlgorithm> {
        SigAlgorithm::from_wire_code(self.selected_sig)
    }
}

/// Optional client credential for mutual authentication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCertificate {
    pub identity: String,
    pub sig_algorithm: u16,
    pub sig_public: Vec<u8>,
    /// Signature over the key-exchange signing input
    pub signature: Vec<u8>,
}

/// Client key share: the KEM ciphertext, the optional classical ephemeral
/// share and the optional client credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub kem_ciphertext: Vec<u8>,
    /// Present when both sides run in hybrid mode
    pub classical_ephemeral: Option<[u8; 32]>,
    pub client_certificate: Option<ClientCertificate>,
}

impl ClientKeyExchange {
    /// The exact bytes a client certificate signature covers
    pub fn client_signing_input(
        &self,
        client_random: &[u8; 32],
        server_random: &[u8; 32],
    ) -> Vec<u8> {
        let mut input = Vec::with_capacity(96 + self.kem_ciphertext.len());
        input.extend_from_slice(client_random);
        input.extend_from_slice(server_random);
        push_prefixed(&mut input, &self.kem_ciphertext);
        match &self.classical_ephemeral {
            Some(classical) => push_prefixed(&mut input, classical),
            None => push_prefixed(&mut input, &[]),
        }
        input
    }
}

/// Closing MAC over the full transcript under the derived finished key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerFinished {
    pub verify_data: [u8; 32],
}

fn push_prefixed(buffer: &mut Vec<u8>, field: &[u8]) {
    buffer.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buffer.extend_from_slice(field);
}

macro_rules! wire_codec {
    ($($message:ty),+) => {
        $(
            impl $message {
                /// Serialize for transport
                pub fn to_bytes(&self) -> ChannelResult<Vec<u8>> {
                    bincode::serialize(self)
                        .map_err(|e| ChannelError::SerializationError(e.to_string()))
                }

                /// Deserialize from transport bytes
                pub fn from_bytes(bytes: &[u8]) -> ChannelResult<Self> {
                    bincode::deserialize(bytes)
                        .map_err(|e| ChannelError::SerializationError(e.to_string()))
                }
            }
        )+
    };
}

wire_codec!(ClientHello, ServerHello, ClientKeyExchange, ServerFinished);
