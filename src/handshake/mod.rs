/*!
 * Four-message channel establishment
 *
 * One [`HandshakeClient`] or [`HandshakeServer`] instance drives exactly
 * one handshake attempt start to finish and is never reused. Concurrency
 * comes from running instances in parallel; the only shared state they
 * touch is the key manager and the session store, both of which carry
 * their own synchronization.
 *
 * Message flow: ClientHello, ServerHello, ClientKeyExchange,
 * ServerFinished. The server authenticates itself by signing over both
 * randoms and its advertised keys; integrity of the whole exchange is
 * sealed by a MAC over the transcript under a derived finished key.
 */

mod client;
mod derive;
mod messages;
mod server;
mod transcript;

pub use client::{ClientCredential, HandshakeClient};
pub use derive::{derive_session_keys, SessionKeys};
pub use messages::{
    ClientCertificate, ClientHello, ClientKeyExchange, MessageType, ServerFinished, ServerHello,
};
pub use server::{negotiate, HandshakeServer};
pub use transcript::Transcript;

/// Where one handshake attempt currently stands.
///
/// `Established` is the success terminal; `Failed` is reachable from every
/// intermediate state on verification failure, timeout or cancellation.
/// `Closed` and `Expired` apply only after establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    HelloSent,
    HelloReceived,
    KeyExchangeSent,
    KeyExchangeReceived,
    Established,
    Failed,
    Closed,
    Expired,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakeState::Established
                | HandshakeState::Failed
                | HandshakeState::Closed
                | HandshakeState::Expired
        )
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandshakeState::Start => "START",
            HandshakeState::HelloSent => "HELLO_SENT",
            HandshakeState::HelloReceived => "HELLO_RECEIVED",
            HandshakeState::KeyExchangeSent => "KEY_EXCHANGE_SENT",
            HandshakeState::KeyExchangeReceived => "KEY_EXCHANGE_RECEIVED",
            HandshakeState::Established => "ESTABLISHED",
            HandshakeState::Failed => "FAILED",
            HandshakeState::Closed => "CLOSED",
            HandshakeState::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}
