//! Per-session key schedule
//!
//! The raw shared secret is never used as a key. Every derived value comes
//! out of HKDF-SHA256 keyed on the shared secret and salted with the
//! transcript hash, under a distinct domain-separation label. Because the
//! transcript hash feeds the derivation, two handshakes can only collide
//! on any derived value with negligible probability.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

const LABEL_SESSION_ID: &[u8] = b"pqchannel v1 session id";
const LABEL_CLIENT_WRITE_KEY: &[u8] = b"pqchannel v1 client write key";
const LABEL_SERVER_WRITE_KEY: &[u8] = b"pqchannel v1 server write key";
const LABEL_CLIENT_WRITE_IV: &[u8] = b"pqchannel v1 client write iv";
const LABEL_SERVER_WRITE_IV: &[u8] = b"pqchannel v1 server write iv";
const LABEL_FINISHED_KEY: &[u8] = b"pqchannel v1 finished key";

/// Everything the key schedule produces for one session
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    #[zeroize(skip)]
    pub session_id: [u8; 16],
    pub client_write_key: [u8; 32],
    pub server_write_key: [u8; 32],
    pub client_write_iv: [u8; 12],
    pub server_write_iv: [u8; 12],
    pub finished_key: [u8; 32],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("session_id", &crate::utils::to_hex(&self.session_id))
            .finish_non_exhaustive()
    }
}

/// Run the key schedule for one completed key exchange
pub fn derive_session_keys(shared_secret: &[u8], transcript_hash: &[u8; 32]) -> SessionKeys {
    let hk = Hkdf::<Sha256>::new(Some(transcript_hash), shared_secret);

    let mut session_id = [0u8; 16];
    let mut client_write_key = [0u8; 32];
    let mut server_write_key = [0u8; 32];
    let mut client_write_iv = [0u8; 12];
    let mut server_write_iv = [0u8; 12];
    let mut finished_key = [0u8; 32];

    // Output lengths are all far below the HKDF-SHA256 limit of 8160
    // bytes, so expand cannot fail.
    hk.expand(LABEL_SESSION_ID, &mut session_id)
        .expect("valid HKDF-SHA256 output length");
    hk.expand(LABEL_CLIENT_WRITE_KEY, &mut client_write_key)
        .expect("valid HKDF-SHA256 output length");
    hk.expand(LABEL_SERVER_WRITE_KEY, &mut server_write_key)
        .expect("valid HKDF-SHA256 output length");
    hk.expand(LABEL_CLIENT_WRITE_IV, &mut client_write_iv)
        .expect("valid HKDF-SHA256 output length");
    hk.expand(LABEL_SERVER_WRITE_IV, &mut server_write_iv)
        .expect("valid HKDF-SHA256 output length");
    hk.expand(LABEL_FINISHED_KEY, &mut finished_key)
        .expect("valid HKDF-SHA256 output length");

    SessionKeys {
        session_id,
        client_write_key,
        server_write_key,
        client_write_iv,
        server_write_iv,
        finished_key,
    }
}

/// MAC over the transcript hash under the finished key
pub fn finished_mac(finished_key: &[u8; 32], transcript_hash: &[u8; 32]) -> [u8; 32] {
    *blake3::keyed_hash(finished_key, transcript_hash).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_inputs_same_keys() {
        let secret = [0x42u8; 32];
        let transcript = [0x17u8; 32];
        let a = derive_session_keys(&secret, &transcript);
        let b = derive_session_keys(&secret, &transcript);

        assert_eq!(a.session_id, b.session_id);
        assert_eq!(a.client_write_key, b.client_write_key);
        assert_eq!(a.server_write_key, b.server_write_key);
        assert_eq!(a.finished_key, b.finished_key);
    }

    #[test]
    fn test_direction_keys_differ() {
        let keys = derive_session_keys(&[0x42u8; 32], &[0x17u8; 32]);
        assert_ne!(keys.client_write_key, keys.server_write_key);
        assert_ne!(keys.client_write_iv, keys.server_write_iv);
        // No derived key equals the raw shared secret.
        assert_ne!(keys.client_write_key, [0x42u8; 32]);
        assert_ne!(keys.server_write_key, [0x42u8; 32]);
    }

    #[test]
    fn test_transcript_changes_every_output() {
        let secret = [0x42u8; 32];
        let a = derive_session_keys(&secret, &[0u8; 32]);
        let b = derive_session_keys(&secret, &[1u8; 32]);

        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.client_write_key, b.client_write_key);
        assert_ne!(a.server_write_key, b.server_write_key);
        assert_ne!(a.finished_key, b.finished_key);
    }

    #[test]
    fn test_finished_mac_is_keyed() {
        let transcript = [0x17u8; 32];
        let a = finished_mac(&[1u8; 32], &transcript);
        let b = finished_mac(&[2u8; 32], &transcript);
        assert_ne!(a, b);
        assert_eq!(a, finished_mac(&[1u8; 32], &transcript));
    }
}
