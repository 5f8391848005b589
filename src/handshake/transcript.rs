//! Running transcript hash over the handshake messages
//!
//! Both sides feed every message into the transcript in protocol order.
//! Each message is bound with its type tag and big-endian serialized
//! length, so messages cannot be reordered, spliced or truncated without
//! changing the hash.

use sha2::{Digest, Sha256};

use crate::handshake::messages::MessageType;

#[derive(Debug, Clone)]
pub struct Transcript {
    hasher: Sha256,
    messages: u32,
}

impl Transcript {
    pub fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"pqchannel handshake transcript v1");
        Self {
            hasher,
            messages: 0,
        }
    }

    /// Bind one serialized message into the transcript
    pub fn append(&mut self, message_type: MessageType, serialized: &[u8]) {
        self.hasher.update([message_type as u8]);
        self.hasher.update((serialized.len() as u32).to_be_bytes());
        self.hasher.update(serialized);
        self.messages += 1;
    }

    /// Hash of everything appended so far; the transcript stays usable
    pub fn current_hash(&self) -> [u8; 32] {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.hasher.clone().finalize());
        hash
    }

    pub fn message_count(&self) -> u32 {
        self.messages
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_inputs_hash_identically() {
        let mut a = Transcript::new();
        let mut b = Transcript::new();
        a.append(MessageType::ClientHello, b"hello bytes");
        b.append(MessageType::ClientHello, b"hello bytes");
        assert_eq!(a.current_hash(), b.current_hash());
    }

    #[test]
    fn test_order_matters() {
        let mut a = Transcript::new();
        a.append(MessageType::ClientHello, b"first");
        a.append(MessageType::ServerHello, b"second");

        let mut b = Transcript::new();
        b.append(MessageType::ServerHello, b"second");
        b.append(MessageType::ClientHello, b"first");

        assert_ne!(a.current_hash(), b.current_hash());
    }

    #[test]
    fn test_type_tag_matters() {
        let mut a = Transcript::new();
        a.append(MessageType::ClientHello, b"same bytes");
        let mut b = Transcript::new();
        b.append(MessageType::ServerHello, b"same bytes");
        assert_ne!(a.current_hash(), b.current_hash());
    }

    #[test]
    fn test_splicing_is_detected() {
        // One message "ab" must not hash like two messages "a" and "b".
        let mut joined = Transcript::new();
        joined.append(MessageType::ClientHello, b"ab");

        let mut split = Transcript::new();
        split.append(MessageType::ClientHello, b"a");
        split.append(MessageType::ClientHello, b"b");

        assert_ne!(joined.current_hash(), split.current_hash());
        assert_eq!(joined.message_count(), 1);
        assert_eq!(split.message_count(), 2);
    }

    #[test]
    fn test_hash_is_readable_mid_handshake() {
        let mut transcript = Transcript::new();
        transcript.append(MessageType::ClientHello, b"one");
        let mid = transcript.current_hash();
        transcript.append(MessageType::ServerHello, b"two");
        assert_ne!(mid, transcript.current_hash());
    }
}
