//! Secure Memory Handling Utilities
//!
//! Containers for secret material that zero their contents when dropped,
//! keeping shared secrets, private keys and derived traffic keys out of
//! memory once a handshake instance releases them.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A byte buffer for secret material that is zeroed on drop.
///
/// Used for KEM shared secrets, derived traffic keys and private key bytes
/// held transiently by a handshake instance. The Debug implementation never
/// prints the contents.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureBytes {
    inner: Vec<u8>,
}

impl SecureBytes {
    /// Create a new secure buffer with a copy of the given data
    pub fn new(data: &[u8]) -> Self {
        Self {
            inner: data.to_vec(),
        }
    }

    /// Take ownership of an existing byte vector
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { inner: data }
    }

    /// Access the contained bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Append bytes to the buffer
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Zero and empty the buffer
    pub fn clear(&mut self) {
        self.inner.zeroize();
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBytes({} bytes)", self.inner.len())
    }
}

impl PartialEq for SecureBytes {
    fn eq(&self, other: &Self) -> bool {
        crate::utils::constant_time_eq(&self.inner, &other.inner)
    }
}

impl Eq for SecureBytes {}
