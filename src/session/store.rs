use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ChannelResult;
use crate::session::record::SessionRecord;

/// Contract the handshake consumes for persisting negotiated sessions.
///
/// A `put` must be atomically visible: a concurrent `get` on the same id
/// observes either the complete new record or the previous state, never a
/// partially written one.
pub trait SessionStore: Send + Sync {
    fn put(&self, record: SessionRecord) -> ChannelResult<()>;
    fn get(&self, session_id: &[u8; 16]) -> ChannelResult<Option<SessionRecord>>;
    fn delete(&self, session_id: &[u8; 16]) -> ChannelResult<()>;
    fn count(&self) -> ChannelResult<usize>;
}

/// In-process store backed by a read-write locked map.
///
/// Inserts swap a fully built record under the write lock, which gives the
/// atomic-visibility guarantee directly.
#[derive(Default, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<[u8; 16], SessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, record: SessionRecord) -> ChannelResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.insert(record.session_id, record);
        Ok(())
    }

    fn get(&self, session_id: &[u8; 16]) -> ChannelResult<Option<SessionRecord>> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sessions.get(session_id).cloned())
    }

    fn delete(&self, session_id: &[u8; 16]) -> ChannelResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.remove(session_id);
        Ok(())
    }

    fn count(&self) -> ChannelResult<usize> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sessions.len())
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.count().unwrap_or(0);
        f.debug_struct("MemorySessionStore")
            .field("sessions", &count)
            .finish()
    }
}
