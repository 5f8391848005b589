/*!
 * Session records and the store contract
 *
 * A completed handshake produces a [`SessionRecord`] that is handed to a
 * [`SessionStore`]. The store is an external concern; this module fixes
 * the contract it must satisfy and ships an in-memory implementation for
 * embedding and tests.
 */

mod record;
mod store;

pub use record::{SessionMetadata, SessionRecord};
pub use store::{MemorySessionStore, SessionStore};
