//! Persisted conversation transcripts.
//!
//! Transcripts are stored as one document per (app, user) pair and written
//! with merge semantics so fields owned by other writers survive.

mod backend;
mod identity;
mod log;
mod store;

pub use backend::{PersistenceBackend, SqliteDocumentStore};
pub use identity::{Identity, ResolvedIdentity};
pub use log::{ConversationLog, Message, Role, Source};
pub use store::ConversationStore;

#[cfg(test)]
pub(crate) use backend::fake;
