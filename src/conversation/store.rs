//! Load and save conversation transcripts through a persistence backend.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::backend::{Document, PersistenceBackend};
use super::identity::{Identity, ResolvedIdentity};
use super::log::ConversationLog;

const HISTORY_FIELD: &str = "history";
const UPDATED_FIELD: &str = "lastUpdated";

#[derive(Debug, thiserror::Error)]
#[error("persistence failure: {0}")]
pub struct PersistenceFailure(pub color_eyre::Report);

/// Result of loading a conversation.
#[derive(Debug, Clone)]
pub struct LoadedConversation {
  pub log: ConversationLog,
  /// Where later saves must go. A placeholder when the user was not known.
  pub identity: ResolvedIdentity,
}

pub struct ConversationStore<B: PersistenceBackend> {
  backend: Arc<B>,
}

impl<B: PersistenceBackend> Clone for ConversationStore<B> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
    }
  }
}

impl<B: PersistenceBackend> ConversationStore<B> {
  pub fn new(backend: Arc<B>) -> Self {
    Self { backend }
  }

  /// Load the stored transcript for `identity`.
  ///
  /// An unresolved identity does not block: it yields an empty log bound to
  /// the placeholder user.
  pub async fn load(&self, identity: &Identity) -> Result<LoadedConversation, PersistenceFailure> {
    let resolved = identity.resolve();

    if resolved.placeholder {
      info!(user = %resolved.user_id, "identity not provisioned, using placeholder");
      return Ok(LoadedConversation {
        log: ConversationLog::new(),
        identity: resolved,
      });
    }

    let key = resolved.document_key();
    let document = self
      .backend
      .get(&key)
      .await
      .map_err(PersistenceFailure)?;

    let log = match document.and_then(|mut doc| doc.remove(HISTORY_FIELD)) {
      Some(history) => serde_json::from_value(history).map_err(|e| {
        PersistenceFailure(color_eyre::eyre::eyre!(
          "Malformed history in {}: {}",
          key.path(),
          e
        ))
      })?,
      None => ConversationLog::new(),
    };

    debug!(path = %key.path(), messages = log.len(), "loaded conversation");
    Ok(LoadedConversation {
      log,
      identity: resolved,
    })
  }

  /// Merge-write the full log and a last-updated timestamp.
  pub async fn save(
    &self,
    identity: &ResolvedIdentity,
    log: &ConversationLog,
  ) -> Result<(), PersistenceFailure> {
    let history = serde_json::to_value(log)
      .map_err(|e| PersistenceFailure(color_eyre::eyre::eyre!("Failed to encode history: {}", e)))?;

    let mut fields = Document::new();
    fields.insert(HISTORY_FIELD.to_string(), history);
    fields.insert(
      UPDATED_FIELD.to_string(),
      Value::String(Utc::now().to_rfc3339()),
    );

    self
      .backend
      .set_merge(&identity.document_key(), fields)
      .await
      .map_err(PersistenceFailure)
  }
}
