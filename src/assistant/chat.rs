//! Chat session: one conversation, its working log and its persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::assistant::client::{AssistantClient, Exchange};
use crate::assistant::error::ChatError;
use crate::conversation::{
  ConversationLog, ConversationStore, Identity, Message, PersistenceBackend, ResolvedIdentity,
};

/// Chat assistant for one identity.
///
/// Sends are serialized: while one is in flight, another is rejected with
/// `ChatError::Busy` so appends never interleave. The log lock is only held
/// for copies, never across a request.
pub struct ChatSession<B: PersistenceBackend> {
  client: AssistantClient,
  store: Option<ConversationStore<B>>,
  identity: ResolvedIdentity,
  log: Mutex<ConversationLog>,
  in_flight: AtomicBool,
  greeting: String,
}

/// Clears the in-flight flag when a send finishes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl<B: PersistenceBackend> ChatSession<B> {
  /// Load the stored transcript (if a store is configured) and start a session.
  ///
  /// Load failures are logged and the session starts empty.
  pub async fn open(
    client: AssistantClient,
    store: Option<ConversationStore<B>>,
    identity: &Identity,
    greeting: impl Into<String>,
  ) -> Self {
    let (log, resolved) = match &store {
      None => {
        warn!("persistence not configured, chat history will not be kept");
        (ConversationLog::new(), identity.resolve())
      }
      Some(store) => match store.load(identity).await {
        Ok(loaded) => (loaded.log, loaded.identity),
        Err(e) => {
          error!(error = %e, "Error loading chat history");
          (ConversationLog::new(), identity.resolve())
        }
      },
    };

    Self {
      client,
      store,
      identity: resolved,
      log: Mutex::new(log),
      in_flight: AtomicBool::new(false),
      greeting: greeting.into(),
    }
  }

  pub fn identity(&self) -> &ResolvedIdentity {
    &self.identity
  }

  /// Whether a send is currently in flight.
  #[cfg(test)]
  pub fn is_busy(&self) -> bool {
    self.in_flight.load(Ordering::Acquire)
  }

  /// Snapshot of the working log.
  #[cfg(test)]
  pub async fn log(&self) -> ConversationLog {
    self.log.lock().await.clone()
  }

  /// Messages to show the user: the stored transcript, or just the greeting
  /// when there is none. The greeting is never part of the log.
  pub async fn transcript(&self) -> Vec<Message> {
    let log = self.log.lock().await;
    if log.is_empty() {
      vec![Message::model(self.greeting.clone())]
    } else {
      log.messages().to_vec()
    }
  }

  /// Send a user message and wait for the reply (or apology).
  ///
  /// The updated log is persisted before returning regardless of outcome;
  /// persistence failures are logged and do not affect the result.
  pub async fn send(&self, text: &str) -> Result<Exchange, ChatError> {
    let text = text.trim();
    if text.is_empty() {
      return Err(ChatError::EmptyMessage);
    }

    let _in_flight = InFlight::acquire(&self.in_flight).ok_or(ChatError::Busy)?;

    let snapshot = self.log.lock().await.clone();
    let exchange = self.client.send(text, &snapshot).await;
    *self.log.lock().await = exchange.log.clone();
    self.persist(&exchange.log).await;

    Ok(exchange)
  }

  async fn persist(&self, log: &ConversationLog) {
    let Some(store) = &self.store else {
      return;
    };
    if let Err(e) = store.save(&self.identity, log).await {
      error!(error = %e, "Error saving chat history");
    }
  }
}
