//! Transcript types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
  pub text: String,
}

/// A citation backing a model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
  pub uri: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  pub role: Role,
  pub parts: Vec<Part>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sources: Vec<Source>,
}

impl Message {
  pub fn user(text: impl Into<String>) -> Self {
    Self::new(Role::User, text)
  }

  pub fn model(text: impl Into<String>) -> Self {
    Self::new(Role::Model, text)
  }

  fn new(role: Role, text: impl Into<String>) -> Self {
    Self {
      role,
      parts: vec![Part { text: text.into() }],
      sources: Vec::new(),
    }
  }

  pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
    self.sources = sources;
    self
  }

  /// Text of the first part, empty if there is none.
  pub fn text(&self) -> &str {
    self.parts.first().map(|p| p.text.as_str()).unwrap_or_default()
  }
}

/// Ordered, append-only transcript for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationLog {
  messages: Vec<Message>,
}

impl ConversationLog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, message: Message) {
    self.messages.push(message);
  }

  pub fn messages(&self) -> &[Message] {
    &self.messages
  }

  pub fn len(&self) -> usize {
    self.messages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }
}

impl From<Vec<Message>> for ConversationLog {
  fn from(messages: Vec<Message>) -> Self {
    Self { messages }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_message_wire_shape() {
    let value = serde_json::to_value(Message::user("Hello")).unwrap();
    assert_eq!(value, json!({"role": "user", "parts": [{"text": "Hello"}]}));
  }

  #[test]
  fn test_sources_are_serialized_when_present() {
    let message = Message::model("See here").with_sources(vec![Source {
      uri: "https://example.com".to_string(),
      title: "Example".to_string(),
    }]);
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["sources"][0]["title"], "Example");
  }

  #[test]
  fn test_stored_message_without_sources_parses() {
    let message: Message =
      serde_json::from_value(json!({"role": "model", "parts": [{"text": "Hi"}]})).unwrap();
    assert_eq!(message.role, Role::Model);
    assert_eq!(message.text(), "Hi");
    assert!(message.sources.is_empty());
  }

  #[test]
  fn test_log_preserves_order() {
    let mut log = ConversationLog::new();
    log.push(Message::user("one"));
    log.push(Message::model("two"));

    let texts: Vec<_> = log.messages().iter().map(Message::text).collect();
    assert_eq!(texts, vec!["one", "two"]);
    assert_eq!(log.messages()[1].role, Role::Model);
  }
}
