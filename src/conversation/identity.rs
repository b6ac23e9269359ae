//! Identity supplied by the host's auth layer.

use crate::config::IdentityConfig;

/// Used while the auth layer has not provisioned a user yet.
pub const PLACEHOLDER_USER: &str = "temp_user";
/// Used when the host did not provide an application id.
pub const DEFAULT_APP_ID: &str = "default-app-id";
/// Name of the conversation document under each user.
pub const CHAT_DOCUMENT: &str = "ai_assistant";

/// Identity as handed over by the host; either part may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
  pub app_id: Option<String>,
  pub user_id: Option<String>,
}

impl Identity {
  pub fn new(app_id: Option<String>, user_id: Option<String>) -> Self {
    Self { app_id, user_id }
  }

  /// Resolve to a concrete document owner, falling back to the transient
  /// placeholder when the user is not known yet.
  pub fn resolve(&self) -> ResolvedIdentity {
    let app_id = non_empty(self.app_id.as_deref());
    let user_id = non_empty(self.user_id.as_deref());

    match (app_id, user_id) {
      (Some(app_id), Some(user_id)) => ResolvedIdentity {
        app_id: app_id.to_string(),
        user_id: user_id.to_string(),
        placeholder: false,
      },
      (app_id, _) => ResolvedIdentity {
        app_id: app_id.unwrap_or(DEFAULT_APP_ID).to_string(),
        user_id: PLACEHOLDER_USER.to_string(),
        placeholder: true,
      },
    }
  }
}

impl From<&IdentityConfig> for Identity {
  fn from(config: &IdentityConfig) -> Self {
    Self::new(config.app_id.clone(), config.user_id.clone())
  }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
  s.map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
  pub app_id: String,
  pub user_id: String,
  /// True when `user_id` is the transient placeholder
  pub placeholder: bool,
}

impl ResolvedIdentity {
  pub fn document_key(&self) -> DocumentKey {
    DocumentKey {
      app_id: self.app_id.clone(),
      user_id: self.user_id.clone(),
      name: CHAT_DOCUMENT.to_string(),
    }
  }
}

/// Location of a persisted document: `(app, user, document name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
  pub app_id: String,
  pub user_id: String,
  pub name: String,
}

impl DocumentKey {
  pub fn path(&self) -> String {
    format!(
      "artifacts/{}/users/{}/chats/{}",
      self.app_id, self.user_id, self.name
    )
  }
}
