//! Core traits and types for the resource cache.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// An outbound resource request as seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
  pub method: Method,
  pub url: Url,
}

impl ResourceRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Only read-only fetches participate in caching.
  pub fn is_cacheable(&self) -> bool {
    self.method == Method::GET
  }

  /// Canonical identity used as the cache key.
  pub fn key(&self) -> RequestKey {
    let mut url = self.url.clone();
    url.set_fragment(None);
    RequestKey(format!("{} {}", self.method.as_str().to_uppercase(), url))
  }
}

/// Canonicalized request identity: `METHOD URL`, fragment stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// SHA256 of the identity, for stable fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.0.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for RequestKey {
  fn from(s: String) -> Self {
    Self(s)
  }
}

/// Where a response came from relative to the site's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response
  Cors,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      other => Err(eyre!("Unknown response type '{}'", other)),
    }
  }
}

/// A fully-read response. Cloning copies the body, so a clone handed to the
/// cache never shares a read with the copy returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Final URL after redirects
  pub url: Url,
  pub response_type: ResponseType,
}

impl ResponseSnapshot {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only successful same-origin responses may be written to the cache.
  pub fn is_cacheable(&self) -> bool {
    self.is_success() && self.response_type == ResponseType::Basic
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A snapshot read back from storage.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub snapshot: ResponseSnapshot,
  /// When the snapshot was captured
  pub cached_at: DateTime<Utc>,
}

/// Lifecycle of one cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Installed and waiting to be activated
  Installed,
  Activating,
  Active,
}

impl LifecycleState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Uninstalled => "uninstalled",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "uninstalled" => Ok(Self::Uninstalled),
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "activating" => Ok(Self::Activating),
      "active" => Ok(Self::Active),
      other => Err(eyre!("Unknown lifecycle state '{}'", other)),
    }
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the network
  Network,
  /// Served from the current cache generation
  Cache,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_key_strips_fragment() {
    let a = ResourceRequest::get(url("https://site.example/land.html#plots"));
    let b = ResourceRequest::get(url("https://site.example/land.html"));
    assert_eq!(a.key(), b.key());
    assert_eq!(a.key().as_str(), "GET https://site.example/land.html");
  }

  #[test]
  fn test_key_includes_method() {
    let get = ResourceRequest::get(url("https://site.example/"));
    let post = ResourceRequest::new(Method::POST, url("https://site.example/"));
    assert_ne!(get.key(), post.key());
    assert!(get.is_cacheable());
    assert!(!post.is_cacheable());
  }

  #[test]
  fn test_cache_hash_is_stable_hex() {
    let key = ResourceRequest::get(url("https://site.example/")).key();
    assert_eq!(key.cache_hash(), key.cache_hash());
    assert_eq!(key.cache_hash().len(), 64);
  }

  #[test]
  fn test_snapshot_cacheability() {
    let mut snapshot = ResponseSnapshot {
      status: 200,
      headers: vec![("Content-Type".to_string(), "text/html".to_string())],
      body: b"<html></html>".to_vec(),
      url: url("https://site.example/"),
      response_type: ResponseType::Basic,
    };
    assert!(snapshot.is_cacheable());
    assert_eq!(snapshot.header("content-type"), Some("text/html"));

    snapshot.response_type = ResponseType::Cors;
    assert!(!snapshot.is_cacheable());

    snapshot.response_type = ResponseType::Basic;
    snapshot.status = 404;
    assert!(!snapshot.is_cacheable());
  }

  #[test]
  fn test_lifecycle_state_round_trips_through_str() {
    for state in [
      LifecycleState::Uninstalled,
      LifecycleState::Installing,
      LifecycleState::Installed,
      LifecycleState::Activating,
      LifecycleState::Active,
    ] {
      assert_eq!(LifecycleState::parse(state.as_str()).unwrap(), state);
    }
    assert!(LifecycleState::parse("bogus").is_err());
  }
}
