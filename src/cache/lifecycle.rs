//! Install/activate lifecycle of a cache generation.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use super::error::CacheError;
use super::storage::CacheStorage;
use super::traits::{LifecycleState, RequestKey, ResourceRequest, ResponseSnapshot};
use crate::network::Fetcher;

/// What the host should do after a lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
  /// Activate now instead of waiting for existing consumers to go away
  SkipWaiting,
  /// Take control of already-open consumers immediately
  ClaimClients,
}

/// Outcome of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  /// Generations purged because they were not current
  pub deleted: Vec<String>,
  pub signal: LifecycleSignal,
}

/// Drives one cache generation through
/// `Uninstalled -> Installing -> Installed -> Activating -> Active`.
///
/// The state is persisted in storage so a restart resumes where it left off.
pub struct CacheLifecycleManager<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  origin: Url,
  generation: String,
  manifest: Vec<String>,
  state: LifecycleState,
}

impl<S: CacheStorage, F: Fetcher> CacheLifecycleManager<S, F> {
  pub fn new(
    storage: Arc<S>,
    fetcher: Arc<F>,
    origin: Url,
    generation: impl Into<String>,
    manifest: Vec<String>,
  ) -> Result<Self, CacheError> {
    let generation = generation.into();
    let state = storage
      .lifecycle_state(&generation)
      .map_err(CacheError::Storage)?;

    Ok(Self {
      storage,
      fetcher,
      origin,
      generation,
      manifest,
      state,
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Whether requests should be routed through the interceptor.
  pub fn is_controlling(&self) -> bool {
    self.state == LifecycleState::Active
  }

  /// Populate the current generation with every manifest resource.
  ///
  /// Either the whole manifest is stored or nothing is; on failure the
  /// manager stays `Installing` until install is invoked again.
  pub async fn install(&mut self) -> Result<LifecycleSignal, CacheError> {
    self.transition(LifecycleState::Installing)?;

    if let Err(err) = self.populate().await {
      error!(generation = %self.generation, error = %err, "Failed to cache assets during install");
      return Err(err);
    }

    self.transition(LifecycleState::Installed)?;
    Ok(LifecycleSignal::SkipWaiting)
  }

  async fn populate(&self) -> Result<usize, CacheError> {
    self
      .storage
      .open(&self.generation)
      .map_err(|e| self.install_failure(e))?;
    info!(generation = %self.generation, "Opened cache, caching core assets");

    let requests = self
      .manifest
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(ResourceRequest::get)
          .map_err(|e| self.install_failure(format!("invalid manifest path '{}': {}", path, e)))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let entries: Vec<(RequestKey, ResponseSnapshot)> =
      try_join_all(requests.iter().map(|request| async move {
        let response = self
          .fetcher
          .fetch(request)
          .await
          .map_err(|e| self.install_failure(e))?;
        if !response.is_success() {
          return Err(self.install_failure(format!(
            "{} returned status {}",
            request.url, response.status
          )));
        }
        if !response.is_cacheable() {
          return Err(self.install_failure(format!(
            "{} resolved to a {} response from {}",
            request.url,
            response.response_type.as_str(),
            response.url
          )));
        }
        Ok((request.key(), response))
      }))
      .await?;

    self
      .storage
      .put_all(&self.generation, &entries)
      .map_err(|e| self.install_failure(e))?;

    info!(generation = %self.generation, entries = entries.len(), "Cached core assets");
    Ok(entries.len())
  }

  /// Purge every generation except the current one and start controlling.
  pub async fn activate(&mut self) -> Result<ActivationReport, CacheError> {
    match self.state {
      LifecycleState::Installed | LifecycleState::Activating | LifecycleState::Active => {}
      LifecycleState::Uninstalled | LifecycleState::Installing => {
        return Err(CacheError::NotInstalled(self.generation.clone()));
      }
    }

    self.transition(LifecycleState::Activating)?;

    let mut deleted = Vec::new();
    for generation in self.storage.generations().map_err(CacheError::Storage)? {
      if generation == self.generation {
        continue;
      }
      info!(generation = %generation, "Deleting old cache");
      self
        .storage
        .delete(&generation)
        .map_err(CacheError::Storage)?;
      deleted.push(generation);
    }

    self.transition(LifecycleState::Active)?;
    Ok(ActivationReport {
      deleted,
      signal: LifecycleSignal::ClaimClients,
    })
  }

  fn transition(&mut self, next: LifecycleState) -> Result<(), CacheError> {
    self
      .storage
      .set_lifecycle_state(&self.generation, next)
      .map_err(CacheError::Storage)?;
    info!(generation = %self.generation, from = %self.state, to = %next, "cache lifecycle transition");
    self.state = next;
    Ok(())
  }

  fn install_failure(&self, reason: impl ToString) -> CacheError {
    CacheError::InstallFailure {
      generation: self.generation.clone(),
      reason: reason.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::tests::snapshot;
  use crate::cache::traits::ResponseType;
  use crate::cache::SqliteStorage;
  use crate::network::fake::FakeFetcher;

  const ORIGIN: &str = "https://site.example/";

  fn manifest() -> Vec<String> {
    vec!["/".to_string(), "index.html".to_string(), "land.html".to_string()]
  }

  fn fetcher_with_manifest() -> Arc<FakeFetcher> {
    let fetcher = FakeFetcher::new();
    fetcher.respond("https://site.example/", 200, "root", ResponseType::Basic);
    fetcher.respond("https://site.example/index.html", 200, "home", ResponseType::Basic);
    fetcher.respond("https://site.example/land.html", 200, "land", ResponseType::Basic);
    Arc::new(fetcher)
  }

  fn manager(
    storage: &Arc<SqliteStorage>,
    fetcher: &Arc<FakeFetcher>,
    generation: &str,
  ) -> CacheLifecycleManager<SqliteStorage, FakeFetcher> {
    CacheLifecycleManager::new(
      storage.clone(),
      fetcher.clone(),
      Url::parse(ORIGIN).unwrap(),
      generation,
      manifest(),
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_install_populates_manifest() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = fetcher_with_manifest();
    let mut manager = manager(&storage, &fetcher, "v1");
    assert_eq!(manager.state(), LifecycleState::Uninstalled);

    let signal = manager.install().await.unwrap();

    assert_eq!(signal, LifecycleSignal::SkipWaiting);
    assert_eq!(manager.state(), LifecycleState::Installed);
    assert_eq!(storage.keys("v1").unwrap().len(), 3);
    assert_eq!(fetcher.calls(), 3);
  }

  #[tokio::test]
  async fn test_install_failure_stores_nothing_and_stays_installing() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = fetcher_with_manifest();
    fetcher.forget("https://site.example/land.html");
    let mut manager = manager(&storage, &fetcher, "v1");

    let err = manager.install().await.unwrap_err();

    assert!(matches!(err, CacheError::InstallFailure { .. }));
    assert_eq!(manager.state(), LifecycleState::Installing);
    assert!(storage.keys("v1").unwrap().is_empty());

    // Host re-triggers once the resource is reachable again
    fetcher.respond("https://site.example/land.html", 200, "land", ResponseType::Basic);
    manager.install().await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Installed);
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = fetcher_with_manifest();
    fetcher.respond("https://site.example/index.html", 404, "missing", ResponseType::Basic);
    let mut manager = manager(&storage, &fetcher, "v1");

    let err = manager.install().await.unwrap_err();
    assert!(err.to_string().contains("404"));
  }

  #[tokio::test]
  async fn test_install_rejects_cross_origin_entry() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = fetcher_with_manifest();
    fetcher.respond("https://cdn.example/fa.css", 200, "icons", ResponseType::Cors);
    let mut manager = CacheLifecycleManager::new(
      storage.clone(),
      fetcher.clone(),
      Url::parse(ORIGIN).unwrap(),
      "v1",
      vec!["/".to_string(), "https://cdn.example/fa.css".to_string()],
    )
    .unwrap();

    let err = manager.install().await.unwrap_err();

    assert!(matches!(err, CacheError::InstallFailure { .. }));
    assert!(err.to_string().contains("cors"), "{}", err);
    assert_eq!(manager.state(), LifecycleState::Installing);
    assert!(storage.keys("v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_is_idempotent() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = fetcher_with_manifest();
    let mut manager = manager(&storage, &fetcher, "v1");

    manager.install().await.unwrap();
    let first = storage.keys("v1").unwrap();
    manager.install().await.unwrap();

    assert_eq!(storage.keys("v1").unwrap(), first);
  }

  #[tokio::test]
  async fn test_activate_before_install_is_rejected() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = fetcher_with_manifest();
    let mut manager = manager(&storage, &fetcher, "v1");

    let err = manager.activate().await.unwrap_err();
    assert!(matches!(err, CacheError::NotInstalled(_)));
  }

  #[tokio::test]
  async fn test_activate_leaves_only_current_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let old_key = ResourceRequest::get(Url::parse("https://site.example/old.html").unwrap()).key();
    storage
      .put("v0", &old_key, &snapshot("https://site.example/old.html", "old"))
      .unwrap();
    storage.open("legacy").unwrap();

    let fetcher = fetcher_with_manifest();
    let mut manager = manager(&storage, &fetcher, "v1");
    manager.install().await.unwrap();

    let report = manager.activate().await.unwrap();

    assert_eq!(report.deleted, vec!["legacy", "v0"]);
    assert_eq!(report.signal, LifecycleSignal::ClaimClients);
    assert_eq!(manager.state(), LifecycleState::Active);
    assert!(manager.is_controlling());
    assert_eq!(storage.generations().unwrap(), vec!["v1"]);
    assert!(storage.keys("v0").unwrap().is_empty());

    // Second activation finds nothing to delete
    let report = manager.activate().await.unwrap();
    assert!(report.deleted.is_empty());
  }

  #[tokio::test]
  async fn test_state_survives_restart() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = fetcher_with_manifest();
    {
      let mut manager = manager(&storage, &fetcher, "v1");
      manager.install().await.unwrap();
      manager.activate().await.unwrap();
    }

    let resumed = manager(&storage, &fetcher, "v1");
    assert_eq!(resumed.state(), LifecycleState::Active);

    // A new deployment starts from scratch
    let next = manager(&storage, &fetcher, "v2");
    assert_eq!(next.state(), LifecycleState::Uninstalled);
  }
}
