//! Cache-first request interception.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::CacheError;
use super::storage::CacheStorage;
use super::traits::{CacheResult, ResourceRequest, ResponseSnapshot};
use crate::network::Fetcher;

/// Sits between the host and the network, serving the current cache
/// generation first and writing successful same-origin responses through.
pub struct FetchInterceptor<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
}

impl<S: CacheStorage, F: Fetcher> FetchInterceptor<S, F> {
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      fetcher,
      generation: generation.into(),
    }
  }

  /// Handle one request.
  ///
  /// 1. Cache hit - return it, no network call and no freshness check
  /// 2. Miss - fetch from network
  /// 3. Network error - surface it, nothing is fabricated
  /// 4. Success with basic provenance - store a copy, return the fetched response
  /// 5. Anything else - return without caching
  pub async fn handle(
    &self,
    request: &ResourceRequest,
  ) -> Result<CacheResult<ResponseSnapshot>, CacheError> {
    if !request.is_cacheable() {
      let response = self.fetcher.fetch(request).await?;
      return Ok(CacheResult::from_network(response));
    }

    let key = request.key();

    match self.storage.match_request(&self.generation, &key) {
      Ok(Some(cached)) => {
        info!(url = %request.url, "Serving from cache");
        return Ok(CacheResult::from_cache(cached.snapshot, cached.cached_at));
      }
      Ok(None) => {}
      Err(e) => {
        // Unreadable entry behaves like a miss
        warn!(url = %request.url, error = %e, "cache lookup failed");
      }
    }

    let response = match self.fetcher.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        warn!(url = %request.url, error = %e, "Fetch failed and no cached copy exists");
        return Err(e.into());
      }
    };

    if response.is_cacheable() {
      let copy = response.clone();
      if let Err(e) = self.storage.put(&self.generation, &key, &copy) {
        warn!(url = %request.url, error = %e, "failed to write response to cache");
      }
    } else {
      debug!(
        url = %request.url,
        status = response.status,
        response_type = response.response_type.as_str(),
        "response not cacheable"
      );
    }

    Ok(CacheResult::from_network(response))
  }
}
