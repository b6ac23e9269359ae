//! Error taxonomy for the resource cache.

use crate::network::NetworkError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// Manifest population failed. Not retried; the host must re-run install.
  #[error("install of cache generation {generation} failed: {reason}")]
  InstallFailure { generation: String, reason: String },

  /// The request missed the cache and the network gave no response.
  #[error(transparent)]
  NetworkUnavailable(#[from] NetworkError),

  #[error("cache generation {0} must be installed before it can be activated")]
  NotInstalled(String),

  #[error("cache storage error: {0}")]
  Storage(color_eyre::Report),
}
