//! Versioned resource cache with an install/activate lifecycle.
//!
//! This module provides:
//! - A generation-namespaced response store (SQLite)
//! - A lifecycle manager that seeds the store from a manifest and purges
//!   superseded generations on activation
//! - A cache-first interceptor that writes successful same-origin responses
//!   back into the current generation

mod error;
mod interceptor;
mod lifecycle;
mod storage;
mod traits;

pub use error::CacheError;
pub use interceptor::FetchInterceptor;
pub use lifecycle::{CacheLifecycleManager, LifecycleSignal};
pub use storage::SqliteStorage;
pub use traits::{
  CacheResult, CacheSource, LifecycleState, ResourceRequest, ResponseSnapshot, ResponseType,
};
