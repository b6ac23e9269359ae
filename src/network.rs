//! Network access for resource requests.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::cache::{ResourceRequest, ResponseSnapshot, ResponseType};

/// A resource fetch that produced no response at all.
#[derive(Debug, Clone, thiserror::Error)]
#[error("network unavailable for {url}: {reason}")]
pub struct NetworkError {
  pub url: String,
  pub reason: String,
}

impl NetworkError {
  pub fn new(url: &Url, reason: impl ToString) -> Self {
    Self {
      url: url.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// Performs the actual network fetch behind the interceptor.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot, NetworkError>;
}

/// HTTP fetcher that tags responses with their provenance relative to the
/// site origin.
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(client: Client, origin: Url) -> Self {
    Self { client, origin }
  }

  fn response_type(&self, url: &Url) -> ResponseType {
    if url.origin() == self.origin.origin() {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot, NetworkError> {
    debug!(method = %request.method, url = %request.url, "fetching from network");

    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| NetworkError::new(&request.url, e))?;

    let status = response.status().as_u16();
    let url = response.url().clone();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::new(&request.url, e))?
      .to_vec();

    Ok(ResponseSnapshot {
      status,
      headers,
      body,
      response_type: self.response_type(&url),
      url,
    })
  }
}

#[cfg(test)]
pub(crate) mod fake {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Fetcher serving canned responses by URL and counting every call.
  /// URLs without a canned response fail as if the network were down.
  #[derive(Default)]
  pub struct FakeFetcher {
    responses: Mutex<HashMap<String, ResponseSnapshot>>,
    calls: AtomicUsize,
  }

  impl FakeFetcher {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: &str, response_type: ResponseType) {
      let url = Url::parse(url).unwrap();
      self.responses.lock().unwrap().insert(
        url.to_string(),
        ResponseSnapshot {
          status,
          headers: vec![("content-type".to_string(), "text/html".to_string())],
          body: body.as_bytes().to_vec(),
          url,
          response_type,
        },
      );
    }

    pub fn forget(&self, url: &str) {
      let url = Url::parse(url).unwrap();
      self.responses.lock().unwrap().remove(url.as_str());
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot, NetworkError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .responses
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| NetworkError::new(&request.url, "connection refused"))
    }
  }
}
