use crate::assistant::{AssistantClient, BackoffPolicy, ChatSession, Exchange};
use crate::cache::{
  CacheError, CacheLifecycleManager, CacheResult, CacheSource, FetchInterceptor, LifecycleSignal,
  LifecycleState, ResourceRequest, ResponseSnapshot, SqliteStorage,
};
use crate::commands;
use crate::config::Config;
use crate::conversation::{ConversationStore, Identity, Message, Role, SqliteDocumentStore};
use crate::event::{Event, EventHandler};
use crate::network::{Fetcher, HttpFetcher};
use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const CACHE_DB: &str = "cache.db";
const CHATS_DB: &str = "chats.db";

/// Host application: owns the cache lifecycle, the interceptor and the chat
/// session, and handles events one at a time.
pub struct App {
  origin: Url,
  fetcher: Arc<HttpFetcher>,
  lifecycle: CacheLifecycleManager<SqliteStorage, HttpFetcher>,
  interceptor: FetchInterceptor<SqliteStorage, HttpFetcher>,
  chat: ChatSession<SqliteDocumentStore>,
  should_quit: bool,
}

impl App {
  /// Open the on-disk databases in the data directory and wire everything up.
  pub async fn new(config: Config) -> Result<Self> {
    let data_dir = Config::data_dir()?;
    let storage = Arc::new(SqliteStorage::open_at(&data_dir.join(CACHE_DB))?);
    let documents = if config.persistence.enabled {
      Some(Arc::new(SqliteDocumentStore::open_at(
        &data_dir.join(CHATS_DB),
      )?))
    } else {
      None
    };

    let http = Client::builder()
      .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Self::with_stores(config, http, storage, documents, &Config::get_api_key()).await
  }

  pub async fn with_stores(
    config: Config,
    http: Client,
    storage: Arc<SqliteStorage>,
    documents: Option<Arc<SqliteDocumentStore>>,
    api_key: &str,
  ) -> Result<Self> {
    let fetcher = Arc::new(HttpFetcher::new(http.clone(), config.origin.clone()));

    let lifecycle = CacheLifecycleManager::new(
      storage.clone(),
      fetcher.clone(),
      config.origin.clone(),
      config.cache.generation.clone(),
      config.cache.manifest.clone(),
    )?;
    let interceptor = FetchInterceptor::new(storage, fetcher.clone(), &config.cache.generation);

    let client = AssistantClient::new(
      http,
      &config.assistant,
      api_key,
      BackoffPolicy::from(&config.retry),
    )?;
    let chat = ChatSession::open(
      client,
      documents.map(ConversationStore::new),
      &Identity::from(&config.identity),
      config.assistant.greeting.clone(),
    )
    .await;

    Ok(Self {
      origin: config.origin,
      fetcher,
      lifecycle,
      interceptor,
      chat,
      should_quit: false,
    })
  }

  /// Bring the current generation to `Active`, resuming an interrupted
  /// lifecycle. Failures are logged; requests then pass straight through.
  pub async fn start(&mut self) {
    let output = match self.lifecycle.state() {
      LifecycleState::Active => return,
      LifecycleState::Installed | LifecycleState::Activating => self.activate().await,
      LifecycleState::Uninstalled | LifecycleState::Installing => self.install().await,
    };
    info!(state = %self.lifecycle.state(), "{}", output);
  }

  /// Install the current generation and, when it asks to skip waiting,
  /// activate it straight away.
  async fn install(&mut self) -> String {
    match self.lifecycle.install().await {
      Ok(LifecycleSignal::SkipWaiting) => {
        let installed = format!("Installed cache generation {}", self.lifecycle.generation());
        format!("{}\n{}", installed, self.activate().await)
      }
      Ok(LifecycleSignal::ClaimClients) => {
        format!("Installed cache generation {}", self.lifecycle.generation())
      }
      Err(e) => {
        warn!(error = %e, "cache install failed, continuing without cache");
        format!("Install failed: {}", e)
      }
    }
  }

  async fn activate(&mut self) -> String {
    let report = match self.lifecycle.activate().await {
      Ok(report) => report,
      Err(e) => {
        warn!(error = %e, "cache activation failed");
        return format!("Activate failed: {}", e);
      }
    };

    let mut out = format!("Activated cache generation {}", self.lifecycle.generation());
    if !report.deleted.is_empty() {
      out.push_str(&format!(" (removed {})", report.deleted.join(", ")));
    }
    if report.signal == LifecycleSignal::ClaimClients {
      info!(generation = %self.lifecycle.generation(), "serving requests from cache");
    }
    out
  }

  /// Route a request through the interceptor once the cache controls
  /// requests, otherwise straight to the network.
  pub async fn fetch(&self, target: &str) -> Result<CacheResult<ResponseSnapshot>> {
    let request = ResourceRequest::get(resolve_target(&self.origin, target)?);

    if self.lifecycle.is_controlling() {
      return Ok(self.interceptor.handle(&request).await?);
    }

    let response = self
      .fetcher
      .fetch(&request)
      .await
      .map_err(CacheError::from)?;
    Ok(CacheResult::from_network(response))
  }

  /// Handle one event, returning text to show the user.
  pub async fn handle_event(&mut self, event: Event) -> Option<String> {
    match event {
      Event::Install => Some(self.install().await),
      Event::Activate => Some(self.activate().await),
      Event::Fetch(target) => Some(match self.fetch(&target).await {
        Ok(result) => render_fetch(&result),
        Err(e) => format!("Fetch failed: {}", e),
      }),
      Event::Send(text) => Some(match self.chat.send(&text).await {
        Ok(exchange) => {
          log_exchange(&exchange);
          render_message(&exchange.reply)
        }
        Err(e) => format!("! {}", e),
      }),
      Event::History => Some(self.transcript().await),
      Event::Help => Some(commands::help_text()),
      Event::Quit => {
        self.should_quit = true;
        None
      }
    }
  }

  pub async fn transcript(&self) -> String {
    self
      .chat
      .transcript()
      .await
      .iter()
      .map(render_message)
      .collect::<Vec<_>>()
      .join("\n\n")
  }

  /// Interactive chat on stdin/stdout until `/quit` or EOF.
  pub async fn run_chat(&mut self) -> Result<()> {
    self.start().await;

    let mut events = EventHandler::new();
    events.spawn_stdin_reader();

    let mut stdout = std::io::stdout();
    let identity = self.chat.identity();
    if identity.placeholder {
      writeln!(
        stdout,
        "(signed out: this conversation is kept under the temporary user '{}')",
        identity.user_id
      )?;
    }
    writeln!(stdout, "{}\n", self.transcript().await)?;
    write!(stdout, "> ")?;
    stdout.flush()?;

    while !self.should_quit {
      let Some(event) = events.next().await else {
        break;
      };
      if let Some(output) = self.handle_event(event).await {
        writeln!(stdout, "{}\n", output)?;
      }
      if !self.should_quit {
        write!(stdout, "> ")?;
        stdout.flush()?;
      }
    }

    Ok(())
  }
}

/// Absolute URLs are used as given; anything else resolves against the origin.
fn resolve_target(origin: &Url, target: &str) -> Result<Url> {
  match Url::parse(target) {
    Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
    _ => origin
      .join(target)
      .map_err(|e| eyre!("Invalid resource {}: {}", target, e)),
  }
}

fn render_fetch(result: &CacheResult<ResponseSnapshot>) -> String {
  let response = &result.data;
  let source = match (result.source, result.cached_at) {
    (CacheSource::Cache, Some(at)) => format!("cache, stored {}", at.format("%Y-%m-%d %H:%M:%S")),
    (CacheSource::Cache, None) => "cache".to_string(),
    (CacheSource::Network, _) => "network".to_string(),
  };
  format!(
    "{} {} ({}, {} bytes, from {})",
    response.status,
    response.url,
    response.header("content-type").unwrap_or("unknown type"),
    response.body.len(),
    source
  )
}

fn log_exchange(exchange: &Exchange) {
  let waited: Duration = exchange.attempts.iter().filter_map(|a| a.delay).sum();
  let last = exchange.attempts.last().map(|a| (a.index, a.outcome));

  if exchange.is_success() {
    info!(
      attempts = exchange.attempts.len(),
      waited_ms = waited.as_millis() as u64,
      "reply received"
    );
  } else {
    warn!(
      failure = ?exchange.failure,
      last_attempt = ?last,
      waited_ms = waited.as_millis() as u64,
      "send ended with an apology"
    );
  }
}

/// Render a message for the terminal, with numbered citations under replies.
pub fn render_message(message: &Message) -> String {
  let speaker = match message.role {
    Role::User => "You",
    Role::Model => "Assistant",
  };

  let mut out = format!("{}: {}", speaker, message.text());
  if !message.sources.is_empty() {
    out.push_str("\n  Sources:");
    for (i, source) in message.sources.iter().enumerate() {
      out.push_str(&format!("\n  [{}] {} <{}>", i + 1, source.title, source.uri));
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assistant::client::tests::reply_body;
  use crate::conversation::Source;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn config(server: &MockServer) -> Config {
    let yaml = format!(
      r#"
origin: {uri}/
cache:
  generation: site-v2
  manifest: ["/", "index.html"]
assistant:
  api_url: {uri}
  model: test-model
identity:
  app_id: app
  user_id: uid-1
retry:
  base_delay_ms: 1
  jitter_ms: 1
"#,
      uri = server.uri()
    );
    Config::from_yaml(&yaml).unwrap()
  }

  async fn mount_site(server: &MockServer) {
    for page in ["/", "/index.html"] {
      Mock::given(method("GET"))
        .and(path(page))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .expect(1)
        .mount(server)
        .await;
    }
  }

  async fn build_app(server: &MockServer, documents: Option<Arc<SqliteDocumentStore>>) -> App {
    App::with_stores(
      config(server),
      Client::builder().no_proxy().build().unwrap(),
      Arc::new(SqliteStorage::open_in_memory().unwrap()),
      documents,
      "test-key",
    )
    .await
    .unwrap()
  }

  #[test]
  fn test_render_reply_with_sources() {
    let message = Message::model("Prices are rising.").with_sources(vec![
      Source {
        uri: "https://news.example/a".to_string(),
        title: "Market report".to_string(),
      },
      Source {
        uri: "https://news.example/b".to_string(),
        title: "Land survey".to_string(),
      },
    ]);

    assert_eq!(
      render_message(&message),
      "Assistant: Prices are rising.\n  Sources:\n  [1] Market report <https://news.example/a>\n  [2] Land survey <https://news.example/b>"
    );
  }

  #[test]
  fn test_render_user_message() {
    assert_eq!(render_message(&Message::user("Hi")), "You: Hi");
  }

  #[test]
  fn test_resolve_target() {
    let origin = Url::parse("https://site.example/").unwrap();
    assert_eq!(
      resolve_target(&origin, "land.html").unwrap().as_str(),
      "https://site.example/land.html"
    );
    assert_eq!(
      resolve_target(&origin, "https://cdn.example/x.js")
        .unwrap()
        .as_str(),
      "https://cdn.example/x.js"
    );
  }

  #[tokio::test]
  async fn test_start_installs_and_serves_from_cache() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let mut app = build_app(&server, None).await;

    assert_eq!(app.lifecycle.state(), LifecycleState::Uninstalled);
    app.start().await;
    assert_eq!(app.lifecycle.state(), LifecycleState::Active);

    let result = app.fetch("index.html").await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);

    let output = app
      .handle_event(Event::Fetch("index.html".to_string()))
      .await
      .unwrap();
    assert!(output.contains("from cache, stored"), "{}", output);
    assert!(output.contains("text/html"), "{}", output);
  }

  #[tokio::test]
  async fn test_install_event_activates_immediately() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let mut app = build_app(&server, None).await;

    let output = app.handle_event(Event::Install).await.unwrap();

    assert!(output.contains("Installed cache generation site-v2"), "{}", output);
    assert!(output.contains("Activated cache generation site-v2"), "{}", output);
    assert_eq!(app.lifecycle.state(), LifecycleState::Active);

    let result = app.fetch("index.html").await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
  }

  #[tokio::test]
  async fn test_resumes_interrupted_lifecycle_without_refetching() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let http = Client::builder().no_proxy().build().unwrap();

    // Process stopped after install but before activation
    {
      let mut first = App::with_stores(config(&server), http.clone(), storage.clone(), None, "k")
        .await
        .unwrap();
      first.lifecycle.install().await.unwrap();
      assert_eq!(first.lifecycle.state(), LifecycleState::Installed);
    }

    let mut app = App::with_stores(config(&server), http, storage, None, "k")
      .await
      .unwrap();
    app.start().await;

    assert_eq!(app.lifecycle.state(), LifecycleState::Active);
  }

  #[tokio::test]
  async fn test_fetch_before_activation_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/land.html"))
      .respond_with(ResponseTemplate::new(200).set_body_string("plots"))
      .expect(2)
      .mount(&server)
      .await;
    let app = build_app(&server, None).await;

    for _ in 0..2 {
      let result = app.fetch("land.html").await.unwrap();
      assert_eq!(result.source, CacheSource::Network);
    }
  }

  #[tokio::test]
  async fn test_failed_install_is_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;
    let mut app = build_app(&server, None).await;

    app.start().await;

    assert_eq!(app.lifecycle.state(), LifecycleState::Installing);
    let output = app.handle_event(Event::Activate).await.unwrap();
    assert!(output.starts_with("Activate failed"), "{}", output);
  }

  #[tokio::test]
  async fn test_chat_round_trip_and_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/models/test-model:generateContent"))
      .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("We have plots in Lekki.")))
      .mount(&server)
      .await;
    let documents = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let mut app = build_app(&server, Some(documents.clone())).await;

    let greeting = app.handle_event(Event::History).await.unwrap();
    assert!(greeting.starts_with("Assistant: Hello!"), "{}", greeting);

    let reply = app
      .handle_event(Event::Send("Any land for sale?".to_string()))
      .await
      .unwrap();
    assert_eq!(reply, "Assistant: We have plots in Lekki.");

    // A fresh app over the same store sees the saved conversation
    let reopened = build_app(&server, Some(documents)).await;
    assert_eq!(
      reopened.transcript().await,
      "You: Any land for sale?\n\nAssistant: We have plots in Lekki."
    );
  }

  #[tokio::test]
  async fn test_quit_stops_loop() {
    let server = MockServer::start().await;
    let mut app = build_app(&server, None).await;

    assert!(app.handle_event(Event::Quit).await.is_none());
    assert!(app.should_quit);
  }
}
