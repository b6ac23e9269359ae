use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR: &str = "offline-assistant";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the site is served from. Manifest paths resolve against it and
  /// only responses from this origin are cached.
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub assistant: AssistantConfig,
  #[serde(default)]
  pub identity: IdentityConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache generation name, bumped on every deployment
  #[serde(default = "default_generation")]
  pub generation: String,
  /// Resource paths captured at install time
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      generation: default_generation(),
      manifest: default_manifest(),
    }
  }
}

fn default_generation() -> String {
  "asotabsicon-v1".to_string()
}

fn default_manifest() -> Vec<String> {
  [
    "/",
    "index.html",
    "styles.css",
    "script.js",
    "properties.html",
    "property-detail.html",
    "contact.html",
    "land.html",
    "commercial.html",
    "about.html",
    "valuation.html",
    "login.html",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
  /// Base URL of the generation API (without the model path)
  #[serde(default = "default_api_url")]
  pub api_url: String,
  #[serde(default = "default_model")]
  pub model: String,
  #[serde(default = "default_system_instruction")]
  pub system_instruction: String,
  /// Shown when a conversation has no stored history. Never persisted.
  #[serde(default = "default_greeting")]
  pub greeting: String,
}

impl Default for AssistantConfig {
  fn default() -> Self {
    Self {
      api_url: default_api_url(),
      model: default_model(),
      system_instruction: default_system_instruction(),
      greeting: default_greeting(),
    }
  }
}

fn default_api_url() -> String {
  "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
  "gemini-2.5-flash-preview-09-2025".to_string()
}

fn default_system_instruction() -> String {
  "You are Asotabsicon AI Assistant, a professional and helpful real estate and land \
   investment consultant. Your goal is to assist website visitors with property inquiries, \
   market information, and company services (like valuation and consultation). Keep responses \
   concise, professional, and focus on encouraging users to browse listings or schedule a \
   consultation. Use Google Search grounding for real-time market data or property information \
   when appropriate."
    .to_string()
}

fn default_greeting() -> String {
  "Hello! I am Asotabsicon AI Assistant. How can I help you find your next property or \
   investment opportunity today? You can ask about our featured listings or general market trends."
    .to_string()
}

/// Identity handed to us by the host's auth layer. Either part may be missing
/// while provisioning is still pending.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
  pub app_id: Option<String>,
  pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
  /// Delay unit multiplied by 2^attempt
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
  /// Upper bound (exclusive) of the uniform jitter added to each delay
  #[serde(default = "default_jitter_ms")]
  pub jitter_ms: u64,
  /// Rate-limited attempts that are retried before giving up
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      base_delay_ms: default_base_delay_ms(),
      jitter_ms: default_jitter_ms(),
      max_retries: default_max_retries(),
    }
  }
}

fn default_base_delay_ms() -> u64 {
  1000
}

fn default_jitter_ms() -> u64 {
  1000
}

fn default_max_retries() -> u32 {
  5
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Store conversation history on disk
  #[serde(default = "default_true")]
  pub enabled: bool,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self { enabled: true }
  }
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-assistant.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-assistant/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-assistant/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-assistant.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.generation.trim().is_empty() {
      return Err(eyre!("cache.generation must not be empty"));
    }
    Ok(config)
  }

  /// Get the generation API key from environment variables.
  ///
  /// Checks OFFLINE_ASSISTANT_API_KEY first, then GEMINI_API_KEY. A missing
  /// key is not an error: some hosts inject credentials at the proxy.
  pub fn get_api_key() -> String {
    std::env::var("OFFLINE_ASSISTANT_API_KEY")
      .or_else(|_| std::env::var("GEMINI_API_KEY"))
      .unwrap_or_default()
  }

  /// Directory holding the cache and conversation databases and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_DIR))
  }
}
