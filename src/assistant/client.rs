//! Generation API client. Rate-limited sends back off and retry; any other
//! failure ends the send with an apology appended to the log.

use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, StatusCode};
use tracing::{error, info, warn};
use url::Url;

use crate::assistant::api_types::{GenerateRequest, GenerateResponse};
use crate::assistant::error::HardFailure;
use crate::assistant::retry::{AttemptOutcome, BackoffPolicy, RetryAttempt};
use crate::config::AssistantConfig;
use crate::conversation::{ConversationLog, Message};

/// Shown to the user when a send fails for good.
pub const APOLOGY: &str = "Sorry, I'm currently unable to connect to the assistant. Please try \
                           again later or contact our support team directly.";

/// Outcome of one logical call to the generation service.
#[derive(Debug, Clone)]
pub struct Generation {
  pub reply: std::result::Result<Message, HardFailure>,
  pub attempts: Vec<RetryAttempt>,
}

/// Outcome of `send`: the reply, the updated working log and how it went.
#[derive(Debug, Clone)]
pub struct Exchange {
  pub reply: Message,
  pub log: ConversationLog,
  pub attempts: Vec<RetryAttempt>,
  /// Set when the reply is the synthesized apology
  pub failure: Option<HardFailure>,
}

impl Exchange {
  pub fn is_success(&self) -> bool {
    self.failure.is_none()
  }
}

/// Generation API client retrying rate-limited calls with backoff.
#[derive(Clone)]
pub struct AssistantClient {
  http: Client,
  endpoint: Url,
  system_instruction: String,
  policy: BackoffPolicy,
}

impl AssistantClient {
  pub fn new(
    http: Client,
    config: &AssistantConfig,
    api_key: &str,
    policy: BackoffPolicy,
  ) -> Result<Self> {
    let endpoint = format!(
      "{}/models/{}:generateContent",
      config.api_url.trim_end_matches('/'),
      config.model
    );
    let mut endpoint =
      Url::parse(&endpoint).map_err(|e| eyre!("Invalid assistant endpoint {}: {}", endpoint, e))?;
    endpoint.query_pairs_mut().append_pair("key", api_key);

    Ok(Self {
      http,
      endpoint,
      system_instruction: config.system_instruction.clone(),
      policy,
    })
  }

  /// Append `message` to a working copy of `log`, ask the service for a
  /// reply and append that (or an apology) too. Never fails: hard failures
  /// are reported in `Exchange::failure`.
  pub async fn send(&self, message: &str, log: &ConversationLog) -> Exchange {
    let mut working = log.clone();
    working.push(Message::user(message));

    let generation = self.generate(working.messages()).await;

    let (reply, failure) = match generation.reply {
      Ok(reply) => (reply, None),
      Err(failure) => {
        error!(error = %failure, "assistant request failed");
        (Message::model(APOLOGY), Some(failure))
      }
    };
    working.push(reply.clone());

    Exchange {
      reply,
      log: working,
      attempts: generation.attempts,
      failure,
    }
  }

  /// POST the transcript, retrying only on 429 until the policy gives up.
  /// The payload is built once and reused for every attempt.
  pub async fn generate(&self, contents: &[Message]) -> Generation {
    let body = GenerateRequest::new(contents, &self.system_instruction);
    let mut attempts = Vec::new();
    let mut attempt: u32 = 0;

    loop {
      let response = match self.http.post(self.endpoint.clone()).json(&body).send().await {
        Ok(response) => response,
        Err(e) => {
          attempts.push(RetryAttempt::finished(attempt, AttemptOutcome::HardFailure));
          return Generation {
            reply: Err(HardFailure::Transport(e.without_url().to_string())),
            attempts,
          };
        }
      };

      let status = response.status();

      if status == StatusCode::TOO_MANY_REQUESTS {
        if self.policy.should_retry(attempt) {
          let delay = self.policy.delay_for(attempt);
          warn!(attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
          attempts.push(RetryAttempt::rate_limited(attempt, delay));
          tokio::time::sleep(delay).await;
          attempt += 1;
          continue;
        }

        attempts.push(RetryAttempt::finished(attempt, AttemptOutcome::HardFailure));
        return Generation {
          reply: Err(HardFailure::RetriesExhausted {
            attempts: attempt + 1,
          }),
          attempts,
        };
      }

      if !status.is_success() {
        attempts.push(RetryAttempt::finished(attempt, AttemptOutcome::HardFailure));
        return Generation {
          reply: Err(HardFailure::Status(status.as_u16())),
          attempts,
        };
      }

      let parsed: GenerateResponse = match response.json().await {
        Ok(parsed) => parsed,
        Err(e) => {
          attempts.push(RetryAttempt::finished(attempt, AttemptOutcome::HardFailure));
          return Generation {
            reply: Err(HardFailure::InvalidResponse(e.without_url().to_string())),
            attempts,
          };
        }
      };

      attempts.push(RetryAttempt::finished(attempt, AttemptOutcome::Success));
      info!(attempts = attempts.len(), "assistant replied");
      return Generation {
        reply: Ok(parsed.into_reply()),
        attempts,
      };
    }
  }
}
