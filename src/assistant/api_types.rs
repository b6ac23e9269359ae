//! Serde types matching the generation API.
//!
//! These types are separate from the transcript types so client-only fields
//! (like sources) never leak into requests.

use serde::{Deserialize, Serialize};

use crate::conversation::{Message, Role, Source};

/// Shown when the service answers but provides no usable text.
pub const NO_SUITABLE_RESPONSE: &str =
  "I apologize, I ran into an issue finding a suitable response.";

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest<'a> {
  pub contents: Vec<ApiContent<'a>>,
  pub tools: Vec<ApiTool>,
  pub system_instruction: ApiSystemInstruction<'a>,
}

impl<'a> GenerateRequest<'a> {
  pub fn new(messages: &'a [Message], system_instruction: &'a str) -> Self {
    Self {
      contents: messages.iter().map(ApiContent::from).collect(),
      tools: vec![ApiTool::google_search()],
      system_instruction: ApiSystemInstruction {
        parts: vec![ApiTextPart {
          text: system_instruction,
        }],
      },
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ApiContent<'a> {
  pub role: Role,
  pub parts: Vec<ApiTextPart<'a>>,
}

impl<'a> From<&'a Message> for ApiContent<'a> {
  fn from(message: &'a Message) -> Self {
    Self {
      role: message.role,
      parts: message
        .parts
        .iter()
        .map(|p| ApiTextPart { text: &p.text })
        .collect(),
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ApiTextPart<'a> {
  pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ApiTool {
  pub google_search: EmptyObject,
}

impl ApiTool {
  pub fn google_search() -> Self {
    Self {
      google_search: EmptyObject {},
    }
  }
}

#[derive(Debug, Serialize)]
pub struct EmptyObject {}

#[derive(Debug, Serialize)]
pub struct ApiSystemInstruction<'a> {
  pub parts: Vec<ApiTextPart<'a>>,
}

// ============================================================================
// Response
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct GenerateResponse {
  #[serde(default)]
  pub candidates: Vec<ApiCandidate>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiCandidate {
  pub content: Option<ApiResponseContent>,
  pub grounding_metadata: Option<ApiGroundingMetadata>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiResponseContent {
  #[serde(default)]
  pub parts: Vec<ApiResponsePart>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiResponsePart {
  pub text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroundingMetadata {
  #[serde(default)]
  pub grounding_attributions: Vec<ApiAttribution>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiAttribution {
  pub web: Option<ApiWeb>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiWeb {
  pub uri: Option<String>,
  pub title: Option<String>,
}

impl GenerateResponse {
  /// Convert into the model reply: text of the first candidate plus every
  /// attribution that has both a uri and a title.
  pub fn into_reply(self) -> Message {
    let Some(candidate) = self.candidates.into_iter().next() else {
      return Message::model(NO_SUITABLE_RESPONSE);
    };

    let text = candidate
      .content
      .and_then(|c| c.parts.into_iter().next())
      .and_then(|p| p.text)
      .filter(|t| !t.is_empty());

    let Some(text) = text else {
      return Message::model(NO_SUITABLE_RESPONSE);
    };

    let sources = candidate
      .grounding_metadata
      .map(|meta| {
        meta
          .grounding_attributions
          .into_iter()
          .filter_map(|a| a.web)
          .filter_map(|web| match (web.uri, web.title) {
            (Some(uri), Some(title)) if !uri.is_empty() && !title.is_empty() => {
              Some(Source { uri, title })
            }
            _ => None,
          })
          .collect()
      })
      .unwrap_or_default();

    Message::model(text).with_sources(sources)
  }
}
