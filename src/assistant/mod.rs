pub mod api_types;
pub mod chat;
pub mod client;
pub mod error;
pub mod retry;

pub use chat::ChatSession;
pub use client::{AssistantClient, Exchange};
pub use retry::BackoffPolicy;
