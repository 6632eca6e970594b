//! Advisory client.
//!
//! Sends the assembled context to an ordered list of OpenAI-compatible chat
//! endpoints. The first provider that returns a non-empty reply within its
//! attempt timeout wins; when every provider fails the call reports one
//! aggregated [`AdvisoryError`].

pub mod client;
pub mod error;
pub mod openai;
pub mod prompt;
pub mod provider;

pub use client::AdvisoryClient;
pub use error::{AdvisoryError, ProviderError, ProviderFailure};
pub use openai::OpenAiCompatibleProvider;
pub use prompt::PromptBuilder;
pub use provider::{AdvisoryProvider, AdvisoryReply, AdvisoryRequest, ChatMessage, Role, TokenUsage};
