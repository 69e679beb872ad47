//! HTTP adapters for the embedding service and the pattern judge
//!
//! - `client`: chat completions over an OpenAI-compatible endpoint
//! - `embedding`: [`HttpEmbedder`] over an Ollama-compatible endpoint
//! - `judge`: [`LlmPatternJudge`], the model backing `ModelBasedValidator`

mod client;
mod embedding;
mod judge;
mod types;

pub use client::{LlmClient, LlmClientBuilder};
pub use embedding::HttpEmbedder;
pub use judge::{LlmPatternJudge, parse_score};
pub use types::{ChatRequest, ChatResponse, Choice, Message, MessageRole, Usage};
