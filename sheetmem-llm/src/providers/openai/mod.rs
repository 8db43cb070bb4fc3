//! OpenAI-compatible provider implementation
//!
//! Any endpoint speaking the `chat/completions` protocol works, including
//! self-hosted proxies.

pub mod client;
pub mod types;

pub use client::OpenAiChatClient;
