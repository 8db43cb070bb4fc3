//! Chat model provider implementations
//!
//! Concrete [`ChatModel`](crate::ChatModel) implementations for remote
//! chat completion services.

pub mod openai;

pub use openai::OpenAiChatClient;

use sheetmem_core::{LlmError, SheetMemError};

pub(crate) fn request_failed(
    provider: &str,
    status: u16,
    message: impl Into<String>,
) -> SheetMemError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
    .into()
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> SheetMemError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
    .into()
}
