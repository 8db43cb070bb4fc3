//! sheetmem LLM - Chat Model Boundary
//!
//! Provider-agnostic trait for the chat completion call every refresh makes,
//! a registry that routes a run to the main or custom model, multi-key
//! rotation and a scripted mock for tests.

use async_trait::async_trait;
use sheetmem_core::{ChatMessage, ConfigError, LlmError, SheetMemResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod providers;

pub use providers::openai::OpenAiChatClient;

// ============================================================================
// CHAT MODEL TRAIT
// ============================================================================

/// Outcome of a completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    Text(String),
    /// The user cancelled while the request was in flight.
    Suspended,
}

/// Trait for chat completion providers.
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct LocalModel { /* ... */ }
///
/// #[async_trait]
/// impl ChatModel for LocalModel {
///     async fn complete(&self, messages: &[ChatMessage]) -> SheetMemResult<ModelReply> {
///         // Call the model
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion over an ordered message list.
    ///
    /// # Arguments
    /// * `messages` - Prompt messages in order
    ///
    /// # Returns
    /// * `Ok(ModelReply::Text)` - The reply text
    /// * `Ok(ModelReply::Suspended)` - The call was cancelled by the user
    /// * `Err(SheetMemError::Llm)` - If the call fails
    async fn complete(&self, messages: &[ChatMessage]) -> SheetMemResult<ModelReply>;

    /// Identifier of the model behind this provider.
    fn model_id(&self) -> &str;
}

// ============================================================================
// MODEL REGISTRY
// ============================================================================

/// Which configured model serves a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRoute {
    /// The host application's own model.
    Main,
    /// The separately configured OpenAI-compatible endpoint.
    Custom,
}

impl ModelRoute {
    pub fn from_flag(use_main_api: bool) -> Self {
        if use_main_api {
            Self::Main
        } else {
            Self::Custom
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Custom => "custom",
        }
    }
}

/// Models available to the orchestrator.
/// Models must be explicitly registered.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    main: Option<Arc<dyn ChatModel>>,
    custom: Option<Arc<dyn ChatModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_main(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.main = Some(model);
        self
    }

    pub fn with_custom(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.custom = Some(model);
        self
    }

    /// The model registered for `route`.
    ///
    /// # Errors
    /// `LlmError::ProviderNotConfigured` when nothing is registered for it.
    pub fn route(&self, route: ModelRoute) -> SheetMemResult<Arc<dyn ChatModel>> {
        let model = match route {
            ModelRoute::Main => self.main.clone(),
            ModelRoute::Custom => self.custom.clone(),
        };
        model.ok_or_else(|| {
            LlmError::ProviderNotConfigured {
                route: route.as_str().to_string(),
            }
            .into()
        })
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("main", &self.main.as_ref().map(|m| m.model_id().to_string()))
            .field("custom", &self.custom.as_ref().map(|m| m.model_id().to_string()))
            .finish()
    }
}

// ============================================================================
// KEY ROTATION
// ============================================================================

/// Spreads requests over several API keys.
///
/// Each request starts at the key after the one the previous request
/// started with and tries every key at most once. Only transport or API
/// failures move on to the next key; a suspended reply is returned as is.
pub struct KeyRotatingModel {
    models: Vec<Arc<dyn ChatModel>>,
    next: AtomicUsize,
    model_id: String,
}

impl KeyRotatingModel {
    /// Build one client per key of a comma separated key list.
    ///
    /// # Errors
    /// `ConfigError::MissingRequired` when the list holds no key.
    pub fn from_key_list<F>(keys: &str, factory: F) -> SheetMemResult<Self>
    where
        F: Fn(&str) -> Arc<dyn ChatModel>,
    {
        let models: Vec<Arc<dyn ChatModel>> = keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(factory)
            .collect();
        Self::from_models(models)
    }

    /// # Errors
    /// `ConfigError::MissingRequired` when `models` is empty.
    pub fn from_models(models: Vec<Arc<dyn ChatModel>>) -> SheetMemResult<Self> {
        let Some(first) = models.first() else {
            return Err(ConfigError::MissingRequired {
                field: "api_key".to_string(),
            }
            .into());
        };
        let model_id = first.model_id().to_string();
        Ok(Self {
            models,
            next: AtomicUsize::new(0),
            model_id,
        })
    }

    pub fn key_count(&self) -> usize {
        self.models.len()
    }
}

#[async_trait]
impl ChatModel for KeyRotatingModel {
    async fn complete(&self, messages: &[ChatMessage]) -> SheetMemResult<ModelReply> {
        let attempts = self.models.len();
        let mut last_error = String::from("unknown error");
        for _ in 0..attempts {
            let index = self.next.fetch_add(1, Ordering::Relaxed) % attempts;
            tracing::debug!(key_index = index, total = attempts, "calling model");
            match self.models[index].complete(messages).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    tracing::warn!(key_index = index, error = %e, "model call failed, trying next key");
                    last_error = e.to_string();
                }
            }
        }
        Err(LlmError::AllKeysFailed {
            attempts,
            last_error,
        }
        .into())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl std::fmt::Debug for KeyRotatingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotatingModel")
            .field("keys", &self.models.len())
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// MOCK MODEL (For testing)
// ============================================================================

/// Scripted model for tests.
///
/// Replies are handed out in order and every prompt is recorded. When the
/// script runs out the call fails with an invalid response error.
#[derive(Debug, Default)]
pub struct MockChatModel {
    replies: Mutex<VecDeque<SheetMemResult<ModelReply>>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(ModelReply::Text(text.into())))
    }

    pub fn with_suspended(self) -> Self {
        self.push(Ok(ModelReply::Suspended))
    }

    pub fn with_error(self, error: LlmError) -> Self {
        self.push(Err(error.into()))
    }

    fn push(mut self, reply: SheetMemResult<ModelReply>) -> Self {
        self.replies.get_mut().push_back(reply);
        self
    }

    /// Every prompt received so far.
    pub async fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.prompts.lock().await.len()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> SheetMemResult<ModelReply> {
        self.prompts.lock().await.push(messages.to_vec());
        self.replies.lock().await.pop_front().unwrap_or_else(|| {
            Err(LlmError::InvalidResponse {
                provider: "mock".to_string(),
                reason: "no scripted reply left".to_string(),
            }
            .into())
        })
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmem_core::SheetMemError;

    fn failing(status: u16) -> Arc<dyn ChatModel> {
        Arc::new(MockChatModel::new().with_error(LlmError::RequestFailed {
            provider: "mock".to_string(),
            status,
            message: format!("status {}", status),
        }))
    }

    #[tokio::test]
    async fn test_mock_replays_script_and_records_prompts() {
        let mock = MockChatModel::new().with_reply("one").with_suspended();
        let prompt = vec![ChatMessage::user("hi")];
        assert_eq!(mock.complete(&prompt).await.unwrap(), ModelReply::Text("one".to_string()));
        assert_eq!(mock.complete(&prompt).await.unwrap(), ModelReply::Suspended);
        assert!(mock.complete(&prompt).await.is_err());
        assert_eq!(mock.call_count().await, 3);
        assert_eq!(mock.prompts().await[0], prompt);
    }

    #[tokio::test]
    async fn test_registry_routes() {
        let registry = ModelRegistry::new().with_main(Arc::new(MockChatModel::new()));
        assert!(registry.route(ModelRoute::Main).is_ok());
        let err = registry.route(ModelRoute::Custom).err().unwrap();
        assert!(matches!(
            err,
            SheetMemError::Llm(LlmError::ProviderNotConfigured { ref route }) if route == "custom"
        ));
        assert_eq!(ModelRoute::from_flag(false), ModelRoute::Custom);
    }

    #[tokio::test]
    async fn test_rotation_falls_through_to_working_key() {
        let ok: Arc<dyn ChatModel> = Arc::new(MockChatModel::new().with_reply("done"));
        let model = KeyRotatingModel::from_models(vec![failing(500), ok]).unwrap();
        let reply = model.complete(&[ChatMessage::user("x")]).await.unwrap();
        assert_eq!(reply, ModelReply::Text("done".to_string()));
    }

    #[tokio::test]
    async fn test_rotation_reports_all_keys_failed() {
        let model = KeyRotatingModel::from_models(vec![failing(401), failing(503)]).unwrap();
        let err = model.complete(&[ChatMessage::user("x")]).await.unwrap_err();
        match err {
            SheetMemError::Llm(LlmError::AllKeysFailed { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rotation_advances_start_key() {
        let a = Arc::new(MockChatModel::new().with_reply("a"));
        let b = Arc::new(MockChatModel::new().with_reply("b"));
        let models: Vec<Arc<dyn ChatModel>> = vec![a.clone(), b.clone()];
        let model = KeyRotatingModel::from_models(models).unwrap();
        let prompt = [ChatMessage::user("x")];
        assert_eq!(model.complete(&prompt).await.unwrap(), ModelReply::Text("a".to_string()));
        assert_eq!(model.complete(&prompt).await.unwrap(), ModelReply::Text("b".to_string()));
        assert_eq!(a.call_count().await, 1);
        assert_eq!(b.call_count().await, 1);
    }

    #[test]
    fn test_key_list_parsing() {
        let model = KeyRotatingModel::from_key_list(" k1, ,k2,", |_| {
            Arc::new(MockChatModel::new()) as Arc<dyn ChatModel>
        })
        .unwrap();
        assert_eq!(model.key_count(), 2);
        assert!(KeyRotatingModel::from_key_list(" , ", |_| {
            Arc::new(MockChatModel::new()) as Arc<dyn ChatModel>
        })
        .is_err());
    }
}
