//! sheetmem Refresh - Rebuild and Incremental Orchestration
//!
//! Drives one run of a memory update against the conversation snapshot:
//!
//! ```text
//! snapshot → serialize → prompt ($0..$4) → model → clean/parse → diff/confirm → commit
//! ```
//!
//! Three entry points share that pipeline:
//! - [`Orchestrator::rebuild_tables`] asks the model for complete new tables
//! - [`Orchestrator::refresh_tables`] asks for a JSON array of edit actions
//! - [`Orchestrator::incremental_update_from_summary`] asks for `<tableEdit>`
//!   blocks, and [`Orchestrator::two_step_summary`] wraps it with swipe tracking
//!
//! A run assumes it is the only writer of its conversation from reading the
//! snapshot until it commits. The lazy gate only collapses repeated triggers
//! of the same operation; it does not lock anything.

use sheetmem_context::estimate_token_count;
use sheetmem_core::{ChatMessage, LlmError, SheetMemResult, TableSettings};
use sheetmem_llm::{ModelRegistry, ModelReply, ModelRoute};
use sheetmem_storage::ConversationStore;
use std::sync::Arc;

pub mod apply;
pub mod commit;
pub mod diff;
pub mod export;
pub mod gate;
pub mod hooks;
pub mod incremental;
pub mod rebuild;
pub mod telemetry;
pub mod two_step;

pub use apply::{execute_actions, ExecutionGuards, ExecutionReport};
pub use commit::{apply_rebuilt_tables, CommitTarget};
pub use diff::compare_and_mark_changes;
pub use export::{export_all_tables_as_json, get_all_tables, ExportedTable, NamedTable};
pub use gate::LazyGate;
pub use hooks::{NoticeLevel, RecordingHooks, RefreshHooks, SilentHooks, StepConfirm};
pub use telemetry::{init_tracing, LogFormat};

// ============================================================================
// RUN OUTCOME
// ============================================================================

/// Terminal state of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    /// Changes were committed (or there was nothing to change).
    Success,
    /// The model call was cancelled by the user.
    Suspended,
    /// The user declined a confirmation. Nothing was written.
    Declined,
    /// Another call of the same operation ran within the cooldown.
    Throttled,
    /// Raw model text from a rebuild template that is not parsed into tables.
    Text(String),
}

impl RefreshStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshStatus::Success)
    }
}

/// Per-call overrides of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// History text to send instead of the recent chat.
    pub chat_override: Option<String>,
    /// Skip the confirmation step. Defaults to `bool_silent_refresh`.
    pub silent: Option<bool>,
    /// Rebuild template name. Defaults to `last_selected_template`.
    pub template: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty override is the same as none.
    pub fn with_chat(mut self, chat: impl Into<String>) -> Self {
        let chat = chat.into();
        self.chat_override = (!chat.is_empty()).then_some(chat);
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = Some(silent);
        self
    }

    pub fn with_template(mut self, name: impl Into<String>) -> Self {
        self.template = Some(name.into());
        self
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Runs rebuilds and incremental updates for one conversation.
pub struct Orchestrator {
    pub(crate) settings: TableSettings,
    pub(crate) models: ModelRegistry,
    pub(crate) store: Arc<dyn ConversationStore>,
    pub(crate) hooks: Arc<dyn RefreshHooks>,
    pub(crate) gate: LazyGate,
}

impl Orchestrator {
    /// Create an orchestrator that confirms everything silently.
    ///
    /// The gate cooldown is taken from `settings.lazy_cooldown_ms`.
    pub fn new(settings: TableSettings, models: ModelRegistry, store: Arc<dyn ConversationStore>) -> Self {
        let gate = LazyGate::from_millis(settings.lazy_cooldown_ms);
        Self {
            settings,
            models,
            store,
            hooks: Arc::new(SilentHooks),
            gate,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RefreshHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn settings(&self) -> &TableSettings {
        &self.settings
    }

    pub fn store(&self) -> &dyn ConversationStore {
        self.store.as_ref()
    }

    /// Whether a run should skip its confirmation step.
    pub(crate) fn is_silent(&self, options: &RunOptions) -> bool {
        options.silent.unwrap_or(self.settings.bool_silent_refresh)
    }

    /// Send `messages` to the model serving `route`.
    ///
    /// # Returns
    /// * `Ok(Some(text))` - The reply
    /// * `Ok(None)` - The call was suspended by the user
    ///
    /// # Errors
    /// The model's own error, or `LlmError::EmptyResponse` for a blank reply.
    pub(crate) async fn call_model(
        &self,
        route: ModelRoute,
        messages: &[ChatMessage],
    ) -> SheetMemResult<Option<String>> {
        let model = self.models.route(route)?;
        let prompt_tokens: usize = messages.iter().map(|m| estimate_token_count(&m.content)).sum();
        tracing::debug!(
            route = route.as_str(),
            model = model.model_id(),
            messages = messages.len(),
            prompt_tokens,
            "Calling model"
        );
        match model.complete(messages).await? {
            ModelReply::Suspended => Ok(None),
            ModelReply::Text(text) if text.trim().is_empty() => Err(LlmError::EmptyResponse.into()),
            ModelReply::Text(text) => Ok(Some(text)),
        }
    }

    /// Surface the end of a run to the user.
    pub(crate) async fn finish(
        &self,
        operation: &str,
        result: SheetMemResult<RefreshStatus>,
    ) -> SheetMemResult<RefreshStatus> {
        match &result {
            Ok(RefreshStatus::Suspended) | Ok(RefreshStatus::Declined) => {
                tracing::info!(operation, "Run cancelled");
                self.hooks.notify(NoticeLevel::Info, "Operation cancelled").await;
            }
            Err(e) => {
                tracing::error!(operation, error = %e, "Run failed");
                self.hooks
                    .notify(NoticeLevel::Error, &format!("{} failed: {}", operation, e))
                    .await;
            }
            Ok(_) => {}
        }
        result
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("models", &self.models)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmem_llm::MockChatModel;
    use sheetmem_storage::InMemoryConversationStore;

    fn orchestrator(model: MockChatModel) -> Orchestrator {
        Orchestrator::new(
            TableSettings::default(),
            ModelRegistry::new().with_main(Arc::new(model)),
            Arc::new(InMemoryConversationStore::new()),
        )
    }

    #[test]
    fn test_run_options() {
        let options = RunOptions::new().with_chat("").with_silent(true);
        assert_eq!(options.chat_override, None);
        assert_eq!(RunOptions::new().with_chat("x").chat_override.as_deref(), Some("x"));
        let orchestrator = orchestrator(MockChatModel::new());
        assert!(orchestrator.is_silent(&options));
        assert!(!orchestrator.is_silent(&RunOptions::new()));
    }

    #[tokio::test]
    async fn test_call_model_outcomes() {
        let orchestrator = orchestrator(
            MockChatModel::new()
                .with_reply("ok")
                .with_suspended()
                .with_reply("  \n"),
        );
        let prompt = [ChatMessage::user("x")];
        assert_eq!(
            orchestrator.call_model(ModelRoute::Main, &prompt).await.unwrap(),
            Some("ok".to_string())
        );
        assert_eq!(orchestrator.call_model(ModelRoute::Main, &prompt).await.unwrap(), None);
        assert!(orchestrator.call_model(ModelRoute::Main, &prompt).await.is_err());
        assert!(orchestrator.call_model(ModelRoute::Custom, &prompt).await.is_err());
    }
}
