//! Host callbacks: confirmations, notices, view refreshes and lore.

use async_trait::async_trait;
use sheetmem_core::{EditAction, MarkedTable};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Answer to the step-by-step confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepConfirm {
    /// Not now. The piece stays waiting for a later run.
    Decline,
    Proceed,
    /// Proceed without further notices.
    ProceedSilently,
}

/// Everything the orchestrator needs from the host application.
///
/// Confirmation prompts are suspension points: the run waits for the
/// answer and a decline ends it without touching persisted state.
#[async_trait]
pub trait RefreshHooks: Send + Sync {
    /// Show rebuilt tables, change markers included, before they are committed.
    async fn confirm_tables(&self, tables: &[MarkedTable]) -> bool;

    /// Show the ordered edit batch of a refresh before it is executed.
    async fn confirm_actions(&self, actions: &[EditAction]) -> bool;

    /// Ask whether to run a step-by-step update over `pending_chars` characters of chat.
    async fn confirm_step(&self, pending_chars: usize) -> StepConfirm;

    async fn notify(&self, level: NoticeLevel, message: &str);

    /// Redraw whatever displays the sheets.
    async fn refresh_views(&self) {}

    /// World info text entries for the `$4` placeholder.
    async fn lore_entries(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Hooks that confirm everything and only log notices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentHooks;

#[async_trait]
impl RefreshHooks for SilentHooks {
    async fn confirm_tables(&self, _tables: &[MarkedTable]) -> bool {
        true
    }

    async fn confirm_actions(&self, _actions: &[EditAction]) -> bool {
        true
    }

    async fn confirm_step(&self, _pending_chars: usize) -> StepConfirm {
        StepConfirm::ProceedSilently
    }

    async fn notify(&self, level: NoticeLevel, message: &str) {
        tracing::debug!(level = ?level, message, "notice");
    }
}

// ============================================================================
// RECORDING HOOKS (For testing)
// ============================================================================

/// Hooks with fixed answers that record what the orchestrator showed.
#[derive(Debug)]
pub struct RecordingHooks {
    confirm: bool,
    step: StepConfirm,
    lore: Vec<String>,
    notices: Mutex<Vec<(NoticeLevel, String)>>,
    shown_tables: Mutex<Vec<Vec<MarkedTable>>>,
    shown_actions: Mutex<Vec<Vec<EditAction>>>,
    view_refreshes: AtomicUsize,
}

impl Default for RecordingHooks {
    fn default() -> Self {
        Self {
            confirm: true,
            step: StepConfirm::Proceed,
            lore: Vec::new(),
            notices: Mutex::new(Vec::new()),
            shown_tables: Mutex::new(Vec::new()),
            shown_actions: Mutex::new(Vec::new()),
            view_refreshes: AtomicUsize::new(0),
        }
    }
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer for table and action confirmations.
    pub fn with_confirm(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_step(mut self, step: StepConfirm) -> Self {
        self.step = step;
        self
    }

    pub fn with_lore(mut self, lore: Vec<String>) -> Self {
        self.lore = lore;
        self
    }

    pub async fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices.lock().await.clone()
    }

    /// Whether any notice at `level` was shown.
    pub async fn has_notice(&self, level: NoticeLevel) -> bool {
        self.notices.lock().await.iter().any(|(l, _)| *l == level)
    }

    pub async fn shown_tables(&self) -> Vec<Vec<MarkedTable>> {
        self.shown_tables.lock().await.clone()
    }

    pub async fn shown_actions(&self) -> Vec<Vec<EditAction>> {
        self.shown_actions.lock().await.clone()
    }

    pub fn view_refreshes(&self) -> usize {
        self.view_refreshes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RefreshHooks for RecordingHooks {
    async fn confirm_tables(&self, tables: &[MarkedTable]) -> bool {
        self.shown_tables.lock().await.push(tables.to_vec());
        self.confirm
    }

    async fn confirm_actions(&self, actions: &[EditAction]) -> bool {
        self.shown_actions.lock().await.push(actions.to_vec());
        self.confirm
    }

    async fn confirm_step(&self, _pending_chars: usize) -> StepConfirm {
        self.step
    }

    async fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices.lock().await.push((level, message.to_string()));
    }

    async fn refresh_views(&self) {
        self.view_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    async fn lore_entries(&self) -> Vec<String> {
        self.lore.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_silent_hooks_confirm_everything() {
        let hooks = SilentHooks;
        assert!(hooks.confirm_tables(&[]).await);
        assert!(hooks.confirm_actions(&[]).await);
        assert_eq!(hooks.confirm_step(10).await, StepConfirm::ProceedSilently);
        assert!(hooks.lore_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_recording_hooks_record() {
        let hooks = RecordingHooks::new().with_confirm(false);
        assert!(!hooks.confirm_actions(&[EditAction::delete(0, 1)]).await);
        hooks.notify(NoticeLevel::Info, "cancelled").await;
        hooks.refresh_views().await;
        assert_eq!(hooks.shown_actions().await, vec![vec![EditAction::delete(0, 1)]]);
        assert!(hooks.has_notice(NoticeLevel::Info).await);
        assert!(!hooks.has_notice(NoticeLevel::Error).await);
        assert_eq!(hooks.view_refreshes(), 1);
    }
}
