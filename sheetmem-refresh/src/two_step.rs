//! Step-by-step trigger with swipe tracking.
//!
//! Each piece remembers, per swipe, which step-by-step runs already
//! processed it (`two_step_links`) and whether it is still waiting for one
//! (`two_step_waiting`).

use sheetmem_core::{SheetMemResult, StorageError};
use sheetmem_parse::strip_message_tags;

use crate::commit::CommitTarget;
use crate::hooks::{NoticeLevel, StepConfirm};
use crate::{Orchestrator, RefreshStatus};

impl Orchestrator {
    /// Run a step-by-step update for the current piece.
    ///
    /// Asks the host first. A decline marks the current swipe as waiting.
    /// Otherwise the piece's own snapshot is undone, so the update starts
    /// from the previous version, and the update runs against the piece; on
    /// success the swipe is linked as executed.
    ///
    /// # Errors
    /// `StorageError::NoCurrentPiece` when there is no piece to update, plus
    /// every error of [`Orchestrator::incremental_update_from_summary`].
    pub async fn two_step_summary(&self) -> SheetMemResult<RefreshStatus> {
        let Some((index, mut piece)) = self.store.current_piece().await? else {
            let err = StorageError::NoCurrentPiece;
            self.hooks.notify(NoticeLevel::Error, &err.to_string()).await;
            return Err(err.into());
        };
        let summary = strip_message_tags(&piece.mes);
        let swipe_uid = piece.swipe_uid();

        let quiet = match self.hooks.confirm_step(summary.chars().count()).await {
            StepConfirm::Decline => {
                tracing::info!(piece = index, swipe = %swipe_uid, "Step-by-step declined");
                piece.mark_waiting(&swipe_uid);
                self.store.save_piece(index, piece).await?;
                return Ok(RefreshStatus::Declined);
            }
            StepConfirm::Proceed => false,
            StepConfirm::ProceedSilently => {
                self.hooks
                    .notify(NoticeLevel::Info, "Step-by-step update running in the background")
                    .await;
                true
            }
        };

        if piece.has_sheets() {
            piece.hash_sheets = None;
            tracing::info!(piece = index, "Undid piece snapshot before step-by-step update");
            if !quiet {
                self.hooks
                    .notify(NoticeLevel::Success, "Tables restored to the previous version")
                    .await;
            }
        }
        self.store.save_piece(index, piece).await?;

        let status = self.incremental_update(&summary, index, quiet).await?;
        if status.is_success() {
            let mut target = CommitTarget::at(self.store.as_ref(), index).await?;
            target.piece.link_executed(&swipe_uid);
            target.persist(self.store.as_ref()).await?;
            tracing::info!(piece = index, swipe = %swipe_uid, "Linked step-by-step run");
        }
        Ok(status)
    }
}
