//! Incremental updates: the model answers with edits instead of tables.

use sheetmem_context::{
    refresh_table_text, sheets_to_tables, step_table_text, HistoryWindow, Placeholders,
    PromptTemplate, Substitution,
};
use sheetmem_core::{EditAction, Sheet, SheetMemResult};
use sheetmem_llm::ModelRoute;
use sheetmem_parse::{dedup_and_order, parse_action_array, parse_table_edit};
use sheetmem_rows::WaitingTables;
use tracing::Instrument;

use crate::apply::{execute_actions, ExecutionGuards};
use crate::commit::CommitTarget;
use crate::hooks::NoticeLevel;
use crate::{Orchestrator, RefreshStatus, RunOptions};

const REFRESH_OPERATION: &str = "refresh_tables";
const STEP_OPERATION: &str = "incremental_update";

impl Orchestrator {
    /// Ask the model for a JSON array of edits and apply them.
    ///
    /// Placeholders: `$0` the readable table block, `$1` the last
    /// `clear_up_stairs` messages. Edits are deduplicated and ordered
    /// (deletes last, highest row first), shown for confirmation unless the
    /// run is silent, then executed against the current piece.
    ///
    /// # Errors
    /// No snapshot, no current piece, model failure, or a reply with no
    /// readable action array.
    pub async fn refresh_tables(&self, options: RunOptions) -> SheetMemResult<RefreshStatus> {
        if !self.gate.try_pass(REFRESH_OPERATION).await {
            return Ok(RefreshStatus::Throttled);
        }
        let span = tracing::info_span!("refresh_tables");
        let result = self.run_refresh(&options).instrument(span).await;
        self.finish("Refresh", result).await
    }

    async fn run_refresh(&self, options: &RunOptions) -> SheetMemResult<RefreshStatus> {
        let sheets = self.store.latest_sheets().await?;
        let chat = self.store.chat().await?;

        let history = match &options.chat_override {
            Some(text) => text.clone(),
            None => HistoryWindow::new(self.settings.clear_up_stairs)
                .with_ignore_user_sent(self.settings.ignore_user_sent)
                .select(&chat),
        };
        let placeholders = Placeholders::new()
            .with(0, refresh_table_text(&sheets, &chat))
            .with(1, history);
        let system = placeholders.apply(
            &self.settings.refresh_system_message_template,
            Substitution::Global,
        );
        let user = placeholders.apply(
            &self.settings.refresh_user_message_template,
            Substitution::Global,
        );
        let messages = PromptTemplate::Text(system).into_messages(Some(user));

        let route = ModelRoute::from_flag(self.settings.step_by_step_use_main_api);
        let Some(raw) = self.call_model(route, &messages).await? else {
            return Ok(RefreshStatus::Suspended);
        };

        let actions = parse_action_array(&raw)?;
        let actions = dedup_and_order(actions, &sheets_to_tables(&sheets));

        if !self.is_silent(options) && !self.hooks.confirm_actions(&actions).await {
            return Ok(RefreshStatus::Declined);
        }

        let target = CommitTarget::current(self.store.as_ref()).await?;
        let guards = ExecutionGuards::strict(self.settings.bool_ignore_del);
        self.execute_into(target, sheets, &actions, guards).await?;

        if self.settings.bool_ignore_del {
            self.hooks
                .notify(
                    NoticeLevel::Info,
                    "Delete protection is on, deletes outside table 0 were ignored",
                )
                .await;
        }
        self.hooks.refresh_views().await;
        self.hooks.notify(NoticeLevel::Success, "Table refresh complete").await;
        Ok(RefreshStatus::Success)
    }

    /// Step-by-step update of the piece at `piece_index` from `summary`.
    ///
    /// Uses the `step_by_step_user_prompt` message array with placeholders
    /// `$0` the table block with edit rules, `$1` the last
    /// `separate_read_context_layers` non-user messages, `$2` the summary
    /// text, `$3` the additional prompt and `$4` the lore entries. A
    /// placeholder preceded by a backslash is left as it is. The reply is
    /// read as `<tableEdit>` blocks, falling back to a JSON action array;
    /// a reply with no edits at all is a success that changes nothing.
    ///
    /// # Errors
    /// Invalid prompt template, no snapshot, no such piece or model failure.
    pub async fn incremental_update_from_summary(
        &self,
        summary: &str,
        piece_index: usize,
    ) -> SheetMemResult<RefreshStatus> {
        self.incremental_update(summary, piece_index, false).await
    }

    pub(crate) async fn incremental_update(
        &self,
        summary: &str,
        piece_index: usize,
        quiet: bool,
    ) -> SheetMemResult<RefreshStatus> {
        if !self.gate.try_pass(STEP_OPERATION).await {
            return Ok(RefreshStatus::Throttled);
        }
        let span = tracing::info_span!("incremental_update", piece = piece_index);
        let result = self
            .run_incremental(summary, piece_index, quiet)
            .instrument(span)
            .await;
        self.finish("Step-by-step update", result).await
    }

    async fn run_incremental(
        &self,
        summary: &str,
        piece_index: usize,
        quiet: bool,
    ) -> SheetMemResult<RefreshStatus> {
        let template = PromptTemplate::parse_message_array(&self.settings.step_by_step_user_prompt)?;
        let target = CommitTarget::at(self.store.as_ref(), piece_index).await?;
        let sheets = self.store.latest_sheets().await?;
        let chat = self.store.chat().await?;

        let context = HistoryWindow::new(self.settings.separate_read_context_layers)
            .with_ignore_user_sent(true)
            .select(&chat);
        let lore = if self.settings.separate_read_lorebook {
            self.hooks.lore_entries().await.join("\n")
        } else {
            String::new()
        };
        let placeholders = Placeholders::new()
            .with(0, step_table_text(&sheets, &chat))
            .with(1, context)
            .with(2, summary)
            .with(3, self.settings.additional_prompt.clone())
            .with(4, lore);
        let messages = template
            .render(&placeholders, Substitution::SkipEscaped)
            .into_messages(None);

        let route = ModelRoute::from_flag(self.settings.step_by_step_use_main_api);
        let Some(raw) = self.call_model(route, &messages).await? else {
            return Ok(RefreshStatus::Suspended);
        };

        let actions = read_step_actions(&raw);
        if actions.is_empty() {
            tracing::info!("Reply carried no edits");
            if !quiet {
                self.hooks
                    .notify(NoticeLevel::Info, "No table edits returned, tables unchanged")
                    .await;
            }
            return Ok(RefreshStatus::Success);
        }
        let actions = dedup_and_order(actions, &sheets_to_tables(&sheets));

        let guards = ExecutionGuards::lenient(self.settings.bool_ignore_del);
        self.execute_into(target, sheets, &actions, guards).await?;

        self.hooks.refresh_views().await;
        if !quiet {
            self.hooks.notify(NoticeLevel::Success, "Step-by-step update complete").await;
        }
        Ok(RefreshStatus::Success)
    }

    /// Execute `actions` over `sheets` and persist the result into `target`.
    async fn execute_into(
        &self,
        target: CommitTarget,
        sheets: Vec<Sheet>,
        actions: &[EditAction],
        guards: ExecutionGuards,
    ) -> SheetMemResult<()> {
        let CommitTarget {
            index,
            piece,
            context,
        } = target;
        let mut waiting = WaitingTables::from_sheets(sheets, context, Some(piece));
        execute_actions(&mut waiting, actions, guards);
        waiting.save_all();

        let (_, context, piece) = waiting.into_parts();
        let Some(piece) = piece else {
            return Ok(());
        };
        CommitTarget {
            index,
            piece,
            context,
        }
        .persist(self.store.as_ref())
        .await?;
        tracing::info!(piece = index, actions = actions.len(), "Committed edits");
        Ok(())
    }
}

/// Edits of a step-by-step reply: `<tableEdit>` blocks, else a JSON action array.
fn read_step_actions(raw: &str) -> Vec<EditAction> {
    let actions = parse_table_edit(raw);
    if !actions.is_empty() {
        return actions;
    }
    parse_action_array(raw).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "No JSON action array in reply");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmem_core::ActionKind;

    #[test]
    fn test_read_step_actions_prefers_table_edit() {
        let raw = "<tableEdit>\n<!--\ndeleteRow(0, 1)\n-->\n</tableEdit>\n[{\"action\":\"delete\",\"tableIndex\":1,\"rowIndex\":0}]";
        assert_eq!(read_step_actions(raw), vec![EditAction::delete(0, 1)]);
    }

    #[test]
    fn test_read_step_actions_falls_back_to_json() {
        let raw = r#"[{"action":"insert","tableIndex":0,"data":{"0":"a"}}]"#;
        let actions = read_step_actions(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Insert);
    }

    #[test]
    fn test_read_step_actions_empty_on_prose() {
        assert!(read_step_actions("Nothing changed in this scene.").is_empty());
        assert!(read_step_actions("<tableEdit>\n<!--\n-->\n</tableEdit>").is_empty());
    }
}
