//! Full rebuild: the model rewrites every enabled table at once.

use sheetmem_context::{
    headers_json, sheets_to_tables, tables_to_string, HistoryWindow, Placeholders, PromptTemplate,
    Substitution,
};
use sheetmem_core::{preview, ConfigError, ParseType, SheetMemResult};
use sheetmem_llm::ModelRoute;
use sheetmem_parse::{parse_rebuild_tables, FATAL_PREVIEW_CHARS};
use tracing::Instrument;

use crate::commit::{apply_rebuilt_tables, CommitTarget};
use crate::diff::compare_and_mark_changes;
use crate::hooks::NoticeLevel;
use crate::{Orchestrator, RefreshStatus, RunOptions};

const OPERATION: &str = "rebuild_tables";

impl Orchestrator {
    /// Regenerate every enabled table from the recent chat.
    ///
    /// Placeholders: `$0` the tables as compact JSON, `$1` the chat history,
    /// `$2` the header-only schema, `$3` the additional prompt.
    ///
    /// # Returns
    /// * `Ok(RefreshStatus::Success)` - New tables committed to the current piece
    /// * `Ok(RefreshStatus::Text)` - The template asks for the raw reply
    /// * `Ok(RefreshStatus::Suspended | Declined | Throttled)` - Nothing written
    ///
    /// # Errors
    /// No snapshot, unknown template, model failure, or a reply no repair
    /// stage can read as a table array.
    pub async fn rebuild_tables(&self, options: RunOptions) -> SheetMemResult<RefreshStatus> {
        if !self.gate.try_pass(OPERATION).await {
            return Ok(RefreshStatus::Throttled);
        }
        let template_name = options
            .template
            .clone()
            .unwrap_or_else(|| self.settings.last_selected_template.clone());
        let span = tracing::info_span!("rebuild_tables", template = %template_name);
        let result = self.run_rebuild(&template_name, &options).instrument(span).await;
        self.finish("Rebuild", result).await
    }

    async fn run_rebuild(
        &self,
        template_name: &str,
        options: &RunOptions,
    ) -> SheetMemResult<RefreshStatus> {
        let mut sheets = self.store.latest_sheets().await?;
        let positions: Vec<usize> = sheets
            .iter()
            .enumerate()
            .filter(|(_, sheet)| sheet.enable)
            .map(|(i, _)| i)
            .collect();
        let enabled: Vec<_> = positions.iter().map(|i| sheets[*i].clone()).collect();
        let old_tables = sheets_to_tables(&enabled);

        let history = match &options.chat_override {
            Some(chat) => chat.clone(),
            None => HistoryWindow::from_settings(&self.settings).select(&self.store.chat().await?),
        };

        let template = self.settings.template(template_name).ok_or_else(|| ConfigError::InvalidValue {
            field: "last_selected_template".to_string(),
            value: template_name.to_string(),
            reason: "no rebuild template with that name".to_string(),
        })?;

        let placeholders = Placeholders::new()
            .with(0, tables_to_string(&old_tables))
            .with(1, history)
            .with(2, headers_json(&old_tables))
            .with(3, self.settings.additional_prompt.clone());
        let user_prompt = placeholders.apply(&template.user_prompt_begin, Substitution::Global);
        let messages = PromptTemplate::parse(&template.system_prompt)
            .render(&placeholders, Substitution::Global)
            .into_messages(Some(user_prompt));

        let route = ModelRoute::from_flag(self.settings.use_main_api);
        let Some(raw) = self.call_model(route, &messages).await? else {
            return Ok(RefreshStatus::Suspended);
        };

        if template.parse_type == ParseType::Text {
            tracing::info!(chars = raw.len(), "Returning raw rebuild text");
            return Ok(RefreshStatus::Text(raw));
        }

        let tables = parse_rebuild_tables(&raw).map_err(|e| {
            tracing::error!(preview = %preview(&raw, FATAL_PREVIEW_CHARS), "Rebuild reply unreadable");
            e
        })?;

        let mut marked = compare_and_mark_changes(&old_tables, &tables);
        for (table, old) in marked.iter_mut().zip(&old_tables) {
            table.table.table_name = old.table_name.clone();
        }

        if !self.is_silent(options) && !self.hooks.confirm_tables(&marked).await {
            return Ok(RefreshStatus::Declined);
        }

        let rebuilt: Vec<_> = marked.into_iter().map(|m| m.table).collect();
        let replaced = apply_rebuilt_tables(&mut sheets, &positions, &rebuilt);
        CommitTarget::current(self.store.as_ref())
            .await?
            .commit(self.store.as_ref(), &sheets)
            .await?;

        tracing::info!(tables = replaced, "Rebuilt tables");
        self.hooks.refresh_views().await;
        self.hooks.notify(NoticeLevel::Success, "Tables rebuilt").await;
        Ok(RefreshStatus::Success)
    }
}
