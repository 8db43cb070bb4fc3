//! Orchestrator settings and the layered settings resolver.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, SheetMemResult};

/// Name of the built-in rebuild template assembled from the default prompts.
pub const REBUILD_BASE: &str = "rebuild_base";

const DEFAULT_REBUILD_SYSTEM: &str = r#"[
    { role: 'system', content: 'You maintain structured memory tables for a conversation.' },
    { role: 'user', content: 'Rewrite <Current Tables> according to <Chat History>. Keep every table, its tableIndex and its columns exactly as given. Reply only with the new tables as a JSON array in the same format.\n<Chat History>\n$1\n</Chat History>\n<Current Tables>\n$0\n</Current Tables>\n<Headers>\n$2\n</Headers>\n$3' },
]"#;

const DEFAULT_REFRESH_SYSTEM: &str = "You are a table maintenance assistant. Based on <Chat History> and <Current Tables>, reply only with a JSON array of insert, update and delete operations.";

const DEFAULT_REFRESH_USER: &str = r#"<Chat History>
$1
</Chat History>

<Current Tables>
$0
</Current Tables>

Operations must be a JSON array such as
[{"action":"insert","tableIndex":0,"data":{"0":"value"}},{"action":"update","tableIndex":1,"rowIndex":3,"data":{"2":"new"}},{"action":"delete","tableIndex":0,"rowIndex":5}]
Data keys are column indices as strings. Do not use commas inside cell values; use / instead. Return [] when nothing changes."#;

const DEFAULT_STEP_BY_STEP: &str = r#"[
    { "role": "system", "content": "You are an expert in keeping conversation memory tables up to date." },
    { "role": "user", "content": "<Existing Tables>\n$0\n\n<Context>\n$1\n\n<Chat Content>\n$2\n\n<Lore>\n$4\n\n<Rules>\n$3\n\nReply with a <tableEdit> block containing insertRow, updateRow and deleteRow calls inside <!-- -->, or an empty <tableEdit></tableEdit> when nothing changes." }
]"#;

/// How a rebuild template's reply is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParseType {
    #[default]
    Json,
    /// Raw reply handed back to the host, nothing is committed.
    Text,
}

/// A named full-rebuild prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RebuildTemplate {
    pub name: String,
    /// Either a plain string or a JSON5 message array.
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt_begin: String,
    #[serde(default, rename = "parseType")]
    pub parse_type: ParseType,
}

impl RebuildTemplate {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            user_prompt_begin: String::new(),
            parse_type: ParseType::Json,
        }
    }

    pub fn with_user_prompt(mut self, user_prompt_begin: impl Into<String>) -> Self {
        self.user_prompt_begin = user_prompt_begin.into();
        self
    }

    pub fn with_parse_type(mut self, parse_type: ParseType) -> Self {
        self.parse_type = parse_type;
        self
    }
}

// ============================================================================
// TABLE SETTINGS
// ============================================================================

/// Every tunable of the refresh and rebuild flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableSettings {
    /// Number of recent messages read when no token limit applies.
    pub clear_up_stairs: usize,
    pub ignore_user_sent: bool,
    pub use_token_limit: bool,
    pub rebuild_token_limit_value: usize,
    /// Suppress deletes on every table except table 0.
    pub bool_ignore_del: bool,
    /// Skip the confirmation step before committing.
    pub bool_silent_refresh: bool,
    pub use_main_api: bool,
    pub step_by_step_use_main_api: bool,
    pub separate_read_context_layers: usize,
    pub separate_read_lorebook: bool,
    pub custom_temperature: f32,
    pub custom_max_tokens: u32,
    pub rebuild_default_system_message_template: String,
    pub rebuild_default_message_template: String,
    pub refresh_system_message_template: String,
    pub refresh_user_message_template: String,
    pub step_by_step_user_prompt: String,
    pub rebuild_message_template_list: BTreeMap<String, RebuildTemplate>,
    pub last_selected_template: String,
    pub additional_prompt: String,
    pub lazy_cooldown_ms: u64,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            clear_up_stairs: 9,
            ignore_user_sent: false,
            use_token_limit: true,
            rebuild_token_limit_value: 10000,
            bool_ignore_del: true,
            bool_silent_refresh: false,
            use_main_api: true,
            step_by_step_use_main_api: true,
            separate_read_context_layers: 1,
            separate_read_lorebook: false,
            custom_temperature: 1.0,
            custom_max_tokens: 2048,
            rebuild_default_system_message_template: DEFAULT_REBUILD_SYSTEM.to_string(),
            rebuild_default_message_template: String::new(),
            refresh_system_message_template: DEFAULT_REFRESH_SYSTEM.to_string(),
            refresh_user_message_template: DEFAULT_REFRESH_USER.to_string(),
            step_by_step_user_prompt: DEFAULT_STEP_BY_STEP.to_string(),
            rebuild_message_template_list: BTreeMap::new(),
            last_selected_template: REBUILD_BASE.to_string(),
            additional_prompt: String::new(),
            lazy_cooldown_ms: 1000,
        }
    }
}

impl TableSettings {
    pub fn from_toml_str(contents: &str) -> SheetMemResult<Self> {
        let settings: TableSettings = toml::from_str(contents).map_err(|e| ConfigError::Load {
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: &Path) -> SheetMemResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate settings values.
    pub fn validate(&self) -> SheetMemResult<()> {
        if self.use_token_limit && self.rebuild_token_limit_value == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rebuild_token_limit_value".to_string(),
                value: "0".to_string(),
                reason: "must be > 0 when use_token_limit is set".to_string(),
            }
            .into());
        }
        if !(0.0..=2.0).contains(&self.custom_temperature) {
            return Err(ConfigError::InvalidValue {
                field: "custom_temperature".to_string(),
                value: self.custom_temperature.to_string(),
                reason: "must be between 0.0 and 2.0".to_string(),
            }
            .into());
        }
        if self.refresh_user_message_template.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "refresh_user_message_template".to_string(),
            }
            .into());
        }
        if self.last_selected_template != REBUILD_BASE
            && !self
                .rebuild_message_template_list
                .contains_key(&self.last_selected_template)
        {
            return Err(ConfigError::InvalidValue {
                field: "last_selected_template".to_string(),
                value: self.last_selected_template.clone(),
                reason: "no rebuild template with that name".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Token budget for chat history, `None` when history is capped by message count.
    pub fn history_token_limit(&self) -> Option<usize> {
        self.use_token_limit.then_some(self.rebuild_token_limit_value)
    }

    /// The rebuild template currently selected.
    pub fn selected_template(&self) -> Option<RebuildTemplate> {
        self.template(&self.last_selected_template)
    }

    pub fn template(&self, name: &str) -> Option<RebuildTemplate> {
        if name == REBUILD_BASE {
            return Some(
                RebuildTemplate::new(REBUILD_BASE, self.rebuild_default_system_message_template.clone())
                    .with_user_prompt(self.rebuild_default_message_template.clone()),
            );
        }
        self.rebuild_message_template_list.get(name).cloned()
    }

    /// Name not yet used by any template, `"base (n)"` when `base` is taken.
    pub fn unique_template_name(&self, base: &str) -> String {
        let taken = |n: &str| n == REBUILD_BASE || self.rebuild_message_template_list.contains_key(n);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{} ({})", base, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Add a template under a unique name derived from its own; returns that name.
    pub fn create_template(&mut self, mut template: RebuildTemplate) -> String {
        let name = self.unique_template_name(&template.name);
        template.name = name.clone();
        self.rebuild_message_template_list.insert(name.clone(), template);
        self.last_selected_template = name.clone();
        name
    }

    /// Replace an existing template. The base template is not editable.
    pub fn modify_template(&mut self, template: RebuildTemplate) -> SheetMemResult<()> {
        if template.name == REBUILD_BASE || !self.rebuild_message_template_list.contains_key(&template.name) {
            return Err(ConfigError::InvalidValue {
                field: "rebuild_message_template_list".to_string(),
                value: template.name,
                reason: "template cannot be modified".to_string(),
            }
            .into());
        }
        self.rebuild_message_template_list
            .insert(template.name.clone(), template);
        Ok(())
    }

    /// Remove a template and fall back to the base selection.
    pub fn delete_template(&mut self, name: &str) -> SheetMemResult<RebuildTemplate> {
        let removed = self
            .rebuild_message_template_list
            .remove(name)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "rebuild_message_template_list".to_string(),
                value: name.to_string(),
                reason: "template cannot be deleted".to_string(),
            })?;
        if self.last_selected_template == name {
            self.last_selected_template = REBUILD_BASE.to_string();
        }
        Ok(removed)
    }

    pub fn export_template(&self, name: &str) -> SheetMemResult<String> {
        let template = self
            .rebuild_message_template_list
            .get(name)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "rebuild_message_template_list".to_string(),
                value: name.to_string(),
                reason: "template cannot be exported".to_string(),
            })?;
        serde_json::to_string_pretty(template).map_err(|e| {
            ConfigError::Load {
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn import_template(&mut self, json: &str) -> SheetMemResult<String> {
        let template: RebuildTemplate = serde_json::from_str(json).map_err(|e| ConfigError::Load {
            reason: e.to_string(),
        })?;
        Ok(self.create_template(template))
    }
}

// ============================================================================
// LAYERED RESOLVER
// ============================================================================

/// Resolves settings from the user store, then the legacy store, then defaults.
///
/// A value found only in the legacy store is migrated into the user store
/// when it is read. Defaults are never written back.
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    primary: Map<String, Value>,
    legacy: Map<String, Value>,
    defaults: Map<String, Value>,
    allow_empty: bool,
    migrated: Vec<String>,
}

impl SettingsResolver {
    pub fn new(primary: Map<String, Value>, legacy: Map<String, Value>) -> Self {
        let defaults = match serde_json::to_value(TableSettings::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            primary,
            legacy,
            defaults,
            allow_empty: false,
            migrated: Vec::new(),
        }
    }

    /// Whether a key missing from every layer resolves to `None` instead of an error.
    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }

    pub fn resolve_value(&mut self, key: &str) -> SheetMemResult<Option<Value>> {
        if let Some(value) = self.primary.get(key) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = self.legacy.get(key).cloned() {
            tracing::info!(key, "Migrating legacy setting into user settings");
            self.primary.insert(key.to_string(), value.clone());
            self.migrated.push(key.to_string());
            return Ok(Some(value));
        }
        if let Some(value) = self.defaults.get(key) {
            return Ok(Some(value.clone()));
        }
        if self.allow_empty {
            return Ok(None);
        }
        Err(ConfigError::MissingRequired {
            field: key.to_string(),
        }
        .into())
    }

    /// Typed lookup through the layers.
    pub fn resolve<T: DeserializeOwned>(&mut self, key: &str) -> SheetMemResult<Option<T>> {
        let Some(value) = self.resolve_value(key)? else {
            return Ok(None);
        };
        serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            ConfigError::InvalidValue {
                field: key.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Write to the user store only.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.primary.insert(key.into(), value);
    }

    /// Keys copied from the legacy store so far.
    pub fn migrated(&self) -> &[String] {
        &self.migrated
    }

    pub fn primary(&self) -> &Map<String, Value> {
        &self.primary
    }

    /// Resolve every known setting into a validated [`TableSettings`].
    pub fn into_settings(mut self) -> SheetMemResult<TableSettings> {
        let keys: Vec<String> = self.defaults.keys().cloned().collect();
        let mut resolved = Map::new();
        for key in keys {
            if let Some(value) = self.resolve_value(&key)? {
                resolved.insert(key, value);
            }
        }
        let settings: TableSettings =
            serde_json::from_value(Value::Object(resolved)).map_err(|e| ConfigError::Load {
                reason: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }
}
