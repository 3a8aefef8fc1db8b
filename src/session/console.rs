//! Console session data: identity, execution context and table selection

use serde::{Deserialize, Serialize};

use crate::chat::prompt::{PromptRequest, PromptType};
use crate::session::SessionId;

/// Selecting more tables than this surfaces a warning (but is allowed).
pub const DEFAULT_TABLE_SOFT_LIMIT: usize = 8;

/// Where prompts are evaluated: data source, database and schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub data_source_id: Option<i64>,
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
}

impl ExecutionContext {
    pub fn new(data_source_id: i64) -> Self {
        Self {
            data_source_id: Some(data_source_id),
            ..Self::default()
        }
    }

    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    pub fn with_schema(mut self, name: impl Into<String>) -> Self {
        self.schema_name = Some(name.into());
        self
    }
}

/// Result of changing the table selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelection {
    /// Number of tables now selected
    pub selected: usize,
    /// Requested names that are not known tables (ignored)
    pub ignored: Vec<String>,
    /// Whether the selection exceeds the soft limit
    pub over_soft_limit: bool,
}

/// One console instance and the state prompts are built from.
#[derive(Debug, Clone)]
pub struct ConsoleSession {
    id: SessionId,
    context: ExecutionContext,
    known_tables: Vec<String>,
    selected_tables: Vec<String>,
    table_soft_limit: usize,
}

impl ConsoleSession {
    pub fn new(context: ExecutionContext) -> Self {
        Self::with_id(SessionId::new(), context)
    }

    pub fn with_id(id: SessionId, context: ExecutionContext) -> Self {
        Self {
            id,
            context,
            known_tables: Vec::new(),
            selected_tables: Vec::new(),
            table_soft_limit: DEFAULT_TABLE_SOFT_LIMIT,
        }
    }

    pub fn with_table_soft_limit(mut self, limit: usize) -> Self {
        self.table_soft_limit = limit;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn set_context(&mut self, context: ExecutionContext) {
        self.context = context;
    }

    pub fn known_tables(&self) -> &[String] {
        &self.known_tables
    }

    pub fn selected_tables(&self) -> &[String] {
        &self.selected_tables
    }

    pub fn table_soft_limit(&self) -> usize {
        self.table_soft_limit
    }

    /// Replace the known table list. Every known table becomes selected.
    pub fn set_known_tables(&mut self, tables: Vec<String>) -> TableSelection {
        self.known_tables = dedupe(tables);
        let all = self.known_tables.clone();
        self.select_tables(all)
    }

    /// Replace the selection. Unknown names are dropped so the selection
    /// stays a subset of the known tables; order of first mention is kept.
    pub fn select_tables(&mut self, tables: Vec<String>) -> TableSelection {
        let (selected, ignored): (Vec<_>, Vec<_>) = dedupe(tables)
            .into_iter()
            .partition(|name| self.known_tables.contains(name));

        if !ignored.is_empty() {
            tracing::debug!(
                session_id = %self.id,
                ignored = ?ignored,
                "Ignoring unknown tables in selection"
            );
        }

        let over_soft_limit = selected.len() > self.table_soft_limit;
        if over_soft_limit {
            tracing::warn!(
                session_id = %self.id,
                selected = selected.len(),
                limit = self.table_soft_limit,
                "Table selection exceeds soft limit"
            );
        }

        self.selected_tables = selected;
        TableSelection {
            selected: self.selected_tables.len(),
            ignored,
            over_soft_limit,
        }
    }

    /// Build an immutable request from the current context and selection.
    pub fn build_prompt(&self, prompt_type: PromptType, message: impl Into<String>) -> PromptRequest {
        PromptRequest {
            message: message.into(),
            prompt_type,
            data_source_id: self.context.data_source_id,
            database_name: self.context.database_name.clone(),
            schema_name: self.context.schema_name.clone(),
            table_names: self.selected_tables.clone(),
        }
    }
}

fn dedupe(names: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}
