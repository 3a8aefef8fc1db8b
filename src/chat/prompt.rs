use serde::{Deserialize, Serialize};

/// Kind of AI request. The serialized names are the server's wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptType {
    /// Natural language to SQL, streamed straight into the editor
    #[serde(rename = "NL_2_SQL")]
    NlToSql,
    #[serde(rename = "SQL_EXPLAIN")]
    Explain,
    #[serde(rename = "SQL_OPTIMIZER")]
    Optimize,
    /// Convert SQL between dialects
    #[serde(rename = "SQL_2_SQL")]
    Convert,
    #[serde(rename = "ChatRobot")]
    Chat,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::NlToSql => "NL_2_SQL",
            PromptType::Explain => "SQL_EXPLAIN",
            PromptType::Optimize => "SQL_OPTIMIZER",
            PromptType::Convert => "SQL_2_SQL",
            PromptType::Chat => "ChatRobot",
        }
    }

    /// Parse a CLI-friendly name (`nl2sql`, `explain`, ...) or a wire value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "nl2sql" | "nl_to_sql" | "nl_2_sql" => Some(PromptType::NlToSql),
            "explain" | "sql_explain" => Some(PromptType::Explain),
            "optimize" | "sql_optimizer" => Some(PromptType::Optimize),
            "convert" | "sql_2_sql" => Some(PromptType::Convert),
            "chat" | "chatrobot" => Some(PromptType::Chat),
            _ => None,
        }
    }

    /// NL-to-SQL frames carry the full translation so far and replace the
    /// editor content; every other type streams deltas into the side panel.
    pub fn streams_into_editor(&self) -> bool {
        matches!(self, PromptType::NlToSql)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PromptType::NlToSql => "Natural language to SQL",
            PromptType::Explain => "Explain SQL",
            PromptType::Optimize => "Optimize SQL",
            PromptType::Convert => "Convert SQL",
            PromptType::Chat => "Chat",
        }
    }
}

impl std::fmt::Display for PromptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// One submission to the chat endpoint. Never mutated after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub message: String,
    pub prompt_type: PromptType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    pub table_names: Vec<String>,
}

impl PromptRequest {
    /// Query-string pairs for the GET variant of the chat endpoint.
    ///
    /// Absent fields are omitted; table names are comma-joined.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("message", self.message.clone()),
            ("promptType", self.prompt_type.as_str().to_string()),
        ];
        if let Some(id) = self.data_source_id {
            pairs.push(("dataSourceId", id.to_string()));
        }
        if let Some(ref name) = self.database_name {
            pairs.push(("databaseName", name.clone()));
        }
        if let Some(ref name) = self.schema_name {
            pairs.push(("schemaName", name.clone()));
        }
        if !self.table_names.is_empty() {
            pairs.push(("tableNames", self.table_names.join(",")));
        }
        pairs
    }
}
