use thiserror::Error;

/// Failure of an analyzer call.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// The model answered but the answer could not be turned into a payload.
    /// The user may override and retry the full analysis.
    #[error("Could not parse analyzer response: {0}")]
    Unparseable(String),

    #[error("Analyzer request failed: {0}")]
    Provider(String),
}

impl AnalyzeError {
    pub fn offers_override(&self) -> bool {
        matches!(self, AnalyzeError::Unparseable(_))
    }
}

impl From<anyhow::Error> for AnalyzeError {
    fn from(err: anyhow::Error) -> Self {
        AnalyzeError::Provider(format!("{:#}", err))
    }
}

/// Rejection of a hand-edited cached event.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("Edited event is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Edited event is missing a name")]
    MissingName,

    #[error("No cached event for {0}")]
    NotCached(String),

    #[error("Failed to persist edit: {0}")]
    Persist(String),
}

/// Failure while replacing an event's dependents in the store. The event row
/// itself may already be updated; retry the whole sync.
#[derive(Debug, Error)]
#[error("Sync of {collection} for event #{event_id} failed: {message}")]
pub struct SyncError {
    pub event_id: i64,
    pub collection: &'static str,
    pub message: String,
}

/// Typed outcome of a failed tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{entity} '{key}' not found")]
    NotFound {
        entity: &'static str,
        key: String,
        suggestions: Vec<String>,
    },

    #[error("{0}")]
    Upstream(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::NotFound { .. } => "not_found",
            ToolError::Upstream(_) => "upstream",
        }
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::Upstream(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::InvalidArguments(err.to_string())
    }
}
