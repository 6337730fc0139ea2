use thiserror::Error;

use crate::approval::DecisionKind;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// LLM provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool registration/execution error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Review/approval gate error.
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    /// Database/migration error.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// LLM provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Remote API failure.
    #[error("{0}")]
    Api(String),

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Runtime exceeded configured tool-call rounds.
    #[error("Max tool rounds exceeded")]
    MaxToolRoundsExceeded,

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Tool execution errors
#[derive(Debug, Error)]
pub enum ToolError {
    /// Requested tool is unknown.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Tool process or operation failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool call arguments are invalid.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Review/approval gate errors.
///
/// Every variant means the gated tool call did not execute.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Reviewer returned a decision kind the tool's rule does not permit.
    #[error("Decision '{decision}' is not permitted for tool '{tool}'")]
    DecisionNotAllowed { tool: String, decision: DecisionKind },

    /// Review channel closed before a decision was made.
    #[error("Review aborted before a decision was made")]
    ReviewAborted,

    /// No decision arrived within the configured deadline.
    #[error("Review timed out after {0}s")]
    Timeout(u64),
}

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLx operation error.
    #[error("SQLx error: {0}")]
    Sqlx(String),

    /// Migration execution error.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid role string value.
    #[error("Invalid role: {0}")]
    InvalidRole(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_config_error_variant() {
        let err = ConfigError::MissingField("paylink.api_key".to_string());
        assert!(err.to_string().contains("Missing required field"));
    }

    #[test]
    fn wraps_llm_error_into_top_level_error() {
        let err: Error = LlmError::MaxToolRoundsExceeded.into();
        assert!(err.to_string().contains("Max tool rounds exceeded"));
    }

    #[test]
    fn wraps_tool_and_approval_errors() {
        let tool_err: Error = ToolError::InvalidArgs("missing phone_number".to_string()).into();
        assert!(tool_err.to_string().contains("Tool error"));

        let approval_err: Error = ApprovalError::DecisionNotAllowed {
            tool: "stk_push".to_string(),
            decision: DecisionKind::Edit,
        }
        .into();
        let rendered = approval_err.to_string();
        assert!(rendered.contains("Approval error"));
        assert!(rendered.contains("'edit'"));
        assert!(rendered.contains("'stk_push'"));
    }

    #[test]
    fn wraps_database_and_proto_errors() {
        let db_err: Error = DatabaseError::Migration("bad sql".to_string()).into();
        assert!(db_err.to_string().contains("Database error"));

        let proto_err: Error = ProtoError::InvalidRole("owner".to_string()).into();
        assert!(proto_err.to_string().contains("Proto error"));
    }

    #[test]
    fn approval_timeout_renders_seconds() {
        let err = ApprovalError::Timeout(30);
        assert!(err.to_string().contains("30s"));
    }
}
