use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tool call requested by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool-call identifier assigned by the LLM (or generated locally).
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments for the call.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call with a freshly generated id.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// Tool declaration advertised to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description used for tool selection.
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Creates a tool definition from name, description, and schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Result of one tool call execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool-call identifier this result answers.
    pub call_id: String,
    /// Name of the executed tool.
    pub tool_name: String,
    /// Text output returned to the LLM.
    pub output: String,
    /// Whether the execution failed.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: output.into(),
            is_error: false,
        }
    }

    /// Creates a failed tool result.
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: output.into(),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_new_generates_unique_ids() {
        let a = ToolCall::new("get_orders", serde_json::json!({"order_id": "ord-1"}));
        let b = ToolCall::new("get_orders", serde_json::json!({"order_id": "ord-1"}));
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "get_orders");
        assert_eq!(a.arguments["order_id"], "ord-1");
    }

    #[test]
    fn tool_definition_holds_schema() {
        let def = ToolDefinition::new(
            "stk_push",
            "Initiate an M-Pesa STK push",
            serde_json::json!({"type": "object"}),
        );
        assert_eq!(def.name, "stk_push");
        assert_eq!(def.parameters["type"], "object");
    }

    #[test]
    fn tool_result_constructors_set_error_flag() {
        let ok = ToolResult::success("c1", "get_orders", "[]");
        assert!(!ok.is_error);
        assert_eq!(ok.call_id, "c1");
        assert_eq!(ok.tool_name, "get_orders");

        let err = ToolResult::error("c2", "stk_push", "gateway unreachable");
        assert!(err.is_error);
        assert_eq!(err.output, "gateway unreachable");
    }

    #[test]
    fn tool_call_serde_round_trip() {
        let call = ToolCall::new("stk_push", serde_json::json!({"amount": 150}));
        let raw = serde_json::to_string(&call).expect("serialize");
        let parsed: ToolCall = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(parsed, call);
    }
}
