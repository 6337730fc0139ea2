//! Shared protocol types for the agent runtime, tools, and CLI.
//!
//! This crate defines serializable message/tool structures, the review
//! types backing the payment approval gate, and strongly-typed error
//! enums shared across the workspace.

pub mod approval;
pub mod error;
pub mod message;
pub mod tool;

/// Re-export of review/approval gate types.
pub use approval::{
    ApprovalPolicy, AutoApproveHandler, DecisionKind, InterruptRule, RejectAllHandler,
    ReviewDecision, ReviewHandler, ReviewRequest,
};
/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of conversation/message identity types.
pub use message::{AgentMessage, ChannelId, Role, SessionId};
/// Re-export of tool call definition and result types.
pub use tool::{ToolCall, ToolDefinition, ToolResult};
