//! Tool trait and built-in tool implementations.
//!
//! The agent runtime uses this crate to expose executable capabilities:
//! order lookups against the shop service and payment operations against
//! the PayLink gateway.

pub mod orders;
pub mod paylink;

pub use orders::{GetOrdersTool, OrdersClient};
pub use paylink::{PayLinkClient, StkPushTool, TransactionStatusTool};

use async_trait::async_trait;
use proto::ToolResult;

/// Trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name exposed to the LLM.
    fn name(&self) -> &str;
    /// Human-readable description for tool selection.
    fn description(&self) -> &str;
    /// JSON schema for accepted tool arguments.
    fn parameters_schema(&self) -> serde_json::Value;
    /// Executes the tool with the given call id and JSON args.
    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult;
}
