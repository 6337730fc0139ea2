//! Agent runtime, memory layer, and LLM adapter interfaces.

pub mod llm;
pub mod memory;
pub mod runtime;
pub mod tool_registry;

/// Chat request/response models and provider interfaces.
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, OpenAiProvider, TokenUsage};
/// SQLite-backed conversation memory implementation.
pub use memory::SqliteMemory;
/// Main runtime orchestration loop with the approval gate.
pub use runtime::AgentRuntime;
/// Runtime tool registry.
pub use tool_registry::ToolRegistry;
