//! Tool call review types for the human-in-the-loop approval gate.
//!
//! The runtime consults an [`ApprovalPolicy`] before executing any tool
//! call. Tools with an [`InterruptRule`] are suspended until the configured
//! [`ReviewHandler`] returns a [`ReviewDecision`]; all other tools execute
//! without review.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The kind of decision a reviewer may return for a gated tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    /// Execute the call with its original arguments.
    Approve,
    /// Do not execute the call.
    Reject,
    /// Execute the call with reviewer-supplied arguments.
    Edit,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::Approve => write!(f, "approve"),
            DecisionKind::Reject => write!(f, "reject"),
            DecisionKind::Edit => write!(f, "edit"),
        }
    }
}

/// A reviewer's decision on one suspended tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    /// Proceed with the original arguments.
    Approve,
    /// Abort the call; the agent sees a failed tool result.
    Reject,
    /// Proceed with the given replacement arguments.
    Edit(serde_json::Value),
}

impl ReviewDecision {
    /// Returns the decision kind, which is what an [`InterruptRule`] constrains.
    pub fn kind(&self) -> DecisionKind {
        match self {
            ReviewDecision::Approve => DecisionKind::Approve,
            ReviewDecision::Reject => DecisionKind::Reject,
            ReviewDecision::Edit(_) => DecisionKind::Edit,
        }
    }
}

/// The decisions a reviewer may return for one gated tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRule {
    /// Allowed decision kinds. A decision of any other kind fails closed.
    pub allowed_decisions: Vec<DecisionKind>,
}

impl InterruptRule {
    /// Creates a rule allowing exactly the given decision kinds.
    pub fn new(allowed: impl IntoIterator<Item = DecisionKind>) -> Self {
        Self {
            allowed_decisions: allowed.into_iter().collect(),
        }
    }

    /// Rule allowing all three decisions (approve, reject, edit).
    pub fn all_decisions() -> Self {
        Self::new([
            DecisionKind::Approve,
            DecisionKind::Reject,
            DecisionKind::Edit,
        ])
    }

    /// Returns whether the rule permits a decision of the given kind.
    pub fn allows(&self, kind: DecisionKind) -> bool {
        self.allowed_decisions.contains(&kind)
    }
}

/// Which tools are gated, and how review requests are presented.
///
/// Built once at agent construction; looked up by tool name on every
/// tool call attempt.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    description_prefix: String,
    rules: HashMap<String, InterruptRule>,
}

impl ApprovalPolicy {
    /// Creates an empty policy with the given review description prefix.
    pub fn new(description_prefix: impl Into<String>) -> Self {
        Self {
            description_prefix: description_prefix.into(),
            rules: HashMap::new(),
        }
    }

    /// Adds an interrupt rule for the named tool.
    pub fn with_rule(mut self, tool_name: impl Into<String>, rule: InterruptRule) -> Self {
        self.rules.insert(tool_name.into(), rule);
        self
    }

    /// Returns the rule for the named tool, if it is gated.
    pub fn rule(&self, tool_name: &str) -> Option<&InterruptRule> {
        self.rules.get(tool_name)
    }

    /// Returns whether the named tool requires review before execution.
    pub fn is_gated(&self, tool_name: &str) -> bool {
        self.rules.contains_key(tool_name)
    }

    /// Returns the review description prefix.
    pub fn description_prefix(&self) -> &str {
        &self.description_prefix
    }

    /// Returns the names of all gated tools, sorted.
    pub fn gated_tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// One suspended tool call presented to a human reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// Tool-call identifier from the LLM.
    pub call_id: String,
    /// Name of the tool to be executed.
    pub tool_name: String,
    /// Proposed JSON arguments for the tool call.
    pub arguments: serde_json::Value,
    /// Decisions the reviewer may return, from the tool's rule.
    pub allowed_decisions: Vec<DecisionKind>,
    /// Rendered description: policy prefix plus the proposed call.
    pub description: String,
}

impl ReviewRequest {
    /// Builds a review request, rendering the description from the policy
    /// prefix and the proposed call.
    pub fn new(
        description_prefix: &str,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        allowed_decisions: Vec<DecisionKind>,
    ) -> Self {
        let call_id = call_id.into();
        let tool_name = tool_name.into();
        let rendered_args =
            serde_json::to_string_pretty(&arguments).unwrap_or_else(|_| arguments.to_string());
        let description = format!("{description_prefix}\n\nTool: {tool_name}\n{rendered_args}");
        Self {
            call_id,
            tool_name,
            arguments,
            allowed_decisions,
            description,
        }
    }
}

/// Handler consulted for every gated tool call.
///
/// Implementations present the request to a reviewer and wait for their
/// decision. The runtime validates the returned decision against the
/// tool's [`InterruptRule`]; a disallowed decision fails closed.
#[async_trait]
pub trait ReviewHandler: Send + Sync {
    /// Requests a decision on a suspended tool call.
    async fn request_review(&self, req: ReviewRequest) -> ReviewDecision;
}

/// Handler that approves every request without asking.
///
/// Used by tests and by setups whose policy gates nothing.
pub struct AutoApproveHandler;

#[async_trait]
impl ReviewHandler for AutoApproveHandler {
    async fn request_review(&self, _req: ReviewRequest) -> ReviewDecision {
        ReviewDecision::Approve
    }
}

/// Handler that rejects every request without asking.
///
/// Used when no reviewer is available (`run --no-input`): gated calls
/// fail closed instead of silently executing.
pub struct RejectAllHandler;

#[async_trait]
impl ReviewHandler for RejectAllHandler {
    async fn request_review(&self, _req: ReviewRequest) -> ReviewDecision {
        ReviewDecision::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_kind_matches_decision() {
        assert_eq!(ReviewDecision::Approve.kind(), DecisionKind::Approve);
        assert_eq!(ReviewDecision::Reject.kind(), DecisionKind::Reject);
        assert_eq!(
            ReviewDecision::Edit(serde_json::json!({"amount": 50})).kind(),
            DecisionKind::Edit
        );
    }

    #[test]
    fn decision_kind_serializes_lowercase() {
        let rendered = serde_json::to_string(&DecisionKind::Edit).expect("serialize");
        assert_eq!(rendered, "\"edit\"");
        let parsed: DecisionKind = serde_json::from_str("\"approve\"").expect("parse");
        assert_eq!(parsed, DecisionKind::Approve);
    }

    #[test]
    fn rule_allows_only_listed_kinds() {
        let rule = InterruptRule::new([DecisionKind::Approve, DecisionKind::Reject]);
        assert!(rule.allows(DecisionKind::Approve));
        assert!(rule.allows(DecisionKind::Reject));
        assert!(!rule.allows(DecisionKind::Edit));
    }

    #[test]
    fn all_decisions_rule_allows_everything() {
        let rule = InterruptRule::all_decisions();
        assert!(rule.allows(DecisionKind::Approve));
        assert!(rule.allows(DecisionKind::Reject));
        assert!(rule.allows(DecisionKind::Edit));
    }

    #[test]
    fn policy_gates_only_configured_tools() {
        let policy = ApprovalPolicy::new("Please review:")
            .with_rule("stk_push", InterruptRule::all_decisions());

        assert!(policy.is_gated("stk_push"));
        assert!(!policy.is_gated("get_orders"));
        assert!(policy.rule("stk_push").is_some());
        assert!(policy.rule("get_orders").is_none());
        assert_eq!(policy.gated_tools(), vec!["stk_push"]);
    }

    #[test]
    fn empty_policy_gates_nothing() {
        let policy = ApprovalPolicy::default();
        assert!(!policy.is_gated("stk_push"));
        assert!(policy.gated_tools().is_empty());
    }

    #[test]
    fn review_request_renders_prefix_and_call() {
        let req = ReviewRequest::new(
            "Please review the following payment request and decide what to do:",
            "call-1",
            "stk_push",
            serde_json::json!({"phone_number": "254712345678", "amount": 100}),
            InterruptRule::all_decisions().allowed_decisions,
        );
        assert_eq!(req.call_id, "call-1");
        assert_eq!(req.tool_name, "stk_push");
        assert_eq!(req.allowed_decisions.len(), 3);
        assert!(req.description.starts_with("Please review"));
        assert!(req.description.contains("Tool: stk_push"));
        assert!(req.description.contains("254712345678"));
    }

    #[tokio::test]
    async fn auto_approve_handler_always_approves() {
        let req = ReviewRequest::new(
            "p",
            "c1",
            "stk_push",
            serde_json::json!({}),
            vec![DecisionKind::Approve],
        );
        let decision = AutoApproveHandler.request_review(req).await;
        assert_eq!(decision, ReviewDecision::Approve);
    }

    #[tokio::test]
    async fn reject_all_handler_always_rejects() {
        let req = ReviewRequest::new(
            "p",
            "c1",
            "stk_push",
            serde_json::json!({}),
            vec![DecisionKind::Reject],
        );
        let decision = RejectAllHandler.request_review(req).await;
        assert_eq!(decision, ReviewDecision::Reject);
    }
}
