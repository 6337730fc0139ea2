//! Console review handler — prompts the human reviewer in the terminal.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use proto::{ApprovalError, DecisionKind, ReviewDecision, ReviewHandler, ReviewRequest};
use tracing::warn;

/// Tool approval handler for the terminal.
///
/// Renders the review description on stdout and reads the decision from
/// stdin. The runtime is suspended on this handler while the reviewer
/// decides; a closed stdin rejects the call.
pub struct ConsoleReviewHandler;

#[async_trait]
impl ReviewHandler for ConsoleReviewHandler {
    async fn request_review(&self, req: ReviewRequest) -> ReviewDecision {
        // Stdin reads are blocking; keep them off the async executor.
        let result = tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            prompt_for_decision(&req, &mut input, &mut output)
        })
        .await;

        match result {
            Ok(decision) => decision,
            Err(_) => {
                warn!("{}", ApprovalError::ReviewAborted);
                ReviewDecision::Reject
            }
        }
    }
}

/// Runs the prompt loop until the reviewer enters an allowed decision.
///
/// EOF or a read error rejects the call.
fn prompt_for_decision(
    req: &ReviewRequest,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> ReviewDecision {
    let _ = writeln!(output, "\n{}", req.description);

    loop {
        let _ = write!(output, "{} > ", decision_prompt(&req.allowed_decisions));
        let _ = output.flush();

        let Some(line) = read_line(input) else {
            warn!("{}", ApprovalError::ReviewAborted);
            return ReviewDecision::Reject;
        };

        match parse_decision_input(&line, &req.allowed_decisions) {
            Some(DecisionKind::Approve) => return ReviewDecision::Approve,
            Some(DecisionKind::Reject) => return ReviewDecision::Reject,
            Some(DecisionKind::Edit) => {
                let _ = write!(output, "Replacement arguments (JSON) > ");
                let _ = output.flush();
                let Some(json_line) = read_line(input) else {
                    warn!("{}", ApprovalError::ReviewAborted);
                    return ReviewDecision::Reject;
                };
                match serde_json::from_str(&json_line) {
                    Ok(value) => return ReviewDecision::Edit(value),
                    Err(e) => {
                        let _ = writeln!(output, "Invalid JSON ({e}); try again.");
                    }
                }
            }
            None => {
                let _ = writeln!(output, "Unrecognized choice.");
            }
        }
    }
}

/// Reads one trimmed line; `None` on EOF or read error.
fn read_line(input: &mut impl BufRead) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Maps reviewer input to a decision kind when that kind is allowed.
fn parse_decision_input(input: &str, allowed: &[DecisionKind]) -> Option<DecisionKind> {
    let kind = match input.to_ascii_lowercase().as_str() {
        "a" | "approve" | "y" | "yes" => DecisionKind::Approve,
        "r" | "reject" | "n" | "no" => DecisionKind::Reject,
        "e" | "edit" => DecisionKind::Edit,
        _ => return None,
    };
    allowed.contains(&kind).then_some(kind)
}

/// Renders the choice prompt from the allowed decision kinds, in a stable
/// approve/reject/edit order.
fn decision_prompt(allowed: &[DecisionKind]) -> String {
    let mut parts = Vec::new();
    for (kind, label) in [
        (DecisionKind::Approve, "[a]pprove"),
        (DecisionKind::Reject, "[r]eject"),
        (DecisionKind::Edit, "[e]dit"),
    ] {
        if allowed.contains(&kind) {
            parts.push(label);
        }
    }
    parts.join(" / ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kinds() -> Vec<DecisionKind> {
        vec![
            DecisionKind::Approve,
            DecisionKind::Reject,
            DecisionKind::Edit,
        ]
    }

    fn payment_request(allowed: Vec<DecisionKind>) -> ReviewRequest {
        ReviewRequest::new(
            "Please review the following payment request and decide what to do:",
            "call-1",
            "stk_push",
            serde_json::json!({"phone_number": "254712345678", "amount": 100}),
            allowed,
        )
    }

    #[test]
    fn parse_decision_input_accepts_aliases() {
        let allowed = all_kinds();
        assert_eq!(
            parse_decision_input("a", &allowed),
            Some(DecisionKind::Approve)
        );
        assert_eq!(
            parse_decision_input("APPROVE", &allowed),
            Some(DecisionKind::Approve)
        );
        assert_eq!(
            parse_decision_input("n", &allowed),
            Some(DecisionKind::Reject)
        );
        assert_eq!(
            parse_decision_input("edit", &allowed),
            Some(DecisionKind::Edit)
        );
        assert_eq!(parse_decision_input("maybe", &allowed), None);
        assert_eq!(parse_decision_input("", &allowed), None);
    }

    #[test]
    fn parse_decision_input_filters_disallowed_kinds() {
        let allowed = vec![DecisionKind::Approve, DecisionKind::Reject];
        assert_eq!(
            parse_decision_input("a", &allowed),
            Some(DecisionKind::Approve)
        );
        assert_eq!(parse_decision_input("e", &allowed), None);
    }

    #[test]
    fn decision_prompt_renders_allowed_choices_in_order() {
        assert_eq!(
            decision_prompt(&all_kinds()),
            "[a]pprove / [r]eject / [e]dit"
        );
        assert_eq!(
            decision_prompt(&[DecisionKind::Reject, DecisionKind::Approve]),
            "[a]pprove / [r]eject"
        );
    }

    #[test]
    fn prompt_for_decision_approves() {
        let req = payment_request(all_kinds());
        let mut input = "a\n".as_bytes();
        let mut output = Vec::new();
        let decision = prompt_for_decision(&req, &mut input, &mut output);
        assert_eq!(decision, ReviewDecision::Approve);

        let rendered = String::from_utf8(output).expect("utf8");
        assert!(rendered.contains("Please review the following payment request"));
        assert!(rendered.contains("Tool: stk_push"));
    }

    #[test]
    fn prompt_for_decision_reads_edited_arguments() {
        let req = payment_request(all_kinds());
        let mut input = "e\n{\"amount\": 50}\n".as_bytes();
        let mut output = Vec::new();
        let decision = prompt_for_decision(&req, &mut input, &mut output);
        assert_eq!(
            decision,
            ReviewDecision::Edit(serde_json::json!({"amount": 50}))
        );
    }

    #[test]
    fn prompt_for_decision_retries_on_invalid_json_then_garbage() {
        let req = payment_request(all_kinds());
        // Bad JSON after `e`, then an unrecognized choice, then reject.
        let mut input = "e\n{not json\nwhat\nr\n".as_bytes();
        let mut output = Vec::new();
        let decision = prompt_for_decision(&req, &mut input, &mut output);
        assert_eq!(decision, ReviewDecision::Reject);

        let rendered = String::from_utf8(output).expect("utf8");
        assert!(rendered.contains("Invalid JSON"));
        assert!(rendered.contains("Unrecognized choice"));
    }

    #[test]
    fn prompt_for_decision_rejects_on_eof() {
        let req = payment_request(all_kinds());
        let mut input = "".as_bytes();
        let mut output = Vec::new();
        let decision = prompt_for_decision(&req, &mut input, &mut output);
        assert_eq!(decision, ReviewDecision::Reject);
    }

    #[test]
    fn prompt_for_decision_ignores_disallowed_edit() {
        let req = payment_request(vec![DecisionKind::Approve, DecisionKind::Reject]);
        // `e` is not in the allowed set; the prompt loops until `a`.
        let mut input = "e\na\n".as_bytes();
        let mut output = Vec::new();
        let decision = prompt_for_decision(&req, &mut input, &mut output);
        assert_eq!(decision, ReviewDecision::Approve);
    }
}
