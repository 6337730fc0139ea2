//! PayLink payment gateway client and the payment tool set.
//!
//! The client is constructed once at startup; [`PayLinkClient::tools`]
//! returns the tools it exposes to the agent. `stk_push` is the only tool
//! in the workspace with real-world effect (it moves money), which is why
//! the runtime's approval gate is pointed at it by default.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proto::ToolResult;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::Tool;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP client for the PayLink payment gateway.
pub struct PayLinkClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PayLinkClient {
    /// Creates a client for the gateway at `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Returns the payment tool set backed by this client.
    pub fn tools(self: &Arc<Self>) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(StkPushTool {
                client: Arc::clone(self),
            }),
            Arc::new(TransactionStatusTool {
                client: Arc::clone(self),
            }),
        ]
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Sends an STK push request to the gateway.
    async fn stk_push(
        &self,
        phone_number: &str,
        amount: u64,
        account_reference: &str,
        description: &str,
    ) -> Result<serde_json::Value, String> {
        let body = json!({
            "phone_number": phone_number,
            "amount": amount,
            "account_reference": account_reference,
            "transaction_desc": description,
        });

        info!(phone_number, amount, account_reference, "Initiating STK push");

        let resp = self
            .http
            .post(self.endpoint("/api/v1/stk/push"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("Payment gateway unreachable: {e}"))?;

        read_gateway_response(resp).await
    }

    /// Queries the state of a previously initiated push.
    async fn transaction_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<serde_json::Value, String> {
        debug!(checkout_request_id, "Querying transaction status");

        let resp = self
            .http
            .get(self.endpoint(&format!("/api/v1/stk/query/{checkout_request_id}")))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("Payment gateway unreachable: {e}"))?;

        read_gateway_response(resp).await
    }
}

/// Decodes a gateway response, mapping non-2xx statuses to errors.
async fn read_gateway_response(resp: reqwest::Response) -> Result<serde_json::Value, String> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("Payment gateway returned {status}: {body}"));
    }
    resp.json()
        .await
        .map_err(|e| format!("Payment gateway returned invalid JSON: {e}"))
}

#[derive(Debug, Deserialize)]
struct StkPushArgs {
    phone_number: String,
    amount: u64,
    account_reference: String,
    #[serde(default)]
    description: Option<String>,
}

/// Tool that initiates an M-Pesa STK push payment
pub struct StkPushTool {
    client: Arc<PayLinkClient>,
}

#[async_trait]
impl Tool for StkPushTool {
    fn name(&self) -> &str {
        "stk_push"
    }

    fn description(&self) -> &str {
        "Initiate an M-Pesa STK push: the customer receives a payment prompt \
         on their phone for the given amount. Requires phone number, amount \
         in whole shillings, and an account reference."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "phone_number": {
                    "type": "string",
                    "description": "Customer phone number (07XX..., 01XX..., or 254...)"
                },
                "amount": {
                    "type": "integer",
                    "description": "Amount in whole Kenyan shillings (minimum 1)"
                },
                "account_reference": {
                    "type": "string",
                    "description": "Order or invoice reference shown on the customer's prompt"
                },
                "description": {
                    "type": "string",
                    "description": "Optional transaction description"
                }
            },
            "required": ["phone_number", "amount", "account_reference"]
        })
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let args: StkPushArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => {
                return ToolResult::error(call_id, self.name(), format!("Invalid arguments: {e}"));
            }
        };

        let phone = match normalize_phone(&args.phone_number) {
            Ok(p) => p,
            Err(reason) => {
                return ToolResult::error(
                    call_id,
                    self.name(),
                    format!("Invalid arguments: {reason}"),
                );
            }
        };
        if args.amount == 0 {
            return ToolResult::error(
                call_id,
                self.name(),
                "Invalid arguments: amount must be at least 1",
            );
        }
        if args.account_reference.trim().is_empty() {
            return ToolResult::error(
                call_id,
                self.name(),
                "Invalid arguments: account_reference must not be empty",
            );
        }

        let description = args
            .description
            .as_deref()
            .unwrap_or("Order payment")
            .to_string();

        let result = self
            .client
            .stk_push(&phone, args.amount, args.account_reference.trim(), &description)
            .await;

        match result {
            Ok(body) => ToolResult::success(call_id, self.name(), body.to_string()),
            Err(reason) => ToolResult::error(call_id, self.name(), reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransactionStatusArgs {
    checkout_request_id: String,
}

/// Tool that queries the state of a previously initiated STK push
pub struct TransactionStatusTool {
    client: Arc<PayLinkClient>,
}

#[async_trait]
impl Tool for TransactionStatusTool {
    fn name(&self) -> &str {
        "transaction_status"
    }

    fn description(&self) -> &str {
        "Check the status of an STK push by its checkout request id: \
         pending, completed, cancelled by the customer, or failed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "checkout_request_id": {
                    "type": "string",
                    "description": "Checkout request id returned by stk_push"
                }
            },
            "required": ["checkout_request_id"]
        })
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let args: TransactionStatusArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => {
                return ToolResult::error(call_id, self.name(), format!("Invalid arguments: {e}"));
            }
        };
        if args.checkout_request_id.trim().is_empty() {
            return ToolResult::error(
                call_id,
                self.name(),
                "Invalid arguments: checkout_request_id must not be empty",
            );
        }

        let result = self
            .client
            .transaction_status(args.checkout_request_id.trim())
            .await;

        match result {
            Ok(body) => ToolResult::success(call_id, self.name(), body.to_string()),
            Err(reason) => ToolResult::error(call_id, self.name(), reason),
        }
    }
}

/// Normalizes a Kenyan MSISDN into `254XXXXXXXXX` form.
///
/// Accepts `07XX.../01XX...` local form, bare `7XX.../1XX...`, and the
/// international form with or without a leading `+`.
fn normalize_phone(raw: &str) -> Result<String, String> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("phone_number '{raw}' is not a valid phone number"));
    }

    let normalized = if cleaned.len() == 12 && cleaned.starts_with("254") {
        cleaned
    } else if cleaned.len() == 10 && (cleaned.starts_with("07") || cleaned.starts_with("01")) {
        format!("254{}", &cleaned[1..])
    } else if cleaned.len() == 9 && (cleaned.starts_with('7') || cleaned.starts_with('1')) {
        format!("254{cleaned}")
    } else {
        return Err(format!("phone_number '{raw}' is not a valid Kenyan MSISDN"));
    };

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_client() -> Arc<PayLinkClient> {
        Arc::new(PayLinkClient::new("http://localhost:9", "test-key"))
    }

    #[test]
    fn tools_exposes_push_and_status() {
        let client = build_client();
        let tools = client.tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["stk_push", "transaction_status"]);
    }

    #[test]
    fn normalize_phone_accepts_known_forms() {
        assert_eq!(normalize_phone("254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("+254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0712 345 678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0112-345-678").unwrap(), "254112345678");
        assert_eq!(normalize_phone("712345678").unwrap(), "254712345678");
    }

    #[test]
    fn normalize_phone_rejects_garbage() {
        assert!(normalize_phone("").is_err());
        assert!(normalize_phone("hello").is_err());
        assert!(normalize_phone("0812345678").is_err());
        assert!(normalize_phone("2547123").is_err());
        assert!(normalize_phone("+1 555 0100").is_err());
    }

    #[tokio::test]
    async fn stk_push_rejects_invalid_arguments_before_any_request() {
        let client = build_client();
        let tool = StkPushTool {
            client: Arc::clone(&client),
        };

        let missing = tool.execute("c1", serde_json::json!({"amount": 10})).await;
        assert!(missing.is_error);
        assert!(missing.output.contains("Invalid arguments"));

        let zero_amount = tool
            .execute(
                "c2",
                serde_json::json!({
                    "phone_number": "0712345678",
                    "amount": 0,
                    "account_reference": "ord-1"
                }),
            )
            .await;
        assert!(zero_amount.is_error);
        assert!(zero_amount.output.contains("amount must be at least 1"));

        let bad_phone = tool
            .execute(
                "c3",
                serde_json::json!({
                    "phone_number": "12345",
                    "amount": 10,
                    "account_reference": "ord-1"
                }),
            )
            .await;
        assert!(bad_phone.is_error);

        let empty_ref = tool
            .execute(
                "c4",
                serde_json::json!({
                    "phone_number": "0712345678",
                    "amount": 10,
                    "account_reference": "  "
                }),
            )
            .await;
        assert!(empty_ref.is_error);
        assert!(empty_ref.output.contains("account_reference"));
    }

    #[tokio::test]
    async fn stk_push_reports_unreachable_gateway_as_tool_error() {
        let client = build_client();
        let tool = StkPushTool { client };
        let result = tool
            .execute(
                "c5",
                serde_json::json!({
                    "phone_number": "0712345678",
                    "amount": 100,
                    "account_reference": "ord-9"
                }),
            )
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("Payment gateway unreachable"));
        assert_eq!(result.tool_name, "stk_push");
    }

    #[tokio::test]
    async fn transaction_status_requires_checkout_request_id() {
        let client = build_client();
        let tool = TransactionStatusTool { client };

        let missing = tool.execute("c6", serde_json::json!({})).await;
        assert!(missing.is_error);

        let empty = tool
            .execute("c7", serde_json::json!({"checkout_request_id": " "}))
            .await;
        assert!(empty.is_error);
        assert!(empty.output.contains("checkout_request_id"));
    }

    #[test]
    fn stk_push_metadata_is_stable() {
        let client = build_client();
        let tool = StkPushTool { client };
        assert_eq!(tool.name(), "stk_push");
        assert!(tool.description().contains("STK push"));
        let schema = tool.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"][0], "phone_number");
        assert!(schema["properties"]["amount"].is_object());
        assert!(schema["properties"]["account_reference"].is_object());
    }

    #[test]
    fn transaction_status_metadata_is_stable() {
        let client = build_client();
        let tool = TransactionStatusTool { client };
        assert_eq!(tool.name(), "transaction_status");
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"][0], "checkout_request_id");
    }
}
