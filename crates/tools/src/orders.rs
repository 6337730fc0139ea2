//! Order lookup tool backed by the shop service HTTP API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proto::ToolResult;
use serde::Deserialize;
use tracing::debug;

use crate::Tool;

const REQUEST_TIMEOUT_SECS: u64 = 15;
const MAX_OUTPUT_CHARS: usize = 8_000;
const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 50;

/// HTTP client for the shop service order API.
///
/// One instance is constructed at startup and shared by every tool that
/// reads order data.
pub struct OrdersClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OrdersClient {
    /// Creates a client for the shop service at `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Fetches orders matching the given selectors.
    async fn fetch_orders(
        &self,
        order_id: Option<&str>,
        customer_phone: Option<&str>,
        limit: u32,
    ) -> Result<serde_json::Value, String> {
        let url = format!("{}/api/v1/orders", self.base_url.trim_end_matches('/'));

        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(id) = order_id {
            query.push(("order_id", id.to_string()));
        }
        if let Some(phone) = customer_phone {
            query.push(("customer_phone", phone.to_string()));
        }

        debug!(order_id = ?order_id, customer_phone = ?customer_phone, "Fetching orders");

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&query)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("Order service unreachable: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!(
                "Order service returned {status}: {}",
                truncate_str(&body, 500)
            ));
        }

        resp.json()
            .await
            .map_err(|e| format!("Order service returned invalid JSON: {e}"))
    }
}

#[derive(Debug, Deserialize)]
struct GetOrdersArgs {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    customer_phone: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

/// Tool that answers order-status queries
pub struct GetOrdersTool {
    client: Arc<OrdersClient>,
}

impl GetOrdersTool {
    /// Creates an order lookup tool over a shared client.
    pub fn new(client: Arc<OrdersClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GetOrdersTool {
    fn name(&self) -> &str {
        "get_orders"
    }

    fn description(&self) -> &str {
        "Look up customer orders by order id or customer phone number. \
         Returns order status, items, and totals as JSON."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "order_id": {
                    "type": "string",
                    "description": "Exact order id to look up"
                },
                "customer_phone": {
                    "type": "string",
                    "description": "Customer phone number to list orders for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of orders to return (default: 10, max: 50)"
                }
            }
        })
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let args: GetOrdersArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => {
                return ToolResult::error(call_id, self.name(), format!("Invalid arguments: {e}"));
            }
        };

        if let Err(reason) = validate_selectors(&args) {
            return ToolResult::error(call_id, self.name(), format!("Invalid arguments: {reason}"));
        }

        let limit = clamp_limit(args.limit);
        let result = self
            .client
            .fetch_orders(args.order_id.as_deref(), args.customer_phone.as_deref(), limit)
            .await;

        match result {
            Ok(orders) => ToolResult::success(call_id, self.name(), format_orders_output(&orders)),
            Err(reason) => ToolResult::error(call_id, self.name(), reason),
        }
    }
}

/// Requires at least one non-empty selector so the tool never dumps the
/// whole order book.
fn validate_selectors(args: &GetOrdersArgs) -> Result<(), String> {
    let has_order_id = args.order_id.as_deref().is_some_and(|s| !s.trim().is_empty());
    let has_phone = args
        .customer_phone
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    if has_order_id || has_phone {
        Ok(())
    } else {
        Err("provide order_id or customer_phone".to_string())
    }
}

/// Clamps the requested page size into `1..=MAX_LIMIT`.
fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Renders the order payload as bounded pretty JSON for the LLM.
fn format_orders_output(orders: &serde_json::Value) -> String {
    let rendered =
        serde_json::to_string_pretty(orders).unwrap_or_else(|_| orders.to_string());
    truncate_str(&rendered, MAX_OUTPUT_CHARS)
}

/// Truncates UTF-8 text to `max_chars` code points and appends a suffix when truncated.
fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}\n[... output truncated at {max_chars} chars]")
    }
}
