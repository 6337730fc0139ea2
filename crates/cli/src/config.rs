use std::collections::HashMap;
use std::path::{Path, PathBuf};

use proto::{ApprovalPolicy, ConfigError, DecisionKind, InterruptRule};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Known LLM provider presets.
///
/// Each preset auto-configures `base_url` and supplies a default model ID so
/// that users only have to specify what differs from the preset defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreset {
    /// OpenAI API (api.openai.com). Default.
    #[default]
    OpenAi,
    /// Together.ai – OpenAI-compatible endpoint; base_url auto-set.
    Together,
    /// Local Ollama instance – OpenAI-compatible; base_url auto-set, no API key needed.
    Ollama,
    /// OpenRouter – aggregates many providers; base_url auto-set.
    OpenRouter,
    /// Fully custom: set `base_url` and `model` manually.
    Custom,
}

impl ProviderPreset {
    /// Default model ID for the preset. Used when `AgentConfig::model` is empty.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Together => "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            Self::Ollama => "llama3.2",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::Custom => "",
        }
    }

    /// Auto-configured API base URL (`None` = use the SDK's built-in default).
    pub fn base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => None,
            Self::Together => Some("https://api.together.xyz/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Custom => None,
        }
    }

    /// Name of the provider-specific API key environment variable.
    /// Empty string means no API key is required (e.g. Ollama).
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Together => "TOGETHER_API_KEY",
            Self::Ollama => "",
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::Custom => "OPENAI_API_KEY",
        }
    }

    /// Canonical lowercase name used in config files and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Together => "together",
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ProviderPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "together" => Ok(Self::Together),
            "ollama" => Ok(Self::Ollama),
            "openrouter" => Ok(Self::OpenRouter),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent provider/model configuration.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Approval gate configuration.
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Shop service (order lookup) configuration.
    #[serde(default)]
    pub orders: OrdersConfig,

    /// PayLink payment gateway configuration.
    #[serde(default)]
    pub paylink: PayLinkConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
}

const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}

/// Agent model/provider config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider preset: openai | together | ollama | openrouter | custom.
    #[serde(default)]
    pub provider: ProviderPreset,
    /// Model ID. Leave empty (or omit) to use the preset default.
    #[serde(default)]
    pub model: String,
    /// API key (env overrides applied at load time; see `Config::load`).
    #[serde(default)]
    pub api_key: String,
    /// Sampling temperature. The assistant runs deterministic by default.
    #[serde(default)]
    pub temperature: f32,
    /// Maximum tool-call rounds per request before bailing out.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Explicit API base URL. Overrides the preset URL when non-empty.
    /// Required for `provider = "custom"`; optional for others.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderPreset::default(),
            model: String::new(),
            api_key: String::new(),
            temperature: 0.0,
            max_tool_rounds: default_max_tool_rounds(),
            base_url: None,
        }
    }
}

impl AgentConfig {
    /// Returns the effective model ID.
    /// Falls back to the preset default when `model` is empty.
    pub fn effective_model(&self) -> &str {
        if self.model.is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    /// Returns the effective API base URL.
    /// Priority: explicit `base_url` field > preset auto-URL > `None`.
    pub fn effective_base_url(&self) -> Option<&str> {
        if let Some(url) = &self.base_url
            && !url.is_empty()
        {
            return Some(url.as_str());
        }
        self.provider.base_url()
    }
}

fn default_description_prefix() -> String {
    "Please review the following payment request and decide what to do:".to_string()
}

fn default_approval_rules() -> HashMap<String, RuleConfig> {
    let mut rules = HashMap::new();
    rules.insert(
        "stk_push".to_string(),
        RuleConfig {
            allowed_decisions: vec![
                DecisionKind::Approve,
                DecisionKind::Reject,
                DecisionKind::Edit,
            ],
        },
    );
    rules
}

/// Allowed decisions for one gated tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Decision kinds the reviewer may return for this tool.
    pub allowed_decisions: Vec<DecisionKind>,
}

/// Approval gate config.
///
/// By default the gate covers `stk_push` with all three decisions allowed,
/// matching the one tool in the workspace that moves money.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Text shown to the reviewer above the proposed call.
    #[serde(default = "default_description_prefix")]
    pub description_prefix: String,
    /// Optional review deadline in seconds. Unset = wait indefinitely;
    /// on expiry the call is rejected.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Gated tools and their allowed decisions.
    #[serde(default = "default_approval_rules")]
    pub rules: HashMap<String, RuleConfig>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            description_prefix: default_description_prefix(),
            timeout_secs: None,
            rules: default_approval_rules(),
        }
    }
}

impl ApprovalConfig {
    /// Builds the runtime policy from this config.
    pub fn to_policy(&self) -> ApprovalPolicy {
        let mut policy = ApprovalPolicy::new(&self.description_prefix);
        for (tool, rule) in &self.rules {
            policy = policy.with_rule(
                tool.clone(),
                InterruptRule::new(rule.allowed_decisions.iter().copied()),
            );
        }
        policy
    }
}

/// Shop service (order API) config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersConfig {
    /// Base URL of the shop service.
    #[serde(default = "default_orders_base_url")]
    pub base_url: String,
    /// Bearer token for the shop service.
    #[serde(default)]
    pub api_key: String,
}

fn default_orders_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            base_url: default_orders_base_url(),
            api_key: String::new(),
        }
    }
}

/// PayLink payment gateway config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayLinkConfig {
    /// Base URL of the payment gateway.
    #[serde(default = "default_paylink_base_url")]
    pub base_url: String,
    /// Bearer token for the payment gateway.
    #[serde(default)]
    pub api_key: String,
}

fn default_paylink_base_url() -> String {
    "https://gateway.paylink.co.ke".to_string()
}

impl Default for PayLinkConfig {
    fn default() -> Self {
        Self {
            base_url: default_paylink_base_url(),
            api_key: String::new(),
        }
    }
}

/// Database storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            url: format!("{home}/.duka/memory.db"),
        }
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("config.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".duka").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        // Environment variable overrides (highest priority → lowest)
        if let Ok(key) = std::env::var("DUKA_API_KEY") {
            config.agent.api_key = key;
        }
        if let Ok(model) = std::env::var("DUKA_MODEL") {
            config.agent.model = model;
        }
        if let Ok(key) = std::env::var("PAYLINK_API_KEY") {
            config.paylink.api_key = key;
        }
        if let Ok(url) = std::env::var("PAYLINK_BASE_URL") {
            config.paylink.base_url = url;
        }
        if let Ok(key) = std::env::var("ORDERS_API_KEY") {
            config.orders.api_key = key;
        }
        if let Ok(url) = std::env::var("ORDERS_BASE_URL") {
            config.orders.base_url = url;
        }

        debug!(
            provider = %config.agent.provider.name(),
            model = %config.agent.effective_model(),
            base_url = ?config.agent.effective_base_url(),
            gated_tools = ?config.approval.rules.keys().collect::<Vec<_>>(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Resolves the API key to use for the configured provider.
    ///
    /// Priority:
    /// 1. `agent.api_key` in config file (or `DUKA_API_KEY` applied at load time)
    /// 2. Provider-specific environment variable (e.g. `TOGETHER_API_KEY`)
    /// 3. `OPENAI_API_KEY` (legacy fallback)
    pub fn resolve_api_key(&self) -> String {
        if !self.agent.api_key.is_empty() {
            debug!(source = "config", provider = %self.agent.provider.name(), "API key resolved");
            return self.agent.api_key.clone();
        }

        // Provider-specific env var
        let env_var = self.agent.provider.api_key_env();
        if !env_var.is_empty()
            && let Ok(key) = std::env::var(env_var)
        {
            debug!(source = "env", env_var = %env_var, "API key resolved");
            return key;
        }

        // Legacy fallback
        let fallback = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        if fallback.is_empty() {
            debug!(provider = %self.agent.provider.name(), "No API key found from any source");
        }
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{remove_env_var, set_env_var, with_locked_env};

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, content).expect("write config");
    }

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.agent.provider, ProviderPreset::OpenAi);
        assert_eq!(cfg.agent.effective_model(), "gpt-4o-mini");
        assert_eq!(cfg.agent.temperature, 0.0);
        assert_eq!(cfg.agent.max_tool_rounds, 10);
        assert!(!cfg.database.url.is_empty());
        assert!(cfg.approval.rules.contains_key("stk_push"));
        assert!(cfg.approval.timeout_secs.is_none());
    }

    #[test]
    fn default_approval_policy_gates_stk_push_with_all_decisions() {
        let policy = ApprovalConfig::default().to_policy();
        assert!(policy.is_gated("stk_push"));
        assert!(!policy.is_gated("get_orders"));

        let rule = policy.rule("stk_push").expect("stk_push rule");
        assert!(rule.allows(DecisionKind::Approve));
        assert!(rule.allows(DecisionKind::Reject));
        assert!(rule.allows(DecisionKind::Edit));
    }

    #[test]
    fn provider_preset_auto_config() {
        assert_eq!(ProviderPreset::OpenAi.base_url(), None);
        assert_eq!(ProviderPreset::OpenAi.default_model(), "gpt-4o-mini");
        assert_eq!(
            ProviderPreset::Together.base_url(),
            Some("https://api.together.xyz/v1")
        );
        assert_eq!(
            ProviderPreset::Ollama.base_url(),
            Some("http://localhost:11434/v1")
        );
        assert_eq!(
            ProviderPreset::OpenRouter.base_url(),
            Some("https://openrouter.ai/api/v1")
        );
        assert_eq!(ProviderPreset::Ollama.default_model(), "llama3.2");
    }

    #[test]
    fn effective_model_falls_back_to_preset_default() {
        let mut cfg = AgentConfig::default();
        assert_eq!(cfg.effective_model(), "gpt-4o-mini");

        cfg.provider = ProviderPreset::Together;
        assert_eq!(
            cfg.effective_model(),
            "meta-llama/Llama-3.3-70B-Instruct-Turbo"
        );

        cfg.model = "mistral-7b".to_string();
        assert_eq!(cfg.effective_model(), "mistral-7b"); // explicit override
    }

    #[test]
    fn effective_base_url_preset_vs_explicit() {
        let mut cfg = AgentConfig::default();
        assert_eq!(cfg.effective_base_url(), None); // openai uses SDK default

        cfg.provider = ProviderPreset::Ollama;
        assert_eq!(cfg.effective_base_url(), Some("http://localhost:11434/v1"));

        cfg.base_url = Some("http://custom:11434/v1".to_string());
        assert_eq!(cfg.effective_base_url(), Some("http://custom:11434/v1")); // explicit wins
    }

    #[test]
    fn load_reads_explicit_file_path() {
        with_locked_env(|| {
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("config.toml");
            write_file(
                &config_path,
                r#"
[agent]
provider = "openai"
model = "gpt-4o"
api_key = "from_file"
temperature = 0.2
max_tool_rounds = 7

[approval]
description_prefix = "Review this payment:"
timeout_secs = 120

[approval.rules.stk_push]
allowed_decisions = ["approve", "reject"]

[orders]
base_url = "https://shop.example.com"
api_key = "orders-key"

[paylink]
base_url = "https://pay.example.com"
api_key = "paylink-key"

[database]
url = "/tmp/duka-test.db"
"#,
            );
            let cfg = Config::load(Some(&config_path)).expect("config should parse");
            assert_eq!(cfg.agent.provider, ProviderPreset::OpenAi);
            assert_eq!(cfg.agent.effective_model(), "gpt-4o");
            assert_eq!(cfg.agent.api_key, "from_file");
            assert_eq!(cfg.agent.temperature, 0.2);
            assert_eq!(cfg.agent.max_tool_rounds, 7);
            assert_eq!(cfg.approval.description_prefix, "Review this payment:");
            assert_eq!(cfg.approval.timeout_secs, Some(120));
            let rule = &cfg.approval.rules["stk_push"];
            assert_eq!(
                rule.allowed_decisions,
                vec![DecisionKind::Approve, DecisionKind::Reject]
            );
            assert_eq!(cfg.orders.base_url, "https://shop.example.com");
            assert_eq!(cfg.paylink.api_key, "paylink-key");
            assert_eq!(cfg.database.url, "/tmp/duka-test.db");
        });
    }

    #[test]
    fn load_applies_env_overrides() {
        with_locked_env(|| {
            set_env_var("DUKA_API_KEY", "env-api");
            set_env_var("DUKA_MODEL", "env-model");
            set_env_var("PAYLINK_API_KEY", "env-paylink");
            set_env_var("ORDERS_BASE_URL", "http://env-orders:9000");

            let cfg = Config::load(None).expect("config load");
            assert_eq!(cfg.agent.api_key, "env-api");
            assert_eq!(cfg.agent.model, "env-model");
            assert_eq!(cfg.paylink.api_key, "env-paylink");
            assert_eq!(cfg.orders.base_url, "http://env-orders:9000");

            remove_env_var("DUKA_API_KEY");
            remove_env_var("DUKA_MODEL");
            remove_env_var("PAYLINK_API_KEY");
            remove_env_var("ORDERS_BASE_URL");
        });
    }

    #[test]
    fn load_returns_toml_error_for_invalid_content() {
        with_locked_env(|| {
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("config.toml");
            write_file(&config_path, "[agent\nmodel = \"broken\"");
            let err = Config::load(Some(&config_path)).expect_err("invalid toml must fail");
            assert!(err.to_string().contains("TOML parse error"));
        });
    }

    #[test]
    fn resolve_api_key_prefers_config_key() {
        with_locked_env(|| {
            let mut cfg = Config::default();
            cfg.agent.api_key = "abc123".to_string();
            assert_eq!(cfg.resolve_api_key(), "abc123");
        });
    }

    #[test]
    fn resolve_api_key_falls_back_to_provider_env() {
        with_locked_env(|| {
            remove_env_var("OPENAI_API_KEY");
            set_env_var("TOGETHER_API_KEY", "together-key");

            let mut cfg = Config::default();
            cfg.agent.provider = ProviderPreset::Together;
            assert_eq!(cfg.resolve_api_key(), "together-key");

            remove_env_var("TOGETHER_API_KEY");
        });
    }

    #[test]
    fn provider_preset_from_str_is_stable() {
        assert_eq!(
            "openai".parse::<ProviderPreset>().ok(),
            Some(ProviderPreset::OpenAi)
        );
        assert_eq!(
            "OpenRouter".parse::<ProviderPreset>().ok(),
            Some(ProviderPreset::OpenRouter)
        );
        assert!("anthropic".parse::<ProviderPreset>().is_err());
        assert!("unknown".parse::<ProviderPreset>().is_err());
    }
}
