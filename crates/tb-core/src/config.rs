use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::types::BusyPolicy;

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const SHUTDOWN_WINDOW_MS: u64 = 5_000;

/// A single immutable configuration value, constructed once at process
/// startup and handed by reference to every component. Merges an optional
/// TOML file with `BRIDGE_`-prefixed environment variable overrides; every
/// field has a default so the process is runnable with zero config present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            model: ModelConfig::default(),
            conversation: ConversationConfig::default(),
            tools: ToolsConfig::default(),
            session: SessionConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load config from an optional TOML file path, overridden by
    /// `BRIDGE_*` environment variables (double underscore separates
    /// nesting, e.g. `BRIDGE_MODEL__TEMPERATURE=0.2`).
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            BridgeConfig::default(),
        ));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("BRIDGE_").split("__"));

        figment
            .extract()
            .map_err(|e| BridgeError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Sampling / invocation parameters and family selection for the LLM Pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Context-window size for `model_id`, in tokens. Model-specific and
    /// externally supplied; discovery is out of scope (§9c).
    #[serde(default = "default_context_window")]
    pub context_window_tokens: u32,
    /// Per-session token-bucket rate gate in front of the model invocation,
    /// sized in invocations (not tokens), to avoid self-induced throttling
    /// when a session retries aggressively (§5).
    #[serde(default = "default_rate_gate_capacity")]
    pub rate_gate_capacity: u32,
    #[serde(default = "default_rate_gate_refill_per_sec")]
    pub rate_gate_refill_per_sec: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop_sequences: Vec::new(),
            context_window_tokens: default_context_window(),
            rate_gate_capacity: default_rate_gate_capacity(),
            rate_gate_refill_per_sec: default_rate_gate_refill_per_sec(),
        }
    }
}

fn default_model_id() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_context_window() -> u32 {
    180_000
}
fn default_rate_gate_capacity() -> u32 {
    5
}
fn default_rate_gate_refill_per_sec() -> f64 {
    0.5
}

/// Conversation Manager (C3) budgets and strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_max_messages")]
    pub max_conversation_messages: usize,
    #[serde(default)]
    pub conversation_strategy: ConversationStrategy,
    #[serde(default = "bool_true")]
    pub enable_message_chunking: bool,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_new_response_threshold")]
    pub tool_result_new_response_threshold: usize,
    #[serde(default = "default_new_response_target")]
    pub tool_result_new_response_target: usize,
    #[serde(default = "default_history_threshold")]
    pub tool_result_history_threshold: usize,
    #[serde(default = "default_history_target")]
    pub tool_result_history_target: usize,
    /// Window size used by the `sliding_window` strategy and the recent-
    /// exchange count `k` used by `smart_prune`.
    #[serde(default = "default_window")]
    pub sliding_window_size: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_conversation_messages: default_max_messages(),
            conversation_strategy: ConversationStrategy::default(),
            enable_message_chunking: true,
            max_message_size: default_max_message_size(),
            tool_result_new_response_threshold: default_new_response_threshold(),
            tool_result_new_response_target: default_new_response_target(),
            tool_result_history_threshold: default_history_threshold(),
            tool_result_history_target: default_history_target(),
            sliding_window_size: default_window(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStrategy {
    Truncate,
    #[default]
    SlidingWindow,
    SmartPrune,
}

fn default_max_messages() -> usize {
    200
}
fn default_max_message_size() -> usize {
    16 * 1024
}
fn default_new_response_threshold() -> usize {
    500_000
}
fn default_new_response_target() -> usize {
    (default_new_response_threshold() as f64 * 0.85) as usize
}
fn default_history_threshold() -> usize {
    50_000
}
fn default_history_target() -> usize {
    (default_history_threshold() as f64 * 0.85) as usize
}
fn default_window() -> usize {
    20
}
fn bool_true() -> bool {
    true
}

/// Tool Executor (C2) and Credential Store (C1) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default = "default_max_tool_calls_per_turn")]
    pub max_tool_calls_per_turn: u32,
    #[serde(default)]
    pub enable_tool_auth: bool,
    #[serde(default = "default_supported_auth_types")]
    pub supported_auth_types: Vec<String>,
    #[serde(default)]
    pub require_tool_auth: bool,
    #[serde(default = "default_auth_token_cache_ttl")]
    pub auth_token_cache_ttl_secs: u64,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            excluded_paths: Vec::new(),
            timeout_ms: default_tool_timeout_ms(),
            max_tool_calls: default_max_tool_calls(),
            max_tool_calls_per_turn: default_max_tool_calls_per_turn(),
            enable_tool_auth: false,
            supported_auth_types: default_supported_auth_types(),
            require_tool_auth: false,
            auth_token_cache_ttl_secs: default_auth_token_cache_ttl(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}
fn default_max_tool_calls() -> u32 {
    25
}
fn default_max_tool_calls_per_turn() -> u32 {
    8
}
fn default_supported_auth_types() -> Vec<String> {
    vec![
        "bearer_token".into(),
        "basic_auth".into(),
        "api_key".into(),
        "oauth2_client_credentials".into(),
        "custom".into(),
    ]
}
fn default_auth_token_cache_ttl() -> u64 {
    3600
}
fn default_max_response_bytes() -> usize {
    10 * 1024 * 1024
}

/// Session Orchestrator (C5) lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    #[serde(default = "default_queue_depth")]
    pub busy_queue_depth: usize,
    /// When true, `chat` is rejected in `OpenUnauth` and auth is mandatory.
    #[serde(default)]
    pub require_auth: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout(),
            busy_policy: BusyPolicy::default(),
            busy_queue_depth: default_queue_depth(),
            require_auth: false,
        }
    }
}

fn default_session_timeout() -> u64 {
    1800
}
fn default_queue_depth() -> usize {
    4
}

/// Deployment-level credentials for reaching the hosted model-invocation
/// service itself (distinct from the per-session, per-tool credentials held
/// by C1, which arrive over the wire via `auth` frames).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiConfig>,
    pub llama: Option<LlamaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlamaConfig {
    #[serde(default = "default_llama_base_url")]
    pub base_url: String,
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_llama_base_url() -> String {
    "http://localhost:11434".to_string()
}
