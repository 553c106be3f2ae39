use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};

use tb_core::config::BridgeConfig;
use tb_llm::{AdapterRouter, AdapterSlot, ClaudeAdapter, GptAdapter, LlamaAdapter, LlmPipeline};
use tb_tools::{DescriptorTable, ToolExecutor, ToolHttpClient};

use crate::session::SessionTable;

/// Central shared state — handed to every Axum handler as `Arc<AppState>`
/// (§5 "Shared resources": one pooled HTTP client, one model-invocation
/// client, and one in-memory session table, shared across sessions).
pub struct AppState {
    pub config: BridgeConfig,
    pub http: reqwest::Client,
    pub sessions: SessionTable,
    pub tool_executor: Arc<ToolExecutor>,
    pub llm: Arc<LlmPipeline>,
}

impl AppState {
    pub fn new(config: BridgeConfig, descriptors: DescriptorTable) -> Self {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build shared HTTP client");

        let tool_http = ToolHttpClient::new(
            http_client.clone(),
            config.tools.allowed_paths.clone(),
            config.tools.excluded_paths.clone(),
            Duration::from_millis(config.tools.timeout_ms),
            config.tools.max_response_bytes,
        );
        let tool_executor = Arc::new(ToolExecutor::new(descriptors, tool_http, None));

        let router = build_adapter_router(&config, http_client.clone());
        let llm = Arc::new(LlmPipeline::new(router));

        Self {
            config,
            http: http_client,
            sessions: SessionTable::new(),
            tool_executor,
            llm,
        }
    }
}

/// Builds the priority-ordered adapter fallback chain from whichever
/// provider credentials are configured (§4.4 "Fallback").
fn build_adapter_router(config: &BridgeConfig, http_client: reqwest::Client) -> AdapterRouter {
    let mut slots = Vec::new();

    if let Some(anthropic) = &config.providers.anthropic {
        slots.push(AdapterSlot::new(Box::new(ClaudeAdapter::new(
            http_client.clone(),
            anthropic.api_key.clone(),
            anthropic.base_url.clone(),
        ))));
    }
    if let Some(openai) = &config.providers.openai {
        slots.push(AdapterSlot::new(Box::new(GptAdapter::new(
            http_client.clone(),
            openai.api_key.clone(),
            openai.base_url.clone(),
        ))));
    }
    if let Some(llama) = &config.providers.llama {
        slots.push(AdapterSlot::new(Box::new(LlamaAdapter::new(
            http_client.clone(),
            llama.base_url.clone(),
        ))));
    }

    if slots.is_empty() {
        // No provider configured: fall back to a Claude adapter against the
        // default base URL so the process is still runnable with zero config,
        // per the ambient-stack requirement that every option has a default.
        slots.push(AdapterSlot::new(Box::new(ClaudeAdapter::new(
            http_client,
            String::new(),
            "https://api.anthropic.com".to_string(),
        ))));
    }

    AdapterRouter::new(slots)
}

/// Assembles the Axum router: a liveness endpoint plus the WebSocket upgrade.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
