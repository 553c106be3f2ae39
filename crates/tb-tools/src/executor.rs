use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};

use tb_auth::CredentialStore;

use crate::descriptor::{DescriptorTable, HttpMethod, ParamLocation, ToolDescriptor};
use crate::http_client::{substitute_path_template, ToolHttpClient};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2_000;

/// A tool_use block emitted by the assistant (§3), as consumed by the
/// executor.
#[derive(Debug, Clone)]
pub struct ToolUseRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A tool_result payload ready for insertion into history (§4.2).
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    fn error(tool_use_id: &str, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.to_string(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// C2 — Tool Executor. Holds no per-call mutable state: the descriptor table
/// and HTTP client are shared across every session, and credentials are
/// passed in per call from the caller's session (§4.2).
pub struct ToolExecutor {
    descriptors: DescriptorTable,
    http: ToolHttpClient,
    default_base_url: Option<String>,
}

impl ToolExecutor {
    pub fn new(descriptors: DescriptorTable, http: ToolHttpClient, default_base_url: Option<String>) -> Self {
        Self {
            descriptors,
            http,
            default_base_url,
        }
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    /// Executes every tool_use request, bounded to `concurrency_limit`
    /// in-flight calls, and returns results in the same order as the input
    /// regardless of completion order (§4.2, P4).
    pub async fn execute_many(
        &self,
        credentials: &CredentialStore,
        requests: &[ToolUseRequest],
        concurrency_limit: usize,
    ) -> Vec<ToolResult> {
        use futures_util::stream::{self, StreamExt};

        stream::iter(requests.iter())
            .map(|req| self.execute_one(credentials, req))
            .buffered(concurrency_limit.max(1))
            .collect()
            .await
    }

    /// Runs the full C2 algorithm for a single tool_use block (§4.2).
    pub async fn execute_one(&self, credentials: &CredentialStore, req: &ToolUseRequest) -> ToolResult {
        let descriptor = match self.descriptors.get(&req.name) {
            Some(d) => d,
            None => return ToolResult::error(&req.id, format!("unknown tool: {}", req.name)),
        };

        let routed = match route_params(descriptor, &req.input) {
            Ok(r) => r,
            Err(msg) => return ToolResult::error(&req.id, msg),
        };

        let url = match self.build_url(descriptor, &routed) {
            Ok(u) => u,
            Err(msg) => return ToolResult::error(&req.id, msg),
        };

        self.execute_with_retry(credentials, descriptor, &req.id, url, routed)
            .await
    }

    fn build_url(&self, descriptor: &ToolDescriptor, routed: &RoutedParams) -> Result<reqwest::Url, String> {
        let path = substitute_path_template(&descriptor.url_template, &routed.path);
        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            path
        } else {
            let base = self
                .default_base_url
                .as_deref()
                .ok_or_else(|| "tool descriptor has a relative URL but no base URL is configured".to_string())?;
            format!("{}{}", base.trim_end_matches('/'), path)
        };
        reqwest::Url::parse(&joined).map_err(|e| format!("invalid tool URL '{}': {}", joined, e))
    }

    async fn execute_with_retry(
        &self,
        credentials: &CredentialStore,
        descriptor: &ToolDescriptor,
        tool_use_id: &str,
        url: reqwest::Url,
        routed: RoutedParams,
    ) -> ToolResult {
        let mut oauth_retry_used = false;
        let mut attempt = 0u32;

        loop {
            let mut headers = HeaderMap::new();
            if descriptor.method.admits_body() {
                headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
            }
            let hint = descriptor.auth_hint.as_ref().map(|h| h.to_auth_hint());
            if let Err(e) = credentials.apply(&mut headers, hint.as_ref()).await {
                return ToolResult::error(tool_use_id, format!("failed to apply credentials: {}", e));
            }

            let mut builder = self
                .http
                .reqwest_client()
                .request(descriptor.method.as_reqwest(), url.clone())
                .headers(headers)
                .timeout(self.http.timeout());

            if !routed.query.is_empty() {
                builder = builder.query(&routed.query);
            }
            if descriptor.method.admits_body() && !routed.body.is_empty() {
                builder = builder.json(&routed.body);
            }

            let request = match builder.build() {
                Ok(r) => r,
                Err(e) => return ToolResult::error(tool_use_id, format!("failed to build request: {}", e)),
            };

            match self.http.execute(request).await {
                Ok(resp) if resp.status == 401 && !oauth_retry_used && credentials.is_oauth2().await => {
                    debug!(tool = %descriptor.name, "401 from tool endpoint, invalidating oauth2 token and retrying once");
                    credentials.invalidate_oauth_token().await;
                    oauth_retry_used = true;
                    continue;
                }
                Ok(resp) if is_retryable_status(resp.status) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    backoff_sleep(attempt).await;
                    continue;
                }
                Ok(resp) => return decode_response(tool_use_id, resp),
                Err(e) if e.retryable && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(tool = %descriptor.name, attempt, error = %e, "retrying tool call after transport error");
                    backoff_sleep(attempt).await;
                    continue;
                }
                Err(e) => return ToolResult::error(tool_use_id, format!("tool request failed: {}", e)),
            }
        }
    }
}

struct RoutedParams {
    path: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: serde_json::Map<String, Value>,
}

fn route_params(descriptor: &ToolDescriptor, input: &Value) -> Result<RoutedParams, String> {
    let obj = input.as_object();

    let mut path = Vec::new();
    for spec in descriptor.path_params() {
        let value = lookup_param(obj, &spec.name, spec.required)?;
        if let Some(value) = value {
            path.push((spec.name.clone(), value_to_string(&value)));
        }
    }

    let mut query = Vec::new();
    for spec in descriptor.query_params() {
        let value = lookup_param(obj, &spec.name, spec.required)?;
        if let Some(value) = value {
            query.push((spec.name.clone(), value_to_string(&value)));
        }
    }

    let mut body = serde_json::Map::new();
    for spec in descriptor.body_params() {
        let value = lookup_param(obj, &spec.name, spec.required)?;
        if let Some(value) = value {
            body.insert(spec.name.clone(), value);
        }
    }

    Ok(RoutedParams { path, query, body })
}

fn lookup_param(
    obj: Option<&serde_json::Map<String, Value>>,
    name: &str,
    required: bool,
) -> Result<Option<Value>, String> {
    let found = obj.and_then(|o| o.get(name)).cloned();
    if found.is_none() && required {
        return Err(format!("missing required parameter '{}'", name));
    }
    Ok(found)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 429 is carved out of "non-retryable 4xx" the same way 401 is — a
/// rate-limited tool endpoint gets the same bounded backoff as a transport
/// error.
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}


async fn backoff_sleep(attempt: u32) {
    let base = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10)).min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
    tokio::time::sleep(Duration::from_millis(base + jitter)).await;
}

fn decode_response(tool_use_id: &str, resp: crate::http_client::RawResponse) -> ToolResult {
    let is_error = !(200..300).contains(&resp.status);
    let body_text = String::from_utf8_lossy(&resp.body).to_string();

    let rendered = match serde_json::from_str::<Value>(&body_text) {
        Ok(json) => json.to_string(),
        Err(_) => body_text,
    };

    let content = if is_error {
        format!("HTTP {}: {}", resp.status, rendered)
    } else {
        rendered
    };

    ToolResult {
        tool_use_id: tool_use_id.to_string(),
        content,
        is_error,
    }
}
