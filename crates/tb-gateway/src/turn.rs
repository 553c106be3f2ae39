use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use tb_conversation::{Block, Message};
use tb_llm::{InvocationError, InvocationReply, InvocationRequest, SamplingParams, ToolSpec, ToolUseCall};
use tb_tools::ToolUseRequest;

use crate::app::AppState;
use crate::session::Session;

const TURN_WALL_CLOCK_BUDGET: Duration = Duration::from_secs(300);

/// Outcome of one complete `chat` turn (§4.5 "Turn loop"), ready to be
/// rendered onto the wire as an `ai_response` frame.
pub enum TurnOutcome {
    Final(String),
    Fatal(String),
}

/// Drives the multi-turn tool loop for a single `chat` frame: append the
/// user message, invoke the LLM Pipeline, fan out any tool_use requests via
/// the Tool Executor, append results, and repeat until a terminal text
/// reply or a budget is exhausted (§4.5 steps 1-5).
pub async fn run_turn(app: Arc<AppState>, session: Arc<Session>, user_message: String) -> TurnOutcome {
    session.conversation.append(Message::user(user_message)).await;

    let started = Instant::now();
    let mut tool_calls_used: u32 = 0;

    loop {
        if started.elapsed() > TURN_WALL_CLOCK_BUDGET {
            warn!(session_id = %session.id, "turn wall-clock budget exhausted");
            return TurnOutcome::Fatal("turn exceeded its time budget".to_string());
        }

        session.rate_gate.acquire().await;

        let snapshot = session.conversation.snapshot_for_llm().await;
        let request = InvocationRequest {
            model_id: app.config.model.model_id.clone(),
            messages: snapshot,
            sampling: SamplingParams {
                temperature: app.config.model.temperature,
                max_tokens: app.config.model.max_tokens,
                stop_sequences: app.config.model.stop_sequences.clone(),
            },
            tools: available_tool_specs(&app),
            system_prompt_override: None,
        };

        let reply = app.llm.run_turn(request, &app.config.conversation).await;

        match reply {
            Ok(InvocationReply::Final { text }) => {
                session.conversation.append(Message::assistant_text(text.clone())).await;
                return TurnOutcome::Final(text);
            }
            Ok(InvocationReply::ToolUses { text, tool_uses }) => {
                if tool_calls_used + tool_uses.len() as u32 > app.config.tools.max_tool_calls {
                    warn!(session_id = %session.id, "tool-call budget exhausted");
                    return TurnOutcome::Fatal("tool-call budget exhausted".to_string());
                }
                tool_calls_used += tool_uses.len() as u32;

                let tool_use_blocks: Vec<Block> = tool_uses
                    .iter()
                    .map(|t| Block::ToolUse {
                        id: t.id.clone(),
                        name: t.name.clone(),
                        input: t.input.clone(),
                    })
                    .collect();
                session
                    .conversation
                    .append(Message::assistant_with_tool_uses(text, tool_use_blocks))
                    .await;

                let requests = to_tool_requests(&tool_uses);
                let results = app
                    .tool_executor
                    .execute_many(&session.credentials, &requests, app.config.tools.max_tool_calls_per_turn as usize)
                    .await;

                let result_blocks: Vec<Block> = results
                    .into_iter()
                    .map(|r| Block::ToolResult {
                        tool_use_id: r.tool_use_id,
                        content: r.content,
                        is_error: r.is_error,
                    })
                    .collect();
                session.conversation.append(Message::tool_results(result_blocks)).await;
            }
            Err(err) => {
                info!(session_id = %session.id, kind = err.kind(), "turn ended with a fatal model error");
                return TurnOutcome::Fatal(fatal_message(err));
            }
        }
    }
}

/// Advertises the currently loaded descriptor table to the model, so it can
/// legitimately choose to emit a tool_use for any of them (§6).
fn available_tool_specs(app: &AppState) -> Vec<ToolSpec> {
    app.tool_executor
        .descriptors()
        .all()
        .map(|d| ToolSpec {
            name: d.name.clone(),
            description: format!("Calls {} {}", d.method.as_reqwest(), d.url_template),
            input_schema: d.input_json_schema(),
        })
        .collect()
}

fn to_tool_requests(tool_uses: &[ToolUseCall]) -> Vec<ToolUseRequest> {
    tool_uses
        .iter()
        .map(|t| ToolUseRequest {
            id: t.id.clone(),
            name: t.name.clone(),
            input: t.input.clone(),
        })
        .collect()
}

fn fatal_message(err: InvocationError) -> String {
    match err {
        InvocationError::AuthFailed(_) => "the model service rejected our credentials".to_string(),
        InvocationError::Fatal(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use tb_core::types::ModelFamily;
    use tb_tools::{DescriptorTable, ToolExecutor, ToolHttpClient};
    use tb_llm::{AdapterRouter, AdapterSlot, ModelInvoker};

    use crate::session::SessionTable;

    use super::*;

    /// Always replies with a final text turn.
    struct EchoesFinal;
    #[async_trait]
    impl ModelInvoker for EchoesFinal {
        fn family(&self) -> ModelFamily {
            ModelFamily::Claude
        }
        async fn invoke(&self, _req: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
            Ok(InvocationReply::Final { text: "hello back".to_string() })
        }
    }

    /// Issues one tool_use on the first call, then replies final.
    struct OneToolRoundtrip {
        calls: AtomicU32,
    }
    #[async_trait]
    impl ModelInvoker for OneToolRoundtrip {
        fn family(&self) -> ModelFamily {
            ModelFamily::Claude
        }
        async fn invoke(&self, _req: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(InvocationReply::ToolUses {
                    text: None,
                    tool_uses: vec![ToolUseCall {
                        id: "call-1".to_string(),
                        name: "does_not_exist".to_string(),
                        input: serde_json::json!({}),
                    }],
                })
            } else {
                Ok(InvocationReply::Final { text: "done".to_string() })
            }
        }
    }

    fn app_with(invoker: impl ModelInvoker + 'static) -> Arc<AppState> {
        let http = reqwest::Client::new();
        let config = tb_core::config::BridgeConfig::default();

        let router = AdapterRouter::new(vec![AdapterSlot::new(Box::new(invoker))]);
        let llm = Arc::new(tb_llm::LlmPipeline::new(router));

        let tool_http = ToolHttpClient::new(http.clone(), vec![], vec![], std::time::Duration::from_secs(5), 1024 * 1024);
        let tool_executor = Arc::new(ToolExecutor::new(DescriptorTable::new(vec![]), tool_http, None));

        Arc::new(AppState {
            config,
            http,
            sessions: SessionTable::new(),
            tool_executor,
            llm,
        })
    }

    #[tokio::test]
    async fn final_reply_ends_the_turn_immediately() {
        let app = app_with(EchoesFinal);
        let session = Arc::new(Session::new(app.http.clone(), &app.config));

        let outcome = run_turn(app, session, "hi".to_string()).await;
        match outcome {
            TurnOutcome::Final(text) => assert_eq!(text, "hello back"),
            TurnOutcome::Fatal(msg) => panic!("expected final reply, got fatal: {msg}"),
        }
    }

    #[tokio::test]
    async fn tool_use_round_trips_through_the_executor_and_continues() {
        let app = app_with(OneToolRoundtrip { calls: AtomicU32::new(0) });
        let session = Arc::new(Session::new(app.http.clone(), &app.config));

        let outcome = run_turn(app.clone(), session.clone(), "do a lookup".to_string()).await;
        match outcome {
            TurnOutcome::Final(text) => assert_eq!(text, "done"),
            TurnOutcome::Fatal(msg) => panic!("expected final reply, got fatal: {msg}"),
        }

        // unknown-tool result and the retry turn both landed in history.
        assert!(session.conversation.len().await >= 3);
    }

    #[tokio::test]
    async fn tool_budget_exhaustion_is_reported_as_fatal() {
        let app = app_with(OneToolRoundtrip { calls: AtomicU32::new(0) });
        let mut config = app.config.clone();
        config.tools.max_tool_calls = 0;

        let router = AdapterRouter::new(vec![AdapterSlot::new(Box::new(OneToolRoundtrip { calls: AtomicU32::new(0) }))]);
        let llm = Arc::new(tb_llm::LlmPipeline::new(router));
        let capped_app = Arc::new(AppState {
            config,
            http: app.http.clone(),
            sessions: SessionTable::new(),
            tool_executor: app.tool_executor.clone(),
            llm,
        });
        let session = Arc::new(Session::new(capped_app.http.clone(), &capped_app.config));

        let outcome = run_turn(capped_app, session, "do a lookup".to_string()).await;
        match outcome {
            TurnOutcome::Fatal(msg) => assert_eq!(msg, "tool-call budget exhausted"),
            TurnOutcome::Final(text) => panic!("expected fatal outcome, got final: {text}"),
        }
    }
}
