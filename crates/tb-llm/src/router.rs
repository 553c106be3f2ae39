use tracing::{info, warn};

use crate::invocation::{InvocationError, InvocationReply, InvocationRequest, ModelInvoker};

const DEFAULT_MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 8_000;

/// One adapter slot in priority order (§4.4 "Retry and fallback").
pub struct AdapterSlot {
    pub adapter: Box<dyn ModelInvoker>,
    pub max_retries: u32,
}

impl AdapterSlot {
    pub fn new(adapter: Box<dyn ModelInvoker>) -> Self {
        Self {
            adapter,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Routes an invocation across priority-ordered model-family adapters with
/// bounded exponential backoff per adapter and fallback to the next adapter
/// once one exhausts its retries (§4.4).
pub struct AdapterRouter {
    slots: Vec<AdapterSlot>,
}

impl AdapterRouter {
    pub fn new(slots: Vec<AdapterSlot>) -> Self {
        assert!(!slots.is_empty(), "AdapterRouter requires at least one adapter slot");
        Self { slots }
    }

    pub async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
        let mut last_err: Option<InvocationError> = None;

        for slot in &self.slots {
            let family = slot.adapter.family();

            for attempt in 0..=slot.max_retries {
                match slot.adapter.invoke(request).await {
                    Ok(reply) => {
                        if attempt > 0 {
                            info!(?family, attempt, "invocation succeeded after retry");
                        }
                        return Ok(reply);
                    }
                    Err(err) => {
                        warn!(?family, attempt, kind = err.kind(), error = %err, "invocation attempt failed");

                        let retryable = matches!(
                            err,
                            InvocationError::Transient(_) | InvocationError::RateLimited { .. }
                        );
                        let stop_slot = matches!(err, InvocationError::AuthFailed(_) | InvocationError::Fatal(_));

                        last_err = Some(err);

                        if stop_slot || !retryable || attempt >= slot.max_retries {
                            break;
                        }

                        let delay = match &last_err {
                            Some(InvocationError::RateLimited { retry_after_ms }) => *retry_after_ms,
                            _ => backoff_delay_ms(attempt),
                        };
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                    }
                }
            }

            info!(?family, "adapter exhausted, trying next configured adapter");
        }

        Err(last_err.unwrap_or_else(|| InvocationError::Fatal("no adapters configured".to_string())))
    }
}

fn backoff_delay_ms(attempt: u32) -> u64 {
    let base = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10)).min(MAX_BACKOFF_MS);
    let jitter_fraction = rand::random::<f64>() * 0.2 - 0.1; // ±10%
    (base as f64 * (1.0 + jitter_fraction)).max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tb_core::types::ModelFamily;

    use crate::invocation::SamplingParams;

    struct AlwaysFail;
    #[async_trait]
    impl ModelInvoker for AlwaysFail {
        fn family(&self) -> ModelFamily {
            ModelFamily::Claude
        }
        async fn invoke(&self, _req: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
            Err(InvocationError::Transient("boom".to_string()))
        }
    }

    struct AlwaysOk;
    #[async_trait]
    impl ModelInvoker for AlwaysOk {
        fn family(&self) -> ModelFamily {
            ModelFamily::Gpt
        }
        async fn invoke(&self, _req: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
            Ok(InvocationReply::Final { text: "ok".to_string() })
        }
    }

    fn request() -> InvocationRequest {
        InvocationRequest {
            model_id: "test".to_string(),
            messages: vec![],
            sampling: SamplingParams {
                temperature: 0.7,
                max_tokens: 100,
                stop_sequences: vec![],
            },
            tools: vec![],
            system_prompt_override: None,
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_adapter_after_exhausting_retries() {
        let router = AdapterRouter::new(vec![
            AdapterSlot::new(Box::new(AlwaysFail)).with_max_retries(0),
            AdapterSlot::new(Box::new(AlwaysOk)),
        ]);
        let result = router.invoke(&request()).await;
        match result.unwrap() {
            InvocationReply::Final { text } => assert_eq!(text, "ok"),
            _ => panic!("expected final text"),
        }
    }

    #[tokio::test]
    async fn surfaces_last_error_when_all_adapters_fail() {
        let router = AdapterRouter::new(vec![
            AdapterSlot::new(Box::new(AlwaysFail)).with_max_retries(0),
            AdapterSlot::new(Box::new(AlwaysFail)).with_max_retries(0),
        ]);
        assert!(router.invoke(&request()).await.is_err());
    }

    #[tokio::test]
    async fn auth_failure_does_not_retry_same_adapter() {
        struct AuthFail;
        #[async_trait]
        impl ModelInvoker for AuthFail {
            fn family(&self) -> ModelFamily {
                ModelFamily::Claude
            }
            async fn invoke(&self, _req: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
                Err(InvocationError::AuthFailed("bad key".to_string()))
            }
        }
        let router = AdapterRouter::new(vec![AdapterSlot::new(Box::new(AuthFail)).with_max_retries(5)]);
        let err = router.invoke(&request()).await.unwrap_err();
        assert_eq!(err.kind(), "auth_failed");
    }
}
