use thiserror::Error;

/// Core error type shared by every component. Each variant carries a stable
/// machine-readable `code()` used both for `error` wire frames and log fields.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("bad credentials: {0}")]
    BadCredentials(String),

    #[error("token acquisition failed: {0}")]
    AuthAcquisitionFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown frame type: {frame_type}")]
    UnknownFrameType { frame_type: String },

    #[error("session busy")]
    Busy,

    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    #[error("tool-call budget exhausted")]
    ToolBudgetExhausted,

    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("context too long")]
    ContextTooLong,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Short error code string sent to clients in `error` wire frames.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::AuthFailed(_) => "AUTH_FAILED",
            BridgeError::BadCredentials(_) => "BAD_CREDENTIALS",
            BridgeError::AuthAcquisitionFailed(_) => "AUTH_ACQUISITION_FAILED",
            BridgeError::Protocol(_) => "PROTOCOL_ERROR",
            BridgeError::UnknownFrameType { .. } => "UNKNOWN_FRAME_TYPE",
            BridgeError::Busy => "BUSY",
            BridgeError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            BridgeError::ToolBudgetExhausted => "TOOL_BUDGET_EXHAUSTED",
            BridgeError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            BridgeError::ContextTooLong => "CONTEXT_TOO_LONG",
            BridgeError::Serialization(_) => "SERIALIZATION_ERROR",
            BridgeError::Io(_) => "IO_ERROR",
            BridgeError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            BridgeError::Timeout { .. } => "TIMEOUT",
            BridgeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
