use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Client → server frame (§6). Deserialized directly from the inbound WS
/// text frame; an unrecognized `type` or malformed body fails to parse and
/// the connection handler turns that into a non-fatal `error` frame rather
/// than propagating a panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        #[serde(flatten)]
        credentials: AuthPayload,
    },
    Logout,
    Chat {
        message: String,
    },
    Ping,
}

/// Discriminated credential payload carried by an `auth` frame. The
/// `auth_type` tag mirrors the `Credentials` variants of the data model;
/// field names here are the wire names, translated to `tb_auth::Credentials`
/// by the gateway before being handed to the Credential Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "auth_type", rename_all = "snake_case")]
pub enum AuthPayload {
    BearerToken {
        token: String,
    },
    BasicAuth {
        username: String,
        password: String,
    },
    ApiKey {
        value: String,
        #[serde(default)]
        header_name: Option<String>,
    },
    Oauth2ClientCredentials {
        client_id: String,
        client_secret: String,
        token_url: String,
        #[serde(default)]
        scope: Option<String>,
    },
    Custom {
        headers: HashMap<String, String>,
    },
}

impl AuthPayload {
    /// The wire-level `auth_type` string, echoed back in `auth_configured`.
    pub fn auth_type(&self) -> &'static str {
        match self {
            AuthPayload::BearerToken { .. } => "bearer_token",
            AuthPayload::BasicAuth { .. } => "basic_auth",
            AuthPayload::ApiKey { .. } => "api_key",
            AuthPayload::Oauth2ClientCredentials { .. } => "oauth2_client_credentials",
            AuthPayload::Custom { .. } => "custom",
        }
    }
}

/// Server → client frame (§6). One enum covers every pushed event; there is
/// no request/response correlation id because the channel is not RPC —
/// frames are emitted in reaction to client frames or as part of the turn
/// loop, always in the order this state machine produces them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionEstablished {
        session_id: String,
        timestamp: String,
    },
    AuthConfigured {
        auth_type: String,
        timestamp: String,
    },
    AuthFailed {
        message: String,
    },
    LogoutSuccess {
        message: String,
    },
    Typing {
        typing: bool,
    },
    AiResponse {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_results: Option<serde_json::Value>,
        timestamp: String,
    },
    Pong,
    Error {
        message: String,
        timestamp: String,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        ServerFrame::AuthFailed {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"frame serialization failed","timestamp":""}"#.to_string()
        })
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
