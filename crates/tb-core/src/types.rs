use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, unguessable session identifier issued at channel accept.
///
/// UUIDv4 rather than v7: a session id must not leak creation-order
/// information to the client side of an untrusted channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a single user turn for log correlation (not sent over the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which wire format a session's configured model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Claude,
    Gpt,
    Llama,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::Claude => write!(f, "claude"),
            ModelFamily::Gpt => write!(f, "gpt"),
            ModelFamily::Llama => write!(f, "llama"),
        }
    }
}

impl std::str::FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "claude" => Ok(ModelFamily::Claude),
            "gpt" => Ok(ModelFamily::Gpt),
            "llama" => Ok(ModelFamily::Llama),
            other => Err(format!("unknown model family: {}", other)),
        }
    }
}

/// How the session orchestrator handles a `chat` frame that arrives while a
/// turn is already `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    #[default]
    Reject,
    Queue,
}
