use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Tagged credential variant held by a session's Credential Store (§3).
///
/// `None` is the default: a session is usable without any tool credentials
/// unless `require_tool_auth` is configured.
#[derive(Clone)]
pub enum Credentials {
    None,
    BearerToken {
        token: String,
    },
    BasicAuth {
        user: String,
        pass: String,
    },
    ApiKey {
        value: String,
        header_name: Option<String>,
    },
    OAuth2ClientCredentials {
        client_id: String,
        client_secret: String,
        token_url: String,
        scope: Option<String>,
        cache: Arc<RwLock<OAuthTokenCache>>,
    },
    Custom {
        headers: HashMap<String, String>,
    },
}

/// Cached OAuth2 access token state, opaque to callers (§3). Held behind an
/// `Arc<RwLock<_>>` so it survives being cloned alongside the `Credentials`
/// value while still letting concurrent tool executions share one cache.
#[derive(Debug, Clone, Default)]
pub struct OAuthTokenCache {
    pub access_token: Option<String>,
    pub expiry_deadline: Option<DateTime<Utc>>,
}

impl OAuthTokenCache {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.expiry_deadline) {
            (Some(_), Some(deadline)) => now < deadline,
            _ => false,
        }
    }
}

impl Credentials {
    /// The wire-level auth type name, used for allow-list checks and for
    /// echoing back in the `auth_configured` frame.
    pub fn type_name(&self) -> &'static str {
        match self {
            Credentials::None => "none",
            Credentials::BearerToken { .. } => "bearer_token",
            Credentials::BasicAuth { .. } => "basic_auth",
            Credentials::ApiKey { .. } => "api_key",
            Credentials::OAuth2ClientCredentials { .. } => "oauth2_client_credentials",
            Credentials::Custom { .. } => "custom",
        }
    }

    /// Validates that the variant's required fields are non-empty (§4.1).
    /// Called at ingestion, before the credential is stored.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Credentials::None => Ok(()),
            Credentials::BearerToken { token } => non_empty("token", token),
            Credentials::BasicAuth { user, pass } => {
                non_empty("user", user)?;
                non_empty("pass", pass)
            }
            Credentials::ApiKey { value, .. } => non_empty("value", value),
            Credentials::OAuth2ClientCredentials {
                client_id,
                client_secret,
                token_url,
                ..
            } => {
                non_empty("client_id", client_id)?;
                non_empty("client_secret", client_secret)?;
                non_empty("token_url", token_url)
            }
            Credentials::Custom { headers } => {
                if headers.is_empty() {
                    Err("custom credentials require at least one header".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn new_oauth2(
        client_id: String,
        client_secret: String,
        token_url: String,
        scope: Option<String>,
    ) -> Self {
        Credentials::OAuth2ClientCredentials {
            client_id,
            client_secret,
            token_url,
            scope,
            cache: Arc::new(RwLock::new(OAuthTokenCache::default())),
        }
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{} must not be empty", field))
    } else {
        Ok(())
    }
}
