use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use tokio::sync::RwLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tb_core::error::{BridgeError, Result};

use crate::credentials::Credentials;
use crate::oauth;

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Authentication hint attached to a tool descriptor (§3, §6), consulted by
/// `apply` when the credential variant does not itself pin a header name.
#[derive(Debug, Clone, Default)]
pub struct AuthHint {
    pub api_key_header: Option<String>,
}

/// C1 — Credential Store & Auth Applier.
///
/// Owned by a Session for the channel's lifetime; `apply` is invoked by the
/// Tool Executor under the session's serializing gate (§4.1).
pub struct CredentialStore {
    slot: RwLock<Credentials>,
    allowed_types: Vec<String>,
    http: reqwest::Client,
}

impl CredentialStore {
    pub fn new(http: reqwest::Client, allowed_types: Vec<String>) -> Self {
        Self {
            slot: RwLock::new(Credentials::None),
            allowed_types,
            http,
        }
    }

    /// Validates the variant's required fields and checks it against the
    /// configured allow-list, then replaces the stored credential. Any
    /// previously cached OAuth2 token is dropped along with the old variant.
    pub async fn set(&self, credentials: Credentials) -> Result<()> {
        credentials
            .validate()
            .map_err(BridgeError::BadCredentials)?;

        if !self.allowed_types.is_empty()
            && credentials.type_name() != "none"
            && !self.allowed_types.iter().any(|t| t == credentials.type_name())
        {
            return Err(BridgeError::BadCredentials(format!(
                "auth type '{}' is not in the configured allow-list",
                credentials.type_name()
            )));
        }

        let mut guard = self.slot.write().await;
        *guard = credentials;
        Ok(())
    }

    /// Zeroes the stored credential.
    pub async fn clear(&self) {
        let mut guard = self.slot.write().await;
        *guard = Credentials::None;
    }

    pub async fn has_credentials(&self) -> bool {
        !matches!(*self.slot.read().await, Credentials::None)
    }

    /// True when the stored credential is `OAuth2ClientCredentials` — used to
    /// gate the executor's invalidate-and-retry-once behavior on 401, since
    /// invalidating any other variant is a no-op that just burns a retry.
    pub async fn is_oauth2(&self) -> bool {
        matches!(*self.slot.read().await, Credentials::OAuth2ClientCredentials { .. })
    }

    /// Invalidate a cached OAuth2 token — called after a 401 (§4.2 step 6).
    pub async fn invalidate_oauth_token(&self) {
        if let Credentials::OAuth2ClientCredentials { cache, .. } = &*self.slot.read().await {
            oauth::invalidate(cache).await;
        }
    }

    /// Returns headers with the appropriate authentication header(s) added
    /// per the stored credential variant (§4.1). Does not overwrite headers
    /// the caller already supplied unless the variant mandates it.
    pub async fn apply(&self, headers: &mut HeaderMap, hint: Option<&AuthHint>) -> Result<()> {
        let guard = self.slot.read().await;
        match &*guard {
            Credentials::None => Ok(()),

            Credentials::BearerToken { token } => {
                set_header(headers, AUTHORIZATION.as_str(), &format!("Bearer {}", token))
            }

            Credentials::BasicAuth { user, pass } => {
                let encoded = BASE64.encode(format!("{}:{}", user, pass));
                set_header(headers, AUTHORIZATION.as_str(), &format!("Basic {}", encoded))
            }

            Credentials::ApiKey { value, header_name } => {
                // credential-specified header name takes precedence over the
                // tool's auth hint, which in turn takes precedence over the default.
                let name = header_name
                    .clone()
                    .or_else(|| hint.and_then(|h| h.api_key_header.clone()))
                    .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string());
                set_header(headers, &name, value)
            }

            Credentials::OAuth2ClientCredentials {
                client_id,
                client_secret,
                token_url,
                scope,
                cache,
            } => {
                let token = oauth::ensure_token(
                    &self.http,
                    cache,
                    client_id,
                    client_secret,
                    token_url,
                    scope.as_deref(),
                )
                .await?;
                set_header(headers, AUTHORIZATION.as_str(), &format!("Bearer {}", token))
            }

            Credentials::Custom { headers: custom } => {
                for (name, value) in custom {
                    insert_if_absent(headers, name, value)?;
                }
                Ok(())
            }
        }
    }
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let (header_name, header_value) = build_header(name, value)?;
    headers.insert(header_name, header_value);
    Ok(())
}

/// Insert a header only if it is not already present — used for the
/// `Custom` variant, which must not clobber headers the caller already set.
fn insert_if_absent(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let (header_name, header_value) = build_header(name, value)?;
    if !headers.contains_key(&header_name) {
        headers.insert(header_name, header_value);
    }
    Ok(())
}

fn build_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| BridgeError::Internal(format!("invalid header name '{}': {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| BridgeError::Internal(format!("invalid header value for '{}': {}", name, e)))?;
    Ok((header_name, header_value))
}
