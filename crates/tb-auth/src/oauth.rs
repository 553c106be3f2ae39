use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use tb_core::error::{BridgeError, Result};

use crate::credentials::OAuthTokenCache;

/// Fraction of `expires_in` after which a cached token is considered stale
/// and must be refreshed ahead of actual expiry (§4.1, P5).
const EXPIRY_FRACTION: f64 = 0.9;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Ensure a valid cached access token is available, refreshing it if absent
/// or past its `0.9 × expires_in` deadline.
///
/// Mirrors the read-then-write-lock double-check pattern used for refreshing
/// long-lived OAuth credentials elsewhere in this codebase: the fast path
/// takes only a read lock; the slow path re-checks under a write lock before
/// making the network call, so concurrent callers that both observed a stale
/// token still only issue one token-fetch request (P5).
pub async fn ensure_token(
    http: &reqwest::Client,
    cache: &tokio::sync::RwLock<OAuthTokenCache>,
    client_id: &str,
    client_secret: &str,
    token_url: &str,
    scope: Option<&str>,
) -> Result<String> {
    let now = Utc::now();

    {
        let guard = cache.read().await;
        if guard.is_valid(now) {
            return Ok(guard.access_token.clone().expect("validated above"));
        }
    }

    let mut guard = cache.write().await;
    // Re-check: another task may have refreshed while we waited for the lock.
    if guard.is_valid(now) {
        return Ok(guard.access_token.clone().expect("validated above"));
    }

    debug!(token_url, "fetching new oauth2 access token");
    let token = fetch_token(http, client_id, client_secret, token_url, scope).await?;
    *guard = token.clone();
    Ok(token.access_token.expect("just populated"))
}

/// Invalidate a cached token — called after a 401 against an OAuth2
/// credential (§4.2 step 6), forcing exactly one refresh on retry.
pub async fn invalidate(cache: &tokio::sync::RwLock<OAuthTokenCache>) {
    let mut guard = cache.write().await;
    guard.access_token = None;
    guard.expiry_deadline = None;
}

async fn fetch_token(
    http: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    token_url: &str,
    scope: Option<&str>,
) -> Result<OAuthTokenCache> {
    let mut form = vec![("grant_type", "client_credentials")];
    if let Some(scope) = scope {
        form.push(("scope", scope));
    }

    let resp = http
        .post(token_url)
        .basic_auth(client_id, Some(client_secret))
        .form(&form)
        .send()
        .await
        .map_err(|e| BridgeError::AuthAcquisitionFailed(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(BridgeError::AuthAcquisitionFailed(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let parsed: TokenResponse = resp
        .json()
        .await
        .map_err(|e| BridgeError::AuthAcquisitionFailed(e.to_string()))?;

    let expiry_deadline: DateTime<Utc> =
        Utc::now() + chrono::Duration::milliseconds((parsed.expires_in as f64 * EXPIRY_FRACTION * 1000.0) as i64);

    Ok(OAuthTokenCache {
        access_token: Some(parsed.access_token),
        expiry_deadline: Some(expiry_deadline),
    })
}
