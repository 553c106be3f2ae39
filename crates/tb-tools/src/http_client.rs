use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::time::Duration;

use tb_core::error::{BridgeError, Result};

/// Outbound HTTP client for tool calls (§4.2, §6). Wraps a shared pooled
/// `reqwest::Client` with the deny/allow-listed domain check and the
/// incremental, size-capped body read that keep a malicious or buggy tool
/// endpoint from exhausting memory or reaching internal network ranges.
#[derive(Clone)]
pub struct ToolHttpClient {
    client: reqwest::Client,
    allowed_domains: Vec<String>,
    denied_domains: Vec<String>,
    timeout: Duration,
    max_response_bytes: usize,
}

pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// A failed request attempt, carrying the retryability classification
/// (§4.2 step 6) the executor's retry loop needs: connection reset and
/// timeout are retryable; DNS/TLS failures are not.
#[derive(Debug)]
pub struct ExecuteError {
    pub message: String,
    pub retryable: bool,
}

impl std::fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ExecuteError {
    fn from_domain_check(err: BridgeError) -> Self {
        Self {
            message: err.to_string(),
            retryable: false,
        }
    }

    fn from_payload_too_large(err: BridgeError) -> Self {
        Self {
            message: err.to_string(),
            retryable: false,
        }
    }
}

impl ToolHttpClient {
    pub fn new(
        client: reqwest::Client,
        allowed_domains: Vec<String>,
        denied_domains: Vec<String>,
        timeout: Duration,
        max_response_bytes: usize,
    ) -> Self {
        Self {
            client,
            allowed_domains,
            denied_domains,
            timeout,
            max_response_bytes,
        }
    }

    pub async fn execute(&self, request: reqwest::Request) -> std::result::Result<RawResponse, ExecuteError> {
        let url = request.url().clone();
        self.check_domain(&url)
            .await
            .map_err(ExecuteError::from_domain_check)?;

        let response = self.client.execute(request).await.map_err(classify_transport_error)?;

        let status = response.status().as_u16();
        let body = self.read_capped_body(response).await?;
        Ok(RawResponse { status, body })
    }

    async fn read_capped_body(&self, response: reqwest::Response) -> std::result::Result<Vec<u8>, ExecuteError> {
        use futures_util::StreamExt;

        let mut stream = response.bytes_stream();
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify_transport_error)?;
            if buf.len() + chunk.len() > self.max_response_bytes {
                return Err(ExecuteError::from_payload_too_large(BridgeError::PayloadTooLarge {
                    size: buf.len() + chunk.len(),
                    max: self.max_response_bytes,
                }));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }

    async fn check_domain(&self, url: &reqwest::Url) -> Result<()> {
        let host = url
            .host_str()
            .ok_or_else(|| BridgeError::Internal("tool request URL has no host".to_string()))?
            .to_string();

        if self.denied_domains.iter().any(|d| domain_matches(d, &host)) {
            return Err(BridgeError::Internal(format!(
                "domain '{}' is on the deny-list",
                host
            )));
        }
        if !self.allowed_domains.is_empty()
            && !self.allowed_domains.iter().any(|d| domain_matches(d, &host))
        {
            return Err(BridgeError::Internal(format!(
                "domain '{}' is not on the allow-list",
                host
            )));
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let lookup = format!("{}:{}", host, port);
        let blocked = tokio::task::spawn_blocking(move || check_ssrf_blocked(&lookup))
            .await
            .map_err(|e| BridgeError::Internal(format!("ssrf check task failed: {}", e)))?;
        if blocked {
            return Err(BridgeError::Internal(format!(
                "domain '{}' resolves to a blocked network range",
                host
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn reqwest_client(&self) -> &reqwest::Client {
        &self.client
    }
}

fn domain_matches(pattern: &str, host: &str) -> bool {
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

/// Resolves `host:port` and rejects loopback, link-local, and RFC-1918/ULA
/// private ranges so a maliciously crafted tool descriptor or model-supplied
/// URL parameter cannot reach internal infrastructure.
fn check_ssrf_blocked(addr: &str) -> bool {
    match addr.to_socket_addrs() {
        Ok(addrs) => addrs.map(|a| a.ip()).any(|ip| is_ssrf_ip(ip)),
        Err(_) => true,
    }
}

fn is_ssrf_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_link_local()
        || ip.is_private()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    ip.is_loopback() || ip.is_unspecified() || is_v6_unique_local(ip) || is_v6_link_local(ip)
}

fn is_v6_unique_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_v6_link_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Timeouts and plain connection resets are retried; DNS resolution and TLS
/// handshake failures (both surface as `is_connect()`) are not, since
/// retrying them is very unlikely to succeed (§4.2 step 6).
fn classify_transport_error(err: reqwest::Error) -> ExecuteError {
    let retryable = err.is_timeout() || !err.is_connect();
    ExecuteError {
        message: err.to_string(),
        retryable,
    }
}

/// Substitutes `{name}` placeholders in a URL path template with
/// percent-encoded values, so a path parameter cannot smuggle in an
/// additional path segment or query string.
pub fn substitute_path_template(template: &str, params: &[(String, String)]) -> String {
    let mut out = template.to_string();
    for (name, value) in params {
        let placeholder = format!("{{{}}}", name);
        out = out.replace(&placeholder, &urlencoding::encode(value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_loopback_addresses() {
        assert!(is_ssrf_ip("127.0.0.1".parse().unwrap()));
        assert!(is_ssrf_ip("::1".parse().unwrap()));
    }

    #[test]
    fn blocks_private_ranges() {
        assert!(is_ssrf_ip("10.0.0.5".parse().unwrap()));
        assert!(is_ssrf_ip("172.16.0.5".parse().unwrap()));
        assert!(is_ssrf_ip("192.168.1.5".parse().unwrap()));
        assert!(is_ssrf_ip("169.254.1.1".parse().unwrap()));
    }

    #[test]
    fn allows_public_addresses() {
        assert!(!is_ssrf_ip("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn substitutes_and_encodes_path_params() {
        let out = substitute_path_template(
            "/api/v1/users/{id}",
            &[("id".to_string(), "a b/c".to_string())],
        );
        assert_eq!(out, "/api/v1/users/a%20b%2Fc");
    }
}
