//! Client for the remote Quack AI program API.
//!
//! Four endpoints, fixed base URL: unauthenticated profile lookup,
//! connect (address + signature -> session token), token-authenticated
//! invite binding, and token-authenticated conversation turns. Responses
//! share a `{ "code": ..., "data": ... }` envelope.

use tracing::warn;

/// Envelope code the profile endpoint reports for a known, fully bound
/// account. The post-bind re-query must see this before an identity is
/// considered registered.
pub const PROFILE_SUCCESS_CODE: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed ({0}): {1}")]
    Request(&'static str, String),

    #[error("response parse failed ({0}): {1}")]
    Parse(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct QuackClient {
    base_url: String,
    default: reqwest::Client,
    proxied: Vec<(String, reqwest::Client)>,
}

impl QuackClient {
    /// Build a client for `base_url` with one extra client per usable
    /// proxy URL. Unparseable proxies are logged and dropped from the
    /// pool rather than failing startup.
    pub fn new(base_url: &str, proxies: &[String]) -> Self {
        let mut proxied = Vec::new();
        for url in proxies {
            let proxy = match reqwest::Proxy::all(url) {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!(proxy = %url, error = %e, "skipping unusable proxy URL");
                    continue;
                }
            };
            match reqwest::Client::builder().proxy(proxy).build() {
                Ok(client) => proxied.push((url.clone(), client)),
                Err(e) => warn!(proxy = %url, error = %e, "skipping proxy client build failure"),
            }
        }

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default: reqwest::Client::new(),
            proxied,
        }
    }

    /// Round-robin proxy reference for the `index`-th identity, or None
    /// when no pool is configured.
    pub fn proxy_ref_at(&self, index: usize) -> Option<String> {
        if self.proxied.is_empty() {
            return None;
        }
        Some(self.proxied[index % self.proxied.len()].0.clone())
    }

    fn http(&self, proxy_ref: Option<&str>) -> &reqwest::Client {
        match proxy_ref {
            Some(wanted) => self
                .proxied
                .iter()
                .find(|(url, _)| url == wanted)
                .map(|(_, client)| client)
                .unwrap_or(&self.default),
            None => &self.default,
        }
    }

    /// Unauthenticated profile lookup; returns the envelope code.
    pub async fn profile(
        &self,
        proxy_ref: Option<&str>,
        address: &str,
    ) -> Result<u32, ApiError> {
        let response = self
            .http(proxy_ref)
            .get(format!("{}/v1/user/profile", self.base_url))
            .query(&[("address", address)])
            .send()
            .await
            .map_err(|e| ApiError::Request("profile", e.to_string()))?;
        let payload = read_envelope("profile", response).await?;
        envelope_code("profile", &payload)
    }

    /// Exchange address + proof-of-ownership signature for a session
    /// token. `Ok(None)` means the remote answered but carried no token.
    pub async fn connect(
        &self,
        proxy_ref: Option<&str>,
        address: &str,
        signature: &str,
    ) -> Result<Option<String>, ApiError> {
        let body = serde_json::json!({
            "address": address,
            "signature": signature,
        });
        let response = self
            .http(proxy_ref)
            .post(format!("{}/v1/user/connect", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Request("connect", e.to_string()))?;
        let payload = read_envelope("connect", response).await?;
        Ok(payload
            .get("data")
            .and_then(|data| data.get("token"))
            .and_then(|token| token.as_str())
            .filter(|token| !token.is_empty())
            .map(ToString::to_string))
    }

    /// Bind a referral code to the session's account.
    pub async fn bind_invite(
        &self,
        proxy_ref: Option<&str>,
        token: &str,
        referral_code: &str,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({ "code": referral_code });
        let response = self
            .http(proxy_ref)
            .post(format!("{}/v1/user/invite/bind", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Request("invite_bind", e.to_string()))?;
        read_envelope("invite_bind", response).await?;
        Ok(())
    }

    /// Submit one conversation turn on behalf of `address`.
    pub async fn chat(
        &self,
        proxy_ref: Option<&str>,
        token: &str,
        address: &str,
        topic: &str,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "address": address,
            "question": topic,
        });
        let response = self
            .http(proxy_ref)
            .post(format!("{}/v1/chat", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Request("chat", e.to_string()))?;
        read_envelope("chat", response).await?;
        Ok(())
    }
}

async fn read_envelope(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<serde_json::Value, ApiError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Request(
            endpoint,
            format!("status {}: {}", status, body),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| ApiError::Parse(endpoint, e.to_string()))
}

fn envelope_code(endpoint: &'static str, payload: &serde_json::Value) -> Result<u32, ApiError> {
    payload
        .get("code")
        .and_then(|code| code.as_u64())
        .map(|code| code as u32)
        .ok_or_else(|| ApiError::Parse(endpoint, "missing envelope code".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_pool_rotates_round_robin() {
        let client = QuackClient::new(
            "https://api.quackai.example/",
            &[
                "http://10.0.0.1:8080".to_string(),
                "http://10.0.0.2:8080".to_string(),
            ],
        );
        assert_eq!(
            client.proxy_ref_at(0).as_deref(),
            Some("http://10.0.0.1:8080")
        );
        assert_eq!(
            client.proxy_ref_at(1).as_deref(),
            Some("http://10.0.0.2:8080")
        );
        assert_eq!(
            client.proxy_ref_at(2).as_deref(),
            Some("http://10.0.0.1:8080")
        );
    }

    #[test]
    fn empty_pool_yields_no_proxy_ref() {
        let client = QuackClient::new("https://api.quackai.example", &[]);
        assert!(client.proxy_ref_at(0).is_none());
    }

    #[test]
    fn envelope_code_requires_numeric_code() {
        let ok = serde_json::json!({ "code": 200, "data": {} });
        assert_eq!(envelope_code("profile", &ok).unwrap(), 200);

        let missing = serde_json::json!({ "data": {} });
        assert!(envelope_code("profile", &missing).is_err());
    }
}
