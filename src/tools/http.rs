//! Tool invocation transport through the same-origin proxy.
//!
//! The browser-facing deployments this crate embeds in cannot call
//! third-party APIs directly, so tool requests are described as JSON and
//! executed by a proxy on the widget's own origin. The proxy wraps the
//! downstream response as `{status, statusText, ok, data, headers}`.

use crate::config::ProxyConfig;
use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Request description shipped to the proxy.
#[derive(Debug, Serialize)]
struct ProxyRequest<'a> {
    url: &'a str,
    method: &'a str,
    headers: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "str::is_empty")]
    body: &'a str,
}

/// Downstream response as wrapped by the proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyResponse {
    /// Downstream HTTP status code.
    pub status: u16,
    /// Downstream status text.
    #[serde(rename = "statusText", default)]
    pub status_text: String,
    /// Whether the downstream status was 2xx.
    pub ok: bool,
    /// Downstream response payload (JSON when possible, else a string).
    #[serde(default)]
    pub data: Value,
    /// Downstream response headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Executes tool HTTP requests through the proxy.
pub struct HttpInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInvoker {
    /// Create an invoker for the configured proxy.
    #[must_use]
    pub fn new(config: &ProxyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_s))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Execute one substituted tool request.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the proxy call exceeds its deadline, or
    /// `ToolInvocation` when the proxy itself is unreachable or replies
    /// with a non-2xx status or an unparsable body.
    pub async fn execute(
        &self,
        url: &str,
        method: &str,
        headers: &HashMap<String, String>,
        body: &str,
    ) -> Result<ProxyResponse> {
        let request = ProxyRequest {
            url,
            method,
            headers,
            body,
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VoiceError::Timeout(format!("tool request to {url}"))
                } else {
                    VoiceError::ToolInvocation {
                        status: 0,
                        body: format!("proxy unreachable: {e}"),
                    }
                }
            })?;

        let proxy_status = response.status();
        if !proxy_status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::ToolInvocation {
                status: proxy_status.as_u16(),
                body,
            });
        }

        response.json::<ProxyResponse>().await.map_err(|e| {
            VoiceError::ToolInvocation {
                status: proxy_status.as_u16(),
                body: format!("malformed proxy response: {e}"),
            }
        })
    }
}
