use std::sync::Arc;
use async_trait::async_trait;
use serde_json::Value;
use crate::config::AppConfig;
use crate::downloader::http_pool::HttpPool;
use crate::errors::{AppError, Result};

/// Fallback message when the provider fails without saying why.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Issues one authenticated API method call and returns the `response` payload.
///
/// Implementations never retry; a failed call is reported once and the caller
/// decides what to do with it.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn call(&self, method: &str, token: &str, params: &[(&str, String)]) -> Result<Value>;
}

/// Splits the provider envelope into the success payload or a provider error.
pub fn parse_envelope(mut body: Value) -> Result<Value> {
    if let Some(response) = body.get_mut("response") {
        return Ok(response.take());
    }

    let message = body
        .get("error")
        .and_then(|e| e.get("error_msg"))
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_ERROR)
        .to_string();
    Err(AppError::Provider(message))
}

/// reqwest-backed transport for `https://api.vk.com/method/<name>`.
pub struct VkApiClient {
    http_pool: Arc<HttpPool>,
    base_url: String,
    api_version: String,
}

impl VkApiClient {
    pub fn new(http_pool: Arc<HttpPool>, config: &AppConfig) -> Self {
        Self {
            http_pool,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
        }
    }
}

#[async_trait]
impl ApiTransport for VkApiClient {
    async fn call(&self, method: &str, token: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);
        log::debug!("[API] {} {:?}", method, params);

        let response = self
            .http_pool
            .get_client()
            .get(&url)
            .headers(self.http_pool.api_headers())
            .timeout(self.http_pool.request_timeout())
            .query(&[("access_token", token), ("v", self.api_version.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("[API] {} answered with HTTP {}", method, status);
            return Err(AppError::Transport(format!("HTTP error: {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Transport(format!("Invalid response body: {}", e)))?;

        parse_envelope(body).map_err(|e| {
            log::warn!("[API] {} failed: {}", method, e);
            e
        })
    }
}
