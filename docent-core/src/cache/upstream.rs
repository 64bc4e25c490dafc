//! The network behind the cache router

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::config::SyncConfig;
use crate::error::{Error, Result};

use super::http::{Method, Request, Response};

/// Performs a request for real. `Err` means no response was obtained.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// HTTP upstream for the analytics/asset backend
pub struct HttpUpstream {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    /// Create an upstream from configuration
    pub fn new(config: &SyncConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.server_url.trim_end_matches('/').to_string();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match request.method {
            Method::Get => self.http_client.get(&url),
            Method::Post => self.http_client.post(&url),
        };
        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response body: {}", e)))?;

        tracing::debug!(
            method = request.method.as_str(),
            path = %request.path,
            status,
            bytes = body.len(),
            "Upstream response"
        );

        Ok(Response::new(status, content_type, body.to_vec()))
    }
}
