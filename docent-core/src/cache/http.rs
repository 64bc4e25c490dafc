//! Request/response values passed through the cache router

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// HTTP method subset the client issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// An outgoing request, addressed by path relative to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path plus optional query (`/images/a07.jpg?v=2`)
    pub path: String,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            content_type: None,
            body: None,
        }
    }

    /// A POST carrying `payload` as JSON
    pub fn post_json<T: Serialize + ?Sized>(path: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self {
            method: Method::Post,
            path: path.into(),
            content_type: Some("application/json".to_string()),
            body: Some(serde_json::to_vec(payload)?),
        })
    }

    /// Path without query string or fragment, used for routing
    pub fn route_path(&self) -> &str {
        let end = self
            .path
            .find(|c| c == '?' || c == '#')
            .unwrap_or(self.path.len());
        &self.path[..end]
    }
}

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Fabricated by the router while the network is unreachable
    Synthetic,
}

/// A response as seen by the caller of the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

/// Status of the fabricated offline acknowledgement
pub const QUEUED_STATUS: u16 = 202;

impl Response {
    pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
            source: ResponseSource::Network,
        }
    }

    /// The offline acknowledgement returned for telemetry posts.
    ///
    /// Success-shaped so callers see no transport error, but its body says
    /// `queued` (never `ok`) and its source is [`ResponseSource::Synthetic`].
    pub fn queued() -> Self {
        Self {
            status: QUEUED_STATUS,
            content_type: Some("application/json".to_string()),
            body: br#"{"status":"queued","offline":true}"#.to_vec(),
            source: ResponseSource::Synthetic,
        }
    }

    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == ResponseSource::Synthetic
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }
}
