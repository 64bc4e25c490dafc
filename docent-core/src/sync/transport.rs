//! Delivery of events to the analytics backend
//!
//! ## Endpoint contract
//!
//! - Single: `POST {single_path}` with one event object. Any genuine 2xx is
//!   an acknowledgement.
//! - Batch: `POST {batch_path}` with `{"events": [...]}`. Only a body with
//!   `"status": "ok"` is an acknowledgement; the backend also reports
//!   `"received": N`.
//!
//! Requests travel through the [`CacheRouter`], which answers telemetry
//! posts with a synthetic `queued` response while offline. That response is
//! reported as [`Delivery::Deferred`], never as an acknowledgement.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheRouter, Request, Response};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::types::Event;

/// What the far side said about a delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The backend accepted the events
    Acknowledged { received: Option<usize> },
    /// Offline fallback answered; nothing reached the backend
    Deferred,
    /// The backend answered without an explicit success
    Rejected { reason: String },
}

impl Delivery {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Delivery::Acknowledged { .. })
    }
}

/// Sends events somewhere. `Err` means the attempt never got an answer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_single(&self, event: &Event) -> Result<Delivery>;
    async fn send_batch(&self, events: &[Event]) -> Result<Delivery>;
}

/// Request body for the batch endpoint
#[derive(Serialize)]
struct BatchRequest<'a> {
    events: &'a [Event],
}

/// Response body from the batch endpoint
#[derive(Debug, Deserialize)]
struct BatchResponse {
    status: String,
    #[serde(default)]
    received: Option<usize>,
}

/// [`Transport`] that posts through the cache router
pub struct RoutedTransport {
    router: Arc<CacheRouter>,
    single_path: String,
    batch_path: String,
}

impl RoutedTransport {
    pub fn new(router: Arc<CacheRouter>, config: &SyncConfig) -> Self {
        Self {
            router,
            single_path: config.single_path.clone(),
            batch_path: config.batch_path.clone(),
        }
    }
}

#[async_trait]
impl Transport for RoutedTransport {
    async fn send_single(&self, event: &Event) -> Result<Delivery> {
        let request = Request::post_json(self.single_path.as_str(), event)?;
        let response = self.router.handle(&request).await?;
        Ok(interpret_single(&response))
    }

    async fn send_batch(&self, events: &[Event]) -> Result<Delivery> {
        let request = Request::post_json(self.batch_path.as_str(), &BatchRequest { events })?;
        let response = self.router.handle(&request).await?;
        Ok(interpret_batch(&response))
    }
}

fn interpret_single(response: &Response) -> Delivery {
    if response.is_synthetic() {
        Delivery::Deferred
    } else if response.is_success() {
        Delivery::Acknowledged { received: None }
    } else {
        Delivery::Rejected {
            reason: format!("HTTP {}", response.status),
        }
    }
}

fn interpret_batch(response: &Response) -> Delivery {
    if response.is_synthetic() {
        return Delivery::Deferred;
    }
    if !response.is_success() {
        return Delivery::Rejected {
            reason: format!("HTTP {}", response.status),
        };
    }
    match response.json::<BatchResponse>() {
        Ok(body) if body.status == "ok" => Delivery::Acknowledged {
            received: body.received,
        },
        Ok(body) => Delivery::Rejected {
            reason: format!("status {:?}", body.status),
        },
        Err(e) => Delivery::Rejected {
            reason: format!("unreadable batch response: {}", e),
        },
    }
}
