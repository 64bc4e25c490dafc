//! Per-route caching strategies
//!
//! Routing is a pure function of the request; each [`Strategy`] has its own
//! executor. First match wins:
//!
//! | Route | Strategy | On total failure |
//! |-------|----------|------------------|
//! | core assets, image prefixes (GET) | cache-first | hard error |
//! | telemetry endpoints | network-first | synthetic `queued` response |
//! | anything else | pass-through | error as-is |

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{CacheConfig, SyncConfig};
use crate::error::{Error, Result};

use super::http::{Method, Request, Response};
use super::storage::ResponseCache;
use super::upstream::Upstream;

/// How a request is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    PassThrough,
}

/// Path classification for the router
#[derive(Debug, Clone)]
pub struct RouteTable {
    core_assets: HashSet<String>,
    cached_prefixes: Vec<String>,
    telemetry_paths: HashSet<String>,
}

impl RouteTable {
    pub fn new(
        core_assets: impl IntoIterator<Item = String>,
        cached_prefixes: impl IntoIterator<Item = String>,
        telemetry_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            core_assets: core_assets.into_iter().collect(),
            cached_prefixes: cached_prefixes.into_iter().collect(),
            telemetry_paths: telemetry_paths.into_iter().collect(),
        }
    }

    pub fn from_config(cache: &CacheConfig, sync: &SyncConfig) -> Self {
        Self::new(
            cache.core_assets.iter().cloned(),
            cache.cached_prefixes.iter().cloned(),
            sync.telemetry_paths().iter().map(|p| p.to_string()),
        )
    }

    pub fn route(&self, request: &Request) -> Strategy {
        let path = request.route_path();
        if request.method == Method::Get && self.is_cacheable(path) {
            Strategy::CacheFirst
        } else if self.telemetry_paths.contains(path) {
            Strategy::NetworkFirst
        } else {
            Strategy::PassThrough
        }
    }

    fn is_cacheable(&self, path: &str) -> bool {
        self.core_assets.contains(path)
            || self
                .cached_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Exact core asset paths, sorted
    pub fn core_assets(&self) -> Vec<&str> {
        let mut assets: Vec<&str> = self.core_assets.iter().map(String::as_str).collect();
        assets.sort_unstable();
        assets
    }
}

/// Outcome of [`CacheRouter::precache`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PrecacheReport {
    pub stored: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Request interceptor applying the route table
pub struct CacheRouter {
    routes: RouteTable,
    generation: String,
    upstream: Arc<dyn Upstream>,
    cache: Arc<dyn ResponseCache>,
}

impl CacheRouter {
    /// Activate a router for `generation`.
    ///
    /// Every other cache generation is deleted before the router exists, so
    /// no request is ever served from a stale generation.
    pub fn activate(
        routes: RouteTable,
        generation: impl Into<String>,
        upstream: Arc<dyn Upstream>,
        cache: Arc<dyn ResponseCache>,
    ) -> Result<Self> {
        let generation = generation.into();
        for stale in cache.generations()? {
            if stale != generation {
                let removed = cache.delete_generation(&stale)?;
                tracing::info!(generation = %stale, removed, "Deleted stale cache generation");
            }
        }
        tracing::debug!(generation = %generation, "Cache router active");

        Ok(Self {
            routes,
            generation,
            upstream,
            cache,
        })
    }

    /// Activate using the `[cache]` and `[sync]` sections
    pub fn from_config(
        cache_config: &CacheConfig,
        sync_config: &SyncConfig,
        upstream: Arc<dyn Upstream>,
        cache: Arc<dyn ResponseCache>,
    ) -> Result<Self> {
        Self::activate(
            RouteTable::from_config(cache_config, sync_config),
            cache_config.name.clone(),
            upstream,
            cache,
        )
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Serve a request according to its route
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        match self.routes.route(request) {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::PassThrough => self.upstream.fetch(request).await,
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        // Full path including query, so cache-busted URLs get their own entry
        let key = request.path.as_str();
        match self.cache.get(&self.generation, key) {
            Ok(Some(hit)) => {
                tracing::trace!(path = key, "Cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(path = key, error = %e, "Cache read failed, fetching"),
        }

        let response = self
            .upstream
            .fetch(request)
            .await
            .map_err(|e| Error::AssetUnavailable {
                path: key.to_string(),
                reason: e.to_string(),
            })?;

        if response.is_success() {
            if let Err(e) = self.cache.put(&self.generation, key, &response) {
                tracing::warn!(path = key, error = %e, "Failed to store cached copy");
            }
        }
        Ok(response)
    }

    async fn network_first(&self, request: &Request) -> Result<Response> {
        match self.upstream.fetch(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::info!(
                    path = %request.path,
                    error = %e,
                    "Telemetry endpoint unreachable, answering queued"
                );
                Ok(Response::queued())
            }
        }
    }

    /// Fetch and store every core asset (the install step)
    pub async fn precache(&self) -> PrecacheReport {
        let mut report = PrecacheReport::default();
        for path in self.routes.core_assets() {
            let outcome = match self.upstream.fetch(&Request::get(path)).await {
                Ok(resp) if resp.is_success() => self
                    .cache
                    .put(&self.generation, path, &resp)
                    .map_err(|e| e.to_string()),
                Ok(resp) => Err(format!("HTTP {}", resp.status)),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(()) => report.stored.push(path.to_string()),
                Err(reason) => {
                    tracing::warn!(path, reason = %reason, "Failed to precache asset");
                    report.failed.push((path.to_string(), reason));
                }
            }
        }
        report
    }
}
