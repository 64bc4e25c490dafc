//! Asset and endpoint cache router
//!
//! Every outgoing request from the client passes through [`CacheRouter`]:
//! static assets and artwork images are served cache-first, telemetry posts
//! network-first with an offline `queued` fallback, everything else passes
//! straight through to the [`Upstream`].
//!
//! Cached responses live in a single named generation. Activating a router
//! deletes every other generation first.

mod http;
mod router;
mod storage;
mod upstream;

pub use http::{Method, Request, Response, ResponseSource, QUEUED_STATUS};
pub use router::{CacheRouter, PrecacheReport, RouteTable, Strategy};
pub use storage::{MemoryCache, ResponseCache};
pub use upstream::{HttpUpstream, Upstream};
