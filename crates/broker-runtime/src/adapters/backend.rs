//! Backend endpoint resolution.
//!
//! Endpoints are addressed as `loopback://<service>`. `loopback://echo` is
//! built in; other services are registered by the embedding process.
//! Resolutions are cached with the configured TTL.

use crate::cache::TtlCache;
use br_05_dispatcher::{BackendTransport, LoopbackTransport};
use broker_telemetry::log_event;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const LOOPBACK_SCHEME: &str = "loopback://";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Unsupported backend endpoint scheme: {endpoint}")]
    UnsupportedScheme { endpoint: String },

    #[error("No backend service registered for {endpoint}")]
    UnknownService { endpoint: String },
}

pub struct BackendResolver {
    services: DashMap<String, Arc<dyn BackendTransport>>,
    cache: TtlCache<String, Arc<dyn BackendTransport>>,
}

impl BackendResolver {
    pub fn new(ttl: Duration, gc_interval: Duration) -> Self {
        Self {
            services: DashMap::new(),
            cache: TtlCache::new(ttl, gc_interval),
        }
    }

    /// Make `transport` reachable as `loopback://<service>`.
    pub fn register_service(&self, service: &str, transport: Arc<dyn BackendTransport>) {
        self.services.insert(service.to_string(), transport);
        self.cache.remove(&format!("{LOOPBACK_SCHEME}{service}"));
    }

    pub fn resolve(&self, endpoint: &str) -> Result<Arc<dyn BackendTransport>, ResolveError> {
        self.cache
            .get_or_try_insert_with(endpoint.to_string(), || self.lookup(endpoint))
    }

    fn lookup(&self, endpoint: &str) -> Result<Arc<dyn BackendTransport>, ResolveError> {
        let service = endpoint
            .strip_prefix(LOOPBACK_SCHEME)
            .ok_or_else(|| ResolveError::UnsupportedScheme {
                endpoint: endpoint.to_string(),
            })?;

        if let Some(transport) = self.services.get(service) {
            return Ok(Arc::clone(transport.value()));
        }
        if service == "echo" {
            log_event!(debug, "runtime", "Resolved built-in echo backend", endpoint);
            return Ok(Arc::new(LoopbackTransport::echo(endpoint)));
        }
        Err(ResolveError::UnknownService {
            endpoint: endpoint.to_string(),
        })
    }
}
