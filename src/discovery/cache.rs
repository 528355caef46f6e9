//! TTL cache over a discovery provider.
//!
//! # Responsibilities
//! - Serve fresh entries without touching the provider
//! - Refresh missing or stale entries with exactly one provider query per
//!   service name, shared by every concurrent caller
//! - Optionally serve a stale entry when the refresh fails
//! - Bound the number of cached services (least recently refreshed goes first)

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::discovery::{DiscoveryError, DiscoveryProvider, ServiceInstance, ServiceRegistration};
use crate::observability::metrics;

type Instances = Arc<[ServiceInstance]>;
type Lookup = Shared<BoxFuture<'static, Result<Instances, DiscoveryError>>>;

/// Cache behaviour knobs.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// An entry is fresh while `now - fetched_at < ttl`.
    pub ttl: Duration,
    /// Serve the previous entry when a refresh fails.
    pub serve_stale_on_error: bool,
    /// Maximum cached services; 0 means unbounded.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            serve_stale_on_error: false,
            max_entries: 0,
        }
    }
}

struct CacheEntry {
    instances: Instances,
    fetched_at: Instant,
}

struct CacheInner {
    provider: Arc<dyn DiscoveryProvider>,
    settings: CacheSettings,
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Lookup>>,
}

/// Discovery front end used by the dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct DiscoveryCache {
    inner: Arc<CacheInner>,
}

impl DiscoveryCache {
    pub fn new(provider: Arc<dyn DiscoveryProvider>, settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                provider,
                settings,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Resolve `name` to a single instance: the first one the provider listed.
    pub async fn find_service(&self, name: &str) -> Result<ServiceInstance, DiscoveryError> {
        let instances = self.instances(name).await?;
        instances
            .first()
            .cloned()
            .ok_or_else(|| DiscoveryError::NoInstances(name.to_string()))
    }

    /// Every cached instance of `name`, refreshing when needed.
    pub async fn instances(&self, name: &str) -> Result<Instances, DiscoveryError> {
        if let Some(instances) = self.inner.fresh(name) {
            metrics::record_discovery_lookup("hit");
            return Ok(instances);
        }
        self.join_or_start(name).await
    }

    /// Register an instance with the provider. Returns the instance id.
    pub async fn register_service(
        &self,
        name: &str,
        address: &str,
        port: u16,
    ) -> Result<String, DiscoveryError> {
        let registration = ServiceRegistration::new(name, address, port);
        let id = registration.id.clone();
        self.inner
            .provider
            .register_instance(registration)
            .await
            .map_err(DiscoveryError::Registry)?;

        tracing::info!(service = %name, id = %id, "Service registered");
        Ok(id)
    }

    pub async fn deregister_service(&self, id: &str) -> Result<(), DiscoveryError> {
        self.inner
            .provider
            .deregister_instance(id)
            .await
            .map_err(DiscoveryError::Registry)?;

        tracing::info!(id = %id, "Service deregistered");
        Ok(())
    }

    /// Number of cached services, fresh or stale.
    pub fn len(&self) -> usize {
        self.inner.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn join_or_start(&self, name: &str) -> Lookup {
        let mut in_flight = self.inner.lock_in_flight();
        if let Some(pending) = in_flight.get(name) {
            return pending.clone();
        }
        // A refresh may have been published between the fast-path read and
        // taking this lock.
        if let Some(instances) = self.inner.fresh(name) {
            metrics::record_discovery_lookup("hit");
            return future::ready(Ok(instances)).boxed().shared();
        }

        let lookup = refresh(self.inner.clone(), name.to_string()).boxed().shared();
        in_flight.insert(name.to_string(), lookup.clone());
        lookup
    }
}

impl fmt::Debug for DiscoveryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryCache")
            .field("settings", &self.inner.settings)
            .field("entries", &self.len())
            .finish()
    }
}

async fn refresh(inner: Arc<CacheInner>, name: String) -> Result<Instances, DiscoveryError> {
    tracing::debug!(service = %name, "Refreshing discovery entry");

    let outcome = match inner.provider.list_instances(&name).await {
        Ok(instances) => {
            let instances: Instances = instances.into();
            inner.store(&name, instances.clone());
            metrics::record_discovery_lookup("refresh");
            Ok(instances)
        }
        Err(source) => {
            let stale = if inner.settings.serve_stale_on_error {
                inner.cached(&name)
            } else {
                None
            };
            match stale {
                Some(instances) => {
                    tracing::warn!(service = %name, error = %source, "Discovery refresh failed, serving stale entry");
                    metrics::record_discovery_lookup("stale");
                    Ok(instances)
                }
                None => {
                    tracing::warn!(service = %name, error = %source, "Discovery refresh failed");
                    metrics::record_discovery_lookup("error");
                    Err(DiscoveryError::Provider {
                        service: name.clone(),
                        source,
                    })
                }
            }
        }
    };

    inner.lock_in_flight().remove(&name);
    outcome
}

impl CacheInner {
    fn fresh(&self, name: &str) -> Option<Instances> {
        let entries = self.read_entries();
        entries
            .get(name)
            .filter(|e| e.fetched_at.elapsed() < self.settings.ttl)
            .map(|e| e.instances.clone())
    }

    fn cached(&self, name: &str) -> Option<Instances> {
        self.read_entries().get(name).map(|e| e.instances.clone())
    }

    fn store(&self, name: &str, instances: Instances) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let max = self.settings.max_entries;
        if max > 0 && !entries.contains_key(name) && entries.len() >= max {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone());
            if let Some(evicted) = oldest {
                entries.remove(&evicted);
                tracing::debug!(service = %evicted, "Evicted discovery entry");
            }
        }

        entries.insert(
            name.to_string(),
            CacheEntry {
                instances,
                fetched_at: Instant::now(),
            },
        );
        metrics::record_discovery_cache_size(entries.len());
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, Lookup>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
