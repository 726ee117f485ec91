//! Service registry
//!
//! Local in-memory registrations are authoritative. Discovery results are
//! cached per (name, filter) for `cache_ttl`; any registration change or
//! health probe for a name invalidates that name's cache entries.

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::backend::{DiscoveryBackend, DiscoveryBackendKind, MemoryBackend};
use super::transport::{HttpTransport, TransportRequest};
use super::types::{
    DiscoveryFilter, RegisterOptions, RegistryStats, ServiceRegistration, ServiceStatus,
};
use crate::config::RegistryConfig;
use crate::logger::{self, LogTag};

/// Registry settings derived from `[registry]`
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub cache_ttl: Duration,
    pub health_check_timeout: Duration,
    pub default_host: String,
    pub default_port: u16,
    pub default_protocol: String,
    pub default_health_check_path: String,
    pub default_version: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

impl RegistrySettings {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            health_check_timeout: Duration::from_millis(config.health_check_timeout_ms),
            default_host: config.default_host.clone(),
            default_port: config.default_port,
            default_protocol: config.default_protocol.clone(),
            default_health_check_path: config.default_health_check_path.clone(),
            default_version: config.default_version.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    service: String,
    results: Vec<ServiceRegistration>,
    cached_at: Instant,
}

/// Cached discovery results plus a per-name generation
///
/// `invalidate` bumps the generation; a scan that started under an older
/// generation is not stored.
#[derive(Debug, Default)]
struct DiscoveryCache {
    entries: HashMap<String, CacheEntry>,
    generations: HashMap<String, u64>,
}

impl DiscoveryCache {
    fn generation(&self, name: &str) -> u64 {
        self.generations.get(name).copied().unwrap_or(0)
    }

    fn invalidate(&mut self, name: &str) {
        self.entries.retain(|_, entry| entry.service != name);
        *self.generations.entry(name.to_string()).or_insert(0) += 1;
    }
}

pub struct ServiceRegistry {
    settings: RegistrySettings,
    local: MemoryBackend,
    external: Option<Arc<dyn DiscoveryBackend>>,
    transport: Arc<dyn HttpTransport>,
    cache: RwLock<DiscoveryCache>,
}

impl ServiceRegistry {
    pub fn new(settings: RegistrySettings, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            settings,
            local: MemoryBackend::new(),
            external: None,
            transport,
            cache: RwLock::new(DiscoveryCache::default()),
        }
    }

    /// Build from `[registry]`
    ///
    /// Only the memory backend ships with the crate; other kinds need
    /// `with_backend` and otherwise run memory-only.
    pub fn from_config(config: &RegistryConfig, transport: Arc<dyn HttpTransport>) -> Self {
        if config.backend != DiscoveryBackendKind::Memory {
            logger::warning(
                LogTag::Registry,
                &format!(
                    "Discovery backend '{}' has no built-in implementation, running memory-only",
                    config.backend
                ),
            );
        }
        Self::new(RegistrySettings::from_config(config), transport)
    }

    /// Mirror registrations to an external store
    pub fn with_backend(mut self, backend: Arc<dyn DiscoveryBackend>) -> Self {
        self.external = Some(backend);
        self
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register an instance, returning its generated id
    pub async fn register(&self, name: &str, options: RegisterOptions) -> String {
        let host = options
            .host
            .unwrap_or_else(|| self.settings.default_host.clone());
        let port = options.port.unwrap_or(self.settings.default_port);

        let id = loop {
            let suffix = Uuid::new_v4()
                .to_string()
                .split('-')
                .next()
                .map(str::to_string)
                .unwrap_or_default();
            let candidate = format!("{}-{}-{}-{}", name, host, port, suffix);
            if !self.local.contains(&candidate) {
                break candidate;
            }
        };

        let registration = ServiceRegistration {
            id: id.clone(),
            name: name.to_string(),
            host,
            port,
            protocol: options
                .protocol
                .unwrap_or_else(|| self.settings.default_protocol.clone()),
            version: options
                .version
                .unwrap_or_else(|| self.settings.default_version.clone()),
            tags: options.tags,
            health_check_path: options
                .health_check_path
                .unwrap_or_else(|| self.settings.default_health_check_path.clone()),
            metadata: options.metadata,
            status: ServiceStatus::Healthy,
            registered_at: Utc::now(),
            last_health_check: None,
        };

        self.local.upsert(registration.clone());
        self.invalidate(name);

        if let Some(backend) = &self.external {
            if let Err(e) = backend.register(&registration).await {
                logger::warning(
                    LogTag::Registry,
                    &format!("Failed to mirror '{}' to {}: {}", id, backend.name(), e),
                );
            }
        }

        logger::info(
            LogTag::Registry,
            &format!("Registered {} at {}", id, registration.base_url()),
        );
        id
    }

    /// Remove an instance; false for an unknown id
    pub async fn deregister(&self, id: &str) -> bool {
        let removed = match self.local.remove(id) {
            Some(registration) => registration,
            None => return false,
        };

        self.invalidate(&removed.name);

        if let Some(backend) = &self.external {
            if let Err(e) = backend.deregister(id).await {
                logger::warning(
                    LogTag::Registry,
                    &format!("Failed to remove '{}' from {}: {}", id, backend.name(), e),
                );
            }
        }

        logger::info(LogTag::Registry, &format!("Deregistered {}", id));
        true
    }

    // =========================================================================
    // DISCOVERY
    // =========================================================================

    /// First healthy match, else the first match
    pub async fn discover(
        &self,
        name: &str,
        filter: &DiscoveryFilter,
    ) -> Option<ServiceRegistration> {
        let all = self.discover_all(name, filter).await;
        match all.iter().position(|r| r.is_healthy()) {
            Some(index) => all.into_iter().nth(index),
            None => all.into_iter().next(),
        }
    }

    /// Every match, de-duplicated by id
    pub async fn discover_all(
        &self,
        name: &str,
        filter: &DiscoveryFilter,
    ) -> Vec<ServiceRegistration> {
        let key = filter.cache_key(name);

        let (cached, generation) = {
            let cache = self.cache.read();
            let cached = cache
                .entries
                .get(&key)
                .filter(|entry| entry.cached_at.elapsed() < self.settings.cache_ttl)
                .map(|entry| entry.results.clone());
            (cached, cache.generation(name))
        };
        if let Some(results) = cached {
            return results;
        }

        let mut results = self.local.find(name, filter);

        if results.is_empty() {
            if let Some(backend) = &self.external {
                match backend.discover(name, filter).await {
                    Ok(found) => results = found,
                    Err(e) => logger::warning(
                        LogTag::Registry,
                        &format!("Discovery of '{}' via {} failed: {}", name, backend.name(), e),
                    ),
                }
            }
        }

        let mut seen = HashSet::new();
        results.retain(|r| seen.insert(r.id.clone()));

        logger::debug(
            LogTag::Registry,
            &format!("Discovered {} instance(s) of '{}'", results.len(), name),
        );

        let mut cache = self.cache.write();
        if cache.generation(name) == generation {
            cache.entries.insert(
                key,
                CacheEntry {
                    service: name.to_string(),
                    results: results.clone(),
                    cached_at: Instant::now(),
                },
            );
        } else {
            logger::debug(
                LogTag::Registry,
                &format!("'{}' changed during discovery, result not cached", name),
            );
        }
        results
    }

    pub fn get(&self, id: &str) -> Option<ServiceRegistration> {
        self.local.get(id)
    }

    pub fn all_services(&self) -> Vec<ServiceRegistration> {
        self.local.all()
    }

    // =========================================================================
    // HEALTH
    // =========================================================================

    /// Probe one instance and store the outcome; false for an unknown id
    pub async fn health_check(&self, id: &str) -> bool {
        // Clone so no lock is held across the probe
        let registration = match self.local.get(id) {
            Some(registration) => registration,
            None => return false,
        };

        let url = registration.health_url();
        let request = TransportRequest::get(url.clone(), self.settings.health_check_timeout);
        let healthy = match self.transport.send(request).await {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                logger::debug(
                    LogTag::Health,
                    &format!("{} answered HTTP {}", url, response.status),
                );
                false
            }
            Err(e) => {
                logger::debug(LogTag::Health, &format!("{} probe failed: {}", url, e));
                false
            }
        };

        let status = if healthy {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };

        let updated = self.local.update(id, |r| {
            r.status = status;
            r.last_health_check = Some(Utc::now());
        });

        if let Some(updated) = updated {
            if updated.status != registration.status {
                logger::info(
                    LogTag::Health,
                    &format!("{} is now {}", id, updated.status),
                );
            }
        }

        self.invalidate(&registration.name);
        healthy
    }

    /// Probe every instance concurrently
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let ids: Vec<String> = self.local.all().into_iter().map(|r| r.id).collect();
        let checks = ids.into_iter().map(|id| async move {
            let healthy = self.health_check(&id).await;
            (id, healthy)
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Periodic `health_check_all` until `shutdown` fires
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            // registered before the first pass so a signal sent mid-pass is kept
            let stop = shutdown.notified();
            tokio::pin!(stop);
            stop.as_mut().enable();

            let mut ticker = tokio::time::interval(interval);
            logger::info(
                LogTag::Health,
                &format!("Health monitor started (every {}s)", interval.as_secs()),
            );

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = &mut stop => break,
                    results = registry.health_check_all() => {
                        let unhealthy = results.values().filter(|ok| !**ok).count();
                        logger::debug(
                            LogTag::Health,
                            &format!("Checked {} instance(s), {} unhealthy", results.len(), unhealthy),
                        );
                    }
                }
            }

            logger::info(LogTag::Health, "Health monitor stopped");
        })
    }

    // =========================================================================
    // CACHE / STATS
    // =========================================================================

    fn invalidate(&self, name: &str) {
        self.cache.write().invalidate(name);
    }

    pub fn clear_cache(&self) {
        self.cache.write().entries.clear();
    }

    pub fn stats(&self) -> RegistryStats {
        let all = self.local.all();
        let healthy = all.iter().filter(|r| r.is_healthy()).count();
        RegistryStats {
            total_instances: all.len(),
            healthy_instances: healthy,
            unhealthy_instances: all.len() - healthy,
            instances_by_service: self.local.counts_by_name(),
            cached_queries: self.cache.read().entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{RegistryError, TransportError};
    use crate::services::transport::mock::MockTransport;
    use crate::services::transport::TransportResponse;
    use async_trait::async_trait;

    fn registry(transport: MockTransport) -> ServiceRegistry {
        ServiceRegistry::new(RegistrySettings::default(), Arc::new(transport))
    }

    struct FailingBackend;

    #[async_trait]
    impl DiscoveryBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn register(&self, _: &ServiceRegistration) -> Result<(), RegistryError> {
            Err(RegistryError::BackendUnavailable {
                backend: "failing".to_string(),
                reason: "down".to_string(),
            })
        }

        async fn deregister(&self, _: &str) -> Result<(), RegistryError> {
            Err(RegistryError::BackendUnavailable {
                backend: "failing".to_string(),
                reason: "down".to_string(),
            })
        }

        async fn discover(
            &self,
            _: &str,
            _: &DiscoveryFilter,
        ) -> Result<Vec<ServiceRegistration>, RegistryError> {
            Err(RegistryError::BackendUnavailable {
                backend: "failing".to_string(),
                reason: "down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_register_applies_defaults() {
        let reg = registry(MockTransport::ok());
        let id = reg.register("orders", RegisterOptions::default()).await;

        assert!(id.starts_with("orders-localhost-80-"));
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        let stored = reg.get(&id).unwrap();
        assert_eq!(stored.protocol, "http");
        assert_eq!(stored.version, "1.0.0");
        assert_eq!(stored.health_check_path, "/health");
        assert_eq!(stored.status, ServiceStatus::Healthy);
        assert!(stored.tags.is_empty());
    }

    #[tokio::test]
    async fn test_register_deregister_discover() {
        let reg = registry(MockTransport::ok());
        let id = reg
            .register("orders", RegisterOptions::new("10.0.0.1", 8080))
            .await;

        let found = reg.discover("orders", &DiscoveryFilter::default()).await;
        assert_eq!(found.map(|r| r.id), Some(id.clone()));

        assert!(reg.deregister(&id).await);
        assert!(reg.discover("orders", &DiscoveryFilter::default()).await.is_none());
        assert!(!reg.deregister(&id).await);
    }

    #[tokio::test]
    async fn test_discover_filters_by_version_and_tags() {
        let reg = registry(MockTransport::ok());
        reg.register(
            "orders",
            RegisterOptions::new("a", 1).with_version("1.0.0").with_tags(["api"]),
        )
        .await;
        let v2 = reg
            .register(
                "orders",
                RegisterOptions::new("b", 2)
                    .with_version("2.0.0")
                    .with_tags(["api", "eu"]),
            )
            .await;

        let found = reg
            .discover_all("orders", &DiscoveryFilter::version("2.0.0"))
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, v2);

        let tagged = reg
            .discover_all("orders", &DiscoveryFilter::default().with_tag("api"))
            .await;
        assert_eq!(tagged.len(), 2);

        let none = reg
            .discover_all("orders", &DiscoveryFilter::default().with_tag("us"))
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_discover_prefers_healthy_instance() {
        let transport = MockTransport::ok();
        transport.set_for_url(
            "http://a:1/health",
            Ok(TransportResponse::new(503, "down")),
        );
        let reg = registry(transport);
        let a = reg.register("orders", RegisterOptions::new("a", 1)).await;
        let b = reg.register("orders", RegisterOptions::new("b", 2)).await;

        assert!(!reg.health_check(&a).await);
        let picked = reg.discover("orders", &DiscoveryFilter::default()).await;
        assert_eq!(picked.map(|r| r.id), Some(b.clone()));

        // no healthy instance left: fall back to the first match
        reg.local.update(&b, |r| r.status = ServiceStatus::Unhealthy);
        reg.clear_cache();
        let picked = reg.discover("orders", &DiscoveryFilter::default()).await;
        assert_eq!(picked.map(|r| r.id), Some(a));
    }

    #[tokio::test]
    async fn test_health_check_marks_unhealthy_on_refused() {
        let reg = registry(MockTransport::refused());
        let id = reg.register("orders", RegisterOptions::new("a", 1)).await;

        assert!(!reg.health_check(&id).await);
        let stored = reg.get(&id).unwrap();
        assert_eq!(stored.status, ServiceStatus::Unhealthy);
        assert!(stored.last_health_check.is_some());
        assert!(!reg.health_check("missing").await);
    }

    #[tokio::test]
    async fn test_health_check_timeout_is_unhealthy() {
        let transport = MockTransport::always(Err(TransportError::Timeout {
            url: "http://a:1/health".to_string(),
            timeout_ms: 5000,
        }));
        let reg = registry(transport);
        let id = reg.register("orders", RegisterOptions::new("a", 1)).await;
        assert!(!reg.health_check(&id).await);
        assert_eq!(reg.stats().unhealthy_instances, 1);
    }

    #[tokio::test]
    async fn test_health_check_all_probes_every_instance() {
        let transport = Arc::new(MockTransport::ok());
        let reg = ServiceRegistry::new(RegistrySettings::default(), transport.clone());
        reg.register("orders", RegisterOptions::new("a", 1)).await;
        reg.register("users", RegisterOptions::new("b", 2)).await;

        let results = reg.health_check_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|ok| *ok));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let reg = registry(MockTransport::ok());
        let id = reg.register("orders", RegisterOptions::new("a", 1)).await;
        assert_eq!(
            reg.discover_all("orders", &DiscoveryFilter::default()).await[0].status,
            ServiceStatus::Healthy
        );

        // change behind the registry's back; the cached view is served
        reg.local.update(&id, |r| r.status = ServiceStatus::Unhealthy);
        assert_eq!(
            reg.discover_all("orders", &DiscoveryFilter::default()).await[0].status,
            ServiceStatus::Healthy
        );

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(
            reg.discover_all("orders", &DiscoveryFilter::default()).await[0].status,
            ServiceStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_register_invalidates_cache() {
        let reg = registry(MockTransport::ok());
        reg.register("orders", RegisterOptions::new("a", 1)).await;
        assert_eq!(reg.discover_all("orders", &DiscoveryFilter::default()).await.len(), 1);

        reg.register("orders", RegisterOptions::new("b", 2)).await;
        assert_eq!(reg.discover_all("orders", &DiscoveryFilter::default()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_external_backend_fallback() {
        let external = Arc::new(MemoryBackend::new());
        external.upsert(crate::services::types::registration("billing", "ext", 9000));

        let reg = registry(MockTransport::ok()).with_backend(external.clone());
        let found = reg.discover_all("billing", &DiscoveryFilter::default()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].host, "ext");

        // local registrations are mirrored
        let id = reg.register("orders", RegisterOptions::new("a", 1)).await;
        assert!(external.contains(&id));
        reg.deregister(&id).await;
        assert!(!external.contains(&id));
    }

    #[tokio::test]
    async fn test_failing_backend_degrades_to_empty() {
        let reg = registry(MockTransport::ok()).with_backend(Arc::new(FailingBackend));

        // mirror failure is ignored
        let id = reg.register("orders", RegisterOptions::new("a", 1)).await;
        assert!(reg.get(&id).is_some());

        assert!(reg
            .discover_all("billing", &DiscoveryFilter::default())
            .await
            .is_empty());
        assert!(reg.deregister(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_stops_on_shutdown() {
        let transport = Arc::new(MockTransport::ok());
        let reg = Arc::new(ServiceRegistry::new(
            RegistrySettings::default(),
            transport.clone(),
        ));
        reg.register("orders", RegisterOptions::new("a", 1)).await;

        let shutdown = Arc::new(Notify::new());
        let handle = reg.spawn_health_monitor(Duration::from_secs(10), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(transport.calls() >= 2);

        shutdown.notify_waiters();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_stops_during_slow_pass() {
        let transport = Arc::new(MockTransport::ok().with_delay(Duration::from_secs(3)));
        let reg = Arc::new(ServiceRegistry::new(
            RegistrySettings::default(),
            transport.clone(),
        ));
        reg.register("orders", RegisterOptions::new("a", 1)).await;

        let shutdown = Arc::new(Notify::new());
        let handle = reg.spawn_health_monitor(Duration::from_secs(10), shutdown.clone());

        // first pass is still waiting on the probe
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.calls(), 1);
        shutdown.notify_waiters();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor kept running after shutdown")
            .unwrap();
    }

    struct SlowBackend;

    #[async_trait]
    impl DiscoveryBackend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn register(&self, _: &ServiceRegistration) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn deregister(&self, _: &str) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn discover(
            &self,
            _: &str,
            _: &DiscoveryFilter,
        ) -> Result<Vec<ServiceRegistration>, RegistryError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_during_discovery_is_not_hidden_by_cache() {
        let reg = Arc::new(registry(MockTransport::ok()).with_backend(Arc::new(SlowBackend)));

        let pending = tokio::spawn({
            let reg = reg.clone();
            async move {
                reg.discover_all("billing", &DiscoveryFilter::default())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        reg.register("billing", RegisterOptions::new("a", 1)).await;
        assert!(pending.await.unwrap().is_empty());

        let found = reg.discover_all("billing", &DiscoveryFilter::default()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(reg.stats().cached_queries, 1);
    }
}
