//! Discovery backends
//!
//! The local registry is authoritative. A backend mirrors registrations to an
//! external store and answers discovery queries when the local scan is empty.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::types::{DiscoveryFilter, ServiceRegistration};
use crate::errors::RegistryError;

/// Backend selected in `[registry].backend`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryBackendKind {
    Memory,
    Consul,
    Etcd,
    Redis,
}

impl DiscoveryBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryBackendKind::Memory => "memory",
            DiscoveryBackendKind::Consul => "consul",
            DiscoveryBackendKind::Etcd => "etcd",
            DiscoveryBackendKind::Redis => "redis",
        }
    }
}

impl fmt::Display for DiscoveryBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// External discovery store
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError>;

    async fn deregister(&self, id: &str) -> Result<(), RegistryError>;

    async fn discover(
        &self,
        name: &str,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<ServiceRegistration>, RegistryError>;
}

/// In-process backend
///
/// Keeps insertion order so discovery results are stable.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<Vec<ServiceRegistration>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<ServiceRegistration> {
        self.entries.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().iter().any(|r| r.id == id)
    }

    pub fn all(&self) -> Vec<ServiceRegistration> {
        self.entries.read().clone()
    }

    /// Insert or replace by id
    pub fn upsert(&self, registration: ServiceRegistration) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|r| r.id == registration.id) {
            Some(existing) => *existing = registration,
            None => entries.push(registration),
        }
    }

    pub fn remove(&self, id: &str) -> Option<ServiceRegistration> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|r| r.id == id)?;
        Some(entries.remove(index))
    }

    /// Apply `f` to the entry with `id`; returns the updated copy
    pub fn update<F>(&self, id: &str, f: F) -> Option<ServiceRegistration>
    where
        F: FnOnce(&mut ServiceRegistration),
    {
        let mut entries = self.entries.write();
        let entry = entries.iter_mut().find(|r| r.id == id)?;
        f(entry);
        Some(entry.clone())
    }

    pub fn find(&self, name: &str, filter: &DiscoveryFilter) -> Vec<ServiceRegistration> {
        self.entries
            .read()
            .iter()
            .filter(|r| r.name == name && filter.matches(r))
            .cloned()
            .collect()
    }

    /// Instance count per service name
    pub fn counts_by_name(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.read().iter() {
            *counts.entry(entry.name.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl DiscoveryBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError> {
        self.upsert(registration.clone());
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        self.remove(id);
        Ok(())
    }

    async fn discover(
        &self,
        name: &str,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<ServiceRegistration>, RegistryError> {
        Ok(self.find(name, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::types::registration;

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        let a = registration("orders", "a", 1);
        let b = registration("orders", "b", 2);
        backend.register(&a).await.unwrap();
        backend.register(&b).await.unwrap();
        backend.register(&registration("users", "c", 3)).await.unwrap();

        let found = backend
            .discover("orders", &DiscoveryFilter::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, a.id);

        backend.deregister(&a.id).await.unwrap();
        assert!(!backend.contains(&a.id));
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.counts_by_name().get("orders"), Some(&1));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let backend = MemoryBackend::new();
        let mut reg = registration("orders", "a", 1);
        backend.upsert(reg.clone());
        reg.version = "2.0.0".to_string();
        backend.upsert(reg.clone());
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get(&reg.id).map(|r| r.version), Some("2.0.0".to_string()));
    }

    #[test]
    fn test_backend_kind_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            backend: DiscoveryBackendKind,
        }
        let w: Wrapper = toml::from_str("backend = \"consul\"").unwrap();
        assert_eq!(w.backend, DiscoveryBackendKind::Consul);
        assert_eq!(w.backend.to_string(), "consul");
    }
}
