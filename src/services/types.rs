/// Service registry data model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// STATUS
// ============================================================================

/// Health status of a registered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// REGISTRATION
// ============================================================================

/// One physical instance of a named service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Unique per instance: `{name}-{host}-{port}-{suffix}`
    pub id: String,
    /// Logical service name, shared by horizontal instances
    pub name: String,
    pub host: String,
    pub port: u16,
    /// `http` or `https`
    pub protocol: String,
    pub version: String,
    pub tags: Vec<String>,
    pub health_check_path: String,
    pub metadata: HashMap<String, String>,
    pub status: ServiceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl ServiceRegistration {
    /// `protocol://host:port`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Absolute URL for a request path on this instance
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }

    /// Health probe URL
    pub fn health_url(&self) -> String {
        self.url_for(&self.health_check_path)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

/// Caller-supplied registration fields; unset fields take registry defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub version: Option<String>,
    pub health_check_path: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl RegisterOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = Some(path.into());
        self
    }
}

// ============================================================================
// DISCOVERY FILTER
// ============================================================================

/// Constraints applied during discovery
///
/// All set constraints must hold. `tags` requires every listed tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    pub version: Option<String>,
    pub status: Option<ServiceStatus>,
    pub tags: Vec<String>,
}

impl DiscoveryFilter {
    pub fn version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..Default::default()
        }
    }

    pub fn healthy() -> Self {
        Self {
            status: Some(ServiceStatus::Healthy),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn matches(&self, registration: &ServiceRegistration) -> bool {
        if let Some(version) = &self.version {
            if &registration.version != version {
                return false;
            }
        }
        if let Some(status) = self.status {
            if registration.status != status {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|tag| registration.tags.iter().any(|t| t == tag))
    }

    /// Stable key for the discovery cache
    pub fn cache_key(&self, name: &str) -> String {
        let mut tags = self.tags.clone();
        tags.sort();
        format!(
            "{}|{}|{}|{}",
            name,
            self.version.as_deref().unwrap_or("*"),
            self.status.map(|s| s.as_str()).unwrap_or("*"),
            tags.join(",")
        )
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Registry summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    pub instances_by_service: HashMap<String, usize>,
    pub cached_queries: usize,
}

#[cfg(test)]
pub(crate) fn registration(name: &str, host: &str, port: u16) -> ServiceRegistration {
    ServiceRegistration {
        id: format!("{}-{}-{}-test", name, host, port),
        name: name.to_string(),
        host: host.to_string(),
        port,
        protocol: "http".to_string(),
        version: "1.0.0".to_string(),
        tags: Vec::new(),
        health_check_path: "/health".to_string(),
        metadata: HashMap::new(),
        status: ServiceStatus::Healthy,
        registered_at: Utc::now(),
        last_health_check: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let reg = registration("orders", "10.0.0.1", 8080);
        assert_eq!(reg.base_url(), "http://10.0.0.1:8080");
        assert_eq!(reg.url_for("/list"), "http://10.0.0.1:8080/list");
        assert_eq!(reg.url_for("list"), "http://10.0.0.1:8080/list");
        assert_eq!(reg.health_url(), "http://10.0.0.1:8080/health");
    }

    #[test]
    fn test_filter_matching() {
        let mut reg = registration("orders", "h", 1);
        reg.version = "2.0.0".to_string();
        reg.tags = vec!["api".to_string(), "eu".to_string()];

        assert!(DiscoveryFilter::default().matches(&reg));
        assert!(DiscoveryFilter::version("2.0.0").matches(&reg));
        assert!(!DiscoveryFilter::version("1.0.0").matches(&reg));
        assert!(DiscoveryFilter::healthy().with_tag("api").with_tag("eu").matches(&reg));
        assert!(!DiscoveryFilter::default().with_tag("us").matches(&reg));

        reg.status = ServiceStatus::Unhealthy;
        assert!(!DiscoveryFilter::healthy().matches(&reg));
    }

    #[test]
    fn test_cache_key_ignores_tag_order() {
        let a = DiscoveryFilter::default().with_tag("b").with_tag("a");
        let b = DiscoveryFilter::default().with_tag("a").with_tag("b");
        assert_eq!(a.cache_key("svc"), b.cache_key("svc"));
        assert_ne!(a.cache_key("svc"), DiscoveryFilter::default().cache_key("svc"));
    }
}
