//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher resolves a logical name:
//!     → cache.rs (fresh entry? return first instance)
//!     → on miss/stale: single-flight refresh per service name
//!     → DiscoveryProvider::list_instances (static_provider.rs or external)
//!     → entry stored with fetched_at, shared with every waiter
//! ```
//!
//! # Design Decisions
//! - One deterministic pick per lookup: first instance in provider order
//! - Registration bypasses the cache entirely
//! - Provider errors are cloneable so one failed refresh can be shared

pub mod cache;
pub mod static_provider;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::DiscoveryCache;
pub use static_provider::StaticProvider;

/// A resolved instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
}

impl ServiceInstance {
    pub fn new(service: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let service = service.into();
        let address = address.into();
        Self {
            id: instance_id(&service, &address, port),
            service,
            address,
            port,
        }
    }

    /// `address:port`, suitable as an RPC dial target.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.authority())
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.authority(), self.id)
    }
}

/// Registration payload handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl ServiceRegistration {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        let address = address.into();
        Self {
            id: instance_id(&name, &address, port),
            name,
            address,
            port,
        }
    }
}

/// Instance ids follow `{name}-{address}-{port}`.
pub fn instance_id(name: &str, address: &str, port: u16) -> String {
    format!("{}-{}-{}", name, address, port)
}

/// Failure reported by a discovery backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("discovery backend unavailable: {0}")]
    Unavailable(String),
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),
    #[error("registration rejected: {0}")]
    Rejected(String),
}

/// Errors surfaced by [`DiscoveryCache`].
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// The provider query for `service` failed.
    #[error("failed to query discovery for service '{service}': {source}")]
    Provider {
        service: String,
        #[source]
        source: ProviderError,
    },

    /// The provider answered with zero instances.
    #[error("no instances of service '{0}' found")]
    NoInstances(String),

    /// Register/deregister failed.
    #[error("registry operation failed: {0}")]
    Registry(#[source] ProviderError),
}

/// External discovery backend.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Healthy instances of `service`, in the backend's order.
    async fn list_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, ProviderError>;

    async fn register_instance(&self, registration: ServiceRegistration) -> Result<(), ProviderError>;

    async fn deregister_instance(&self, id: &str) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_addressing() {
        let instance = ServiceInstance::new("billing", "10.0.0.5", 8080);
        assert_eq!(instance.id, "billing-10.0.0.5-8080");
        assert_eq!(instance.authority(), "10.0.0.5:8080");
        assert_eq!(instance.http_url(), "http://10.0.0.5:8080");
    }

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::Provider {
            service: "billing".into(),
            source: ProviderError::Unavailable("connection refused".into()),
        };
        assert!(err.to_string().contains("billing"));
        assert!(err.to_string().contains("connection refused"));
    }
}
