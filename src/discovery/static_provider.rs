//! In-process discovery backend seeded from configuration.
//!
//! Used when no external registry is available and by the CLI.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::schema::ServiceEntry;
use crate::discovery::{DiscoveryProvider, ProviderError, ServiceInstance, ServiceRegistration};

/// Service name -> instances, in registration order.
#[derive(Debug, Default)]
pub struct StaticProvider {
    services: DashMap<String, Vec<ServiceInstance>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[ServiceEntry]) -> Self {
        let provider = Self::new();
        for entry in entries {
            provider.insert(ServiceInstance::new(&entry.name, &entry.address, entry.port));
        }
        provider
    }

    /// Add an instance. Re-registering the same id replaces it in place.
    pub fn insert(&self, instance: ServiceInstance) {
        let mut instances = self.services.entry(instance.service.clone()).or_default();
        match instances.iter().position(|i| i.id == instance.id) {
            Some(pos) => instances[pos] = instance,
            None => instances.push(instance),
        }
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

#[async_trait]
impl DiscoveryProvider for StaticProvider {
    async fn list_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, ProviderError> {
        Ok(self
            .services
            .get(service)
            .map(|instances| instances.value().clone())
            .unwrap_or_default())
    }

    async fn register_instance(&self, registration: ServiceRegistration) -> Result<(), ProviderError> {
        if registration.name.is_empty() {
            return Err(ProviderError::Rejected("service name is empty".into()));
        }
        self.insert(ServiceInstance {
            id: registration.id,
            service: registration.name,
            address: registration.address,
            port: registration.port,
        });
        Ok(())
    }

    async fn deregister_instance(&self, id: &str) -> Result<(), ProviderError> {
        let mut removed = false;
        for mut entry in self.services.iter_mut() {
            let before = entry.len();
            entry.retain(|i| i.id != id);
            removed |= entry.len() != before;
        }
        self.services.retain(|_, instances| !instances.is_empty());

        if removed {
            Ok(())
        } else {
            Err(ProviderError::UnknownInstance(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_list() {
        let provider = StaticProvider::new();
        provider
            .register_instance(ServiceRegistration::new("billing", "10.0.0.1", 8080))
            .await
            .unwrap();
        provider
            .register_instance(ServiceRegistration::new("billing", "10.0.0.2", 8080))
            .await
            .unwrap();

        let instances = provider.list_instances("billing").await.unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].address, "10.0.0.1");
        assert!(provider.list_instances("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reregister_replaces() {
        let provider = StaticProvider::new();
        let reg = ServiceRegistration::new("billing", "10.0.0.1", 8080);
        provider.register_instance(reg.clone()).await.unwrap();
        provider.register_instance(reg).await.unwrap();

        assert_eq!(provider.list_instances("billing").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deregister() {
        let provider = StaticProvider::from_entries(&[ServiceEntry {
            name: "billing".into(),
            address: "10.0.0.1".into(),
            port: 8080,
        }]);

        provider.deregister_instance("billing-10.0.0.1-8080").await.unwrap();
        assert_eq!(provider.service_count(), 0);

        let err = provider.deregister_instance("billing-10.0.0.1-8080").await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownInstance(_)));
    }
}
