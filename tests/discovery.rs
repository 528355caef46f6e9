//! Discovery cache behaviour under concurrent dispatch.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use microcomms::discovery::cache::CacheSettings;
use microcomms::discovery::{DiscoveryCache, DiscoveryError, StaticProvider};
use microcomms::dispatch::{Dispatcher, ProtocolPolicy};
use microcomms::transport::{MessageRequest, Protocol};

mod common;
use common::{Behavior, CountingProvider, MockTransport};

#[tokio::test(start_paused = true)]
async fn test_concurrent_cold_dispatches_query_once() {
    let provider = CountingProvider::new(&[("billing", "10.0.0.5", 8080)], Duration::from_millis(50));
    let http = MockTransport::new(Behavior::Succeed);
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .transport(Protocol::Http, http.clone())
            .discovery(DiscoveryCache::new(provider.clone(), CacheSettings::default()))
            .build(),
    );

    let sends = (0..20).map(|i| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let request = MessageRequest::new(format!("billing/orders/{}", i));
            dispatcher
                .send(&request, ProtocolPolicy::Explicit(Protocol::Http))
                .await
        })
    });
    for result in join_all(sends).await {
        assert_eq!(result.unwrap().unwrap().status_code, 200);
    }

    assert_eq!(provider.lookups(), 1);
    assert_eq!(http.calls(), 20);
    assert!(http
        .endpoints()
        .iter()
        .all(|e| e.starts_with("http://10.0.0.5:8080/orders/")));
}

#[tokio::test(start_paused = true)]
async fn test_entries_expire_after_ttl() {
    let provider = CountingProvider::new(&[("billing", "10.0.0.5", 8080)], Duration::ZERO);
    let cache = DiscoveryCache::new(
        provider.clone(),
        CacheSettings {
            ttl: Duration::from_secs(30),
            ..Default::default()
        },
    );

    let first = cache.find_service("billing").await.unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    let second = cache.find_service("billing").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(provider.lookups(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    cache.find_service("billing").await.unwrap();
    assert_eq!(provider.lookups(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_lookups_after_expiry_query_once() {
    let provider = CountingProvider::new(&[("billing", "10.0.0.5", 8080)], Duration::from_millis(50));
    let cache = DiscoveryCache::new(
        provider.clone(),
        CacheSettings {
            ttl: Duration::from_secs(30),
            ..Default::default()
        },
    );

    cache.find_service("billing").await.unwrap();
    assert_eq!(provider.lookups(), 1);
    tokio::time::advance(Duration::from_secs(31)).await;

    let lookups = (0..20).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.find_service("billing").await })
    });
    for result in join_all(lookups).await {
        assert_eq!(result.unwrap().unwrap().authority(), "10.0.0.5:8080");
    }

    assert_eq!(provider.lookups(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_survives_registry_outage() {
    let provider = CountingProvider::new(&[("billing", "10.0.0.5", 8080)], Duration::ZERO);
    let cache = DiscoveryCache::new(
        provider.clone(),
        CacheSettings {
            ttl: Duration::from_secs(1),
            serve_stale_on_error: true,
            max_entries: 0,
        },
    );

    cache.find_service("billing").await.unwrap();
    provider.set_failing(true);
    tokio::time::advance(Duration::from_secs(2)).await;

    let stale = cache.find_service("billing").await.unwrap();
    assert_eq!(stale.authority(), "10.0.0.5:8080");
    assert!(matches!(
        cache.find_service("ledger").await,
        Err(DiscoveryError::Provider { .. })
    ));
}

#[tokio::test]
async fn test_register_and_deregister_through_cache() {
    let cache = DiscoveryCache::new(Arc::new(StaticProvider::new()), CacheSettings::default());

    let id = cache.register_service("orders", "10.0.1.1", 9000).await.unwrap();
    assert_eq!(id, "orders-10.0.1.1-9000");

    let instance = cache.find_service("orders").await.unwrap();
    assert_eq!(instance.id, id);

    cache.deregister_service(&id).await.unwrap();
    // The cached entry stays until its TTL runs out.
    assert_eq!(cache.find_service("orders").await.unwrap().id, id);

    assert!(matches!(
        cache.deregister_service(&id).await,
        Err(DiscoveryError::Registry(_))
    ));
    assert!(matches!(
        cache.find_service("unknown").await,
        Err(DiscoveryError::NoInstances(ref s)) if s == "unknown"
    ));
}
