//! Inventory resolver tests against a mock HTTP inventory service.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetexec::inventory::{
    Host, HttpInventoryClient, InventoryCache, InventoryCacheConfig, InventoryResolver, WorkGroup,
};
use fleetexec::Error;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEB_PATH: &str = "/api/v1/work_groups/web/hosts";

fn web_body() -> serde_json::Value {
    json!({
        "data": [
            {"fqdn": "web1.example.com", "tags": ["eu"]},
            {"fqdn": "web2.example.com", "tags": ["us"]}
        ]
    })
}

fn resolver_for(server: &MockServer, cache: Arc<InventoryCache>) -> InventoryResolver {
    let client = HttpInventoryClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
    InventoryResolver::new(Arc::new(client), cache)
}

fn memory_cache() -> Arc<InventoryCache> {
    Arc::new(InventoryCache::new(InventoryCacheConfig::default()))
}

fn names(hosts: &[Host]) -> Vec<String> {
    hosts.iter().map(Host::name).collect()
}

async fn seed_expired(cache: &InventoryCache, hosts: &[&str]) {
    let old = Utc::now() - chrono::Duration::hours(48);
    let hosts = hosts.iter().map(|h| Host::new(*h).with_group("web")).collect();
    cache.insert(WorkGroup::fetched_at("web", hosts, old)).await;
}

#[tokio::test]
async fn test_second_resolution_within_ttl_uses_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WEB_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(web_body()))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, memory_cache());
    let groups = vec!["web".to_string()];
    let first = resolver.resolve(&groups).await.unwrap();
    let second = resolver.resolve(&groups).await.unwrap();

    assert_eq!(first.hosts, second.hosts);
    assert_eq!(names(&first.hosts), vec!["web1.example.com", "web2.example.com"]);
    assert!(first.is_fresh() && second.is_fresh());
}

#[tokio::test]
async fn test_expired_entry_refreshed_once_for_concurrent_callers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WEB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(web_body())
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = memory_cache();
    seed_expired(&cache, &["old.example.com"]).await;
    let resolver = resolver_for(&server, cache);
    let groups = vec!["web".to_string()];

    let results = futures::future::join_all((0..10).map(|_| resolver.resolve(&groups))).await;
    for result in results {
        let resolution = result.unwrap();
        assert!(resolution.is_fresh());
        assert_eq!(names(&resolution.hosts), vec!["web1.example.com", "web2.example.com"]);
    }
}

#[tokio::test]
async fn test_failed_refresh_serves_stale_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WEB_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cache = memory_cache();
    seed_expired(&cache, &["old.example.com"]).await;
    let resolver = resolver_for(&server, cache.clone());

    let resolution = resolver.resolve(&["web".to_string()]).await.unwrap();
    assert_eq!(names(&resolution.hosts), vec!["old.example.com"]);
    assert_eq!(resolution.stale.len(), 1);
    assert_eq!(resolution.stale[0].group, "web");
    assert!(resolution.stale[0].reason.contains("503"));

    // The stale entry survives the failed refresh
    assert!(cache.get("web").await.is_some());
}

#[tokio::test]
async fn test_unavailable_without_any_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WEB_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, memory_cache());
    let err = resolver.resolve(&["web".to_string()]).await.unwrap_err();
    assert!(matches!(err, Error::InventoryUnavailable { ref group, .. } if group == "web"));
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn test_unknown_group_is_unavailable() {
    let server = MockServer::start().await;
    let resolver = resolver_for(&server, memory_cache());

    let err = resolver.resolve(&["nope".to_string()]).await.unwrap_err();
    match err {
        Error::InventoryUnavailable { group, reason } => {
            assert_eq!(group, "nope");
            assert!(reason.contains("not found"), "reason: {}", reason);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_lookup_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WEB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(web_body())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = HttpInventoryClient::new(&server.uri(), Duration::from_millis(200)).unwrap();
    let resolver = InventoryResolver::new(Arc::new(client), memory_cache());

    let err = resolver.resolve(&["web".to_string()]).await.unwrap_err();
    assert!(matches!(err, Error::InventoryUnavailable { ref reason, .. } if reason.contains("timed out")));
}

#[tokio::test]
async fn test_bare_array_and_tag_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WEB_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"fqdn": "web1", "tags": ["eu"]},
            {"fqdn": "web2", "port": 2222, "tags": ["eu", "canary"]},
            {"fqdn": "web3"}
        ])))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, memory_cache());
    let resolution = resolver.resolve_expression("%web#eu").await.unwrap();
    assert_eq!(names(&resolution.hosts), vec!["web1", "web2:2222"]);
    assert!(resolution.hosts.iter().all(|h| h.group.as_deref() == Some("web")));
}

#[tokio::test]
async fn test_persisted_groups_survive_a_new_resolver() {
    let dir = TempDir::new().unwrap();
    let config = InventoryCacheConfig::default().with_persistence(dir.path());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WEB_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(web_body()))
        .expect(1)
        .mount(&server)
        .await;
    let first = resolver_for(&server, Arc::new(InventoryCache::new(config.clone())))
        .resolve(&["web".to_string()])
        .await
        .unwrap();
    assert!(InventoryCache::entry_path(dir.path(), "web").exists());

    // A fresh process with the service gone still answers from disk
    let offline = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(0)
        .mount(&offline)
        .await;
    let cache = Arc::new(InventoryCache::new(config));
    let second = resolver_for(&offline, cache.clone())
        .resolve(&["web".to_string()])
        .await
        .unwrap();

    assert_eq!(first.hosts, second.hosts);
    assert!(second.is_fresh());
    assert_eq!(cache.stats().disk_loads, 1);
}

#[tokio::test]
async fn test_purge_removes_persisted_groups() {
    let dir = TempDir::new().unwrap();
    let cache = InventoryCache::new(InventoryCacheConfig::default().with_persistence(dir.path()));
    cache.insert(WorkGroup::new("web", vec![Host::new("web1")])).await;
    cache.insert(WorkGroup::new("db", vec![Host::new("db1")])).await;

    assert_eq!(InventoryCache::purge_dir(dir.path()).await.unwrap(), 2);
    assert_eq!(InventoryCache::purge_dir(dir.path()).await.unwrap(), 0);
    assert_eq!(
        InventoryCache::purge_dir(&dir.path().join("missing")).await.unwrap(),
        0
    );
}
