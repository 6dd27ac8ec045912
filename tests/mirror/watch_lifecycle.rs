use std::sync::Arc;

use d_mirror::CatalogServiceQuery;
use d_mirror::KvGetQuery;
use d_mirror::KvListQuery;
use d_mirror::MemStore;
use d_mirror::QueryData;
use d_mirror::Secret;
use d_mirror::SecretReadQuery;
use d_mirror::SecretValue;
use d_mirror::ServiceInstance;

use crate::commons::eventually;
use crate::commons::next_signal;
use crate::commons::start_watcher;
use crate::enable_logger;

fn web(
    id: &str,
    node: &str,
    tags: &[&str],
) -> ServiceInstance {
    ServiceInstance {
        id: id.to_string(),
        name: "web".to_string(),
        node: node.to_string(),
        address: format!("10.0.0.{}", id.len()),
        port: 8080,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn password(value: &str) -> Secret {
    Secret::default()
        .insert("password", SecretValue::String(value.to_string()))
        .with_lease(2)
}

#[tokio::test(start_paused = true)]
async fn test_mirror_follows_every_backend() -> Result<(), Box<dyn std::error::Error>> {
    enable_logger();
    let store = Arc::new(MemStore::new());
    store.put_kv("app/port", "8080");
    store.put_kv("app/db/host", "db1");
    store.put_kv("app/db/user", "svc");
    store.register_service(web("web-1", "node-b", &["prod"]));
    store.register_service(web("web-2", "node-a", &["prod"]));
    store.register_service(web("web-3", "node-c", &["canary"]));
    store.put_secret("secret/db", password("hunter2"));

    let watcher = start_watcher(&store);
    let port = watcher.register(Arc::new(KvGetQuery::new("/app/port ")?))?;
    let db = watcher.register(Arc::new(KvListQuery::new("app/db")?))?;
    let prod = watcher.register(Arc::new(CatalogServiceQuery::new("prod.web")?))?;
    let secret = watcher.register(Arc::new(SecretReadQuery::new("secret/db")?))?;

    eventually(|| watcher.all_loaded()).await;

    let value = watcher.recall(&port).unwrap();
    assert_eq!(value.as_pair().unwrap().value_str(), "8080");

    match &*watcher.recall(&db).unwrap() {
        QueryData::Pairs(pairs) => {
            let keys: Vec<&str> = pairs.iter().map(|p| p.key.as_str()).collect();
            assert_eq!(keys, vec!["host", "user"]);
        }
        other => panic!("expected pairs, got {other:?}"),
    }

    match &*watcher.recall(&prod).unwrap() {
        QueryData::ServiceInstances(instances) => {
            let nodes: Vec<&str> = instances.iter().map(|i| i.node.as_str()).collect();
            assert_eq!(nodes, vec!["node-a", "node-b"]);
        }
        other => panic!("expected service instances, got {other:?}"),
    }

    let held = watcher.recall(&secret).unwrap();
    assert_eq!(
        held.as_secret().unwrap().data.get("password"),
        Some(&SecretValue::String("hunter2".to_string()))
    );

    // A KV write wakes the blocking read right away
    let mut render = watcher.subscribe();
    let seen = render.borrow_and_update().sequence;
    store.put_kv("app/port", "9090");
    let signal = next_signal(&mut render, seen).await;
    assert!(signal.changed.contains(port.key()));
    assert_eq!(watcher.recall(&port).unwrap().as_pair().unwrap().value_str(), "9090");

    // A rotated secret shows up within its renewal window
    store.put_secret("secret/db", password("correct-horse"));
    eventually(|| {
        watcher
            .recall(&secret)
            .and_then(|d| d.as_secret().and_then(|s| s.data.get("password").cloned()))
            == Some(SecretValue::String("correct-horse".to_string()))
    })
    .await;

    // Deleting a key yields an empty value, not an error
    store.delete_kv("app/port");
    eventually(|| watcher.recall(&port).is_some_and(|d| d.is_empty())).await;
    assert!(watcher.failure(&port).is_none());

    assert!(watcher.deregister(&db));
    assert!(watcher.recall(&db).is_none());
    assert_eq!(watcher.len(), 3);

    watcher.stop().await;
    assert!(watcher.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_keeps_last_good_value() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemStore::new());
    store.put_kv("app/port", "8080");
    let watcher = start_watcher(&store);
    let port = watcher.register(Arc::new(KvGetQuery::new("app/port")?))?;
    eventually(|| watcher.all_loaded()).await;

    // The blocked read still answers; the reads after it hit the outage
    store.fail_next_reads(3);
    store.put_kv("app/port", "9090");

    eventually(|| watcher.failure(&port).is_some()).await;
    assert_eq!(watcher.recall(&port).unwrap().as_pair().unwrap().value_str(), "9090");

    eventually(|| watcher.failure(&port).is_none()).await;
    assert_eq!(watcher.recall(&port).unwrap().as_pair().unwrap().value_str(), "9090");
    assert!(watcher.all_loaded());

    watcher.stop().await;
    Ok(())
}
