use std::sync::Arc;

use d_mirror::KvGetQuery;
use d_mirror::MemStore;
use d_mirror::QueryHandle;
use d_mirror::Watcher;

use crate::commons::eventually;
use crate::commons::start_dedup_watcher;
use crate::enable_logger;

fn port_of(
    watcher: &Watcher,
    handle: &QueryHandle,
) -> Option<String> {
    watcher
        .recall(handle)
        .and_then(|d| d.as_pair().map(|p| p.value_str().into_owned()))
}

fn is_leader(
    watcher: &Watcher,
    handle: &QueryHandle,
) -> bool {
    watcher.dedup().is_some_and(|d| d.is_leader(handle.key()))
}

#[tokio::test(start_paused = true)]
async fn test_instances_share_one_fetch_and_fail_over() -> Result<(), Box<dyn std::error::Error>> {
    enable_logger();
    let store = Arc::new(MemStore::new());
    store.put_kv("app/port", "8080");

    let a = start_dedup_watcher(&store, "a");
    let ha = a.register(Arc::new(KvGetQuery::new("app/port")?))?;
    eventually(|| is_leader(&a, &ha)).await;

    let b = start_dedup_watcher(&store, "b");
    let hb = b.register(Arc::new(KvGetQuery::new("app/port")?))?;

    eventually(|| port_of(&a, &ha).as_deref() == Some("8080")).await;
    eventually(|| port_of(&b, &hb).as_deref() == Some("8080")).await;
    assert!(!is_leader(&b, &hb));
    let lock = a.dedup().unwrap().lock_path(ha.key());
    assert_eq!(store.lock_holder(&lock), a.dedup().unwrap().lease(ha.key()).unwrap().session);

    // The follower learns about changes through the leader's payload
    store.put_kv("app/port", "9090");
    eventually(|| port_of(&b, &hb).as_deref() == Some("9090")).await;
    assert_eq!(b.dedup().unwrap().lease(hb.key()).unwrap().leader.as_deref(), Some("a"));

    // The leader goes away; the survivor takes over and fetches for real
    a.stop().await;
    assert!(a.dedup().unwrap().lease(ha.key()).is_none());
    eventually(|| is_leader(&b, &hb)).await;

    store.put_kv("app/port", "7070");
    eventually(|| port_of(&b, &hb).as_deref() == Some("7070")).await;
    assert!(b.dedup().unwrap().lease(hb.key()).unwrap().generation >= 3);

    b.stop().await;
    assert_eq!(store.lock_holder(&lock), None);
    Ok(())
}
