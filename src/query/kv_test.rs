use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::*;
use crate::test_utils::enable_logger;
use crate::test_utils::mem_clients;
use crate::test_utils::short_wait_opts;

#[tokio::test]
async fn test_kv_get_absent_key_is_empty_not_error() {
    let (_store, clients) = mem_clients();
    let query = KvGetQuery::new("missing").unwrap();

    let (data, meta) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    assert_eq!(data, QueryData::Pair(None));
    assert!(data.is_empty());
    assert!(meta.last_index > 0);
}

#[tokio::test]
async fn test_kv_get_returns_value_and_index() {
    let (store, clients) = mem_clients();
    let index = store.put_kv("app/port", "8080");
    let query = KvGetQuery::new("/app/port").unwrap();

    let (data, meta) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    let pair = data.as_pair().unwrap();
    assert_eq!(pair.value_str(), "8080");
    assert_eq!(meta.last_index, index);
}

#[tokio::test]
async fn test_kv_get_long_poll_wakes_on_write() {
    enable_logger();
    let (store, clients) = mem_clients();
    let query = Arc::new(KvGetQuery::new("app/port").unwrap());
    let (_, meta) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    let opts = QueryOptions {
        wait_index: meta.last_index,
        wait_time: Some(Duration::from_secs(30)),
        ..Default::default()
    };
    let q = query.clone();
    let c = clients.clone();
    let poll = tokio::spawn(async move { q.fetch(&c, opts).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!poll.is_finished());
    let index = store.put_kv("app/port", "9090");

    let (data, meta) = timeout(Duration::from_secs(1), poll).await.unwrap().unwrap().unwrap();
    assert_eq!(data.as_pair().unwrap().value_str(), "9090");
    assert_eq!(meta.last_index, index);
}

#[tokio::test]
async fn test_kv_get_unrelated_write_keeps_index() {
    let (store, clients) = mem_clients();
    store.put_kv("app/a", "1");
    let query = KvGetQuery::new("app/a").unwrap();
    let (_, first) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    store.put_kv("app/b", "2");
    let (_, second) = query.fetch(&clients, short_wait_opts(first.last_index)).await.unwrap();

    assert_eq!(first.last_index, second.last_index);
}

#[tokio::test]
async fn test_stop_unblocks_long_poll_and_poisons_later_fetches() {
    let (_store, clients) = mem_clients();
    let query = Arc::new(KvGetQuery::new("app/port").unwrap());
    let (_, meta) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    let opts = QueryOptions {
        wait_index: meta.last_index,
        wait_time: Some(Duration::from_secs(60)),
        ..Default::default()
    };
    let q = query.clone();
    let c = clients.clone();
    let poll = tokio::spawn(async move { q.fetch(&c, opts).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    query.stop();
    let result = timeout(Duration::from_millis(10), poll).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_stopped());

    query.stop();
    let later = query.fetch(&clients, short_wait_opts(0)).await;
    assert!(later.unwrap_err().is_stopped());
}

#[tokio::test]
async fn test_kv_list_returns_relative_keys_and_skips_folder() {
    let (store, clients) = mem_clients();
    store.put_kv("app/", "");
    store.put_kv("app/db/host", "db1");
    store.put_kv("app/port", "8080");
    store.put_kv("other/x", "1");
    let query = KvListQuery::new("/app/").unwrap();

    let (data, _) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    let QueryData::Pairs(pairs) = data else {
        panic!("unexpected data: {data:?}");
    };
    let keys: Vec<_> = pairs.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys, vec!["db/host", "port"]);
}

#[tokio::test]
async fn test_kv_list_ignores_sibling_tree_with_shared_prefix() {
    let (store, clients) = mem_clients();
    store.put_kv("app/port", "8080");
    store.put_kv("apple/x", "1");
    let list = KvListQuery::new("app/").unwrap();
    let keys = KvKeysQuery::new("app").unwrap();

    let (data, first) = list.fetch(&clients, short_wait_opts(0)).await.unwrap();
    let QueryData::Pairs(pairs) = data else {
        panic!("unexpected data: {data:?}");
    };
    let names: Vec<_> = pairs.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(names, vec!["port"]);
    let (data, _) = keys.fetch(&clients, short_wait_opts(0)).await.unwrap();
    assert_eq!(data, QueryData::Keys(vec!["port".to_string()]));

    // Writes under the sibling leave the change token alone
    store.put_kv("apple/y", "2");
    let (_, second) = list.fetch(&clients, short_wait_opts(first.last_index)).await.unwrap();
    assert_eq!(first.last_index, second.last_index);
}

#[tokio::test]
async fn test_kv_list_index_moves_on_delete() {
    let (store, clients) = mem_clients();
    store.put_kv("app/a", "1");
    store.put_kv("app/b", "2");
    let query = KvListQuery::new("app").unwrap();
    let (_, first) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    store.delete_kv("app/b");
    let (data, second) = query.fetch(&clients, short_wait_opts(first.last_index)).await.unwrap();

    assert!(second.last_index > first.last_index);
    assert_eq!(data, QueryData::Pairs(vec![crate::test_utils::pair("a", "1", first.last_index - 1)]));
}

#[tokio::test]
async fn test_kv_keys_empty_prefix_lists_everything() {
    let (store, clients) = mem_clients();
    store.put_kv("a", "1");
    store.put_kv("b/c", "2");
    let query = KvKeysQuery::new("").unwrap();

    let (data, _) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    assert_eq!(data, QueryData::Keys(vec!["a".to_string(), "b/c".to_string()]));
}
