use std::sync::Arc;
use std::time::Duration;

use crate::ClientSet;
use crate::KvPair;
use crate::MemStore;
use crate::QueryOptions;
use crate::ResponseMetadata;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// A store plus a client set backed by it, for both KV and secrets
pub fn mem_clients() -> (Arc<MemStore>, ClientSet) {
    let store = Arc::new(MemStore::new());
    let clients = ClientSet::new(store.clone()).with_secrets(store.clone());
    (store, clients)
}

pub fn pair(
    key: &str,
    value: &str,
    modify_index: u64,
) -> KvPair {
    KvPair {
        key: key.to_string(),
        value: value.as_bytes().to_vec(),
        flags: 0,
        create_index: modify_index,
        modify_index,
    }
}

pub fn meta(last_index: u64) -> ResponseMetadata {
    ResponseMetadata::with_index(last_index)
}

/// Options with a short blocking window so tests never hang on a long-poll
pub fn short_wait_opts(wait_index: u64) -> QueryOptions {
    QueryOptions {
        wait_index,
        wait_time: Some(Duration::from_millis(200)),
        ..Default::default()
    }
}
