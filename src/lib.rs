//! # d-mirror
//!
//! Reactive mirror of a remote configuration store.
//!
//! Consumers register [`Query`] values with a [`Watcher`]. Each distinct
//! query gets one [`View`] that long-polls the remote store on its own task;
//! results land in the [`Brain`], and consumers are woken through a
//! debounced [`RenderSignal`]. With deduplication enabled, cooperating
//! processes elect one leader per query through the store's session/lock
//! primitive and share its results instead of all hitting the store.
//!
//! ```ignore
//! let store = Arc::new(MemStore::new());
//! let watcher = Watcher::new(ClientSet::new(store), MirrorConfig::new()?)?;
//! let handle = watcher.register(Arc::new(KvGetQuery::new("app/port")?))?;
//! watcher.subscribe().changed().await?;
//! let port = watcher.recall(&handle);
//! ```

mod brain;
mod config;
mod constants;
mod dedup;
mod errors;
mod metrics;
mod query;
mod store;
mod view;
mod watcher;
pub mod utils;

pub use brain::*;
pub use config::*;
pub use dedup::*;
pub use errors::*;
pub use metrics::*;
pub use query::*;
pub use store::*;
pub use utils::*;
pub use view::*;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
mod errors_test;
