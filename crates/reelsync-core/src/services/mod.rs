//! Async services shared by the façade, the scheduler and the CLI.

mod store;

pub use store::WatchlistStore;
