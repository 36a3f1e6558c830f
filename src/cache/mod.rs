pub mod db;
mod entries;
pub mod models;
mod tables;

pub use db::{Cache, CacheError, CacheStats, PurgeStats};
pub use models::{CacheEntry, CachedObject};
pub use tables::*;
