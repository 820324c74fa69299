pub mod cache_janitor;
pub mod memory_cache;

pub use cache_janitor::CacheJanitor;
pub use memory_cache::{JsonCache, MemoryCacheService};
