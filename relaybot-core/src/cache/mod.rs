pub mod response_cache;

pub use response_cache::{normalize_key, CacheEntry, ResponseCache};
