//! Redis-based caching layer
//!
//! Shared storage for exchange rates and pending-payment metadata when the
//! service runs as more than one instance. Everything that uses it also has an
//! in-memory implementation, so Redis being unavailable degrades the service
//! instead of stopping it.

pub mod keys;

#[cfg(feature = "cache")]
#[allow(clippy::module_inception)]
pub mod cache;
#[cfg(feature = "cache")]
pub mod error;

#[cfg(feature = "cache")]
pub mod pool;

#[cfg(feature = "cache")]
pub use cache::{Cache, RedisCache};
#[cfg(feature = "cache")]
pub use error::CacheError;
#[cfg(feature = "cache")]
pub use pool::{health_check, init_cache_pool, CachePoolConfig, RedisPool};
