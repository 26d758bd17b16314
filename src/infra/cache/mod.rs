//! Cache invalidation backends.

pub mod redis;

pub use self::redis::RedisCacheInvalidator;
