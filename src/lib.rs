/// Concrnt client library
///
/// A client for the Concrnt federated social protocol: identities,
/// messages, associations, profiles, timelines, and subscriptions are
/// addressed by stable identifiers and resolved to their responsible home
/// domain. The crate centers on a caching request engine (read-through
/// store, negative caching, request coalescing, stale-while-revalidate),
/// per-host liveness tracking with exponential back-off, lazy credential
/// minting, and a reconnecting realtime socket that keeps the cache
/// coherent with delivered events.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod liveness;
pub mod model;
pub mod socket;
pub mod store;
pub mod transport;

pub use auth::AuthProvider;
pub use cache::{CacheEngine, CacheOptions, CachePolicy};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use liveness::LivenessTracker;
pub use socket::{Listener, TimelineSocket};
pub use store::{Entry, KvStore, MemoryStore, RedisStore, SqliteStore};
