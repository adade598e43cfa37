//! The shared streaming cache: a fan-out buffer that owns a single
//! upstream reader, hands out independent listener cursors, and is
//! wrapped by a per-URL [`ConnectionCache`] that guarantees at most one
//! upstream fetch per URL.

pub mod connection;
pub mod connection_cache;
pub mod listener;
pub mod stream;

pub use connection::{Connection, ResponseView};
pub use connection_cache::ConnectionCache;
pub use listener::Listener;
pub use stream::{Stream, UpstreamReader};
